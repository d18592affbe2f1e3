//! UDP socket construction
//!
//! Sockets are built with socket2 so address reuse can be set before
//! binding, then handed out as plain non-blocking std sockets.

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};

use crate::error::NetworkError;

/// Every address `host:port` resolves to, in resolver order
pub fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, NetworkError> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| NetworkError::Resolve(format!("{}:{} ({})", host, port, e)))?
        .collect();

    if addrs.is_empty() {
        return Err(NetworkError::Resolve(format!("{}:{} (no addresses)", host, port)));
    }
    Ok(addrs)
}

fn new_udp_socket(addr: &SocketAddr) -> std::io::Result<Socket> {
    Socket::new(Domain::for_address(*addr), Type::DGRAM, Some(Protocol::UDP))
}

fn bind_one(addr: &SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = new_udp_socket(addr)?;
    socket.set_reuse_address(true)?;
    socket.bind(&SockAddr::from(*addr))?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Bind a non-blocking receive socket on the first candidate that accepts it.
///
/// Candidates are tried in resolver order; only when all of them fail is
/// the bind reported as failed.
pub fn bind_receiver(host: &str, port: u16) -> Result<UdpSocket, NetworkError> {
    let candidates = resolve(host, port)?;
    let mut failures = Vec::new();

    for addr in &candidates {
        match bind_one(addr) {
            Ok(socket) => {
                tracing::debug!("Bound receive socket on {}", addr);
                return Ok(socket);
            }
            Err(e) => {
                tracing::debug!("Bind on {} failed: {}", addr, e);
                failures.push(format!("{}: {}", addr, e));
            }
        }
    }

    Err(NetworkError::BindFailed(failures.join("; ")))
}

fn connect_one(dest: &SocketAddr) -> std::io::Result<UdpSocket> {
    let local: SocketAddr = match dest {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = new_udp_socket(dest)?;
    socket.bind(&SockAddr::from(local))?;
    socket.connect(&SockAddr::from(*dest))?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Non-blocking socket connected to `host:port`, for fire-and-forget sends
pub fn connect_sender(host: &str, port: u16) -> Result<UdpSocket, NetworkError> {
    let candidates = resolve(host, port)?;
    let mut failures = Vec::new();

    for dest in &candidates {
        match connect_one(dest) {
            Ok(socket) => {
                tracing::debug!("Send socket connected to {}", dest);
                return Ok(socket);
            }
            Err(e) => failures.push(format!("{}: {}", dest, e)),
        }
    }

    Err(NetworkError::ConnectionFailed(failures.join("; ")))
}

/// Which source addresses the receiver accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderFilter {
    /// Accept datagrams from anywhere
    Any,
    /// Accept only this address; v4-mapped v6 addresses compare as v4
    Addr(IpAddr),
}

impl SenderFilter {
    /// `any`, `*` or an empty host mean no filtering; anything else is
    /// resolved once, here.
    pub fn resolve(host: &str) -> Result<Self, NetworkError> {
        let host = host.trim();
        if host.is_empty() || host == "*" || host.eq_ignore_ascii_case(crate::constants::ANY_SENDER)
        {
            return Ok(SenderFilter::Any);
        }
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SenderFilter::Addr(ip.to_canonical()));
        }
        let addr = resolve(host, 0)?[0];
        Ok(SenderFilter::Addr(addr.ip().to_canonical()))
    }

    pub fn accepts(&self, source: &SocketAddr) -> bool {
        match self {
            SenderFilter::Any => true,
            SenderFilter::Addr(ip) => source.ip().to_canonical() == *ip,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_ephemeral() {
        let socket = bind_receiver("127.0.0.1", 0).unwrap();
        let local = socket.local_addr().unwrap();
        assert!(local.port() != 0);

        // Non-blocking: an empty read returns WouldBlock instead of hanging
        let mut buf = [0u8; 64];
        let err = socket.recv_from(&mut buf).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_bind_conflict_reported() {
        // Plain std socket without SO_REUSEADDR holds the port exclusively
        // on platforms that enforce it; elsewhere the second bind succeeds.
        let holder = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = holder.local_addr().unwrap().port();
        match bind_receiver("127.0.0.1", port) {
            Ok(_) => {}
            Err(NetworkError::BindFailed(msg)) => assert!(msg.contains("127.0.0.1")),
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    #[test]
    fn test_unresolvable_host() {
        assert!(matches!(
            bind_receiver("no-such-host.invalid", 6980),
            Err(NetworkError::Resolve(_))
        ));
    }

    #[test]
    fn test_connected_send_reaches_receiver() {
        let receiver = bind_receiver("127.0.0.1", 0).unwrap();
        let port = receiver.local_addr().unwrap().port();
        let sender = connect_sender("127.0.0.1", port).unwrap();

        sender.send(b"ping").unwrap();

        let mut buf = [0u8; 16];
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            match receiver.recv_from(&mut buf) {
                Ok((n, _)) => {
                    assert_eq!(&buf[..n], b"ping");
                    break;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    assert!(std::time::Instant::now() < deadline);
                    std::thread::sleep(std::time::Duration::from_millis(5));
                }
                Err(e) => panic!("{}", e),
            }
        }
    }

    #[test]
    fn test_sender_filter() {
        let from_a: SocketAddr = "10.0.0.5:6980".parse().unwrap();
        let from_b: SocketAddr = "10.0.0.6:6980".parse().unwrap();
        let mapped: SocketAddr = "[::ffff:10.0.0.5]:1234".parse().unwrap();

        let any = SenderFilter::resolve("any").unwrap();
        assert_eq!(any, SenderFilter::Any);
        assert!(any.accepts(&from_a) && any.accepts(&from_b));
        assert_eq!(SenderFilter::resolve("*").unwrap(), SenderFilter::Any);

        let only_a = SenderFilter::resolve("10.0.0.5").unwrap();
        assert!(only_a.accepts(&from_a));
        assert!(only_a.accepts(&mapped));
        assert!(!only_a.accepts(&from_b));
    }
}
