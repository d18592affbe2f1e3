//! VBAN receiver
//!
//! Owns a non-blocking UDP socket and a background thread that reads
//! datagrams, filters them, and pushes accepted payloads into the jitter
//! buffer. The thread checks a running flag on every iteration and sleeps
//! one poll interval when the socket has nothing, so `stop()` returns within
//! about one interval.

use parking_lot::Mutex;
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::SharedJitterBuffer;
use crate::config::{AudioConfig, NetworkConfig};
use crate::constants::RECV_BUFFER_SIZE;
use crate::error::NetworkError;
use crate::network::udp::{bind_receiver, SenderFilter};
use crate::protocol::header::{decode_header, payload, VbanHeader, DATA_FORMAT_INT16};

/// Backwards counter jump beyond which the sender is assumed to have restarted
const COUNTER_RESYNC_WINDOW: u32 = 1024;

const DATA_FORMAT_MASK: u8 = 0x07;

/// Receiver lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Idle,
    Binding,
    /// Socket bound, loop not yet running
    Listening,
    Receiving,
    /// Loop ended on request
    Cancelled,
    /// Loop ended (or never started) on a socket error
    Error,
}

/// Why a datagram was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Too short, bad magic, or bad rate index
    Malformed,
    NotAudio,
    WrongStream,
    WrongSender,
    /// Sample rate, channel count or sample type differ from the configured
    /// format
    FormatMismatch,
}

/// Outcome of inspecting one datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept(VbanHeader),
    Discard(DiscardReason),
}

/// Per-datagram validation for one configured stream.
///
/// Packets in a different format are rejected rather than queued: the
/// consumer reads a fixed format and the payload is never resampled.
pub struct PacketFilter {
    stream_name: String,
    sender: SenderFilter,
    sample_rate: u32,
    channels: u16,
    last_counter: Option<u32>,
    last_mismatch: Option<(Option<u32>, u16, u8)>,
    frames_lost: u64,
}

impl PacketFilter {
    pub fn new(stream_name: &str, sender: SenderFilter, sample_rate: u32, channels: u16) -> Self {
        Self {
            stream_name: stream_name.to_string(),
            sender,
            sample_rate,
            channels,
            last_counter: None,
            last_mismatch: None,
            frames_lost: 0,
        }
    }

    pub fn inspect(&mut self, data: &[u8], source: &SocketAddr) -> Verdict {
        let header = match decode_header(data) {
            Ok(header) => header,
            Err(e) => {
                tracing::trace!("Dropping datagram from {}: {}", source, e);
                return Verdict::Discard(DiscardReason::Malformed);
            }
        };

        tracing::trace!(
            "R VBAN {:?} {:?}Hz {}samp {}chan fmt:{} name:{} frame:{}",
            header.sub_protocol,
            header.sample_rate(),
            header.samples_per_frame,
            header.channels,
            header.data_format,
            header.stream_name,
            header.frame_counter
        );

        if !header.is_audio() {
            return Verdict::Discard(DiscardReason::NotAudio);
        }
        if header.stream_name != self.stream_name {
            return Verdict::Discard(DiscardReason::WrongStream);
        }
        if !self.sender.accepts(source) {
            return Verdict::Discard(DiscardReason::WrongSender);
        }

        let rate = header.sample_rate();
        let format = header.data_format & DATA_FORMAT_MASK;
        if rate != Some(self.sample_rate)
            || header.channels != self.channels
            || format != DATA_FORMAT_INT16
        {
            let seen = (rate, header.channels, format);
            if self.last_mismatch != Some(seen) {
                self.last_mismatch = Some(seen);
                tracing::warn!(
                    "Stream '{}' switched to {:?}Hz/{}ch fmt {:#04x}, expected {}Hz/{}ch 16-bit; dropping its packets",
                    self.stream_name,
                    rate,
                    header.channels,
                    format,
                    self.sample_rate,
                    self.channels
                );
            }
            return Verdict::Discard(DiscardReason::FormatMismatch);
        }
        self.last_mismatch = None;

        self.track_counter(header.frame_counter);
        Verdict::Accept(header)
    }

    fn track_counter(&mut self, counter: u32) {
        if let Some(prev) = self.last_counter {
            let ahead = counter.wrapping_sub(prev);
            if ahead == 0 {
                return;
            }
            if ahead >= u32::MAX / 2 {
                // Late packets don't move the counter; a long way back means
                // the sender started over
                if prev.wrapping_sub(counter) <= COUNTER_RESYNC_WINDOW {
                    return;
                }
                tracing::debug!(
                    "Stream '{}' counter went back from {} to {}, resyncing",
                    self.stream_name,
                    prev,
                    counter
                );
            } else {
                self.frames_lost += (ahead - 1) as u64;
            }
        }
        self.last_counter = Some(counter);
    }

    /// Frames missing according to the sender's counter
    pub fn frames_lost(&self) -> u64 {
        self.frames_lost
    }
}

#[derive(Default)]
struct Counters {
    datagrams: AtomicU64,
    accepted: AtomicU64,
    bytes_accepted: AtomicU64,
    malformed: AtomicU64,
    not_audio: AtomicU64,
    wrong_stream: AtomicU64,
    wrong_sender: AtomicU64,
    format_mismatch: AtomicU64,
    frames_lost: AtomicU64,
}

impl Counters {
    fn discard(&self, reason: DiscardReason) {
        let counter = match reason {
            DiscardReason::Malformed => &self.malformed,
            DiscardReason::NotAudio => &self.not_audio,
            DiscardReason::WrongStream => &self.wrong_stream,
            DiscardReason::WrongSender => &self.wrong_sender,
            DiscardReason::FormatMismatch => &self.format_mismatch,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        for counter in [
            &self.datagrams,
            &self.accepted,
            &self.bytes_accepted,
            &self.malformed,
            &self.not_audio,
            &self.wrong_stream,
            &self.wrong_sender,
            &self.format_mismatch,
            &self.frames_lost,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

struct Shared {
    running: AtomicBool,
    state: Mutex<ReceiverState>,
    counters: Counters,
}

impl Shared {
    fn set_state(&self, state: ReceiverState) {
        *self.state.lock() = state;
    }
}

/// Receiver statistics
#[derive(Debug, Clone, Default)]
pub struct ReceiverStats {
    pub datagrams_received: u64,
    pub packets_accepted: u64,
    pub bytes_accepted: u64,
    pub malformed: u64,
    pub not_audio: u64,
    pub wrong_stream: u64,
    pub wrong_sender: u64,
    pub format_mismatch: u64,
    pub frames_lost: u64,
}

impl ReceiverStats {
    pub fn discarded(&self) -> u64 {
        self.malformed + self.not_audio + self.wrong_stream + self.wrong_sender + self.format_mismatch
    }
}

/// Datagram input for the receive loop
pub(crate) trait DatagramSocket: Send + 'static {
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

impl DatagramSocket for UdpSocket {
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf)
    }
}

/// Receives one VBAN stream into a jitter buffer
pub struct NetworkReceiver {
    network: NetworkConfig,
    sample_rate: u32,
    channels: u16,
    buffer: SharedJitterBuffer,
    shared: Arc<Shared>,
    thread_handle: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl NetworkReceiver {
    pub fn new(network: &NetworkConfig, audio: &AudioConfig, buffer: SharedJitterBuffer) -> Self {
        Self {
            network: network.clone(),
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            buffer,
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                state: Mutex::new(ReceiverState::Idle),
                counters: Counters::default(),
            }),
            thread_handle: None,
            local_addr: None,
        }
    }

    /// Bind the socket and start the receive thread.
    ///
    /// Bind failure is returned as-is and leaves the receiver in `Error`.
    pub fn start(&mut self) -> Result<(), NetworkError> {
        if self.thread_handle.is_some() {
            if self.is_running() {
                return Err(NetworkError::AlreadyRunning);
            }
            // Loop died on its own; reap it before starting over
            self.stop();
        }

        self.shared.set_state(ReceiverState::Binding);
        let bound = SenderFilter::resolve(&self.network.sender_host).and_then(|sender| {
            let socket = bind_receiver(&self.network.listen_host, self.network.port)?;
            Ok((sender, socket))
        });
        let (sender, socket) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                tracing::error!("Receiver failed to start: {}", e);
                self.shared.set_state(ReceiverState::Error);
                return Err(e);
            }
        };

        self.local_addr = socket.local_addr().ok();
        self.shared.counters.reset();
        self.shared.set_state(ReceiverState::Listening);
        self.shared.running.store(true, Ordering::SeqCst);

        let filter = PacketFilter::new(
            &self.network.stream_name,
            sender,
            self.sample_rate,
            self.channels,
        );
        let buffer = self.buffer.clone();
        let shared = self.shared.clone();
        let poll_interval = self.network.poll_interval();

        let handle = thread::Builder::new()
            .name("vban-receiver".to_string())
            .spawn(move || receive_loop(socket, filter, buffer, shared, poll_interval))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::SeqCst);
                self.shared.set_state(ReceiverState::Error);
                NetworkError::ReceiveFailed(e.to_string())
            })?;
        self.thread_handle = Some(handle);

        tracing::info!(
            "Receiving stream '{}' on {:?} from {:?}",
            self.network.stream_name,
            self.local_addr,
            sender
        );
        Ok(())
    }

    /// Stop the loop, release the socket and empty the buffer.
    ///
    /// Safe to call in any state, any number of times.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::error!("Receive thread panicked");
            }
            tracing::info!("Receiver stopped");
        }

        self.buffer.clear();
        self.local_addr = None;
        self.shared.set_state(ReceiverState::Idle);
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ReceiverState {
        *self.shared.state.lock()
    }

    /// Address the socket is bound to while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn buffer(&self) -> &SharedJitterBuffer {
        &self.buffer
    }

    pub fn stats(&self) -> ReceiverStats {
        let c = &self.shared.counters;
        ReceiverStats {
            datagrams_received: c.datagrams.load(Ordering::Relaxed),
            packets_accepted: c.accepted.load(Ordering::Relaxed),
            bytes_accepted: c.bytes_accepted.load(Ordering::Relaxed),
            malformed: c.malformed.load(Ordering::Relaxed),
            not_audio: c.not_audio.load(Ordering::Relaxed),
            wrong_stream: c.wrong_stream.load(Ordering::Relaxed),
            wrong_sender: c.wrong_sender.load(Ordering::Relaxed),
            format_mismatch: c.format_mismatch.load(Ordering::Relaxed),
            frames_lost: c.frames_lost.load(Ordering::Relaxed),
        }
    }
}

impl Drop for NetworkReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop<S: DatagramSocket>(
    socket: S,
    mut filter: PacketFilter,
    buffer: SharedJitterBuffer,
    shared: Arc<Shared>,
    poll_interval: Duration,
) {
    let mut recv_buf = vec![0u8; RECV_BUFFER_SIZE];
    let counters = &shared.counters;
    let mut failed = false;

    shared.set_state(ReceiverState::Receiving);

    while shared.running.load(Ordering::Acquire) {
        match socket.recv_from(&mut recv_buf) {
            Ok((len, source)) => {
                counters.datagrams.fetch_add(1, Ordering::Relaxed);
                let datagram = &recv_buf[..len];
                match filter.inspect(datagram, &source) {
                    Verdict::Accept(_) => {
                        let pcm = payload(datagram);
                        buffer.push(pcm);
                        counters.accepted.fetch_add(1, Ordering::Relaxed);
                        counters
                            .bytes_accepted
                            .fetch_add(pcm.len() as u64, Ordering::Relaxed);
                        counters
                            .frames_lost
                            .store(filter.frames_lost(), Ordering::Relaxed);
                    }
                    Verdict::Discard(reason) => counters.discard(reason),
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(poll_interval),
            // ICMP port-unreachable echoes and signals are not fatal
            Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::ConnectionReset) => {}
            Err(e) => {
                tracing::error!("Receive failed, stopping: {}", e);
                failed = true;
                break;
            }
        }
    }

    drop(socket);
    buffer.clear();
    shared.running.store(false, Ordering::SeqCst);
    shared.set_state(if failed {
        ReceiverState::Error
    } else {
        ReceiverState::Cancelled
    });
}
