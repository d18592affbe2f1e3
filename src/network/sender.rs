//! VBAN sender
//!
//! Reads fixed 256-sample chunks from a [`PcmInput`], prefixes each with a
//! VBAN header carrying an incrementing frame counter, and sends it without
//! waiting for anything back. A datagram that can't be sent is counted and
//! forgotten.

use std::io::ErrorKind;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::capture::PcmInput;
use crate::config::SenderConfig;
use crate::constants::{BYTES_PER_SAMPLE, MAX_PACKET_SIZE};
use crate::error::{NetworkError, ProtocolError, Result};
use crate::network::udp::connect_sender;
use crate::protocol::header::{encode_header, encode_packet, VbanHeader};
use crate::protocol::text::encode_text;

#[derive(Default)]
struct Counters {
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    packets_dropped: AtomicU64,
}

/// Sender statistics
#[derive(Debug, Clone, Default)]
pub struct SenderStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub packets_dropped: u64,
    pub frame_counter: u32,
}

/// Socket, input and header template; moves onto the send thread while
/// running.
struct SendCore {
    socket: UdpSocket,
    input: Box<dyn PcmInput>,
    header: VbanHeader,
    chunk_bytes: usize,
    counters: Arc<Counters>,
}

impl SendCore {
    /// `Ok(false)` once the input has closed
    fn send_next(&mut self) -> std::result::Result<bool, NetworkError> {
        let Some(pcm) = self.input.read_chunk(self.chunk_bytes) else {
            return Ok(false);
        };

        self.header.frame_counter = self.header.frame_counter.wrapping_add(1);
        let packet = encode_packet(&self.header, &pcm)
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;

        match self.socket.send(&packet) {
            Ok(n) => {
                self.counters.packets_sent.fetch_add(1, Ordering::Relaxed);
                self.counters.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
                Ok(true)
            }
            Err(e) => {
                self.counters.packets_dropped.fetch_add(1, Ordering::Relaxed);
                if e.kind() == ErrorKind::WouldBlock {
                    tracing::trace!("Send buffer full, dropped frame {}", self.header.frame_counter);
                    Ok(true)
                } else {
                    Err(NetworkError::SendFailed(e.to_string()))
                }
            }
        }
    }
}

/// Streams one capture input to one destination
pub struct NetworkSender {
    core: Option<SendCore>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<SendCore>>,
    counters: Arc<Counters>,
    last_counter: u32,
}

impl NetworkSender {
    /// Connect to the configured destination. The input's rate and channel
    /// count go into every header.
    pub fn new(config: &SenderConfig, input: Box<dyn PcmInput>) -> Result<Self> {
        let header = VbanHeader::audio(
            config.stream_name.clone(),
            input.sample_rate(),
            config.chunk_samples,
            input.channels(),
            0,
        )?;
        // Reject a bad name or chunk size here, not on every send
        encode_header(&header)?;

        let chunk_bytes = config.chunk_samples as usize * input.channels() as usize * BYTES_PER_SAMPLE;
        let packet_len = crate::protocol::HEADER_LEN + chunk_bytes;
        if packet_len > MAX_PACKET_SIZE {
            return Err(NetworkError::PacketTooLarge(packet_len).into());
        }

        let socket = connect_sender(&config.dest_host, config.dest_port)?;
        tracing::info!(
            "Sending '{}' to {}:{} ({}Hz, {} ch, {} samples/packet)",
            config.stream_name,
            config.dest_host,
            config.dest_port,
            input.sample_rate(),
            input.channels(),
            config.chunk_samples
        );

        let counters = Arc::new(Counters::default());
        Ok(Self {
            core: Some(SendCore {
                socket,
                input,
                header,
                chunk_bytes,
                counters: counters.clone(),
            }),
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            counters,
            last_counter: 0,
        })
    }

    /// Read, encode and send one chunk on the calling thread.
    ///
    /// Returns `Ok(false)` when the input has closed.
    pub fn run_once(&mut self) -> Result<bool> {
        let core = self.core.as_mut().ok_or(NetworkError::AlreadyRunning)?;
        let sent = core.send_next()?;
        self.last_counter = core.header.frame_counter;
        Ok(sent)
    }

    /// Send continuously on a background thread until `stop()`
    pub fn start(&mut self) -> Result<()> {
        let mut core = self.core.take().ok_or(NetworkError::AlreadyRunning)?;
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("vban-sender".to_string())
            .spawn(move || {
                while running.load(Ordering::Relaxed) {
                    match core.send_next() {
                        Ok(true) => {}
                        Ok(false) => {
                            tracing::warn!("Capture input closed, sender stopping");
                            break;
                        }
                        Err(e) => tracing::warn!("Failed to send packet: {}", e),
                    }
                }
                running.store(false, Ordering::SeqCst);
                core
            })
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop the background thread. Safe to call when not running.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            match handle.join() {
                Ok(core) => {
                    self.last_counter = core.header.frame_counter;
                    self.core = Some(core);
                }
                Err(_) => tracing::error!("Send thread panicked"),
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> SenderStats {
        SenderStats {
            packets_sent: self.counters.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            packets_dropped: self.counters.packets_dropped.load(Ordering::Relaxed),
            frame_counter: self.last_counter,
        }
    }
}

impl Drop for NetworkSender {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sends text sub-protocol packets, e.g. remote commands
pub struct TextSender {
    socket: UdpSocket,
    stream_name: String,
    baud_rate: u32,
    frame_counter: u32,
}

impl TextSender {
    pub fn new(host: &str, port: u16, stream_name: &str, baud_rate: u32) -> Result<Self> {
        // Validate name and baud rate up front
        encode_text(stream_name, baud_rate, 0, "")?;
        let socket = connect_sender(host, port)?;
        Ok(Self {
            socket,
            stream_name: stream_name.to_string(),
            baud_rate,
            frame_counter: 0,
        })
    }

    /// Send `text`; loss is not reported back
    pub fn send(&mut self, text: &str) -> std::result::Result<(), ProtocolError> {
        self.frame_counter = self.frame_counter.wrapping_add(1);
        let packet = encode_text(&self.stream_name, self.baud_rate, self.frame_counter, text)?;
        if let Err(e) = self.socket.send(&packet) {
            tracing::warn!("Text packet {} not sent: {}", self.frame_counter, e);
        }
        Ok(())
    }
}
