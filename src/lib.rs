//! # VBAN Bridge
//!
//! Turns a live audio stream into a pull-based source of fixed 20 ms frames.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────── NETWORK MODE ────────────────────────────────┐
//! │                                                                          │
//! │   VBAN sender ──UDP──► ┌──────────────────────────┐                      │
//! │   (bursty, lossy)      │ NetworkReceiver thread   │                      │
//! │                        │  non-blocking recv_from  │                      │
//! │                        │  decode_header / filter  │                      │
//! │                        └────────────┬─────────────┘                      │
//! │                                     │ push(payload)                      │
//! │                                     ▼                                    │
//! │                        ┌──────────────────────────┐                      │
//! │                        │ JitterBuffer             │                      │
//! │                        │  byte FIFO + hysteresis  │                      │
//! │                        └────────────┬─────────────┘                      │
//! │                                     │ pop_frame(3840)                    │
//! └─────────────────────────────────────┼────────────────────────────────────┘
//!                                       │
//! ┌───────────── DEVICE MODE ───────────┼────────────────────────────────────┐
//! │  cpal capture ──► DeviceFrameSource ┤                                    │
//! └─────────────────────────────────────┼────────────────────────────────────┘
//!                                       ▼
//!                              StreamSource::read()
//!                      (consumer pulls one frame every 20 ms)
//! ```
//!
//! The send side ([`network::sender`]) goes the other way: capture device →
//! 256-sample chunks → VBAN packets → UDP.

pub mod audio;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod source;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for the consumer side
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Samples are signed 16-bit
    pub const BYTES_PER_SAMPLE: usize = 2;

    /// The consumer pulls one frame every 20 ms
    pub const FRAME_DURATION_MS: u64 = 20;

    /// Frames per second at the 20 ms cadence
    pub const FRAMES_PER_SEC: u32 = 50;

    /// Standard VBAN UDP port
    pub const DEFAULT_VBAN_PORT: u16 = 6980;

    pub const DEFAULT_STREAM_NAME: &str = "Stream1";

    /// Sender host value that disables source address filtering
    pub const ANY_SENDER: &str = "any";

    /// Capture device id meaning "no device selected"
    pub const NO_DEVICE: i32 = -1;

    /// Sleep between empty non-blocking reads
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 20;

    pub const DEFAULT_BUFFERING_MIN_SECS: f32 = 1.0;
    pub const DEFAULT_BUFFERING_MAX_SECS: f32 = 3.0;

    /// Samples per channel in each outgoing packet
    pub const SENDER_CHUNK_SAMPLES: u16 = 256;

    /// Largest VBAN datagram by convention (28-byte header + 1436 payload)
    pub const MAX_PACKET_SIZE: usize = 1464;

    /// Receive buffer; larger than any conforming datagram
    pub const RECV_BUFFER_SIZE: usize = 2048;
}
