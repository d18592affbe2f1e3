//! Error types for the audio bridge

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// No capture-capable device exists on the default host.
    #[error("No devices found on host {host}; devices seen: [{}]", .seen.join(", "))]
    NoDevicesFound { host: String, seen: Vec<String> },

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// VBAN header encode/decode errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Packet too short: {0} bytes, header needs 28")]
    TooShort(usize),

    #[error("Bad magic: {0:?}")]
    BadMagic([u8; 4]),

    #[error("Sample rate index out of range: {0}")]
    SampleRateIndex(u8),

    #[error("Sample rate not in the VBAN table: {0}")]
    UnsupportedSampleRate(u32),

    #[error("Baud rate not in the VBAN table: {0}")]
    UnsupportedBaudRate(u32),

    #[error("Stream name is {0} bytes, limit is 16")]
    StreamNameTooLong(usize),

    #[error("Samples per frame out of range 1..=256: {0}")]
    SamplesPerFrame(u16),

    #[error("Channel count out of range 1..=256: {0}")]
    Channels(u16),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Address resolution failed for {0}")]
    Resolve(String),

    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),

    #[error("Already running")]
    AlreadyRunning,
}

/// Jitter buffer setup errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("buffering_min ({min} bytes) must be below buffering_max ({max} bytes)")]
    InvertedThresholds { min: usize, max: usize },

    #[error("buffering_max ({max} bytes) is smaller than one frame ({frame} bytes)")]
    MaxBelowFrame { max: usize, frame: usize },

    #[error("Frame length must be non-zero")]
    EmptyFrame,
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
