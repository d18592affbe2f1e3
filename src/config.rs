//! Application configuration
//!
//! Loaded from a TOML file. Every section has defaults, so an empty file (or
//! no file at all) yields a working receiver on the default port.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::ConfigError;
use crate::protocol::header::{sample_rate_index, STREAM_NAME_LEN};

/// Which source feeds the pull interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Local capture device
    Device,
    /// VBAN stream over UDP
    #[default]
    Network,
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub mode: SourceMode,
    pub audio: AudioConfig,
    pub network: NetworkConfig,
    pub jitter: JitterConfig,
    pub sender: SenderConfig,
}

/// PCM format of the frames handed to the consumer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture device index, -1 for none
    pub device_id: i32,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device_id: NO_DEVICE,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
        }
    }
}

impl AudioConfig {
    /// Bytes in one 20 ms frame
    pub fn frame_bytes(&self) -> usize {
        frame_bytes(self.sample_rate, self.channels)
    }

    pub fn bytes_per_sec(&self) -> usize {
        self.sample_rate as usize * self.channels as usize * BYTES_PER_SAMPLE
    }
}

/// Receive side settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local address to bind; `::` or `0.0.0.0` for all interfaces
    pub listen_host: String,
    pub port: u16,
    /// Expected sender, or `any` to accept every source address
    pub sender_host: String,
    pub stream_name: String,
    /// Sleep between empty non-blocking reads
    pub poll_interval_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            port: DEFAULT_VBAN_PORT,
            sender_host: ANY_SENDER.to_string(),
            stream_name: DEFAULT_STREAM_NAME.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl NetworkConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Jitter buffer thresholds, in seconds of audio
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct JitterConfig {
    pub buffering_min: f32,
    pub buffering_max: f32,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            buffering_min: DEFAULT_BUFFERING_MIN_SECS,
            buffering_max: DEFAULT_BUFFERING_MAX_SECS,
        }
    }
}

impl JitterConfig {
    pub fn min_bytes(&self, bytes_per_sec: usize) -> usize {
        seconds_to_bytes(self.buffering_min, bytes_per_sec)
    }

    pub fn max_bytes(&self, bytes_per_sec: usize) -> usize {
        seconds_to_bytes(self.buffering_max, bytes_per_sec)
    }
}

/// Send side settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    pub dest_host: String,
    pub dest_port: u16,
    pub stream_name: String,
    pub device_id: i32,
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel in each packet
    pub chunk_samples: u16,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            dest_host: "127.0.0.1".to_string(),
            dest_port: DEFAULT_VBAN_PORT,
            stream_name: DEFAULT_STREAM_NAME.to_string(),
            device_id: NO_DEVICE,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            chunk_samples: SENDER_CHUNK_SAMPLES,
        }
    }
}

impl AppConfig {
    /// Load and validate a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else the per-user config file if it exists,
    /// else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading config from {}", path.display());
                Self::load(&path)
            }
            _ => {
                tracing::debug!("No config file, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// `<config dir>/vban-bridge/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "vban-bridge")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_stream_name("network.stream_name", &self.network.stream_name)?;
        check_stream_name("sender.stream_name", &self.sender.stream_name)?;

        if sample_rate_index(self.sender.sample_rate).is_err() {
            return Err(ConfigError::Invalid {
                field: "sender.sample_rate",
                reason: format!("{} Hz is not a VBAN rate", self.sender.sample_rate),
            });
        }
        if self.audio.sample_rate % FRAMES_PER_SEC != 0 {
            return Err(ConfigError::Invalid {
                field: "audio.sample_rate",
                reason: format!("{} Hz does not split into 20 ms frames", self.audio.sample_rate),
            });
        }
        if self.audio.channels == 0 || self.sender.channels == 0 {
            return Err(ConfigError::Invalid {
                field: "channels",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(1..=256).contains(&self.sender.chunk_samples) {
            return Err(ConfigError::Invalid {
                field: "sender.chunk_samples",
                reason: format!("{} is outside 1..=256", self.sender.chunk_samples),
            });
        }
        if self.network.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "network.poll_interval_ms",
                reason: "a zero interval would spin".to_string(),
            });
        }

        let jitter = &self.jitter;
        if !(jitter.buffering_min >= 0.0 && jitter.buffering_min < jitter.buffering_max) {
            return Err(ConfigError::Invalid {
                field: "jitter",
                reason: format!(
                    "need 0 <= buffering_min < buffering_max, got {} / {}",
                    jitter.buffering_min, jitter.buffering_max
                ),
            });
        }
        Ok(())
    }
}

/// `sample_rate / 50 * channels * 2`
pub fn frame_bytes(sample_rate: u32, channels: u16) -> usize {
    (sample_rate / FRAMES_PER_SEC) as usize * channels as usize * BYTES_PER_SAMPLE
}

fn seconds_to_bytes(secs: f32, bytes_per_sec: usize) -> usize {
    (secs as f64 * bytes_per_sec as f64).round() as usize
}

fn check_stream_name(field: &'static str, name: &str) -> Result<(), ConfigError> {
    if name.len() > STREAM_NAME_LEN {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("'{}' is {} bytes, limit is {}", name, name.len(), STREAM_NAME_LEN),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.audio.frame_bytes(), 3840);
        assert_eq!(config.audio.bytes_per_sec(), 192_000);
        assert_eq!(config.jitter.min_bytes(192_000), 192_000);
        assert_eq!(config.jitter.max_bytes(192_000), 576_000);
    }

    #[test]
    fn test_parse_partial_file() {
        let config = AppConfig::from_toml(
            r#"
            mode = "device"

            [audio]
            device_id = 3

            [network]
            sender_host = "192.168.1.20"
            stream_name = "Desk"
            "#,
        )
        .unwrap();

        assert_eq!(config.mode, SourceMode::Device);
        assert_eq!(config.audio.device_id, 3);
        assert_eq!(config.audio.sample_rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(config.network.sender_host, "192.168.1.20");
        assert_eq!(config.network.port, DEFAULT_VBAN_PORT);
    }

    #[test]
    fn test_reject_long_stream_name() {
        let err = AppConfig::from_toml(
            r#"
            [sender]
            stream_name = "a name far longer than sixteen"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "sender.stream_name", .. }));
    }

    #[test]
    fn test_reject_inverted_thresholds() {
        let err = AppConfig::from_toml(
            r#"
            [jitter]
            buffering_min = 2.0
            buffering_max = 1.0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "jitter", .. }));
    }

    #[test]
    fn test_frame_bytes() {
        assert_eq!(frame_bytes(48000, 2), 3840);
        assert_eq!(frame_bytes(44100, 1), 1764);
    }
}
