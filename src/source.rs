//! The pull interface
//!
//! [`StreamSource`] is what the voice transport reads from every 20 ms. It
//! wraps exactly one of the two sources, picked from configuration, and
//! always returns a full frame: captured or received audio when there is
//! some, silence otherwise.

use std::sync::Arc;

use crate::audio::buffer::{Frame, JitterBuffer, SharedJitterBuffer};
use crate::audio::capture::DeviceFrameSource;
use crate::config::{AppConfig, SourceMode};
use crate::error::Result;
use crate::network::receiver::{NetworkReceiver, ReceiverStats};

/// Network receiver plus the jitter buffer it fills
pub struct NetworkSource {
    receiver: NetworkReceiver,
    buffer: SharedJitterBuffer,
    frame_len: usize,
}

impl NetworkSource {
    /// Build the buffer and receiver. Nothing is bound until `start()`.
    pub fn new(config: &AppConfig) -> Result<Self> {
        let frame_len = config.audio.frame_bytes();
        let buffer = Arc::new(JitterBuffer::new(
            &config.jitter,
            config.audio.bytes_per_sec(),
            frame_len,
        )?);
        let receiver = NetworkReceiver::new(&config.network, &config.audio, buffer.clone());
        Ok(Self {
            receiver,
            buffer,
            frame_len,
        })
    }

    pub fn start(&mut self) -> Result<()> {
        self.receiver.start()?;
        Ok(())
    }

    pub fn read_frame(&self) -> Frame {
        self.buffer.pop_frame(self.frame_len)
    }

    pub fn cleanup(&mut self) {
        self.receiver.stop();
    }

    pub fn receiver(&self) -> &NetworkReceiver {
        &self.receiver
    }

    pub fn buffer(&self) -> &SharedJitterBuffer {
        &self.buffer
    }

    pub fn stats(&self) -> ReceiverStats {
        self.receiver.stats()
    }
}

/// Exactly one active audio source
pub enum StreamSource {
    Device(DeviceFrameSource),
    Network(NetworkSource),
}

impl StreamSource {
    /// Build the source `config.mode` selects. Device mode opens
    /// `audio.device_id` right away; network mode binds on `start()`.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        match config.mode {
            SourceMode::Device => {
                let mut source = DeviceFrameSource::new(&config.audio);
                source.change_device(config.audio.device_id)?;
                Ok(StreamSource::Device(source))
            }
            SourceMode::Network => Ok(StreamSource::Network(NetworkSource::new(config)?)),
        }
    }

    /// Begin producing audio. Device sources are already running.
    pub fn start(&mut self) -> Result<()> {
        match self {
            StreamSource::Device(_) => Ok(()),
            StreamSource::Network(source) => source.start(),
        }
    }

    /// One frame of exactly `frame_len()` bytes
    pub fn read(&mut self) -> Frame {
        match self {
            StreamSource::Device(source) => source
                .read_frame()
                .unwrap_or_else(|| Frame::silence(source.frame_len())),
            StreamSource::Network(source) => source.read_frame(),
        }
    }

    pub fn frame_len(&self) -> usize {
        match self {
            StreamSource::Device(source) => source.frame_len(),
            StreamSource::Network(source) => source.frame_len,
        }
    }

    /// Switch capture device; only meaningful for device sources
    pub fn change_device(&mut self, id: i32) -> Result<()> {
        match self {
            StreamSource::Device(source) => Ok(source.change_device(id)?),
            StreamSource::Network(_) => {
                tracing::warn!("Ignoring device change to {} in network mode", id);
                Ok(())
            }
        }
    }

    /// Release the device or socket. Idempotent.
    pub fn cleanup(&mut self) {
        match self {
            StreamSource::Device(source) => source.cleanup(),
            StreamSource::Network(source) => source.cleanup(),
        }
    }

    /// Tear this source down and build the one `config` asks for
    pub fn replace(&mut self, config: &AppConfig) -> Result<()> {
        self.cleanup();
        let mut next = StreamSource::from_config(config)?;
        next.start()?;
        *self = next;
        Ok(())
    }
}
