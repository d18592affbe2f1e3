//! Audio capture from input devices
//!
//! A cpal stream is not `Send` on every platform, so each [`CaptureStream`]
//! owns a dedicated thread that builds the stream, plays it, and keeps it
//! alive until stopped. The data callback converts samples to interleaved
//! little-endian i16 and hands them over a bounded channel; readers pull
//! fixed-size blocks off the other end.

use bytes::{Bytes, BytesMut};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::buffer::Frame;
use crate::audio::device::capture_device_by_index;
use crate::config::{frame_bytes, AudioConfig};
use crate::constants::{BYTES_PER_SAMPLE, NO_DEVICE};
use crate::error::AudioError;

/// Callback chunks queued between the device thread and the reader
const CHUNK_QUEUE_CAPACITY: usize = 128;

/// How long a sender-side chunk read may wait for the device
const CHUNK_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Source of raw interleaved i16 PCM, read in caller-sized chunks
pub trait PcmInput: Send {
    /// Exactly `len` bytes, or `None` if the input is closed
    fn read_chunk(&mut self, len: usize) -> Option<Bytes>;

    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;
}

/// A running capture stream on one device
pub struct CaptureStream {
    device_index: usize,
    sample_rate: u32,
    channels: u16,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    chunks: Receiver<Vec<u8>>,
    error_rx: Receiver<AudioError>,
    pending: BytesMut,
    /// Callback chunks dropped because the reader fell behind
    overflows: Arc<AtomicU64>,
}

impl CaptureStream {
    /// Open the device at `device_index` and start capturing.
    ///
    /// Returns once the stream is playing, or with the error that stopped it
    /// from starting.
    pub fn open(device_index: usize, sample_rate: u32, channels: u16) -> Result<Self, AudioError> {
        let device = capture_device_by_index(device_index)?;
        let sample_format = device
            .default_input_config()
            .map_err(|e| AudioError::CpalError(e.to_string()))?
            .sample_format();

        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (chunk_tx, chunk_rx) = bounded::<Vec<u8>>(CHUNK_QUEUE_CAPACITY);
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();
        let overflows = Arc::new(AtomicU64::new(0));
        let overflows_for_cb = overflows.clone();

        let handle = thread::Builder::new()
            .name(format!("capture-device-{}", device_index))
            .spawn(move || {
                let stream = match sample_format {
                    SampleFormat::I16 => build_stream::<i16>(
                        &device,
                        &config,
                        chunk_tx,
                        error_tx,
                        overflows_for_cb,
                        |s| s,
                    ),
                    SampleFormat::F32 => build_stream::<f32>(
                        &device,
                        &config,
                        chunk_tx,
                        error_tx,
                        overflows_for_cb,
                        |s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16,
                    ),
                    other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
                };

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep thread alive while running
                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }

                // Stream is dropped here, stopping capture
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let started = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(AudioError::StreamError("capture thread exited".into())));
        if let Err(e) = started {
            let _ = handle.join();
            return Err(e);
        }

        tracing::info!(
            "Capture started on device {} ({}Hz, {} ch, {:?})",
            device_index,
            sample_rate,
            channels,
            sample_format
        );

        Ok(Self {
            device_index,
            sample_rate,
            channels,
            running,
            thread_handle: Some(handle),
            chunks: chunk_rx,
            error_rx,
            pending: BytesMut::new(),
            overflows,
        })
    }

    /// Exactly `len` bytes, waiting at most `timeout` for the device.
    ///
    /// If the device delivers less in time, whatever arrived is padded with
    /// silence.
    pub fn read_exact(&mut self, len: usize, timeout: Duration) -> Bytes {
        self.report_errors();

        let deadline = Instant::now() + timeout;
        while self.pending.len() < len {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.chunks.recv_timeout(remaining) {
                Ok(chunk) => self.pending.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if self.pending.len() >= len {
            return self.pending.split_to(len).freeze();
        }

        let short = self.pending.len();
        tracing::debug!(
            "Capture on device {} short by {} bytes, padding with silence",
            self.device_index,
            len - short
        );
        let mut out = self.pending.split_to(short);
        out.resize(len, 0);
        out.freeze()
    }

    fn report_errors(&self) {
        while let Ok(e) = self.error_rx.try_recv() {
            tracing::warn!("Capture device {}: {}", self.device_index, e);
        }
    }

    /// Stop capturing and join the device thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!("Capture stopped on device {}", self.device_index);
        }
        self.pending.clear();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn device_index(&self) -> usize {
        self.device_index
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }
}

impl PcmInput for CaptureStream {
    fn read_chunk(&mut self, len: usize) -> Option<Bytes> {
        if !self.is_running() {
            return None;
        }
        Some(self.read_exact(len, CHUNK_READ_TIMEOUT))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    chunk_tx: Sender<Vec<u8>>,
    error_tx: Sender<AudioError>,
    overflows: Arc<AtomicU64>,
    to_i16: fn(T) -> i16,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + 'static,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mut bytes = Vec::with_capacity(data.len() * BYTES_PER_SAMPLE);
                for &sample in data {
                    bytes.extend_from_slice(&to_i16(sample).to_le_bytes());
                }
                if chunk_tx.try_send(bytes).is_err() {
                    overflows.fetch_add(1, Ordering::Relaxed);
                }
            },
            move |err| {
                let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
            },
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}

/// Pull-based frame source over a local capture device.
///
/// Holds at most one open stream; `change_device` swaps it.
pub struct DeviceFrameSource {
    device_id: i32,
    sample_rate: u32,
    channels: u16,
    stream: Option<CaptureStream>,
}

impl DeviceFrameSource {
    /// A source with no device open
    pub fn new(audio: &AudioConfig) -> Self {
        Self {
            device_id: NO_DEVICE,
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            stream: None,
        }
    }

    /// Close the current stream and open device `id`; `-1` leaves no stream
    /// open. Reselecting the open device does nothing.
    pub fn change_device(&mut self, id: i32) -> Result<(), AudioError> {
        if id == self.device_id && (self.stream.is_some() || id == NO_DEVICE) {
            return Ok(());
        }

        self.cleanup();
        if id == NO_DEVICE {
            return Ok(());
        }

        let index = usize::try_from(id)
            .map_err(|_| AudioError::DeviceNotFound(format!("invalid device id {}", id)))?;
        let stream = CaptureStream::open(index, self.sample_rate, self.channels)?;
        self.stream = Some(stream);
        self.device_id = id;
        Ok(())
    }

    /// One frame of captured audio, waiting at most one frame duration.
    ///
    /// `None` when no device is open.
    pub fn read_frame(&mut self) -> Option<Frame> {
        let frame_len = self.frame_len();
        let duration = self.frame_duration();
        match self.stream.as_mut() {
            Some(stream) => Some(Frame::from(stream.read_exact(frame_len, duration))),
            None => {
                tracing::warn!("Audio stream unavailable, no capture device selected");
                None
            }
        }
    }

    /// Stop and close any open stream. Safe to call repeatedly.
    pub fn cleanup(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
        self.device_id = NO_DEVICE;
    }

    pub fn frame_len(&self) -> usize {
        frame_bytes(self.sample_rate, self.channels)
    }

    fn frame_duration(&self) -> Duration {
        Duration::from_millis(crate::constants::FRAME_DURATION_MS)
    }

    pub fn device_id(&self) -> i32 {
        self.device_id
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for DeviceFrameSource {
    fn drop(&mut self) {
        self.cleanup();
    }
}
