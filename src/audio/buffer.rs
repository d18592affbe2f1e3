//! Jitter buffer for network audio
//!
//! Datagrams arrive in bursts; the consumer wants exactly one frame every
//! 20 ms. The buffer is a byte FIFO with two watermarks:
//!
//! - below `min` the buffer enters *buffering* and hands out silence without
//!   draining, so the queue can refill;
//! - once the queue reaches `max` buffering ends and real audio is drained
//!   one frame at a time.
//!
//! The gap between the watermarks keeps the output from flapping between
//! silence and audio under jitter. There is no hard cap on the queue.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::config::JitterConfig;
use crate::error::BufferError;

/// Queue growth past this many multiples of `max` logs a warning
const OVERGROWTH_FACTOR: usize = 4;

/// One fixed-size block of interleaved PCM handed to the consumer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame(Bytes);

impl Frame {
    /// `len` bytes of digital silence
    pub fn silence(len: usize) -> Self {
        Frame(Bytes::from(vec![0u8; len]))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_silent(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<Bytes> for Frame {
    fn from(bytes: Bytes) -> Self {
        Frame(bytes)
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

struct JitterState {
    queue: BytesMut,
    buffering: bool,
    warned_overgrowth: bool,
    bytes_pushed: u64,
    bytes_drained: u64,
    frames_played: u64,
    frames_silent: u64,
    peak_len: usize,
}

/// Byte FIFO with hysteresis buffering, shared between the receive thread
/// and the consumer.
pub struct JitterBuffer {
    state: Mutex<JitterState>,
    min_bytes: usize,
    max_bytes: usize,
}

impl JitterBuffer {
    /// Thresholds are converted with `bytes_per_sec`. `frame_len` is only
    /// used to reject a `max` that could never cover one frame.
    pub fn new(
        config: &JitterConfig,
        bytes_per_sec: usize,
        frame_len: usize,
    ) -> Result<Self, BufferError> {
        Self::with_thresholds(
            config.min_bytes(bytes_per_sec),
            config.max_bytes(bytes_per_sec),
            frame_len,
        )
    }

    pub fn with_thresholds(
        min_bytes: usize,
        max_bytes: usize,
        frame_len: usize,
    ) -> Result<Self, BufferError> {
        if frame_len == 0 {
            return Err(BufferError::EmptyFrame);
        }
        if min_bytes >= max_bytes {
            return Err(BufferError::InvertedThresholds {
                min: min_bytes,
                max: max_bytes,
            });
        }
        if max_bytes < frame_len {
            return Err(BufferError::MaxBelowFrame {
                max: max_bytes,
                frame: frame_len,
            });
        }

        Ok(Self {
            state: Mutex::new(JitterState {
                queue: BytesMut::with_capacity(max_bytes),
                buffering: true,
                warned_overgrowth: false,
                bytes_pushed: 0,
                bytes_drained: 0,
                frames_played: 0,
                frames_silent: 0,
                peak_len: 0,
            }),
            min_bytes,
            max_bytes,
        })
    }

    /// Append payload bytes at the tail
    pub fn push(&self, payload: &[u8]) {
        let mut state = self.state.lock();
        state.queue.extend_from_slice(payload);
        state.bytes_pushed += payload.len() as u64;

        let len = state.queue.len();
        state.peak_len = state.peak_len.max(len);

        let limit = self.max_bytes.saturating_mul(OVERGROWTH_FACTOR);
        if len > limit && !state.warned_overgrowth {
            state.warned_overgrowth = true;
            drop(state);
            tracing::warn!(
                "Jitter buffer holds {} bytes (> {}x buffering_max); sender may be outpacing playback",
                len,
                OVERGROWTH_FACTOR
            );
        } else if len <= self.max_bytes && state.warned_overgrowth {
            state.warned_overgrowth = false;
        }
    }

    /// Next frame of exactly `frame_len` bytes: real audio, or silence while
    /// buffering.
    pub fn pop_frame(&self, frame_len: usize) -> Frame {
        let mut state = self.state.lock();
        let len = state.queue.len();

        // A queue shorter than one frame can't be drained either
        let low_water = self.min_bytes.max(frame_len);
        if !state.buffering && len < low_water {
            state.buffering = true;
            tracing::debug!("Jitter buffer underrun at {} bytes, buffering", len);
        } else if state.buffering && len >= self.max_bytes.max(frame_len) {
            state.buffering = false;
            tracing::debug!("Jitter buffer refilled to {} bytes, playing", len);
        }

        if state.buffering {
            state.frames_silent += 1;
            return Frame::silence(frame_len);
        }

        let chunk = state.queue.split_to(frame_len).freeze();
        state.bytes_drained += frame_len as u64;
        state.frames_played += 1;
        Frame(chunk)
    }

    /// Drop everything queued and start buffering again
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.queue.clear();
        state.buffering = true;
        state.warned_overgrowth = false;
    }

    /// Bytes currently queued
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_buffering(&self) -> bool {
        self.state.lock().buffering
    }

    pub fn min_bytes(&self) -> usize {
        self.min_bytes
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn stats(&self) -> JitterBufferStats {
        let state = self.state.lock();
        JitterBufferStats {
            level: state.queue.len(),
            buffering: state.buffering,
            bytes_pushed: state.bytes_pushed,
            bytes_drained: state.bytes_drained,
            frames_played: state.frames_played,
            frames_silent: state.frames_silent,
            peak_level: state.peak_len,
        }
    }
}

/// Thread-safe handle to a jitter buffer
pub type SharedJitterBuffer = Arc<JitterBuffer>;

/// Jitter buffer statistics
#[derive(Debug, Clone)]
pub struct JitterBufferStats {
    pub level: usize,
    pub buffering: bool,
    pub bytes_pushed: u64,
    pub bytes_drained: u64,
    pub frames_played: u64,
    pub frames_silent: u64,
    pub peak_level: usize,
}

impl JitterBufferStats {
    /// Share of pulled frames that were silence
    pub fn silence_rate(&self) -> f32 {
        let total = self.frames_played + self.frames_silent;
        if total == 0 {
            0.0
        } else {
            self.frames_silent as f32 / total as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const FRAME: usize = 3840;
    const BYTES_PER_SEC: usize = 192_000;

    fn standard_buffer() -> JitterBuffer {
        let config = JitterConfig {
            buffering_min: 1.0,
            buffering_max: 3.0,
        };
        JitterBuffer::new(&config, BYTES_PER_SEC, FRAME).unwrap()
    }

    #[test]
    fn test_reject_bad_thresholds() {
        assert_eq!(
            JitterBuffer::with_thresholds(100, 100, 10).err(),
            Some(BufferError::InvertedThresholds { min: 100, max: 100 })
        );
        assert_eq!(
            JitterBuffer::with_thresholds(0, 1000, 3840).err(),
            Some(BufferError::MaxBelowFrame { max: 1000, frame: 3840 })
        );
        assert_eq!(
            JitterBuffer::with_thresholds(0, 1000, 0).err(),
            Some(BufferError::EmptyFrame)
        );
    }

    #[test]
    fn test_hysteresis_cycle() {
        let buffer = standard_buffer();

        // 0.48 s of pulls on an empty buffer: silence, nothing drained
        for _ in 0..24 {
            let frame = buffer.pop_frame(FRAME);
            assert_eq!(frame.len(), FRAME);
            assert!(frame.is_silent());
        }
        assert!(buffer.is_buffering());
        assert_eq!(buffer.len(), 0);

        // Tone bytes so drained frames are distinguishable from silence
        let chunk = vec![0x11u8; BYTES_PER_SEC];
        for _ in 0..3 {
            buffer.push(&chunk);
        }
        assert_eq!(buffer.len(), 3 * BYTES_PER_SEC);

        let first = buffer.pop_frame(FRAME);
        assert!(!buffer.is_buffering());
        assert_eq!(first.as_bytes(), &chunk[..FRAME]);

        // Drains one frame per pull until below min
        let mut played = 1;
        loop {
            let frame = buffer.pop_frame(FRAME);
            assert_eq!(frame.len(), FRAME);
            if frame.is_silent() {
                break;
            }
            played += 1;
        }

        assert!(buffer.is_buffering());
        assert!(buffer.len() < BYTES_PER_SEC);
        assert!(buffer.len() + FRAME >= BYTES_PER_SEC);
        assert_eq!(played * FRAME, 3 * BYTES_PER_SEC - buffer.len());

        // Still buffering: queue is left alone
        let level = buffer.len();
        buffer.pop_frame(FRAME);
        assert_eq!(buffer.len(), level);
    }

    #[test]
    fn test_accumulates_while_buffering() {
        let buffer = standard_buffer();
        buffer.push(&vec![1u8; 100_000]);
        assert!(buffer.pop_frame(FRAME).is_silent());
        buffer.push(&vec![1u8; 100_000]);
        assert!(buffer.pop_frame(FRAME).is_silent());
        assert_eq!(buffer.len(), 200_000);
    }

    #[test]
    fn test_min_below_frame_never_short() {
        let buffer = JitterBuffer::with_thresholds(0, 8, 4).unwrap();
        buffer.push(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);

        assert_eq!(buffer.pop_frame(4).as_bytes(), &[1, 2, 3, 4]);
        assert_eq!(buffer.pop_frame(4).as_bytes(), &[5, 6, 7, 8]);
        // Two bytes left: too few for a frame, so back to buffering
        assert!(buffer.pop_frame(4).is_silent());
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_clear_resets() {
        let buffer = standard_buffer();
        buffer.push(&vec![1u8; 4 * BYTES_PER_SEC]);
        buffer.pop_frame(FRAME);
        assert!(!buffer.is_buffering());

        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.is_buffering());
    }

    #[test]
    fn test_stats() {
        let buffer = standard_buffer();
        buffer.pop_frame(FRAME);
        buffer.push(&vec![7u8; 3 * BYTES_PER_SEC]);
        buffer.pop_frame(FRAME);

        let stats = buffer.stats();
        assert_eq!(stats.frames_silent, 1);
        assert_eq!(stats.frames_played, 1);
        assert_eq!(stats.bytes_pushed, 3 * BYTES_PER_SEC as u64);
        assert_eq!(stats.bytes_drained, FRAME as u64);
        assert_eq!(stats.peak_level, 3 * BYTES_PER_SEC);
        assert!((stats.silence_rate() - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_concurrent_push_pop() {
        let buffer = Arc::new(standard_buffer());
        let producer = {
            let buffer = buffer.clone();
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    buffer.push(&[3u8; 1024]);
                }
            })
        };

        let mut drained = 0;
        for _ in 0..500 {
            let frame = buffer.pop_frame(FRAME);
            assert_eq!(frame.len(), FRAME);
            if !frame.is_silent() {
                drained += FRAME;
            }
        }
        producer.join().unwrap();

        assert_eq!(buffer.len(), 1000 * 1024 - drained);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Push(usize),
        Pop,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![(0usize..5000).prop_map(Op::Push), Just(Op::Pop)]
    }

    proptest! {
        #[test]
        fn prop_length_is_conserved(ops in proptest::collection::vec(op(), 0..200)) {
            let buffer = JitterBuffer::with_thresholds(4000, 12000, 1000).unwrap();
            let mut pushed = 0usize;
            let mut drained = 0usize;

            for op in ops {
                match op {
                    Op::Push(n) => {
                        buffer.push(&vec![1u8; n]);
                        pushed += n;
                    }
                    Op::Pop => {
                        let frame = buffer.pop_frame(1000);
                        prop_assert_eq!(frame.len(), 1000);
                        if !frame.is_silent() {
                            drained += 1000;
                        }
                    }
                }
                prop_assert_eq!(buffer.len(), pushed - drained);
            }
        }
    }
}
