//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;

pub use buffer::{Frame, JitterBuffer, JitterBufferStats, SharedJitterBuffer};
pub use capture::{CaptureStream, DeviceFrameSource, PcmInput};
pub use device::{device_by_index, enumerate_devices, DeviceEntry};
