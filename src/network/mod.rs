//! Network subsystem for VBAN over UDP

pub mod receiver;
#[cfg(feature = "sender")]
pub mod sender;
pub mod udp;

pub use receiver::{NetworkReceiver, ReceiverState, ReceiverStats};
#[cfg(feature = "sender")]
pub use sender::{NetworkSender, SenderStats, TextSender};
pub use udp::{bind_receiver, connect_sender, resolve, SenderFilter};
