//! Audio Sender Application
//!
//! Captures audio from a local device and streams it as VBAN over UDP.
//!
//! Usage: `sender [config.toml]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vban_bridge::{
    audio::{enumerate_devices, CaptureStream},
    config::AppConfig,
    network::NetworkSender,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting VBAN sender");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load_or_default(config_path.as_deref())?;
    let sender_config = &config.sender;

    // List available devices
    println!("\n=== Available Capture Devices ===");
    let devices = enumerate_devices()?;
    for device in &devices {
        println!("  [{}] {}", device.index, device.name);
    }
    println!();

    // First capture device unless one is configured
    let device_index = usize::try_from(sender_config.device_id).unwrap_or(devices[0].index);

    let capture = CaptureStream::open(device_index, sender_config.sample_rate, sender_config.channels)
        .with_context(|| format!("opening capture device {}", device_index))?;

    let mut sender = NetworkSender::new(sender_config, Box::new(capture))?;
    sender.start()?;

    tracing::info!("Streaming - press Ctrl+C to stop");

    let mut stats_tick = tokio::time::interval(Duration::from_secs(5));
    stats_tick.tick().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = stats_tick.tick() => {
                let stats = sender.stats();
                tracing::info!(
                    "Stats: {} packets sent, {:.1} KB sent, {} dropped",
                    stats.packets_sent,
                    stats.bytes_sent as f64 / 1024.0,
                    stats.packets_dropped
                );
                if !sender.is_running() {
                    tracing::warn!("Sender stopped on its own");
                    break;
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    sender.stop();
    Ok(())
}
