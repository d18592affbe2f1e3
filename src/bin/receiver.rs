//! Bridge Application
//!
//! Runs the configured source (VBAN network stream or capture device) and
//! pulls one 20 ms frame at a time, the way a voice transport would. Frames
//! can optionally be written out as raw PCM for inspection.
//!
//! Usage: `receiver [config.toml] [out.pcm]`

use anyhow::{Context, Result};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vban_bridge::{
    audio::enumerate_devices,
    config::{AppConfig, SourceMode},
    constants::FRAME_DURATION_MS,
    source::StreamSource,
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

    tracing::info!("Starting VBAN bridge");

    let mut args = std::env::args().skip(1);
    let config_path = args.next().map(PathBuf::from);
    let out_path = args.next().map(PathBuf::from);

    let config = AppConfig::load_or_default(config_path.as_deref())?;

    if config.mode == SourceMode::Device {
        println!("\n=== Available Capture Devices ===");
        match enumerate_devices() {
            Ok(devices) => {
                for device in &devices {
                    println!("  [{}] {}", device.index, device.name);
                }
            }
            Err(e) => {
                // Operator has to pick another device or switch to network mode
                tracing::error!("{}", e);
                return Err(e.into());
            }
        }
        println!();
    }

    let mut sink = match &out_path {
        Some(path) => Some(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        ),
        None => None,
    };

    let mut source = StreamSource::from_config(&config)?;
    source.start()?;

    tracing::info!(
        "Pulling {} byte frames every {}ms ({:?} mode)",
        source.frame_len(),
        FRAME_DURATION_MS,
        config.mode
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(FRAME_DURATION_MS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last_stats_time = Instant::now();
    let mut frames: u64 = 0;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Device reads may wait up to one frame duration
                let frame = tokio::task::block_in_place(|| source.read());
                frames += 1;

                if let Some(file) = sink.as_mut() {
                    if let Err(e) = file.write_all(frame.as_bytes()) {
                        tracing::warn!("Failed to write frame: {}", e);
                        sink = None;
                    }
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Shutting down");
                break;
            }
        }

        // Periodic stats
        if last_stats_time.elapsed() >= Duration::from_secs(5) {
            last_stats_time = Instant::now();

            if let StreamSource::Network(net) = &source {
                let recv = net.stats();
                let jitter = net.buffer().stats();
                tracing::info!(
                    "Receiver stats: {} datagrams, {} accepted, {} discarded, {} lost",
                    recv.datagrams_received,
                    recv.packets_accepted,
                    recv.discarded(),
                    recv.frames_lost
                );
                tracing::info!(
                    "Jitter buffer: {} bytes queued (peak {}), {}, {:.1}% silent",
                    jitter.level,
                    jitter.peak_level,
                    if jitter.buffering { "buffering" } else { "playing" },
                    jitter.silence_rate() * 100.0
                );
            } else {
                tracing::info!("{} frames pulled", frames);
            }
        }
    }

    source.cleanup();
    Ok(())
}
