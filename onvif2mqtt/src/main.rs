use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use onvif2mqtt::logging::{init_logging, LogMode};
use onvif2mqtt::snapshot::SnapshotKind;
use onvif2mqtt::{AppConfig, CameraManager, RumqttTransport, Snapshotter};
use tracing::{info, warn};

/// Bridge ONVIF camera events and snapshots to MQTT.
#[derive(Debug, Parser)]
#[command(name = "onvif2mqtt", version, about)]
struct Cli {
    /// Configuration file (defaults to $CONFIG_PATH, then ./config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogMode::Compact)]
    log_mode: LogMode,
}

fn uses_stream_snapshots(config: &AppConfig) -> bool {
    config.cameras.iter().any(|camera| {
        camera.snapshot.as_ref().is_some_and(|s| {
            s.address
                .as_deref()
                .is_some_and(|address| SnapshotKind::resolve(s.kind, address) == SnapshotKind::Stream)
        })
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_mode)?;

    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    info!(
        cameras = config.cameras.len(),
        base_topic = %config.mqtt.base_topic,
        "Configuration loaded"
    );

    let snapshotter = Snapshotter::new();
    if uses_stream_snapshots(&config) && !snapshotter.ffmpeg_available().await {
        warn!("ffmpeg not found; stream snapshots will fail");
    }

    let (transport, mut inbound) = RumqttTransport::connect(&config.mqtt);
    let transport = Arc::new(transport);

    let manager = Arc::new(
        CameraManager::start(&config, transport.clone(), snapshotter)
            .await
            .context("Failed to start cameras")?,
    );

    let commands = {
        let manager = manager.clone();
        tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                manager.handle_command(&message).await;
            }
        })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");

    manager.shutdown().await;
    transport.shutdown().await;
    commands.abort();

    Ok(())
}
