use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use secrecy::SecretString;

use relay_bridge::{Bridge, BridgeConfig};
use relay_processor::{HttpProcessor, HttpProcessorConfig};
use relay_settings::RelaySettings;
use relay_telemetry::TelemetryConfig;

#[derive(Debug, Parser)]
#[command(name = "relay", version, about = "WebSocket relay for asynchronous agent jobs")]
struct Args {
    /// Settings file (defaults to ~/.relay/settings.json).
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    port: Option<u16>,

    /// Base URL of the agent processor.
    #[arg(long)]
    processor_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let path = args.config.clone().unwrap_or_else(relay_settings::settings_path);
    let mut settings = relay_settings::load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    apply_args(&mut settings, &args);

    let telemetry = relay_telemetry::init_telemetry(&telemetry_config(&settings));
    tracing::info!(settings = %path.display(), "starting relay");

    let processor = HttpProcessor::new(processor_config(&settings)).context("failed to build processor client")?;
    let bridge = Arc::new(Bridge::new(
        Arc::new(processor),
        bridge_config(&settings),
        telemetry.metrics(),
    ));

    let server_config = relay_server::ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        webhook_path: settings.server.webhook_path.clone(),
        sweep_interval: Duration::from_millis(settings.server.sweep_interval_ms),
    };
    let handle = relay_server::start(server_config, bridge)
        .await
        .context("failed to start server")?;

    tracing::info!(
        port = handle.port,
        callback_url = %settings.server.callback_url(),
        processor = %settings.processor.base_url,
        "relay ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

fn apply_args(settings: &mut RelaySettings, args: &Args) {
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(url) = &args.processor_url {
        settings.processor.base_url = url.clone();
    }
}

fn telemetry_config(settings: &RelaySettings) -> TelemetryConfig {
    let log_level = settings.logging.level.parse().unwrap_or(tracing::Level::INFO);
    TelemetryConfig {
        log_level,
        json: settings.logging.json,
        ..Default::default()
    }
}

fn processor_config(settings: &RelaySettings) -> HttpProcessorConfig {
    let mut config = HttpProcessorConfig::new(settings.processor.base_url.clone());
    config.dispatch_path = settings.processor.dispatch_path.clone();
    config.api_key = settings.processor.api_key.clone().map(SecretString::from);
    config.connect_timeout = Duration::from_millis(settings.processor.connect_timeout_ms);
    config.request_timeout = Duration::from_millis(settings.processor.request_timeout_ms);
    config
}

fn bridge_config(settings: &RelaySettings) -> BridgeConfig {
    BridgeConfig {
        callback_url: settings.server.callback_url(),
        arm_timeout: Duration::from_millis(settings.bridge.arm_timeout_ms),
        poll_interval: Duration::from_millis(settings.bridge.poll_interval_ms),
        max_poll_attempts: settings.bridge.max_poll_attempts,
        max_send_queue: settings.server.max_send_queue,
    }
}
