use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use clap::Parser;
use clap::Subcommand;
use esp32d::client::DeviceApi;
use esp32d::client::Esp32Client;
use esp32d::config::Config;
use esp32d::config::LoggingConfig;
use esp32d::config_flow;
use esp32d::registry::Registry;
use esp32d::services;
use tokio::sync::RwLock;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "esp32d")]
#[command(about = "Bridge daemon for ESP32 mode and NeoPixel controllers")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Set up every configured device and serve the HTTP API
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "esp32d.toml")]
        config: PathBuf,
    },

    /// Check that a device answers and print what it reports
    Check { host: String },

    /// Upload a firmware image to a device
    Flash { host: String, firmware: PathBuf },
}

fn init_logging(logging: &LoggingConfig) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(logging.filter())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Cmd::Run { config } => run(config).await,
        Cmd::Check { host } => {
            init_logging(&LoggingConfig::default());
            check(&host).await
        }
        Cmd::Flash { host, firmware } => {
            init_logging(&LoggingConfig::default());
            flash(&host, firmware).await
        }
    }
}

async fn run(config_path: PathBuf) -> Result<()> {
    let config = Config::from_file(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    init_logging(&config.logging);

    tracing::info!("esp32d v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!("Loaded config from: {}", config_path.display());

    let mut registry = Registry::new(reqwest::Client::new());
    for (entry_id, device) in config.enabled_devices() {
        if let Err(e) = registry.setup_device(entry_id, device).await {
            tracing::error!("[{}] Setup failed: {}", entry_id, e);
        }
    }
    tracing::info!(
        "{} of {} devices set up ({} disabled)",
        registry.len(),
        config.devices.len(),
        config.devices.len() - config.enabled_devices().count()
    );

    let registry = Arc::new(RwLock::new(registry));

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let api_task = if config.api.enabled {
        let registry = registry.clone();
        let listen = config.api.listen.clone();
        let port = config.api.port;
        Some(tokio::spawn(async move {
            if let Err(e) = esp32d::api::serve(&listen, port, registry, shutdown_rx).await {
                tracing::error!("HTTP API server failed: {:#}", e);
            }
        }))
    } else {
        tracing::info!("HTTP API disabled");
        None
    };

    tracing::info!("Press Ctrl+C to exit");
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received shutdown signal"),
        Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
    }

    let _ = shutdown_tx.send(());
    if let Some(task) = api_task {
        if let Err(e) = task.await {
            tracing::error!("HTTP API task panicked: {}", e);
        }
    }

    registry.write().await.shutdown().await;
    tracing::info!("esp32d shutdown complete");

    Ok(())
}

async fn check(host: &str) -> Result<()> {
    let http = reqwest::Client::new();
    config_flow::validate_host(&http, host).await?;

    let client = Esp32Client::new(host, http);
    println!("{} is reachable", client.base_url());
    if let Some(mode) = client.get_mode().await {
        println!("  mode: {}", mode);
    }
    if let Some(temp) = client.get_temp().await {
        println!("  temperature: {:.1} °C", temp);
    }
    if let Some(status) = client.get_status().await {
        println!("  status: {}", serde_json::to_string_pretty(&status)?);
    }
    Ok(())
}

async fn flash(host: &str, firmware: PathBuf) -> Result<()> {
    services::validate_firmware_path(&firmware)?;

    let client = Esp32Client::new(host, reqwest::Client::new());
    if !client.upload_firmware(&firmware).await {
        bail!("Firmware update of {} failed", host);
    }
    println!("Uploaded {} to {}", firmware.display(), host);
    Ok(())
}
