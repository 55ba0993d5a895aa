//! RelayCam server

// Use jemalloc for better memory management (optional feature)
#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::{Context, Result};
use clap::Parser;
use relaycam::config::Config;
use relaycam::{gpio, open_camera, web, AppState, RelayBank};
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "relaycam")]
#[command(about = "MJPEG camera streaming and relay control over HTTP")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Override the control server port
    #[arg(long)]
    control_port: Option<u16>,

    /// Override the stream server port
    #[arg(long)]
    stream_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    fmt().with_env_filter(filter).with_target(false).init();

    info!("RelayCam starting");

    let mut config = load_config(&cli.config)?;
    if let Some(port) = cli.control_port {
        config.server.control_port = port;
    }
    if let Some(port) = cli.stream_port {
        config.server.stream_port = port;
    }
    config.validate()?;

    info!(
        source = ?config.camera.source,
        format = %config.camera.pixel_format,
        frame_size = %config.camera.frame_size,
        gpio = ?config.gpio.backend,
        "Configuration loaded"
    );

    let camera = open_camera(&config.camera).context("failed to open camera")?;
    let pins = gpio::open_pins(&config.gpio).context("failed to open GPIO")?;
    let relays = RelayBank::new(pins, &config.gpio).context("failed to initialise relays")?;

    let control = TcpListener::bind(config.control_addr())
        .await
        .with_context(|| format!("failed to bind control port {}", config.server.control_port))?;
    let stream = TcpListener::bind(config.stream_addr())
        .await
        .with_context(|| format!("failed to bind stream port {}", config.server.stream_port))?;

    let host = config.public_host();
    info!(
        "Camera ready: open http://{}:{}/ to connect",
        host, config.server.control_port
    );

    let state = AppState::new(camera, Arc::new(relays), Arc::new(config), host);
    web::serve(state, control, stream).await?;

    info!("Shutting down");
    Ok(())
}

fn load_config(path: &str) -> Result<Config> {
    if !Path::new(path).exists() {
        warn!(config_path = %path, "Config file not found, using defaults");
        return Ok(Config::default());
    }

    info!(config_path = %path, "Loading configuration");
    Config::load(path).with_context(|| format!("failed to load {}", path))
}
