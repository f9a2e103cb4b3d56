//! sensorcast daemon - Sensor readings over HTTP
//!
//! Reads telemetry from serial devices or any byte stream, decodes it into
//! per-sensor readings and streams those readings to HTTP clients.
//!
//! # Usage
//!
//! ```bash
//! # Two sensors sharing one serial device, one on another
//! sensorcastd --sensors=touch+sound:/dev/ttyUSB0:readings-per-line,imu:/dev/ttyUSB1:bytes
//!
//! # Fake readings from a script
//! ./fake_readings.sh | sensorcastd --sensors=touch:/dev/stdin:readings-per-line
//!
//! # Settings from a file, port from the command line
//! sensorcastd --config /etc/sensorcast.toml --port 9100
//!
//! # Enable debug logging
//! RUST_LOG=sensorcastd=debug sensorcastd --sensors=...
//!
//! # Watch the streams
//! curl -v localhost:9000/
//! curl -v localhost:9000/touch
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::net::IpAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sensorcastd::config::{FileConfig, Overrides, RelayConfig};
use sensorcastd::monitor::spawn_monitor_task;
use sensorcastd::registry::{SensorSet, StreamRegistry};
use sensorcastd::server::GatewayServer;

/// sensorcast daemon - relay sensor readings to HTTP subscribers
#[derive(Parser, Debug)]
#[command(name = "sensorcastd", version, about)]
struct Args {
    /// Sensor specs, comma separated: sensor(+sensor)*:path:decoder
    /// (decoders: readings-per-line, bytes)
    #[arg(long, value_delimiter = ',')]
    sensors: Vec<String>,

    /// TCP port to listen for HTTP connections [default: 9000]
    #[arg(long)]
    port: Option<u16>,

    /// Address to listen on [default: 0.0.0.0]
    #[arg(long)]
    bind: Option<IpAddr>,

    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Wait between source open attempts, in milliseconds [default: 100]
    #[arg(long)]
    retry_backoff_ms: Option<u64>,

    /// Line speed for serial device sources [default: 115200]
    #[arg(long)]
    baud_rate: Option<u32>,

    /// Readings buffered per HTTP subscriber before dropping [default: 256]
    #[arg(long)]
    subscriber_buffer: Option<usize>,
}

impl Args {
    fn into_config(self) -> Result<RelayConfig> {
        let file = match &self.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };

        let overrides = Overrides {
            port: self.port,
            bind: self.bind,
            retry_backoff_ms: self.retry_backoff_ms,
            baud_rate: self.baud_rate,
            subscriber_buffer: self.subscriber_buffer,
            sensors: self.sensors,
        };

        RelayConfig::resolve(file, overrides).context("Invalid configuration")
    }
}

/// How long shutdown waits for blocked device reads before giving up.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.into_config()?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    let result = runtime.block_on(run_daemon(config));

    // File reads run on blocking threads that a quiet device never releases.
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    result
}

/// Runs the daemon (async entry point).
async fn run_daemon(config: RelayConfig) -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("sensorcastd=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "sensorcast daemon starting"
    );

    let sets: Vec<SensorSet> = config
        .sensors
        .iter()
        .cloned()
        .map(|spec| SensorSet::with_buffer(spec, config.subscriber_buffer))
        .collect();

    let registry = Arc::new(StreamRegistry::build(&sets).context("Invalid sensor configuration")?);
    info!(
        sensors = ?registry.sensor_names().iter().map(|n| n.as_str()).collect::<Vec<_>>(),
        sources = sets.len(),
        "Stream registry built"
    );

    // Create cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    // Setup signal handlers
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    // One reader per physical source
    let readers: Vec<_> = sets
        .iter()
        .map(|set| {
            set.reader(config.baud_rate)
                .with_backoff(config.retry_backoff)
                .spawn(cancel_token.clone())
        })
        .collect();
    info!(count = readers.len(), "Source readers started");

    let _monitor_handle = spawn_monitor_task(Arc::clone(&registry), cancel_token.clone());

    let server = GatewayServer::new(config.listen_addr(), registry, cancel_token.clone());
    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        cancel_token.cancel();
        return Err(e.into());
    }

    // Server has drained; wait for the readers to stop.
    cancel_token.cancel();
    for reader in readers {
        reader.join().await;
    }

    info!("sensorcast daemon stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
