/*!
 * Bluesmith Bluetooth Management Daemon
 * Device discovery, pairing and connection on top of bluetoothctl
 */

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod bluetooth;
mod config;
mod ipc;

use bluetooth::{event_channel, BluetoothManager, Reply};
use config::DaemonConfig;
use ipc::IpcServer;

#[derive(Parser)]
#[command(name = "bluesmithd")]
#[command(about = "Bluesmith Bluetooth Management Daemon")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "/etc/bluesmith/bluesmithd.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon
    Run,
    /// Show adapter power state
    Status,
    /// List known devices
    Devices,
    /// List paired devices
    Paired,
    /// List connected devices
    Attached,
    /// Pair (and by default connect) a device
    Pair { id: String },
    /// Connect a device
    Connect { id: String },
    /// Untrust and remove a device
    Unpair { id: String },
    /// Remove a device
    Remove { id: String },
    /// Scan for nearby devices, printing events as they arrive
    Scan {
        /// How long to scan for
        #[arg(short, long, default_value_t = 10)]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("bluesmithd={}", log_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let config = DaemonConfig::load(&cli.config)?;
    let manager = BluetoothManager::new(&config.bluetooth);

    let reply = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => return run_daemon(config, manager).await,
        Commands::Scan { seconds } => return scan(&manager, Duration::from_secs(seconds)).await,
        Commands::Status => manager.status().await,
        Commands::Devices => manager.list_known().await,
        Commands::Paired => manager.list_paired().await,
        Commands::Attached => manager.list_attached().await,
        Commands::Pair { id } => manager.pair_and_connect(&id).await,
        Commands::Connect { id } => manager.connect(&id).await,
        Commands::Unpair { id } => manager.unpair(&id).await,
        Commands::Remove { id } => manager.remove(&id).await,
    };

    print_reply(&reply)
}

async fn run_daemon(config: DaemonConfig, manager: BluetoothManager) -> Result<()> {
    info!("Bluesmith daemon starting...");

    let socket_path = Path::new(&config.socket_path);
    if socket_path.exists() {
        std::fs::remove_file(socket_path)
            .with_context(|| format!("removing stale socket {}", socket_path.display()))?;
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating socket directory {}", parent.display()))?;
    }

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("binding {}", socket_path.display()))?;
    let manager = Arc::new(manager);
    let ipc_server = IpcServer::new(listener, manager.clone());

    info!("Bluesmith daemon ready on socket: {}", config.socket_path);

    let result = tokio::select! {
        result = ipc_server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            Ok(())
        }
    };

    manager.stop_scan().await;
    if let Err(e) = std::fs::remove_file(socket_path) {
        error!("Failed to remove socket {}: {}", socket_path.display(), e);
    }
    result
}

async fn scan(manager: &BluetoothManager, duration: Duration) -> Result<()> {
    let (events, mut receiver) = event_channel(manager.event_buffer());
    let reply = manager.start_scan(events).await;
    if !reply.success {
        return print_reply(&reply);
    }

    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            event = receiver.recv() => match event {
                Some(event) => println!("{}", serde_json::to_string(&event)?),
                None => break,
            },
            _ = &mut deadline => break,
        }
    }

    manager.stop_scan().await;
    print_reply(&manager.scan_status().await)
}

fn print_reply(reply: &Reply) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(reply)?);
    if !reply.success {
        std::process::exit(1);
    }
    Ok(())
}
