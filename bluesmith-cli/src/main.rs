/*!
 * Bluesmith Bluetooth Management Client
 * Talks to bluesmithd over its Unix socket
 */

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::time::{sleep, timeout, Duration};
use tracing_subscriber::EnvFilter;

mod client;
mod display;

use client::{BluesmithClient, Request, ScanEvent};

#[derive(Parser)]
#[command(name = "bluesmith")]
#[command(about = "Bluesmith Bluetooth Management Client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Daemon socket path
    #[arg(short, long, default_value = "/run/bluesmith/bluesmith.sock")]
    socket: String,

    /// Enable debug mode
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show adapter power state and any running scan
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
    /// Scan for nearby devices
    Scan {
        /// How long to scan for
        #[arg(short, long, default_value_t = 10)]
        seconds: u64,
    },
    /// Stop a scan started by another client
    StopScan,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("bluesmith={}", log_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut client = BluesmithClient::connect(&cli.socket).await?;

    let request = match cli.command {
        Commands::Scan { seconds } => {
            return scan(&mut client, Duration::from_secs(seconds)).await;
        }
        Commands::Status => {
            let status = client.send_request(&Request::Status).await?;
            print_lines(&display::reply_lines(&status));
            if !status.success {
                std::process::exit(1);
            }
            Request::ScanStatus
        }
        Commands::Devices => Request::ListKnown,
        Commands::Paired => Request::ListPaired,
        Commands::Attached => Request::ListAttached,
        Commands::Pair { id } => Request::Pair { id },
        Commands::Connect { id } => Request::Connect { id },
        Commands::Unpair { id } => Request::Unpair { id },
        Commands::Remove { id } => Request::Remove { id },
        Commands::StopScan => Request::StopScan,
    };

    let mut reply = client.send_request(&request).await?;
    if matches!(request, Request::ScanStatus) && reply.scan.is_none() {
        // Leftover results from a finished scan are not interesting here.
        reply.devices = None;
    }
    print_lines(&display::reply_lines(&reply));
    if !reply.success {
        std::process::exit(1);
    }
    Ok(())
}

async fn scan(client: &mut BluesmithClient, duration: Duration) -> Result<()> {
    let reply = client.send_request(&Request::StartScan).await?;
    if !reply.success {
        print_lines(&display::reply_lines(&reply));
        std::process::exit(1);
    }

    let session = reply.session.as_deref();
    let deadline = sleep(duration);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            event = client.next_event() => match event? {
                None => break,
                Some(event) if event.ends(session) => {
                    println!("{}", display::event_line(&event));
                    return Ok(());
                }
                Some(ScanEvent::Ended { .. }) => {}
                Some(event) => println!("{}", display::event_line(&event)),
            },
            _ = &mut deadline => {
                client.send_request(&Request::StopScan).await?;
                break;
            }
        }
    }

    // Drain whatever was already in flight up to the end marker.
    while let Ok(Ok(Some(event))) = timeout(Duration::from_secs(2), client.next_event()).await {
        if event.ends(session) {
            break;
        }
        if !matches!(event, ScanEvent::Ended { .. }) {
            println!("{}", display::event_line(&event));
        }
    }
    println!("Scan ended");
    Ok(())
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{}", line);
    }
}
