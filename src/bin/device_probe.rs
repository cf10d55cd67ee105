//! Device probe
//!
//! Checks one controller from the command line before it is added to the
//! registry: credentials, device information and which search dialect the
//! firmware accepts.
//!
//! # Commands
//!
//! - `info` - Fetch device information
//! - `events` - Search recent events and print them normalized

use chrono::{Duration, Utc};
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use turnstile_bridge::device_gateway::{
    Device, DeviceGateway, Dialect, DirectionRole, EventSearchQuery, SearchWindow,
};
use turnstile_bridge::direction_table::DirectionTable;
use turnstile_bridge::event_normalizer::{normalize, EventSource, NormalizeContext};

/// Access-control terminal probe.
#[derive(Parser)]
#[command(name = "device_probe")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Device address (host, host:port or URL)
    #[arg(global = true, short, long, default_value = "192.168.1.64")]
    address: String,

    /// Digest username
    #[arg(global = true, short, long, default_value = "admin")]
    user: String,

    /// Digest password
    #[arg(global = true, short, long, env = "DEVICE_PASSWORD", default_value = "")]
    password: String,

    /// Request timeout in milliseconds
    #[arg(global = true, long, default_value = "5000")]
    timeout_ms: u64,

    /// Zone of the device clock (IANA name)
    #[arg(global = true, long, default_value = "UTC")]
    timezone: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch device information
    Info,

    /// Search recent events
    Events {
        /// Look back this many minutes (omit for "last N events")
        #[arg(short, long)]
        minutes: Option<i64>,

        /// Maximum events per page
        #[arg(short = 'n', long, default_value = "30")]
        max_results: u32,

        /// Allow the XML fallback dialect
        #[arg(long)]
        xml: bool,

        /// Direction role to report for this device (in, out)
        #[arg(long, default_value = "unknown")]
        role: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("turnstile_bridge=debug")
    } else {
        EnvFilter::new("turnstile_bridge=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let timezone: Tz = cli
        .timezone
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid timezone {}: {}", cli.timezone, e))?;
    let gateway = DeviceGateway::new(std::time::Duration::from_millis(cli.timeout_ms), timezone);
    let mut device = Device::new("probe", &cli.address, &cli.user, &cli.password);

    match cli.command {
        Commands::Info => {
            let info = gateway.get_device_info(&device).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::Events {
            minutes,
            max_results,
            xml,
            role,
        } => {
            device.role = DirectionRole::from_str(&role);
            if xml {
                device.dialect = Dialect::Xml;
            }

            let window = minutes.map(|m| {
                let end = Utc::now();
                SearchWindow {
                    start: end - Duration::minutes(m),
                    end,
                }
            });
            let query = EventSearchQuery::new(window, max_results);
            let outcome = gateway.search_events(&device, &query).await?;

            println!("strategy: {:?}", outcome.strategy);
            for attempt in &outcome.rejected {
                println!("  rejected: {:?} (status {})", attempt.strategy, attempt.status);
            }

            let directions = DirectionTable::from_devices(std::slice::from_ref(&device));
            let ctx = NormalizeContext {
                device_id: &device.id,
                device_address: &device.address,
                received_at: Utc::now(),
                directions: &directions,
                timezone,
                source: EventSource::Poll,
            };
            let batch = normalize(outcome.dialect, &outcome.body, &ctx);

            println!(
                "events: {} (dropped {}, more: {})",
                batch.events.len(),
                batch.dropped,
                batch.more
            );
            for event in &batch.events {
                println!("{}", serde_json::to_string(event)?);
            }
            for diagnostic in &batch.diagnostics {
                eprintln!("diagnostic: {}", diagnostic);
            }
        }
    }

    Ok(())
}
