//! yourip: TCP server that tells clients their IP address and country.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use yourip::server::{Server, ServerConfig};
use yourip::{Geolocation, GeolocationConfig};

#[derive(Parser)]
#[command(name = "yourip")]
#[command(version)]
#[command(about = "Simple TCP server to return the client's IP address", long_about = None)]
struct Cli {
    /// The address to bind the TCP server to
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// Number of workers
    #[arg(short, long = "worker", default_value_t = 3)]
    workers: usize,

    /// Enable the IP geolocation service
    #[arg(short, long)]
    geolocation: bool,

    /// Hours between block list refreshes
    #[arg(long, default_value_t = yourip::config::DEFAULT_REFRESH_HOURS)]
    refresh_hours: u64,

    /// Snapshot file for the downloaded block lists
    #[arg(long, default_value = yourip::config::DEFAULT_SNAPSHOT_PATH)]
    snapshot: PathBuf,

    /// Root URL of the per-country block lists
    #[arg(long, default_value = yourip::config::DEFAULT_BASE_URL)]
    source_url: String,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> yourip::Result<()> {
    let geolocation = if cli.geolocation {
        let config = GeolocationConfig::default()
            .with_refresh_hours(cli.refresh_hours)
            .with_snapshot_path(cli.snapshot)
            .with_base_url(&cli.source_url);
        Some(Geolocation::start(config)?)
    } else {
        None
    };

    let config = ServerConfig {
        bind: cli.bind,
        workers: cli.workers,
        ..ServerConfig::default()
    };
    let resolver = geolocation.as_ref().map(|geo| Arc::clone(geo.resolver()));
    let server = Server::bind(config, resolver)?;

    log::info!(
        "Start a new listener on {} version:{}",
        server.local_addr()?,
        env!("CARGO_PKG_VERSION")
    );

    server.run()
}
