//! Command-line interface for the ironview fleet supervisor.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use ironview_api::ServerState;
use ironview_core::config;
use ironview_devices::{AdapterRegistry, Supervisor, SupervisorSettings, ValueCache};
use ironview_discovery::{DiscoveryService, RunOptions};
use ironview_storage::Stores;

/// ironview - discover, inventory and poll industrial controllers.
#[derive(Parser, Debug)]
#[command(name = "ironview")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Start the supervisor and the HTTP API.
    Serve {
        /// Host to bind to.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to bind to.
        #[arg(short, long, default_value_t = 8420)]
        port: u16,
    },
    /// Run one discovery cycle and print its stats.
    Discover {
        /// Restrict the scan to these interfaces.
        #[arg(short, long)]
        interfaces: Vec<String>,
        /// Leave found devices inactive instead of activating them.
        #[arg(long)]
        no_activate: bool,
        /// Let discovery overwrite operator-managed devices.
        #[arg(long)]
        overwrite_existing: bool,
    },
    /// Delete readings older than the retention window and exit.
    Prune {
        /// Override RETENTION_DAYS.
        #[arg(long)]
        days: Option<u64>,
    },
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "ironview=debug,info" } else { "ironview=info,warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    if config::log_json() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }
}

fn open_stores() -> Result<Arc<Stores>> {
    let path = config::data_dir().join("ironview.redb");
    let stores = Stores::open(&path)
        .map_err(ironview_core::Error::from)
        .with_context(|| format!("opening storage at {}", path.display()))?;
    info!("storage ready at {}", stores.path());
    Ok(stores)
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<ironview_core::Error>()
        .map(|e| e.exit_code())
        .unwrap_or(1)
}

const INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    let code = match run(args.command).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

async fn run(command: Command) -> Result<i32> {
    match command {
        Command::Serve { host, port } => run_serve(host, port).await,
        Command::Discover { interfaces, no_activate, overwrite_existing } => {
            run_discover(interfaces, !no_activate, overwrite_existing).await
        }
        Command::Prune { days } => run_prune(days).await,
    }
}

async fn run_serve(host: String, port: u16) -> Result<i32> {
    let ip: IpAddr = host
        .parse()
        .map_err(|_| ironview_core::Error::Config(format!("invalid bind host: {host}")))?;
    let addr = SocketAddr::new(ip, port);

    let stores = open_stores()?;
    let registry = Arc::new(AdapterRegistry::with_defaults());
    info!("adapters registered: {:?}", registry.registered());
    let cache = ValueCache::new();
    let supervisor = Supervisor::new(
        stores.clone(),
        registry,
        cache,
        SupervisorSettings::default(),
    );
    let discovery = DiscoveryService::new(stores.clone());

    let started = supervisor.start_all_from_store().await;
    info!(started, "pollers up");

    let (stop_tx, stop_rx) = watch::channel(false);
    let reconcile = supervisor.spawn_reconcile_loop(stop_rx.clone());
    let retention = spawn_retention_task(stores.clone(), stop_rx);

    let state = ServerState::new(stores, supervisor.clone(), discovery);
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    };

    ironview_api::serve(addr, state, shutdown)
        .await
        .map_err(ironview_core::Error::Io)?;

    // Orderly teardown: background loops first, then the fleet.
    let _ = stop_tx.send(true);
    supervisor.stop_all().await;
    let _ = reconcile.await;
    let _ = retention.await;
    info!("clean shutdown");
    Ok(0)
}

/// Prune readings older than the retention window, once a day.
fn spawn_retention_task(
    stores: Arc<Stores>,
    mut stop_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let cutoff = chrono::Utc::now().timestamp_millis()
                        - (config::retention_days() as i64) * 24 * 60 * 60 * 1000;
                    let stores = stores.clone();
                    let result =
                        tokio::task::spawn_blocking(move || stores.readings.prune_before(cutoff))
                            .await;
                    match result {
                        Ok(Ok(deleted)) => info!(deleted, "retention pass finished"),
                        Ok(Err(e)) => warn!("retention pass failed: {e}"),
                        Err(e) => warn!("retention task join error: {e}"),
                    }
                }
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

async fn run_discover(
    interfaces: Vec<String>,
    auto_activate: bool,
    overwrite_existing: bool,
) -> Result<i32> {
    let stores = open_stores()?;
    let discovery = DiscoveryService::new(stores);

    let options = RunOptions {
        interfaces: (!interfaces.is_empty()).then_some(interfaces),
        auto_activate,
        overwrite_existing,
    };

    tokio::select! {
        result = discovery.run(options) => {
            let stats = result.map_err(|e| ironview_core::Error::Config(e.to_string()))?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(0)
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("discovery interrupted");
            Ok(INTERRUPTED)
        }
    }
}

async fn run_prune(days: Option<u64>) -> Result<i32> {
    let stores = open_stores()?;
    let days = days.unwrap_or_else(config::retention_days);
    let cutoff = chrono::Utc::now().timestamp_millis() - (days as i64) * 24 * 60 * 60 * 1000;

    tokio::select! {
        result = tokio::task::spawn_blocking(move || stores.readings.prune_before(cutoff)) => {
            let deleted = result
                .map_err(|e| ironview_core::Error::Persistence(e.to_string()))?
                .map_err(ironview_core::Error::from)?;
            println!("deleted {deleted} reading(s) older than {days} day(s)");
            Ok(0)
        }
        _ = tokio::signal::ctrl_c() => Ok(INTERRUPTED),
    }
}
