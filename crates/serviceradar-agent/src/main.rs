//! Sweep agent binary: runs the sweep engine on a fixed interval and
//! serves `AgentService` so pollers can pull results (spec §4, §6).

mod results_cache;
mod service;

use anyhow::{Context, Result};
use clap::Parser;
use results_cache::ResultsCache;
use serviceradar_core::Config;
use serviceradar_proto::agent_service_server::AgentServiceServer;
use serviceradar_sweep::SweepEngine;
use service::Agent;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use ulid::Ulid;

#[derive(Parser, Debug)]
#[command(name = "serviceradar-agent", about = "ServiceRadar sweep agent")]
struct Args {
    /// Path to the agent's TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Address to bind the AgentService gRPC listener on.
    #[arg(long, default_value = "0.0.0.0:50051")]
    listen: String,

    /// Log verbosity: trace, debug, info, warn, error.
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Exit code 1: configuration could not be loaded or failed validation.
struct ConfigError(anyhow::Error);

/// Exit code 2: the gRPC listener could not bind.
struct ListenError(anyhow::Error);

fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(&args.log_level);

    match run(args).await {
        Ok(()) => {
            info!("agent shut down cleanly");
        }
        Err(e) => {
            if let Some(ConfigError(inner)) = e.downcast_ref::<ConfigError>() {
                eprintln!("configuration error: {inner:#}");
                std::process::exit(1);
            }
            if let Some(ListenError(inner)) = e.downcast_ref::<ListenError>() {
                eprintln!("listener error: {inner:#}");
                std::process::exit(2);
            }
            eprintln!("fatal error: {e:#}");
            std::process::exit(1);
        }
    }
}

impl std::fmt::Debug for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}
impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for ConfigError {}

impl std::fmt::Debug for ListenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}
impl std::fmt::Display for ListenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for ListenError {}

async fn run(args: Args) -> Result<()> {
    let config = Config::load_from_file(&args.config)
        .map_err(|e| ConfigError(anyhow::anyhow!(e)))
        .context("loading configuration")?;
    config
        .validate()
        .map_err(|e| ConfigError(anyhow::anyhow!(e)))
        .context("validating configuration")?;
    let listen_addr = args
        .listen
        .parse()
        .map_err(|e| ConfigError(anyhow::anyhow!("invalid listen address {}: {e}", args.listen)))?;

    // The engine's ResultProcessor/Store callbacks are unused by the
    // agent beyond internal retry bookkeeping; only device updates
    // (the DeviceRegistryService sink) are retained for polling.
    let cache = Arc::new(ResultsCache::new());
    let engine = Arc::new(SweepEngine::new(
        config.clone(),
        cache.clone() as Arc<dyn serviceradar_sweep::ResultProcessor>,
        cache.clone() as Arc<dyn serviceradar_sweep::Store>,
        cache.clone() as Arc<dyn serviceradar_sweep::DeviceRegistryService>,
    ));

    let shutdown = CancellationToken::new();
    let sweep_shutdown = shutdown.clone();
    let sweep_engine = engine.clone();
    let sweep_cache = cache.clone();
    let interval = config.interval();
    let sweep_task = tokio::spawn(async move {
        run_sweep_loop(sweep_engine, sweep_cache, interval, sweep_shutdown).await;
    });

    let server = Agent::new(cache, engine.completion());
    let server_shutdown = shutdown.clone();
    info!(%listen_addr, "starting AgentService listener");
    let serve_result = tonic::transport::Server::builder()
        .add_service(AgentServiceServer::new(server))
        .serve_with_shutdown(listen_addr, async move {
            tokio::select! {
                _ = server_shutdown.cancelled() => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("received shutdown signal");
                }
            }
        })
        .await;

    shutdown.cancel();
    let _ = sweep_task.await;

    serve_result.map_err(|e| ListenError(anyhow::anyhow!(e)))?;
    Ok(())
}

async fn run_sweep_loop(
    engine: Arc<SweepEngine>,
    cache: Arc<ResultsCache>,
    interval: std::time::Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            started = ticker.tick() => {
                let sequence = Ulid::new().to_string();
                cache.begin_cycle(sequence.clone());
                let cycle_cancel = shutdown.clone();
                if let Err(e) = engine.run_cycle(sequence, cycle_cancel).await {
                    warn!(error = %e, "sweep cycle failed");
                }
                // `MissedTickBehavior::Skip` silently drops ticks that
                // land while this cycle is still running; log it so an
                // overrunning interval is visible (spec §4.5: overlapping
                // cycles must not occur, and the drop must be logged).
                if started.elapsed() > interval {
                    warn!(
                        overrun = ?started.elapsed(),
                        "sweep cycle exceeded the configured interval, dropping overlapping tick(s)"
                    );
                }
            }
        }
    }
}
