//! Poller control loop: on each tick, polls every configured agent's
//! `AgentService` and reports aggregated status to the core's
//! `PollerService` (spec §4.6).

mod client;
mod reporter;

use anyhow::{Context, Result};
use clap::Parser;
use client::AgentPoller;
use reporter::StatusReporter;
use serviceradar_core::PollerConfig;
use serviceradar_proto::ServiceStatus;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "serviceradar-poller", about = "ServiceRadar poller control loop")]
struct Args {
    /// Path to the poller's TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Address this binary's own status endpoint binds, if enabled.
    #[arg(long, default_value = "0.0.0.0:50052")]
    listen: String,

    /// Log verbosity: trace, debug, info, warn, error.
    #[arg(long, default_value = "info")]
    log_level: String,
}

struct ConfigError(anyhow::Error);

fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
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

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(&args.log_level);

    match run(args).await {
        Ok(()) => info!("poller shut down cleanly"),
        Err(e) => {
            if e.downcast_ref::<ConfigError>().is_some() {
                eprintln!("configuration error: {e:#}");
                std::process::exit(1);
            }
            eprintln!("fatal error: {e:#}");
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = PollerConfig::load_from_file(&args.config)
        .map_err(|e| ConfigError(anyhow::anyhow!(e)))
        .context("loading configuration")?;

    let pollers: Vec<AgentPoller> = config
        .agents
        .iter()
        .cloned()
        .map(|endpoint| AgentPoller::new(endpoint, config.rpc_timeout()))
        .collect();
    let last_sequences: Arc<Mutex<HashMap<String, String>>> = Arc::new(Mutex::new(HashMap::new()));
    let reporter = StatusReporter::new(
        config.core_address.clone(),
        config.partition.clone(),
        config.source_ip.clone(),
        config.poller_id.clone(),
        config.chunk_threshold,
    );

    let mut ticker = tokio::time::interval(config.poll_interval());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                run_poll_cycle(&pollers, &last_sequences, &reporter, &config.poller_id).await;
            }
        }
    }

    Ok(())
}

async fn run_poll_cycle(
    pollers: &[AgentPoller],
    last_sequences: &Arc<Mutex<HashMap<String, String>>>,
    reporter: &StatusReporter,
    poller_id: &str,
) {
    let mut statuses = Vec::with_capacity(pollers.len());

    for poller in pollers {
        let status = poller.get_status(poller_id).await;
        let (available, message, response_time) = match status {
            Some(s) => (s.available, s.message, s.response_time),
            None => (false, Vec::new(), 0),
        };

        if available {
            let last_sequence = {
                let map = last_sequences.lock().await;
                map.get(poller.agent_id()).cloned().unwrap_or_default()
            };

            if let Some(results) = poller.get_results(poller_id, &last_sequence).await {
                debug!(
                    agent_id = poller.agent_id(),
                    has_new_data = results.has_new_data,
                    sweep_completion = ?results.sweep_completion.as_ref().map(|s| &s.state),
                    "polled agent status and completion"
                );

                let mut current_sequence = results.current_sequence;
                if results.has_new_data {
                    if let Some(stream) = poller.stream_results(poller_id, &last_sequence).await {
                        current_sequence = stream.current_sequence;
                    }
                }

                last_sequences
                    .lock()
                    .await
                    .insert(poller.agent_id().to_string(), current_sequence);
            }
        }

        statuses.push(ServiceStatus {
            service_name: poller.service_name().to_string(),
            service_type: poller.service_type().to_string(),
            agent_id: poller.agent_id().to_string(),
            available,
            message,
            response_time,
        });
    }

    reporter.report(statuses).await;
}
