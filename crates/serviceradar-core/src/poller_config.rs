//! Configuration for the poller control loop (spec §4.6, §6).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

fn default_log_level() -> String {
    "info".to_string()
}

fn default_listen() -> String {
    "0.0.0.0:50052".to_string()
}

fn default_chunk_threshold() -> usize {
    100
}

/// One agent this poller is responsible for polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEndpoint {
    /// Logical identity stamped onto `StatusRequest`/`ResultsRequest`.
    pub agent_id: String,
    /// `host:port` the agent's `AgentService` listens on.
    pub address: String,
    /// Service name/type passed through to `GetStatus`/`GetResults`.
    pub service_name: String,
    #[serde(default = "default_service_type")]
    pub service_type: String,
}

fn default_service_type() -> String {
    "sweep".to_string()
}

/// Top-level poller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    pub agents: Vec<AgentEndpoint>,

    /// `host:port` the core's `PollerService` listens on.
    pub core_address: String,

    /// Poll period, in seconds.
    pub poll_interval_secs: u64,

    /// Per-RPC timeout, in milliseconds.
    pub rpc_timeout_ms: u64,

    pub poller_id: String,
    pub partition: String,
    pub source_ip: String,

    /// Number of `ServiceStatus` entries above which `StreamStatus` is
    /// used instead of a single `ReportStatus` call.
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold: usize,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Ambient: address this binary's own status listener binds, if any.
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl PollerConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {path:?}: {e}")))?;
        Self::load_from_str(&contents)
    }

    pub fn load_from_str(contents: &str) -> Result<Self> {
        let config: PollerConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.agents.is_empty() {
            return Err(Error::Config("at least one agent must be configured".to_string()));
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::Config("poll_interval_secs must be greater than 0".to_string()));
        }
        if self.rpc_timeout_ms == 0 {
            return Err(Error::Config("rpc_timeout_ms must be greater than 0".to_string()));
        }
        if self.poller_id.is_empty() || self.partition.is_empty() || self.source_ip.is_empty() {
            return Err(Error::Config(
                "poller_id, partition, and source_ip must all be set".to_string(),
            ));
        }
        if self.core_address.is_empty() {
            return Err(Error::Config("core_address must be set".to_string()));
        }
        for agent in &self.agents {
            if agent.agent_id.is_empty() || agent.address.is_empty() {
                return Err(Error::Config(
                    "each agent must have a non-empty agent_id and address".to_string(),
                ));
            }
        }
        Ok(())
    }
}
