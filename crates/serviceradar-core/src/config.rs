//! Configuration for the sweep core (spec §6).

use crate::error::{Error, Result};
use crate::types::{DeviceTarget, ProbeMode};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

fn default_icmp_count() -> u32 {
    1
}

fn default_concurrency() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_listen() -> String {
    "0.0.0.0:50051".to_string()
}

/// Top-level sweep configuration (spec §6's configuration table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// CIDR/IP list to sweep, outside of `device_targets`.
    #[serde(default)]
    pub networks: Vec<IpNetwork>,

    /// Logical devices, each potentially spanning multiple IPs.
    #[serde(default)]
    pub device_targets: Vec<DeviceTarget>,

    /// TCP ports to probe.
    #[serde(default)]
    pub ports: Vec<u16>,

    /// Subset of `{ICMP, TCP}` to run each cycle.
    pub sweep_modes: Vec<ProbeMode>,

    /// Cycle period, in seconds.
    pub interval_secs: u64,

    /// Worker-pool size (C2).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-probe timeout, in milliseconds.
    pub timeout_ms: u64,

    /// Echo requests per ICMP probe.
    #[serde(default = "default_icmp_count")]
    pub icmp_count: u32,

    /// Tenancy stamping.
    pub agent_id: String,
    pub poller_id: String,
    pub partition: String,

    /// Ambient: log verbosity (`trace|debug|info|warn|error`).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Ambient: the agent's gRPC listen address.
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Config {
    /// Loads and validates configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {path:?}: {e}")))?;
        Self::load_from_str(&contents)
    }

    /// Loads and validates configuration from a TOML string.
    pub fn load_from_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Per-cycle period (spec §5: soft budget = `Interval × 0.9`).
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// The soft per-cycle budget; exceeding it ends the cycle as
    /// `COMPLETED` with whatever results were gathered (spec §5).
    pub fn soft_cycle_budget(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs as f64 * 0.9)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(Error::Config("interval_secs must be greater than 0".to_string()));
        }
        if self.timeout_ms == 0 {
            return Err(Error::Config("timeout_ms must be greater than 0".to_string()));
        }
        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be greater than 0".to_string()));
        }
        if self.sweep_modes.is_empty() {
            return Err(Error::Config("sweep_modes must not be empty".to_string()));
        }
        if self.sweep_modes.contains(&ProbeMode::Tcp) && self.ports.is_empty() {
            return Err(Error::Config(
                "ports must be configured when TCP sweeping is enabled".to_string(),
            ));
        }
        if self.agent_id.is_empty() || self.poller_id.is_empty() || self.partition.is_empty() {
            return Err(Error::Config(
                "agent_id, poller_id, and partition must all be set".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_toml() -> &'static str {
        r#"
            networks = ["192.168.1.0/24"]
            ports = [80, 443]
            sweep_modes = ["Icmp", "Tcp"]
            interval_secs = 60
            timeout_ms = 2000
            agent_id = "agent-1"
            poller_id = "poller-1"
            partition = "default"
        "#
    }

    #[test]
    fn loads_minimal_config() {
        let config = Config::load_from_str(sample_toml()).unwrap();
        assert_eq!(config.concurrency, default_concurrency());
        assert_eq!(config.icmp_count, 1);
        assert_eq!(config.networks.len(), 1);
    }

    #[test]
    fn rejects_zero_interval() {
        let toml = sample_toml().replace("interval_secs = 60", "interval_secs = 0");
        assert!(Config::load_from_str(&toml).is_err());
    }

    #[test]
    fn rejects_tcp_sweep_without_ports() {
        let toml = sample_toml().replace("ports = [80, 443]", "ports = []");
        assert!(Config::load_from_str(&toml).is_err());
    }

    #[test]
    fn soft_cycle_budget_is_ninety_percent_of_interval() {
        let config = Config::load_from_str(sample_toml()).unwrap();
        assert_eq!(config.soft_cycle_budget(), Duration::from_secs_f64(54.0));
    }

    #[test]
    fn loads_from_an_on_disk_toml_fixture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, sample_toml()).unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.agent_id, "agent-1");
        assert_eq!(config.ports, vec![80, 443]);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.toml");
        assert!(Config::load_from_file(&path).is_err());
    }
}
