//! Core data model: targets, probe outcomes, and device updates.
//!
//! Mirrors spec §3. `Target`/`DeviceTarget` describe what to probe;
//! `ProbeOutcome` is the result of one probe; `DeviceUpdate` is the
//! consolidated record the aggregator emits once per device per cycle.

use crate::error::Result;
use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

/// Well-known target/device-update metadata keys (spec §6).
pub mod meta_keys {
    pub const ARMIS_DEVICE_ID: &str = "armis_device_id";
    pub const INTEGRATION_ID: &str = "integration_id";
    pub const ALL_IPS: &str = "all_ips";
    pub const PRIMARY_IP: &str = "primary_ip";
    pub const AGENT_ID: &str = "agent_id";
    pub const POLLER_ID: &str = "poller_id";
    pub const PARTITION: &str = "partition";
    pub const SOURCE: &str = "source";
    pub const QUERY_LABEL: &str = "query_label";
}

/// A tagged-variant metadata value, replacing the source's dynamically
/// typed `map[string]interface{}` (spec §9 design note).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    String(String),
    Int(i64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetadataValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            MetadataValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::String(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::String(s)
    }
}

/// Provenance and tenancy metadata carried by a `Target`/`DeviceTarget`.
///
/// Ordered (`BTreeMap`) for deterministic iteration in tests and logs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetMetadata(pub BTreeMap<String, MetadataValue>);

impl TargetMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(MetadataValue::as_str)
    }

    pub fn insert_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), MetadataValue::String(value.into()));
    }

    /// Derives the logical device id per spec §3:
    /// `"armis:" + armis_device_id` if present, else `"integration:" +
    /// integration_id`, else empty (device is not aggregated).
    pub fn device_id(&self) -> String {
        if let Some(id) = self.get_str(meta_keys::ARMIS_DEVICE_ID) {
            if !id.is_empty() {
                return format!("armis:{id}");
            }
        }
        if let Some(id) = self.get_str(meta_keys::INTEGRATION_ID) {
            if !id.is_empty() {
                return format!("integration:{id}");
            }
        }
        String::new()
    }

    /// Parses the comma-joined `all_ips` key, if present.
    pub fn all_ips(&self) -> Option<Vec<IpAddr>> {
        let raw = self.get_str(meta_keys::ALL_IPS)?;
        Some(
            raw.split(',')
                .filter(|s| !s.trim().is_empty())
                .filter_map(|s| s.trim().parse::<IpAddr>().ok())
                .collect(),
        )
    }
}

/// Probe family (spec §3: `mode ∈ {ICMP, TCP}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProbeMode {
    Icmp,
    Tcp,
}

impl fmt::Display for ProbeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeMode::Icmp => write!(f, "ICMP"),
            ProbeMode::Tcp => write!(f, "TCP"),
        }
    }
}

/// A single probe specification: `(host, mode, port)`.
///
/// Two targets are scan-equivalent iff `(host, mode, port)` match
/// (spec §3 invariant) — used by the target expander for dedup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub host: IpAddr,
    pub mode: ProbeMode,
    pub port: Option<u16>,
    pub metadata: TargetMetadata,
}

impl Target {
    pub fn new(host: IpAddr, mode: ProbeMode, port: Option<u16>) -> Self {
        Self {
            host,
            mode,
            port,
            metadata: TargetMetadata::new(),
        }
    }

    /// The `(host, mode, port)` equivalence key (spec §3).
    pub fn scan_key(&self) -> (IpAddr, ProbeMode, Option<u16>) {
        (self.host, self.mode, self.port)
    }

    pub fn with_metadata(mut self, metadata: TargetMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Expands a CIDR into its usable hosts (spec §4.3 edge policies):
/// network/broadcast addresses are skipped for IPv4 prefixes ≤ 30, and
/// loopback/link-local addresses are skipped entirely. Explicit `all_ips`
/// entries bypass this function and are always probed as given.
pub fn expand_cidr_hosts(network: &IpNetwork) -> Vec<IpAddr> {
    let v4_edges = match network {
        IpNetwork::V4(net) if net.prefix() <= 30 => Some((net.network(), net.broadcast())),
        _ => None,
    };

    network
        .iter()
        .filter(|addr| {
            if is_loopback_or_link_local(addr) {
                return false;
            }
            if let (IpAddr::V4(addr4), Some((net_addr, bcast_addr))) = (*addr, v4_edges) {
                if addr4 == net_addr || addr4 == bcast_addr {
                    return false;
                }
            }
            true
        })
        .collect()
}

fn is_loopback_or_link_local(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xffc0 == 0xfe80),
    }
}

/// A logical device prior to expansion (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceTarget {
    pub network: IpNetwork,
    pub sweep_modes: Vec<ProbeMode>,
    pub source: String,
    pub metadata: TargetMetadata,
}

impl DeviceTarget {
    /// The addresses that MUST be probed in every enabled mode: parses
    /// `all_ips` from metadata if present, else expands `network`
    /// (spec §4.3). The network/broadcast and loopback/link-local edge
    /// policies only apply to the CIDR-expansion path; `all_ips` entries
    /// are explicit and always probed as given.
    pub fn expected_ips(&self) -> Result<Vec<IpAddr>> {
        if let Some(ips) = self.metadata.all_ips() {
            if !ips.is_empty() {
                return Ok(ips);
            }
        }
        Ok(expand_cidr_hosts(&self.network))
    }
}

/// The outcome of one probe (spec §3: "Result").
///
/// Named `ProbeOutcome` to avoid colliding with `std::result::Result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub target: Target,
    pub available: bool,
    pub last_seen: DateTime<Utc>,
    pub resp_time: Duration,
    /// Percentage in `[0.0, 100.0]`.
    pub packet_loss: f64,
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn host(&self) -> IpAddr {
        self.target.host
    }

    pub fn mode(&self) -> ProbeMode {
        self.target.mode
    }
}

/// Source label for an emitted `DeviceUpdate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceUpdateSource {
    Sweep,
}

impl fmt::Display for DeviceUpdateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceUpdateSource::Sweep => write!(f, "SWEEP"),
        }
    }
}

/// The consolidated record emitted once per device per cycle (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceUpdate {
    pub device_id: String,
    pub ip: String,
    pub is_available: bool,
    pub source: DeviceUpdateSource,
    pub partition: String,
    pub agent_id: String,
    pub poller_id: String,
    /// The `scan_*` keys enumerated in spec §3, all string-valued.
    pub metadata: BTreeMap<String, String>,
}

/// Coarse sweep-cycle state (spec §3, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepState {
    Unknown,
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

/// Progress snapshot for one sweep cycle, keyed by `target_sequence`
/// (spec §3, §4.7). Readers (the RPC handler) see a copy-on-read
/// snapshot; writers (the engine) hold the lock only long enough to
/// mutate a field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepCompletionStatus {
    pub state: SweepState,
    pub target_sequence: String,
    pub total_targets: u64,
    pub completed_targets: u64,
    pub completion_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Default for SweepCompletionStatus {
    fn default() -> Self {
        Self {
            state: SweepState::Unknown,
            target_sequence: String::new(),
            total_targets: 0,
            completed_targets: 0,
            completion_time: None,
            error_message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_prefers_armis_over_integration() {
        let mut meta = TargetMetadata::new();
        meta.insert_str(meta_keys::ARMIS_DEVICE_ID, "123");
        meta.insert_str(meta_keys::INTEGRATION_ID, "456");
        assert_eq!(meta.device_id(), "armis:123");
    }

    #[test]
    fn device_id_falls_back_to_integration() {
        let mut meta = TargetMetadata::new();
        meta.insert_str(meta_keys::INTEGRATION_ID, "456");
        assert_eq!(meta.device_id(), "integration:456");
    }

    #[test]
    fn device_id_empty_when_neither_present() {
        let meta = TargetMetadata::new();
        assert_eq!(meta.device_id(), "");
    }

    #[test]
    fn all_ips_parses_comma_separated_list() {
        let mut meta = TargetMetadata::new();
        meta.insert_str(meta_keys::ALL_IPS, "192.168.1.1,192.168.1.2, 10.0.0.1");
        let ips = meta.all_ips().unwrap();
        assert_eq!(ips.len(), 3);
        assert_eq!(ips[2], "10.0.0.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn expand_cidr_hosts_skips_network_and_broadcast() {
        let network: IpNetwork = "192.168.1.0/30".parse().unwrap();
        let hosts = expand_cidr_hosts(&network);
        assert_eq!(hosts.len(), 2);
        assert!(!hosts.contains(&"192.168.1.0".parse().unwrap()));
        assert!(!hosts.contains(&"192.168.1.3".parse().unwrap()));
    }

    #[test]
    fn expand_cidr_hosts_skips_loopback_and_link_local() {
        let loopback: IpNetwork = "127.0.0.0/24".parse().unwrap();
        assert!(expand_cidr_hosts(&loopback).is_empty());

        let link_local: IpNetwork = "169.254.0.0/24".parse().unwrap();
        assert!(expand_cidr_hosts(&link_local).is_empty());
    }

    #[test]
    fn expand_cidr_hosts_keeps_all_addresses_above_prefix_30() {
        // A /32 has one address; the network/broadcast skip only applies
        // to prefixes <= 30.
        let network: IpNetwork = "192.168.1.10/32".parse().unwrap();
        assert_eq!(expand_cidr_hosts(&network), vec!["192.168.1.10".parse::<IpAddr>().unwrap()]);
    }

    #[test]
    fn expected_ips_falls_back_to_network_expansion() {
        let target = DeviceTarget {
            network: "192.168.1.10/32".parse().unwrap(),
            sweep_modes: vec![ProbeMode::Icmp],
            source: "test".to_string(),
            metadata: TargetMetadata::new(),
        };
        let ips = target.expected_ips().unwrap();
        assert_eq!(ips, vec!["192.168.1.10".parse::<IpAddr>().unwrap()]);
    }

    #[test]
    fn scan_key_identifies_equivalent_targets() {
        let a = Target::new("10.0.0.1".parse().unwrap(), ProbeMode::Tcp, Some(80));
        let b = Target::new("10.0.0.1".parse().unwrap(), ProbeMode::Tcp, Some(80));
        assert_eq!(a.scan_key(), b.scan_key());
    }
}
