//! Device Result Aggregator (C4, spec §4.4).
//!
//! Unifies probe results belonging to the same logical device — one
//! aggregator per device per cycle, created only for devices whose
//! expansion yielded more than one distinct host.

use serviceradar_core::{meta_keys, DeviceUpdate, DeviceUpdateSource, ProbeOutcome, Target, TargetMetadata};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;
use tracing::warn;

/// One per logical device per cycle. Created during target preparation,
/// mutated only by the sweep engine, destroyed after emitting one
/// `DeviceUpdate` at cycle end (spec §3).
#[derive(Debug, Clone)]
pub struct DeviceResultAggregator {
    pub device_id: String,
    pub expected_ips: Vec<IpAddr>,
    pub results: Vec<ProbeOutcome>,
    pub agent_id: String,
    pub poller_id: String,
    pub partition: String,
    /// Snapshot of the first-seen target's metadata (spec §3); carried
    /// alongside the aggregator but not copied into `DeviceUpdate.metadata`,
    /// which instead carries the derived `scan_*` fields.
    pub metadata: TargetMetadata,
}

impl DeviceResultAggregator {
    /// Appends `result` to the arrival-ordered results sequence. No
    /// deduplication by host/mode/port — multiple modes against the
    /// same IP are meaningful signal (spec §4.4).
    pub fn add_result(&mut self, result: ProbeOutcome) {
        self.results.push(result);
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Builds the `DeviceUpdate`. Returns `None` if the aggregator has
    /// zero results — `processAggregatedResults` must be a no-op in
    /// that case (spec §4.4).
    pub fn into_device_update(self) -> Option<DeviceUpdate> {
        if self.results.is_empty() {
            return None;
        }

        let metadata = build_scan_metadata(&self.results);
        let ip = select_primary_ip(&self.expected_ips, &self.results);
        let is_available = self.results.iter().any(|r| r.available);

        Some(DeviceUpdate {
            device_id: format!("{}:{}", self.partition, ip),
            ip,
            is_available,
            source: DeviceUpdateSource::Sweep,
            partition: self.partition,
            agent_id: self.agent_id,
            poller_id: self.poller_id,
            metadata,
        })
    }
}

/// Scans the expanded target list and creates one aggregator per
/// distinct `device_id` whose targets span more than one distinct host.
/// Single-host devices are NOT aggregated — they flow straight through
/// as individual `DeviceUpdate`s per result (spec §4.4).
pub fn prepare_device_aggregators(targets: &[Target]) -> HashMap<String, DeviceResultAggregator> {
    let mut by_device: HashMap<String, Vec<&Target>> = HashMap::new();
    for target in targets {
        let device_id = target.metadata.device_id();
        if device_id.is_empty() {
            continue;
        }
        by_device.entry(device_id).or_default().push(target);
    }

    let mut aggregators = HashMap::new();
    for (device_id, device_targets) in by_device {
        let distinct_hosts: HashSet<IpAddr> = device_targets.iter().map(|t| t.host).collect();
        if distinct_hosts.len() <= 1 {
            continue;
        }

        let first = device_targets[0];
        let expected_ips = first
            .metadata
            .all_ips()
            .unwrap_or_else(|| distinct_hosts.into_iter().collect());

        aggregators.insert(
            device_id.clone(),
            DeviceResultAggregator {
                device_id,
                expected_ips,
                results: Vec::new(),
                agent_id: first.metadata.get_str(meta_keys::AGENT_ID).unwrap_or("").to_string(),
                poller_id: first.metadata.get_str(meta_keys::POLLER_ID).unwrap_or("").to_string(),
                partition: first.metadata.get_str(meta_keys::PARTITION).unwrap_or("").to_string(),
                metadata: first.metadata.clone(),
            },
        );
    }
    aggregators
}

/// True iff `result`'s device id is non-empty and an aggregator exists
/// for it (spec §4.4).
pub fn should_aggregate(
    result: &ProbeOutcome,
    aggregators: &HashMap<String, DeviceResultAggregator>,
) -> bool {
    let device_id = result.target.metadata.device_id();
    !device_id.is_empty() && aggregators.contains_key(&device_id)
}

/// Builds the `scan_*` metadata fields (spec §3). Pure function of
/// `results`, so re-running it on the same input is bitwise-identical
/// (spec §8 idempotence property).
pub fn build_scan_metadata(results: &[ProbeOutcome]) -> BTreeMap<String, String> {
    let mut meta = BTreeMap::new();

    let all_ips: Vec<String> = results.iter().map(|r| r.host().to_string()).collect();
    let available_ips: Vec<String> = results
        .iter()
        .filter(|r| r.available)
        .map(|r| r.host().to_string())
        .collect();
    let unavailable_ips: Vec<String> = results
        .iter()
        .filter(|r| !r.available)
        .map(|r| r.host().to_string())
        .collect();

    let icmp_results: Vec<String> = results
        .iter()
        .filter(|r| r.mode() == serviceradar_core::ProbeMode::Icmp)
        .map(|r| format!("{}:{}:available={}", r.host(), r.mode(), r.available))
        .collect();
    let tcp_results: Vec<String> = results
        .iter()
        .filter(|r| r.mode() == serviceradar_core::ProbeMode::Tcp)
        .map(|r| format!("{}:{}:available={}", r.host(), r.mode(), r.available))
        .collect();

    let result_count = results.len();
    let available_count = available_ips.len();
    let unavailable_count = unavailable_ips.len();
    let percent = if result_count == 0 {
        "0.0".to_string()
    } else {
        format!("{:.1}", available_count as f64 * 100.0 / result_count as f64)
    };

    meta.insert("scan_all_ips".to_string(), all_ips.join(","));
    meta.insert("scan_available_ips".to_string(), available_ips.join(","));
    meta.insert("scan_unavailable_ips".to_string(), unavailable_ips.join(","));
    meta.insert("scan_result_count".to_string(), result_count.to_string());
    meta.insert("scan_available_count".to_string(), available_count.to_string());
    meta.insert("scan_unavailable_count".to_string(), unavailable_count.to_string());
    meta.insert("scan_availability_percent".to_string(), percent);
    meta.insert("scan_icmp_results".to_string(), icmp_results.join(","));
    meta.insert("scan_tcp_results".to_string(), tcp_results.join(","));
    meta
}

/// Primary IP selection (spec §4.4): first element of `expected_ips`
/// that appears among the available results; fall back to the first
/// element of `expected_ips`; fall back to the first result's host. An
/// aggregator with neither `expected_ips` nor results is a programming
/// error and is logged rather than produced (spec §9 open question).
fn select_primary_ip(expected_ips: &[IpAddr], results: &[ProbeOutcome]) -> String {
    let available: HashSet<IpAddr> = results.iter().filter(|r| r.available).map(|r| r.host()).collect();

    if let Some(ip) = expected_ips.iter().find(|ip| available.contains(ip)) {
        return ip.to_string();
    }
    if let Some(ip) = expected_ips.first() {
        return ip.to_string();
    }
    if let Some(result) = results.first() {
        return result.host().to_string();
    }
    warn!("primary IP selection had neither expected_ips nor results; strict mode would reject this aggregator");
    String::new()
}
