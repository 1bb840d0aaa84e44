//! Target Expander (C3, spec §4.3).
//!
//! Turns the configured `networks` and `device_targets` into a flat,
//! deduplicated list of `Target`s — one per distinct `(host, mode,
//! port)` triple. CIDRs expand host-by-host; device targets expand to
//! `all_ips` if present, else to their network. TCP modes fan out one
//! target per configured port; ICMP fans out to a single portless
//! target per host.

use serviceradar_core::{expand_cidr_hosts, meta_keys, Config, ProbeMode, Result, Target, TargetMetadata};
use std::collections::HashSet;
use std::net::IpAddr;

/// Builds the cycle's target list from `config`. Targets are
/// deduplicated by `(host, mode, port)` — the same host reachable via
/// both a bare network entry and a device target is probed once per
/// mode/port, not twice (spec §4.3 invariant). This dedup is distinct
/// from the `scan_all_ips` metadata field, which intentionally is not
/// deduplicated (spec §9).
pub fn expand_targets(config: &Config) -> Result<Vec<Target>> {
    let mut seen = HashSet::new();
    let mut targets = Vec::new();

    for network in &config.networks {
        let meta = base_metadata(config, None);
        for host in expand_cidr_hosts(network) {
            push_modes(&mut targets, &mut seen, host, &config.sweep_modes, &config.ports, meta.clone());
        }
    }

    for device in &config.device_targets {
        let meta = base_metadata(config, Some(device.metadata.clone()));
        let modes = if device.sweep_modes.is_empty() {
            &config.sweep_modes
        } else {
            &device.sweep_modes
        };
        for host in device.expected_ips()? {
            push_modes(&mut targets, &mut seen, host, modes, &config.ports, meta.clone());
        }
    }

    Ok(targets)
}

fn base_metadata(config: &Config, device_meta: Option<TargetMetadata>) -> TargetMetadata {
    let mut meta = device_meta.unwrap_or_default();
    meta.insert_str(meta_keys::AGENT_ID, &config.agent_id);
    meta.insert_str(meta_keys::POLLER_ID, &config.poller_id);
    meta.insert_str(meta_keys::PARTITION, &config.partition);
    meta
}

fn push_modes(
    targets: &mut Vec<Target>,
    seen: &mut HashSet<(IpAddr, ProbeMode, Option<u16>)>,
    host: IpAddr,
    modes: &[ProbeMode],
    ports: &[u16],
    metadata: TargetMetadata,
) {
    for mode in modes {
        match mode {
            ProbeMode::Icmp => push_one(targets, seen, host, ProbeMode::Icmp, None, metadata.clone()),
            ProbeMode::Tcp => {
                for &port in ports {
                    push_one(targets, seen, host, ProbeMode::Tcp, Some(port), metadata.clone());
                }
            }
        }
    }
}

fn push_one(
    targets: &mut Vec<Target>,
    seen: &mut HashSet<(IpAddr, ProbeMode, Option<u16>)>,
    host: IpAddr,
    mode: ProbeMode,
    port: Option<u16>,
    metadata: TargetMetadata,
) {
    let key = (host, mode, port);
    if !seen.insert(key) {
        return;
    }
    targets.push(Target::new(host, mode, port).with_metadata(metadata));
}
