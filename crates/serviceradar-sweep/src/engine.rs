//! Sweep Engine (C5, spec §4.5).
//!
//! Drives one cycle through `EXPANDING → PREPARING_AGGREGATORS →
//! PROBING/DRAINING → FINALIZING`, owns the single `deviceResults` map
//! for the cycle's lifetime, and is the only writer of
//! `CompletionCoordinator` state (spec §9 "Aggregator ownership").

use crate::aggregator::{prepare_device_aggregators, should_aggregate, DeviceResultAggregator};
use crate::completion::CompletionCoordinator;
use crate::expander::expand_targets;
use crate::pool::WorkerPool;
use crate::sinks::{DeviceRegistryService, ResultProcessor, Store};
use serviceradar_core::{
    retry_with_backoff, Config, DeviceUpdate, Error, ProbeMode, ProbeOutcome, Result, RetryConfig, Target,
};
use serviceradar_net::{IcmpScanner, TcpScanner};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct SweepEngine {
    config: Config,
    icmp: IcmpScanner,
    tcp: TcpScanner,
    pool: WorkerPool,
    completion: CompletionCoordinator,
    result_processor: Arc<dyn ResultProcessor>,
    store: Arc<dyn Store>,
    registry: Arc<dyn DeviceRegistryService>,
    icmp_disabled: Arc<AtomicBool>,
}

impl SweepEngine {
    pub fn new(
        config: Config,
        result_processor: Arc<dyn ResultProcessor>,
        store: Arc<dyn Store>,
        registry: Arc<dyn DeviceRegistryService>,
    ) -> Self {
        let icmp = IcmpScanner::new(config.timeout(), config.icmp_count);
        let tcp = TcpScanner::new(config.timeout());
        let pool = WorkerPool::new(config.concurrency);
        Self {
            config,
            icmp,
            tcp,
            pool,
            completion: CompletionCoordinator::new(),
            result_processor,
            store,
            registry,
            icmp_disabled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn completion(&self) -> CompletionCoordinator {
        self.completion.clone()
    }

    /// Runs one sweep cycle to completion, or until `cancel` fires. A
    /// cancelled cycle still finalizes whatever aggregators accumulated
    /// results and flips to `FAILED` rather than `COMPLETED` (spec §4.5
    /// step 7). Soft-budget expiry is the one cancellation source that
    /// instead still reports `COMPLETED` (spec §5 timeouts).
    pub async fn run_cycle(&self, target_sequence: String, cancel: CancellationToken) -> Result<()> {
        info!(%target_sequence, "sweep cycle starting");

        let targets = match expand_targets(&self.config) {
            Ok(targets) => targets,
            Err(err) => {
                self.completion.fail(err.to_string());
                return Err(err);
            }
        };

        let mut aggregators = prepare_device_aggregators(&targets);
        self.completion.begin_cycle(target_sequence.clone(), targets.len() as u64);

        let budget_cancel = cancel.clone();
        let soft_budget = self.config.soft_cycle_budget();
        let budget_timer = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(soft_budget) => {
                    budget_cancel.cancel();
                    true
                }
                _ = budget_cancel.cancelled() => false,
            }
        });

        let icmp = self.icmp.clone();
        let tcp = self.tcp.clone();
        let icmp_disabled = self.icmp_disabled.clone();
        let mut rx = self.pool.spawn_run(targets, cancel.clone(), move |target| {
            let icmp = icmp.clone();
            let tcp = tcp.clone();
            let icmp_disabled = icmp_disabled.clone();
            async move { probe_one(&icmp, &tcp, target, &icmp_disabled).await }
        });

        let retry_config = RetryConfig::bounded_by_timeout(self.config.timeout(), 3);
        while let Some(outcome) = rx.recv().await {
            self.completion.record_progress(1);
            self.dispatch_result(outcome, &mut aggregators, &retry_config).await;
        }

        self.finalize(aggregators).await;

        // The soft-budget timer fired iff it returned true before we got
        // here; a caller-initiated cancellation is reported as FAILED,
        // a soft-budget expiry still reports COMPLETED (spec §5).
        if cancel.is_cancelled() && !budget_timer.await.unwrap_or(false) {
            self.completion.fail("cycle cancelled before completion".to_string());
        } else {
            self.completion.complete();
        }
        info!(%target_sequence, "sweep cycle finished");
        Ok(())
    }

    /// Per-result algorithm (spec §4.5 step 5): every result goes to
    /// both the result processor and the store, best-effort; it is
    /// then either folded into its device's aggregator or, for
    /// single-host devices, turned directly into a `DeviceUpdate`.
    async fn dispatch_result(
        &self,
        outcome: ProbeOutcome,
        aggregators: &mut HashMap<String, DeviceResultAggregator>,
        retry_config: &RetryConfig,
    ) {
        if let Err(err) = self.process_with_retry(outcome.clone(), retry_config).await {
            warn!(%err, "result processor dropped outcome after exhausting retries");
        }
        if let Err(err) = self.save_with_retry(outcome.clone(), retry_config).await {
            warn!(%err, "store dropped raw result after exhausting retries");
        }

        if should_aggregate(&outcome, aggregators) {
            let device_id = outcome.target.metadata.device_id();
            if let Some(agg) = aggregators.get_mut(&device_id) {
                agg.add_result(outcome);
            }
            return;
        }

        let partition = self.config.partition.clone();
        let agent_id = self.config.agent_id.clone();
        let poller_id = self.config.poller_id.clone();
        if let Some(update) = direct_device_update(outcome, &partition, &agent_id, &poller_id) {
            self.emit_device_update(update).await;
        }
    }

    async fn process_with_retry(&self, outcome: ProbeOutcome, retry_config: &RetryConfig) -> Result<()> {
        let processor = self.result_processor.clone();
        retry_with_backoff(retry_config, "result_processor", move || {
            let processor = processor.clone();
            let outcome = outcome.clone();
            async move { processor.process_result(outcome).await }
        })
        .await
    }

    async fn save_with_retry(&self, outcome: ProbeOutcome, retry_config: &RetryConfig) -> Result<()> {
        let store = self.store.clone();
        retry_with_backoff(retry_config, "store", move || {
            let store = store.clone();
            let outcome = outcome.clone();
            async move { store.save_result(outcome).await }
        })
        .await
    }

    /// Emits one `DeviceUpdate` to the registry sink, retrying once on
    /// `RegistryUnavailable` before logging and dropping it (spec §7).
    async fn emit_device_update(&self, update: DeviceUpdate) {
        let retry_once = RetryConfig::bounded_by_timeout(self.config.timeout(), 2);
        let registry = self.registry.clone();
        let device_id = update.device_id.clone();
        let result = retry_with_backoff(&retry_once, "registry", move || {
            let registry = registry.clone();
            let update = update.clone();
            async move { registry.register_device(&update).await }
        })
        .await;

        if let Err(err) = result {
            error!(%device_id, %err, "device registry unavailable after retry, dropping update");
        }
    }

    /// `finalizeDeviceAggregators` (spec §4.4): every aggregator with
    /// at least one result emits exactly one `DeviceUpdate`.
    async fn finalize(&self, aggregators: HashMap<String, DeviceResultAggregator>) {
        for (_device_id, aggregator) in aggregators {
            if let Some(update) = aggregator.into_device_update() {
                self.emit_device_update(update).await;
            }
        }
    }
}

/// Builds the direct one-result `DeviceUpdate` for a single-host device
/// (spec §4.5 step 5, "else" branch) by reusing the aggregator's own
/// metadata-building and primary-IP logic on a one-element aggregator.
fn direct_device_update(
    result: ProbeOutcome,
    partition: &str,
    agent_id: &str,
    poller_id: &str,
) -> Option<DeviceUpdate> {
    let mut solo = DeviceResultAggregator {
        device_id: String::new(),
        expected_ips: vec![result.host()],
        results: Vec::new(),
        agent_id: agent_id.to_string(),
        poller_id: poller_id.to_string(),
        partition: partition.to_string(),
        metadata: result.target.metadata.clone(),
    };
    solo.add_result(result);
    solo.into_device_update()
}

/// Probes one target. Raw ICMP sockets are a process-wide resource: the
/// first `ScannerPermission` failure flips a sticky flag that disables
/// ICMP for every remaining target in this cycle and every future cycle
/// run by this engine, logging once rather than once per target (spec
/// §4.1, §7).
async fn probe_one(
    icmp: &IcmpScanner,
    tcp: &TcpScanner,
    target: Target,
    icmp_disabled: &AtomicBool,
) -> ProbeOutcome {
    if target.mode == ProbeMode::Icmp && icmp_disabled.load(Ordering::Relaxed) {
        return unavailable_outcome(
            target,
            Error::ScannerPermission("ICMP disabled for this cycle".to_string()),
        );
    }

    let result = match target.mode {
        ProbeMode::Icmp => icmp.scan(target.clone()).await,
        ProbeMode::Tcp => tcp.scan(target.clone()).await,
    };
    match result {
        Ok(outcome) => outcome,
        Err(err) => {
            if target.mode == ProbeMode::Icmp && matches!(err, Error::ScannerPermission(_)) {
                if !icmp_disabled.swap(true, Ordering::Relaxed) {
                    warn!(%err, "ICMP unavailable, disabling ICMP for the rest of this cycle");
                }
            }
            unavailable_outcome(target, err)
        }
    }
}

fn unavailable_outcome(target: Target, err: Error) -> ProbeOutcome {
    use chrono::Utc;
    use std::time::Duration;
    ProbeOutcome {
        target,
        available: false,
        last_seen: Utc::now(),
        resp_time: Duration::ZERO,
        packet_loss: 100.0,
        error: Some(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::MemorySink;
    use serviceradar_core::{meta_keys, DeviceTarget, TargetMetadata};

    fn test_config() -> Config {
        Config {
            networks: vec![],
            device_targets: vec![],
            ports: vec![],
            sweep_modes: vec![ProbeMode::Icmp],
            interval_secs: 1,
            concurrency: 4,
            timeout_ms: 50,
            icmp_count: 1,
            agent_id: "agent-1".to_string(),
            poller_id: "poller-1".to_string(),
            partition: "default".to_string(),
            log_level: "info".to_string(),
            listen: "0.0.0.0:50051".to_string(),
        }
    }

    #[tokio::test]
    async fn single_host_device_emits_direct_update() {
        let mut config = test_config();
        config.networks = vec!["127.0.0.1/32".parse().unwrap()];

        let sink = MemorySink::new();
        let engine = SweepEngine::new(config, sink.clone(), sink.clone(), sink.clone());
        engine
            .run_cycle("seq-1".to_string(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sink.processed_results().len(), 1);
        assert_eq!(sink.saved_results().len(), 1);
        assert_eq!(sink.device_updates().len(), 1);
        assert_eq!(sink.device_updates()[0].device_id, "default:127.0.0.1");
        let snapshot = engine.completion().snapshot();
        assert_eq!(snapshot.state, serviceradar_core::SweepState::Completed);
    }

    #[tokio::test]
    async fn multi_ip_device_emits_one_device_update() {
        let mut config = test_config();
        let mut meta = TargetMetadata::new();
        meta.insert_str(meta_keys::ARMIS_DEVICE_ID, "1");
        meta.insert_str(meta_keys::ALL_IPS, "127.0.0.1,127.0.0.2");
        config.device_targets.push(DeviceTarget {
            network: "127.0.0.0/30".parse().unwrap(),
            sweep_modes: vec![ProbeMode::Icmp],
            source: "armis".to_string(),
            metadata: meta,
        });

        let sink = MemorySink::new();
        let engine = SweepEngine::new(config, sink.clone(), sink.clone(), sink.clone());
        engine
            .run_cycle("seq-2".to_string(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sink.device_updates().len(), 1);
        assert_eq!(sink.processed_results().len(), 2);
        assert_eq!(sink.saved_results().len(), 2);
    }

    #[tokio::test]
    async fn store_retry_recovers_from_one_transient_failure() {
        let mut config = test_config();
        config.networks = vec!["127.0.0.1/32".parse().unwrap()];
        config.timeout_ms = 500;

        let sink = MemorySink::new();
        sink.fail_next_save();
        let engine = SweepEngine::new(config, sink.clone(), sink.clone(), sink.clone());
        engine
            .run_cycle("seq-3".to_string(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sink.saved_results().len(), 1);
        assert_eq!(sink.device_updates().len(), 1);
    }

    /// Replays spec scenario 4 (cycle cancelled after 2 of 6 probes)
    /// without depending on real scan timing: drives `dispatch_result`
    /// and `finalize` directly against two of six expanded targets, the
    /// same sequence `run_cycle` would follow if the worker pool were
    /// cancelled mid-drain.
    #[tokio::test]
    async fn cycle_cancelled_mid_flight_flushes_partial_aggregator_matches_spec_scenario_4() {
        let mut config = test_config();
        let mut meta = TargetMetadata::new();
        meta.insert_str(meta_keys::ARMIS_DEVICE_ID, "42");
        meta.insert_str(
            meta_keys::ALL_IPS,
            "10.0.0.1,10.0.0.2,10.0.0.3,10.0.0.4,10.0.0.5,10.0.0.6",
        );
        config.device_targets.push(DeviceTarget {
            network: "10.0.0.0/29".parse().unwrap(),
            sweep_modes: vec![ProbeMode::Icmp],
            source: "armis".to_string(),
            metadata: meta,
        });

        let targets = expand_targets(&config).unwrap();
        assert_eq!(targets.len(), 6);

        let sink = MemorySink::new();
        let engine = SweepEngine::new(config.clone(), sink.clone(), sink.clone(), sink.clone());

        let mut aggregators = prepare_device_aggregators(&targets);
        engine.completion.begin_cycle("seq-4".to_string(), targets.len() as u64);

        let retry_config = RetryConfig::bounded_by_timeout(config.timeout(), 3);
        for target in targets.into_iter().take(2) {
            let outcome = ProbeOutcome {
                target,
                available: true,
                last_seen: chrono::Utc::now(),
                resp_time: std::time::Duration::from_millis(1),
                packet_loss: 0.0,
                error: None,
            };
            engine.completion.record_progress(1);
            engine.dispatch_result(outcome, &mut aggregators, &retry_config).await;
        }

        engine.finalize(aggregators).await;
        engine.completion.fail("cycle cancelled before completion".to_string());

        assert_eq!(sink.device_updates().len(), 1);
        let update = &sink.device_updates()[0];
        assert_eq!(update.metadata["scan_result_count"], "2");

        let snapshot = engine.completion().snapshot();
        assert_eq!(snapshot.state, serviceradar_core::SweepState::Failed);
        assert_eq!(snapshot.completed_targets, 2);
        assert_eq!(snapshot.total_targets, 6);
    }
}
