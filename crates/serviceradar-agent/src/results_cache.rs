//! Per-cycle results cache (spec §4.6): holds the most recent device
//! updates emitted by the sweep engine so `AgentService` can serve them
//! to pollers without reaching back into the engine itself.

use async_trait::async_trait;
use parking_lot::Mutex;
use serviceradar_core::{DeviceUpdate, ProbeOutcome, Result};
use serviceradar_sweep::{DeviceRegistryService, ResultProcessor, Store};

struct Cycle {
    sequence: String,
    updates: Vec<DeviceUpdate>,
}

/// Implements the sweep engine's three sink traits and doubles as the
/// read side consumed by `AgentService::GetResults`/`StreamResults`.
///
/// Raw per-result callbacks (`ResultProcessor`, `Store`) are not needed
/// by the agent beyond the engine's own retry bookkeeping, so they are
/// no-ops here; only `DeviceRegistryService` updates are retained.
pub struct ResultsCache {
    current: Mutex<Cycle>,
}

impl Default for ResultsCache {
    fn default() -> Self {
        Self {
            current: Mutex::new(Cycle {
                sequence: String::new(),
                updates: Vec::new(),
            }),
        }
    }
}

impl ResultsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the previous cycle's updates and records the new sequence.
    /// Called once per tick before `SweepEngine::run_cycle`.
    pub fn begin_cycle(&self, sequence: String) {
        let mut cycle = self.current.lock();
        cycle.sequence = sequence;
        cycle.updates.clear();
    }

    /// Returns the current target sequence and a snapshot of the device
    /// updates collected so far this cycle.
    pub fn snapshot(&self) -> (String, Vec<DeviceUpdate>) {
        let cycle = self.current.lock();
        (cycle.sequence.clone(), cycle.updates.clone())
    }
}

#[async_trait]
impl ResultProcessor for ResultsCache {
    async fn process_result(&self, _result: ProbeOutcome) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Store for ResultsCache {
    async fn save_result(&self, _result: ProbeOutcome) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl DeviceRegistryService for ResultsCache {
    async fn register_device(&self, update: &DeviceUpdate) -> Result<()> {
        self.current.lock().updates.push(update.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serviceradar_core::DeviceUpdateSource;

    fn update(device_id: &str) -> DeviceUpdate {
        DeviceUpdate {
            device_id: device_id.to_string(),
            ip: "127.0.0.1".parse().unwrap(),
            is_available: true,
            source: DeviceUpdateSource::Sweep,
            partition: "default".to_string(),
            agent_id: "agent-1".to_string(),
            poller_id: "poller-1".to_string(),
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn begin_cycle_clears_previous_updates() {
        let cache = ResultsCache::new();
        cache.begin_cycle("seq-1".to_string());
        cache.register_device(&update("default:127.0.0.1")).await.unwrap();
        let (seq, updates) = cache.snapshot();
        assert_eq!(seq, "seq-1");
        assert_eq!(updates.len(), 1);

        cache.begin_cycle("seq-2".to_string());
        let (seq, updates) = cache.snapshot();
        assert_eq!(seq, "seq-2");
        assert!(updates.is_empty());
    }

    #[tokio::test]
    async fn register_device_accumulates_within_a_cycle() {
        let cache = ResultsCache::new();
        cache.begin_cycle("seq-1".to_string());
        cache.register_device(&update("default:127.0.0.1")).await.unwrap();
        cache.register_device(&update("default:127.0.0.2")).await.unwrap();
        let (_, updates) = cache.snapshot();
        assert_eq!(updates.len(), 2);
    }
}
