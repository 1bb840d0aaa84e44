//! Sink capability traits (spec §9 design note) and in-memory
//! implementations used by tests and standalone runs.
//!
//! The engine depends only on these traits, never on a concrete
//! downstream system — grounded on this codebase's storage-backend
//! abstraction, narrowed to the three capabilities spec §4.5 calls for:
//! every probe result is handed to both a `ResultProcessor` and a
//! `Store`, best-effort; the one `DeviceUpdate` per device per cycle —
//! whether built directly for a single-host device or assembled by the
//! aggregator — goes to the `DeviceRegistryService`.

use async_trait::async_trait;
use parking_lot::Mutex;
use serviceradar_core::{DeviceUpdate, Error, ProbeOutcome, Result};
use std::sync::Arc;

/// Best-effort raw-result sink (spec §4.5 step 5a). Failures are
/// logged, not fatal to the cycle.
#[async_trait]
pub trait ResultProcessor: Send + Sync {
    async fn process_result(&self, result: ProbeOutcome) -> Result<()>;
}

/// Best-effort raw-result persistence (spec §4.5 step 5b), distinct
/// from `ResultProcessor` only in what it's used for downstream.
#[async_trait]
pub trait Store: Send + Sync {
    async fn save_result(&self, result: ProbeOutcome) -> Result<()>;
}

/// Registers the one `DeviceUpdate` emitted per device per cycle —
/// either from `processAggregatedResults` or directly for a
/// single-host device. Failures are `RegistryUnavailable`, retried
/// once before being logged and dropped (spec §7).
#[async_trait]
pub trait DeviceRegistryService: Send + Sync {
    async fn register_device(&self, update: &DeviceUpdate) -> Result<()>;
}

/// In-memory `Store`/`ResultProcessor`/`DeviceRegistryService`, used by
/// the engine's own test suite and any binary run without a configured
/// downstream (spec has no persistence requirement in scope).
#[derive(Default)]
pub struct MemorySink {
    device_updates: Mutex<Vec<DeviceUpdate>>,
    processed_results: Mutex<Vec<ProbeOutcome>>,
    saved_results: Mutex<Vec<ProbeOutcome>>,
    fail_next_save: Mutex<bool>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn device_updates(&self) -> Vec<DeviceUpdate> {
        self.device_updates.lock().clone()
    }

    pub fn processed_results(&self) -> Vec<ProbeOutcome> {
        self.processed_results.lock().clone()
    }

    pub fn saved_results(&self) -> Vec<ProbeOutcome> {
        self.saved_results.lock().clone()
    }

    /// Test hook: make the next `save_result` call fail once, to
    /// exercise the engine's backoff-retry path.
    pub fn fail_next_save(&self) {
        *self.fail_next_save.lock() = true;
    }
}

#[async_trait]
impl ResultProcessor for MemorySink {
    async fn process_result(&self, result: ProbeOutcome) -> Result<()> {
        self.processed_results.lock().push(result);
        Ok(())
    }
}

#[async_trait]
impl Store for MemorySink {
    async fn save_result(&self, result: ProbeOutcome) -> Result<()> {
        let mut fail = self.fail_next_save.lock();
        if *fail {
            *fail = false;
            return Err(Error::SinkTransient("injected test failure".to_string()));
        }
        drop(fail);
        self.saved_results.lock().push(result);
        Ok(())
    }
}

#[async_trait]
impl DeviceRegistryService for MemorySink {
    async fn register_device(&self, update: &DeviceUpdate) -> Result<()> {
        self.device_updates.lock().push(update.clone());
        Ok(())
    }
}
