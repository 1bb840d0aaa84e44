//! ServiceRadar Sweep Engine
//!
//! The distributed monitoring platform's core sweep loop: expands
//! configured targets, probes them concurrently through a bounded
//! worker pool, aggregates multi-IP devices into single updates, and
//! hands everything off to pluggable sinks.
//!
//! # Architecture
//!
//! - [`expander`]: Target Expander (C3) — networks and device targets
//!   into a flat, deduplicated `Target` list.
//! - [`pool`]: Worker Pool (C2) — bounded-concurrency dispatch via
//!   `FuturesUnordered`.
//! - [`aggregator`]: Device Result Aggregator (C4) — per-device result
//!   consolidation into one `DeviceUpdate`.
//! - [`completion`]: Sweep Completion Coordinator (C7) — the
//!   externally visible progress snapshot for one cycle.
//! - [`engine`]: Sweep Engine (C5) — ties the above together into one
//!   `EXPANDING → PREPARING_AGGREGATORS → PROBING/DRAINING →
//!   FINALIZING` cycle.
//! - [`sinks`]: the `Store`/`ResultProcessor`/`DeviceRegistryService`
//!   capability traits the engine depends on, plus an in-memory
//!   implementation for tests and standalone runs.
//!
//! # Example
//!
//! ```no_run
//! use serviceradar_sweep::{SweepEngine, MemorySink};
//! use serviceradar_core::Config;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> serviceradar_core::Result<()> {
//! let config = Config::load_from_str(r#"
//!     networks = ["192.168.1.0/24"]
//!     sweep_modes = ["Icmp"]
//!     interval_secs = 30
//!     timeout_ms = 1000
//!     agent_id = "agent-1"
//!     poller_id = "poller-1"
//!     partition = "default"
//! "#)?;
//! let sink = MemorySink::new();
//! let engine = SweepEngine::new(config, sink.clone(), sink.clone(), sink.clone());
//! engine.run_cycle("01H...".to_string(), CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod completion;
pub mod engine;
pub mod expander;
pub mod pool;
pub mod sinks;

pub use aggregator::{prepare_device_aggregators, should_aggregate, DeviceResultAggregator};
pub use completion::CompletionCoordinator;
pub use engine::SweepEngine;
pub use expander::expand_targets;
pub use pool::WorkerPool;
pub use sinks::{DeviceRegistryService, MemorySink, ResultProcessor, Store};
