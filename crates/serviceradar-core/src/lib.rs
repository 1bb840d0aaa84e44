//! ServiceRadar Sweep Core — Core Library
//!
//! Data model, error types, configuration, and retry helpers shared by the
//! scanners, the sweep engine, the agent, and the poller.
//!
//! # Examples
//!
//! ```
//! use serviceradar_core::{Config, ProbeMode};
//!
//! let config = Config::load_from_str(r#"
//!     sweep_modes = ["Icmp"]
//!     interval_secs = 30
//!     timeout_ms = 1000
//!     agent_id = "agent-1"
//!     poller_id = "poller-1"
//!     partition = "default"
//! "#).unwrap();
//! assert_eq!(config.sweep_modes, vec![ProbeMode::Icmp]);
//! ```

pub mod config;
pub mod error;
pub mod poller_config;
pub mod retry;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use poller_config::{AgentEndpoint, PollerConfig};
pub use retry::{retry_with_backoff, RetryConfig};
pub use types::{
    expand_cidr_hosts, meta_keys, DeviceTarget, DeviceUpdate, DeviceUpdateSource, MetadataValue,
    ProbeMode, ProbeOutcome, SweepCompletionStatus, SweepState, Target, TargetMetadata,
};
