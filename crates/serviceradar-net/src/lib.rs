//! ServiceRadar Network Layer (C1, spec §4.1)
//!
//! Probes a single `(host, port, mode)` target via ICMP or TCP and
//! reports availability, latency, and packet loss.
//!
//! # Examples
//!
//! ```no_run
//! use serviceradar_net::TcpScanner;
//! use serviceradar_core::{ProbeMode, Target};
//! use std::time::Duration;
//!
//! # async fn example() -> serviceradar_core::Result<()> {
//! let scanner = TcpScanner::new(Duration::from_secs(2));
//! let target = Target::new("192.168.1.1".parse().unwrap(), ProbeMode::Tcp, Some(80));
//! let outcome = scanner.scan(target).await?;
//! println!("available: {}", outcome.available);
//! # Ok(())
//! # }
//! ```

pub mod icmp;
pub mod privilege;
pub mod tcp;

pub use icmp::IcmpScanner;
pub use privilege::{check_privileges, has_raw_socket_capability};
pub use tcp::TcpScanner;
