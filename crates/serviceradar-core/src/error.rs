//! Error types for the ServiceRadar sweep core

use std::io;
use std::net::AddrParseError;
use thiserror::Error;

/// Result type alias for ServiceRadar operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds shared across the sweep core.
///
/// Propagation policy (spec §7): `Config` is fatal at startup.
/// `ScannerPermission`, `ScannerTimeout`, and `ScannerTransient` are
/// recovered locally by the scanners and never reach the engine as
/// errors. `SinkTransient` and `RegistryUnavailable` are retried by the
/// engine with backoff before being logged and dropped. `RpcUnavailable`
/// is recovered by the poller. `Cancelled` is swallowed wherever the
/// top-level cancellation token fires.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Configuration is invalid; fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error, usually surfaced while binding a listener or reading a file.
    #[error("I/O error: {0}")]
    Io(String),

    /// Parsing error for IP addresses, CIDRs, or ports.
    #[error("parse error: {0}")]
    Parse(String),

    /// Raw sockets are unavailable; ICMP is disabled for the process lifetime.
    #[error("insufficient privileges for raw sockets: {0}")]
    ScannerPermission(String),

    /// A downstream sink (`Store`/`ResultProcessor`) failed; retried with backoff.
    #[error("sink error: {0}")]
    SinkTransient(String),

    /// The `DeviceRegistryService` sink failed after one retry.
    #[error("registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// An agent was unreachable over RPC; recorded as unavailable, not fatal.
    #[error("rpc unavailable: {0}")]
    RpcUnavailable(String),

    /// Propagated from the top-level cancellation context.
    #[error("cancelled")]
    Cancelled,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<AddrParseError> for Error {
    fn from(err: AddrParseError) -> Self {
        Error::Parse(format!("invalid IP address: {err}"))
    }
}

impl From<ipnetwork::IpNetworkError> for Error {
    fn from(err: ipnetwork::IpNetworkError) -> Self {
        Error::Parse(format!("invalid CIDR: {err}"))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(format!("TOML parse error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_kind() {
        let err = Error::SinkTransient("write failed".to_string());
        assert_eq!(err.to_string(), "sink error: write failed");
    }

    #[test]
    fn addr_parse_error_converts_to_parse() {
        let err: Error = "not-an-ip".parse::<std::net::IpAddr>().unwrap_err().into();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn ip_network_error_converts_to_parse() {
        use ipnetwork::IpNetwork;
        let err: Error = "999.0.0.0/24".parse::<IpNetwork>().unwrap_err().into();
        assert!(matches!(err, Error::Parse(_)));
    }
}
