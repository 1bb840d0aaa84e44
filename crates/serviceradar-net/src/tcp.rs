//! TCP connect scanner (spec §4.1).
//!
//! Attempts a full handshake via the OS socket API — no raw-socket
//! privileges required, unlike the ICMP scanner.

use chrono::Utc;
use serviceradar_core::{Error, ProbeMode, ProbeOutcome, Result, Target};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

#[derive(Clone)]
pub struct TcpScanner {
    timeout: Duration,
}

impl TcpScanner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Attempts a full TCP connect. `available=false` covers both a
    /// refused connection and a timeout (spec §3 invariant) — the
    /// stream, whichever branch is taken, is dropped on every exit path
    /// so no file descriptor is ever leaked.
    pub async fn scan(&self, target: Target) -> Result<ProbeOutcome> {
        debug_assert_eq!(target.mode, ProbeMode::Tcp);
        let port = target
            .port
            .ok_or_else(|| Error::Parse("TCP target missing port".to_string()))?;
        let addr = SocketAddr::new(target.host, port);

        let start = Instant::now();
        let (available, error) = match timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => {
                debug!(%addr, "TCP connect succeeded");
                (true, None)
            }
            Ok(Err(e)) => {
                trace!(%addr, error = %e, "TCP connect failed");
                (false, Some(e.to_string()))
            }
            Err(_elapsed) => {
                trace!(%addr, "TCP connect timed out");
                (false, Some("connect timed out".to_string()))
            }
        };
        let resp_time = if available { start.elapsed() } else { Duration::ZERO };
        let packet_loss = if available { 0.0 } else { 100.0 };

        Ok(ProbeOutcome {
            target,
            available,
            last_seen: Utc::now(),
            resp_time,
            packet_loss,
            error,
        })
    }
}
