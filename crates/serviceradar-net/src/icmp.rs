//! ICMP echo scanner (spec §4.1).
//!
//! Sends `count` ICMP Echo Requests to a host and waits up to `timeout`
//! for each reply, following the Echo Request/Reply exchange pattern
//! used for host discovery elsewhere in this codebase's lineage
//! (identifier-tagged echo, checksum via `pnet::util::checksum`).

use chrono::Utc;
use pnet::packet::icmp::echo_reply::EchoReplyPacket;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{IcmpCode, IcmpTypes};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::Packet;
use pnet::transport::{icmp_packet_iter, transport_channel, TransportChannelType, TransportProtocol};
use serviceradar_core::{Error, ProbeMode, ProbeOutcome, Result, Target};
use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};
use tracing::trace;

const ECHO_PAYLOAD: &[u8] = b"serviceradar";

/// ICMP echo scanner. Only IPv4 is implemented; IPv6 targets are
/// reported as unavailable rather than failing the cycle.
#[derive(Clone)]
pub struct IcmpScanner {
    timeout: Duration,
    count: u32,
}

impl IcmpScanner {
    pub fn new(timeout: Duration, count: u32) -> Self {
        Self {
            timeout,
            count: count.max(1),
        }
    }

    /// Probes `target`, returning a `ProbeOutcome` with `available`,
    /// `resp_time` (mean of successful RTTs, 0 if none), and
    /// `packet_loss` per spec §4.1.
    ///
    /// Errors only with `ScannerPermission` when raw sockets cannot be
    /// opened; the caller should then disable ICMP for the cycle.
    pub async fn scan(&self, target: Target) -> Result<ProbeOutcome> {
        let IpAddr::V4(host) = target.host else {
            return Ok(self.outcome(target, false, Duration::ZERO, 100.0, Some(
                "ICMPv6 not supported".to_string(),
            )));
        };

        let this = self.clone();
        let samples = tokio::task::spawn_blocking(move || this.ping_v4(host))
            .await
            .map_err(|e| Error::ScannerPermission(format!("icmp worker panicked: {e}")))??;

        let sent = self.count as usize;
        let received = samples.len();
        let packet_loss = (1.0 - received as f64 / sent as f64) * 100.0;
        let resp_time = if received > 0 {
            samples.iter().sum::<Duration>() / received as u32
        } else {
            Duration::ZERO
        };

        Ok(self.outcome(target, received > 0, resp_time, packet_loss, None))
    }

    fn outcome(
        &self,
        target: Target,
        available: bool,
        resp_time: Duration,
        packet_loss: f64,
        error: Option<String>,
    ) -> ProbeOutcome {
        debug_assert_eq!(target.mode, ProbeMode::Icmp);
        ProbeOutcome {
            target,
            available,
            last_seen: Utc::now(),
            resp_time,
            packet_loss,
            error,
        }
    }

    /// Blocking send/receive loop over `count` echoes. Runs on a
    /// blocking thread; `pnet::transport` has no async API.
    fn ping_v4(&self, host: Ipv4Addr) -> Result<Vec<Duration>> {
        let protocol =
            TransportChannelType::Layer4(TransportProtocol::Ipv4(IpNextHeaderProtocols::Icmp));
        let (mut tx, mut rx) = transport_channel(1024, protocol)
            .map_err(|e| Error::ScannerPermission(format!("failed to open ICMP socket: {e}")))?;

        let identifier = std::process::id() as u16;
        let mut samples = Vec::new();

        for sequence in 0..self.count as u16 {
            let mut buffer = vec![
                0u8;
                MutableEchoRequestPacket::minimum_packet_size() + ECHO_PAYLOAD.len()
            ];
            let mut packet = MutableEchoRequestPacket::new(&mut buffer)
                .ok_or_else(|| Error::ScannerPermission("failed to build ICMP packet".to_string()))?;
            packet.set_icmp_type(IcmpTypes::EchoRequest);
            packet.set_icmp_code(IcmpCode(0));
            packet.set_identifier(identifier);
            packet.set_sequence_number(sequence);
            packet.set_payload(ECHO_PAYLOAD);
            let checksum = pnet::util::checksum(packet.packet(), 1);
            packet.set_checksum(checksum);

            let sent_at = Instant::now();
            tx.send_to(packet, IpAddr::V4(host))
                .map_err(|e| Error::ScannerPermission(format!("failed to send ICMP echo: {e}")))?;

            let mut iter = icmp_packet_iter(&mut rx);
            while sent_at.elapsed() < self.timeout {
                #[cfg(unix)]
                let next = iter.next_with_timeout(Duration::from_millis(50));
                #[cfg(not(unix))]
                let next: std::io::Result<Option<(pnet::packet::icmp::IcmpPacket, IpAddr)>> =
                    Ok(None);

                if let Ok(Some((packet, IpAddr::V4(src)))) = next {
                    if src == host && packet.get_icmp_type() == IcmpTypes::EchoReply {
                        if let Some(reply) = EchoReplyPacket::new(packet.packet()) {
                            if reply.get_identifier() == identifier
                                && reply.get_sequence_number() == sequence
                            {
                                samples.push(sent_at.elapsed());
                                trace!(?host, sequence, "ICMP echo reply");
                                break;
                            }
                        }
                    }
                }
            }
        }

        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serviceradar_core::ProbeMode;

    #[tokio::test]
    async fn ipv6_target_reports_unavailable_without_erroring() {
        let scanner = IcmpScanner::new(Duration::from_millis(50), 1);
        let target = Target::new("::1".parse().unwrap(), ProbeMode::Icmp, None);
        let outcome = scanner.scan(target).await.unwrap();
        assert!(!outcome.available);
        assert_eq!(outcome.packet_loss, 100.0);
    }
}
