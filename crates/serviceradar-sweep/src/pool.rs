//! Worker Pool (C2, spec §4.2).
//!
//! Bounds probe concurrency with a fixed-size window of in-flight
//! futures via `FuturesUnordered`, following the batching strategy used
//! elsewhere in this codebase's scanning core: prime `concurrency`
//! futures, and as each completes immediately queue the next target.
//! Results stream back in completion order, not submission order.

use futures::stream::{FuturesUnordered, StreamExt};
use serviceradar_core::{ProbeOutcome, Target};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Runs a bounded-concurrency sweep over `targets`, dispatching probes
/// through `probe` and returning a receiver of outcomes.
///
/// When `cancel` fires, already-started probes run to completion under
/// their own timeout; no new target is drawn from the input. Completion
/// is signalled by the channel closing, which happens only once the
/// input is exhausted (or cancellation stopped it) AND every in-flight
/// probe has returned (spec §4.2, §5).
pub struct WorkerPool {
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn spawn_run<P, Fut>(
        &self,
        targets: Vec<Target>,
        cancel: CancellationToken,
        probe: P,
    ) -> mpsc::UnboundedReceiver<ProbeOutcome>
    where
        P: Fn(Target) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProbeOutcome> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let concurrency = self.concurrency;
        let probe = Arc::new(probe);

        tokio::spawn(async move {
            let mut pending = targets.into_iter();
            let mut in_flight = FuturesUnordered::new();

            for _ in 0..concurrency {
                if cancel.is_cancelled() {
                    break;
                }
                match pending.next() {
                    Some(target) => in_flight.push(run_one(probe.clone(), target)),
                    None => break,
                }
            }

            while let Some(outcome) = in_flight.next().await {
                if tx.send(outcome).is_err() {
                    return;
                }
                if cancel.is_cancelled() {
                    continue;
                }
                if let Some(target) = pending.next() {
                    in_flight.push(run_one(probe.clone(), target));
                }
            }
        });

        rx
    }
}

fn run_one<P, Fut>(probe: Arc<P>, target: Target) -> impl Future<Output = ProbeOutcome>
where
    P: Fn(Target) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProbeOutcome> + Send + 'static,
{
    async move { probe(target).await }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serviceradar_core::ProbeMode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn target(n: u8) -> Target {
        Target::new(format!("10.0.0.{n}").parse().unwrap(), ProbeMode::Icmp, None)
    }

    fn fake_outcome(target: Target) -> ProbeOutcome {
        ProbeOutcome {
            target,
            available: true,
            last_seen: Utc::now(),
            resp_time: Duration::ZERO,
            packet_loss: 0.0,
            error: None,
        }
    }

    #[tokio::test]
    async fn runs_every_target_exactly_once() {
        let targets: Vec<_> = (1..=20).map(target).collect();
        let pool = WorkerPool::new(4);
        let mut rx = pool.spawn_run(targets, CancellationToken::new(), |t| async move {
            fake_outcome(t)
        });

        let mut seen = 0;
        while rx.recv().await.is_some() {
            seen += 1;
        }
        assert_eq!(seen, 20);
    }

    #[tokio::test]
    async fn cancellation_stops_new_dispatch_but_drains_in_flight() {
        let counter = Arc::new(AtomicUsize::new(0));
        let targets: Vec<_> = (1..=50).map(target).collect();
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let counter_clone = counter.clone();

        let pool = WorkerPool::new(5);
        let mut rx = pool.spawn_run(targets, cancel, move |t| {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                fake_outcome(t)
            }
        });

        cancel_clone.cancel();
        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }

        // No more than the priming window plus whatever slipped in before
        // cancel() was observed should ever have started.
        assert!(counter.load(Ordering::SeqCst) <= 10);
        assert_eq!(received, counter.load(Ordering::SeqCst));
    }
}
