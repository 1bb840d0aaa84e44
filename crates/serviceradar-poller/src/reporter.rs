//! Aggregates per-agent `ServiceStatus` records into a `PollerStatusRequest`
//! (or chunked `PollerStatusChunk` stream) and reports them to the core
//! via `PollerService` (spec §4.6).

use serviceradar_proto::poller_service_client::PollerServiceClient;
use serviceradar_proto::{PollerStatusChunk, PollerStatusRequest, ServiceStatus};
use tokio_stream::iter as stream_iter;
use tonic::transport::Channel;
use tracing::warn;

pub struct StatusReporter {
    core_address: String,
    partition: String,
    source_ip: String,
    poller_id: String,
    chunk_threshold: usize,
}

impl StatusReporter {
    pub fn new(
        core_address: String,
        partition: String,
        source_ip: String,
        poller_id: String,
        chunk_threshold: usize,
    ) -> Self {
        Self {
            core_address,
            partition,
            source_ip,
            poller_id,
            chunk_threshold,
        }
    }

    /// Submits the aggregated statuses. Uses a single `ReportStatus` call
    /// when the set is small, otherwise streams it via `StreamStatus`
    /// (spec §4.6: "or a PollerStatusChunk stream if the number of
    /// services exceeds the configured chunk threshold").
    pub async fn report(&self, services: Vec<ServiceStatus>) {
        let channel = match Channel::from_shared(format!("http://{}", self.core_address)) {
            Ok(endpoint) => match endpoint.connect().await {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "core unreachable, dropping status report");
                    return;
                }
            },
            Err(e) => {
                warn!(error = %e, "invalid core address");
                return;
            }
        };
        let mut client = PollerServiceClient::new(channel);

        if services.len() <= self.chunk_threshold {
            let request = tonic::Request::new(PollerStatusRequest {
                services,
                partition: self.partition.clone(),
                source_ip: self.source_ip.clone(),
                poller_id: self.poller_id.clone(),
            });
            if let Err(e) = client.report_status(request).await {
                warn!(error = %e, "ReportStatus failed");
            }
            return;
        }

        let batches: Vec<&[ServiceStatus]> = services.chunks(self.chunk_threshold).collect();
        let total_chunks = batches.len() as i32;
        let chunks: Vec<PollerStatusChunk> = batches
            .into_iter()
            .enumerate()
            .map(|(idx, batch)| PollerStatusChunk {
                services: batch.to_vec(),
                partition: self.partition.clone(),
                source_ip: self.source_ip.clone(),
                poller_id: self.poller_id.clone(),
                chunk_index: idx as i32,
                total_chunks,
                is_final: idx as i32 == total_chunks - 1,
            })
            .collect();

        if let Err(e) = client.stream_status(stream_iter(chunks)).await {
            warn!(error = %e, "StreamStatus failed");
        }
    }
}
