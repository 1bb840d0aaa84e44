//! `AgentService` gRPC server (spec §6): answers poller queries about
//! this agent's last sweep and streams results in fixed-size chunks.

use crate::results_cache::ResultsCache;
use serviceradar_core::SweepCompletionStatus as CoreCompletionStatus;
use serviceradar_proto::agent_service_server::AgentService;
use serviceradar_proto::{
    ResultsChunk, ResultsRequest, ResultsResponse, StatusRequest, StatusResponse,
    SweepCompletionStatus,
};
use serviceradar_sweep::CompletionCoordinator;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

/// Chunk size for `StreamResults`, chosen to keep individual gRPC
/// messages well under the default 4 MiB frame limit.
const CHUNK_SIZE: usize = 64 * 1024;

pub struct Agent {
    cache: Arc<ResultsCache>,
    completion: CompletionCoordinator,
}

impl Agent {
    pub fn new(cache: Arc<ResultsCache>, completion: CompletionCoordinator) -> Self {
        Self { cache, completion }
    }

    fn completion_proto(&self) -> SweepCompletionStatus {
        let status: CoreCompletionStatus = self.completion.snapshot();
        status.into()
    }
}

#[tonic::async_trait]
impl AgentService for Agent {
    async fn get_status(
        &self,
        _request: Request<StatusRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let status = self.completion.snapshot();
        let available = matches!(status.state, serviceradar_core::SweepState::Completed);
        let message = format!(
            "sequence={} total={} completed={}",
            status.target_sequence, status.total_targets, status.completed_targets
        )
        .into_bytes();
        Ok(Response::new(StatusResponse {
            available,
            message,
            response_time: 0,
        }))
    }

    async fn get_results(
        &self,
        request: Request<ResultsRequest>,
    ) -> Result<Response<ResultsResponse>, Status> {
        let req = request.into_inner();
        let (sequence, updates) = self.cache.snapshot();
        let has_new_data = req.last_sequence != sequence;
        let data = serde_json::to_vec(&updates)
            .map_err(|e| Status::internal(format!("serializing results: {e}")))?;
        Ok(Response::new(ResultsResponse {
            data,
            current_sequence: sequence,
            has_new_data,
            sweep_completion: Some(self.completion_proto()),
        }))
    }

    type StreamResultsStream = ReceiverStream<Result<ResultsChunk, Status>>;

    async fn stream_results(
        &self,
        _request: Request<ResultsRequest>,
    ) -> Result<Response<Self::StreamResultsStream>, Status> {
        let (sequence, updates) = self.cache.snapshot();
        let data = serde_json::to_vec(&updates)
            .map_err(|e| Status::internal(format!("serializing results: {e}")))?;

        let chunks: Vec<Vec<u8>> = if data.is_empty() {
            vec![Vec::new()]
        } else {
            data.chunks(CHUNK_SIZE).map(|c| c.to_vec()).collect()
        };
        let total_chunks = chunks.len() as i32;

        let (tx, rx) = tokio::sync::mpsc::channel(total_chunks.max(1) as usize);
        tokio::spawn(async move {
            for (idx, chunk) in chunks.into_iter().enumerate() {
                let is_final = idx as i32 == total_chunks - 1;
                let msg = ResultsChunk {
                    data: chunk,
                    chunk_index: idx as i32,
                    total_chunks,
                    is_final,
                    current_sequence: sequence.clone(),
                };
                if tx.send(Ok(msg)).await.is_err() {
                    return;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serviceradar_core::{DeviceUpdate, DeviceUpdateSource};
    use serviceradar_sweep::DeviceRegistryService;
    use tokio_stream::StreamExt;

    fn agent() -> Agent {
        Agent::new(Arc::new(ResultsCache::new()), CompletionCoordinator::new())
    }

    fn results_request(last_sequence: &str) -> Request<ResultsRequest> {
        Request::new(ResultsRequest {
            service_name: "sweep".to_string(),
            service_type: "sweep".to_string(),
            agent_id: "agent-1".to_string(),
            poller_id: "poller-1".to_string(),
            details: String::new(),
            last_sequence: last_sequence.to_string(),
            completion_status: None,
        })
    }

    fn device_update(device_id: &str) -> DeviceUpdate {
        DeviceUpdate {
            device_id: device_id.to_string(),
            ip: "10.0.0.1".to_string(),
            is_available: true,
            source: DeviceUpdateSource::Sweep,
            partition: "default".to_string(),
            agent_id: "agent-1".to_string(),
            poller_id: "poller-1".to_string(),
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn get_status_reports_unavailable_before_a_cycle_completes() {
        let agent = agent();
        agent.completion.begin_cycle("seq-1".to_string(), 3);

        let response = agent.get_status(Request::new(StatusRequest::default())).await.unwrap();
        assert!(!response.get_ref().available);
    }

    #[tokio::test]
    async fn get_status_reports_available_once_the_cycle_completes() {
        let agent = agent();
        agent.completion.begin_cycle("seq-1".to_string(), 1);
        agent.completion.record_progress(1);
        agent.completion.complete();

        let response = agent.get_status(Request::new(StatusRequest::default())).await.unwrap();
        assert!(response.get_ref().available);
    }

    #[tokio::test]
    async fn get_results_reports_sweep_completion() {
        let agent = agent();
        agent.completion.begin_cycle("seq-1".to_string(), 2);
        agent.completion.record_progress(2);
        agent.completion.complete();

        let response = agent.get_results(results_request("")).await.unwrap();
        let completion = response.get_ref().sweep_completion.as_ref().unwrap();
        assert_eq!(completion.state, serviceradar_proto::SweepState::Completed as i32);
        assert_eq!(completion.completed_targets, 2);
    }

    #[tokio::test]
    async fn get_results_has_new_data_when_last_sequence_differs_matches_spec_scenario_5() {
        let cache = Arc::new(ResultsCache::new());
        cache.begin_cycle("seq-2".to_string());
        cache.register_device(&device_update("default:10.0.0.1")).await.unwrap();
        let agent = Agent::new(cache, CompletionCoordinator::new());

        let stale = agent.get_results(results_request("seq-1")).await.unwrap();
        assert!(stale.get_ref().has_new_data);
        assert_eq!(stale.get_ref().current_sequence, "seq-2");

        let fresh = agent.get_results(results_request("seq-2")).await.unwrap();
        assert!(!fresh.get_ref().has_new_data);
    }

    #[tokio::test]
    async fn stream_results_chunks_by_index_and_marks_the_last_chunk_final() {
        let cache = Arc::new(ResultsCache::new());
        cache.begin_cycle("seq-3".to_string());
        for i in 0..5 {
            cache
                .register_device(&device_update(&format!("default:10.0.0.{i}")))
                .await
                .unwrap();
        }
        let agent = Agent::new(cache, CompletionCoordinator::new());

        let response = agent.stream_results(results_request("")).await.unwrap();
        let mut stream = response.into_inner();

        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next().await {
            chunks.push(chunk.unwrap());
        }

        assert!(!chunks.is_empty());
        assert!(chunks.iter().enumerate().all(|(i, c)| c.chunk_index == i as i32));
        assert!(chunks.last().unwrap().is_final);
        assert!(chunks[..chunks.len() - 1].iter().all(|c| !c.is_final));
    }

    #[tokio::test]
    async fn stream_results_emits_a_single_empty_chunk_when_there_is_no_data() {
        let agent = agent();
        let response = agent.stream_results(results_request("")).await.unwrap();
        let mut stream = response.into_inner();

        let chunk = stream.next().await.unwrap().unwrap();
        assert!(chunk.is_final);
        assert!(chunk.data.is_empty());
        assert!(stream.next().await.is_none());
    }
}
