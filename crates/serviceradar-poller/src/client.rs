//! Per-agent polling: `GetStatus`, `GetResults`/`StreamResults`, and the
//! chunked-stream reassembly rule (spec §4.6, scenario 6).

use serviceradar_core::AgentEndpoint;
use serviceradar_proto::agent_service_client::AgentServiceClient;
use serviceradar_proto::{ResultsRequest, StatusRequest};
use std::time::Duration;
use tonic::transport::Channel;
use tracing::{debug, warn};

/// Maximum number of times a chunked stream is retried from scratch
/// after a missing-chunk abort before the poll is given up on.
const MAX_STREAM_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct StatusOutcome {
    pub available: bool,
    pub message: Vec<u8>,
    pub response_time: i64,
}

#[derive(Debug, Clone)]
pub struct ResultsOutcome {
    pub data: Vec<u8>,
    pub current_sequence: String,
    pub has_new_data: bool,
    pub sweep_completion: Option<serviceradar_core::SweepCompletionStatus>,
}

/// Polls a single agent's `AgentService`. Connection failures surface as
/// `RPCUnavailable`-flavored `None` results; callers record
/// `available=false` and continue (spec §7).
pub struct AgentPoller {
    endpoint: AgentEndpoint,
    timeout: Duration,
}

impl AgentPoller {
    pub fn new(endpoint: AgentEndpoint, timeout: Duration) -> Self {
        Self { endpoint, timeout }
    }

    pub fn agent_id(&self) -> &str {
        &self.endpoint.agent_id
    }

    pub fn service_name(&self) -> &str {
        &self.endpoint.service_name
    }

    pub fn service_type(&self) -> &str {
        &self.endpoint.service_type
    }

    async fn connect(&self) -> Result<AgentServiceClient<Channel>, tonic::transport::Error> {
        let endpoint = Channel::from_shared(format!("http://{}", self.endpoint.address))?
            .timeout(self.timeout)
            .connect_timeout(self.timeout);
        let channel = endpoint.connect().await?;
        Ok(AgentServiceClient::new(channel))
    }

    /// Issues `GetStatus`. Returns `None` on any RPC failure (agent
    /// unreachable); the caller treats that as `available=false`.
    pub async fn get_status(&self, poller_id: &str) -> Option<StatusOutcome> {
        let mut client = match self.connect().await {
            Ok(c) => c,
            Err(e) => {
                warn!(agent_id = %self.endpoint.agent_id, error = %e, "agent unreachable");
                return None;
            }
        };
        let request = tonic::Request::new(StatusRequest {
            service_name: self.endpoint.service_name.clone(),
            service_type: self.endpoint.service_type.clone(),
            agent_id: self.endpoint.agent_id.clone(),
            poller_id: poller_id.to_string(),
            details: String::new(),
            port: 0,
        });
        match client.get_status(request).await {
            Ok(resp) => {
                let resp = resp.into_inner();
                Some(StatusOutcome {
                    available: resp.available,
                    message: resp.message,
                    response_time: resp.response_time,
                })
            }
            Err(e) => {
                warn!(agent_id = %self.endpoint.agent_id, error = %e, "GetStatus failed");
                None
            }
        }
    }

    /// Issues the non-streaming `GetResults` RPC. This is the only path
    /// that observes `sweep_completion` (spec §4.7, scenario 5): `ResultsChunk`
    /// carries no completion field, so a cycle's `SweepCompletionStatus`
    /// is only ever visible through this call. Callers use `has_new_data`
    /// to decide whether the larger `stream_results` payload is worth
    /// fetching.
    pub async fn get_results(&self, poller_id: &str, last_sequence: &str) -> Option<ResultsOutcome> {
        let mut client = match self.connect().await {
            Ok(c) => c,
            Err(e) => {
                warn!(agent_id = %self.endpoint.agent_id, error = %e, "agent unreachable");
                return None;
            }
        };
        let request = self.results_request(poller_id, last_sequence);
        match client.get_results(request).await {
            Ok(resp) => {
                let resp = resp.into_inner();
                Some(ResultsOutcome {
                    data: resp.data,
                    current_sequence: resp.current_sequence,
                    has_new_data: resp.has_new_data,
                    sweep_completion: resp.sweep_completion.map(Into::into),
                })
            }
            Err(e) => {
                warn!(agent_id = %self.endpoint.agent_id, error = %e, "GetResults failed");
                None
            }
        }
    }

    /// Issues `StreamResults` and reassembles the chunk sequence.
    /// `ResultsChunk` carries no `sweep_completion` field, so this never
    /// populates `ResultsOutcome::sweep_completion` (callers rely on
    /// `get_results` for that). Retries the entire stream from scratch on
    /// a missing intermediate chunk (spec §4.6, scenario 6), up to
    /// `MAX_STREAM_RETRIES` times.
    pub async fn stream_results(&self, poller_id: &str, last_sequence: &str) -> Option<ResultsOutcome> {
        for attempt in 0..MAX_STREAM_RETRIES {
            match self.try_stream_results_once(poller_id, last_sequence).await {
                Ok(outcome) => return Some(outcome),
                Err(reason) => {
                    warn!(
                        agent_id = %self.endpoint.agent_id,
                        attempt,
                        reason,
                        "StreamResults batch aborted, retrying from chunk 0"
                    );
                }
            }
        }
        None
    }

    async fn try_stream_results_once(
        &self,
        poller_id: &str,
        last_sequence: &str,
    ) -> Result<ResultsOutcome, &'static str> {
        let mut client = self.connect().await.map_err(|_| "connect failed")?;
        let request = self.results_request(poller_id, last_sequence);
        let mut stream = client
            .stream_results(request)
            .await
            .map_err(|_| "stream_results rpc failed")?
            .into_inner();

        let mut chunks = Vec::new();
        while let Some(chunk) = stream.message().await.map_err(|_| "stream read failed")? {
            let is_final = chunk.is_final;
            chunks.push(chunk);
            if is_final {
                break;
            }
        }

        let outcome = reassemble_chunks(&chunks)?;
        debug!(agent_id = %self.endpoint.agent_id, "StreamResults committed");
        Ok(ResultsOutcome {
            data: outcome.0,
            current_sequence: outcome.1.clone(),
            has_new_data: last_sequence != outcome.1,
            sweep_completion: None,
        })
    }

    fn results_request(&self, poller_id: &str, last_sequence: &str) -> tonic::Request<ResultsRequest> {
        tonic::Request::new(ResultsRequest {
            service_name: self.endpoint.service_name.clone(),
            service_type: self.endpoint.service_type.clone(),
            agent_id: self.endpoint.agent_id.clone(),
            poller_id: poller_id.to_string(),
            details: String::new(),
            last_sequence: last_sequence.to_string(),
            completion_status: None,
        })
    }
}

/// Concatenates chunks in `chunk_index` order and commits only if the
/// final chunk arrived with `chunk_index = total_chunks - 1` and every
/// intermediate index was actually received (spec §4.6, scenario 6).
fn reassemble_chunks(
    chunks: &[serviceradar_proto::ResultsChunk],
) -> Result<(Vec<u8>, String), &'static str> {
    let last = chunks.last().ok_or("stream ended before a final chunk arrived")?;
    if !last.is_final {
        return Err("stream ended before a final chunk arrived");
    }
    if last.chunk_index != last.total_chunks - 1 {
        return Err("final chunk index did not match total_chunks - 1");
    }

    let total_chunks = last.total_chunks as usize;
    let mut slots: Vec<Option<&[u8]>> = vec![None; total_chunks];
    for chunk in chunks {
        let idx = chunk.chunk_index as usize;
        if idx >= total_chunks {
            return Err("chunk index out of range");
        }
        slots[idx] = Some(&chunk.data);
    }
    if slots.iter().any(Option::is_none) {
        return Err("missing intermediate chunk");
    }

    let data = slots.into_iter().flatten().flatten().copied().collect();
    Ok((data, last.current_sequence.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serviceradar_proto::ResultsChunk;

    fn chunk(idx: i32, total: i32, data: &[u8], is_final: bool, sequence: &str) -> ResultsChunk {
        ResultsChunk {
            data: data.to_vec(),
            chunk_index: idx,
            total_chunks: total,
            is_final,
            current_sequence: sequence.to_string(),
        }
    }

    #[test]
    fn reassembles_complete_stream_in_order() {
        let chunks = vec![
            chunk(0, 3, b"ab", false, "seq-1"),
            chunk(1, 3, b"cd", false, "seq-1"),
            chunk(2, 3, b"ef", true, "seq-1"),
        ];
        let (data, sequence) = reassemble_chunks(&chunks).unwrap();
        assert_eq!(data, b"abcdef");
        assert_eq!(sequence, "seq-1");
    }

    #[test]
    fn missing_intermediate_chunk_is_rejected() {
        // chunks 0,1,3 with total_chunks=4 (spec scenario 6): chunk 2 never arrived.
        let chunks = vec![
            chunk(0, 4, b"a", false, "seq-1"),
            chunk(1, 4, b"b", false, "seq-1"),
            chunk(3, 4, b"d", true, "seq-1"),
        ];
        assert_eq!(reassemble_chunks(&chunks), Err("missing intermediate chunk"));
    }

    #[test]
    fn stream_without_final_chunk_is_rejected() {
        let chunks = vec![chunk(0, 2, b"a", false, "seq-1")];
        assert_eq!(
            reassemble_chunks(&chunks),
            Err("stream ended before a final chunk arrived")
        );
    }

    #[test]
    fn single_chunk_stream_commits() {
        let chunks = vec![chunk(0, 1, b"only", true, "seq-1")];
        let (data, sequence) = reassemble_chunks(&chunks).unwrap();
        assert_eq!(data, b"only");
        assert_eq!(sequence, "seq-1");
    }
}
