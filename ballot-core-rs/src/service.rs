//! Request/response messages and the partition connection interface
//!
//! Every call carries a [`SessionHeader`] in both directions. The server
//! stream for election events is delivered as a channel of results; the
//! channel closing is the clean end-of-stream signal.

use crate::error::RpcError;
use crate::types::{CandidateId, PrimitiveName, SessionHeader, Term};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

/// Server-push stream of election events
pub type EventStream = mpsc::Receiver<Result<EventResponse, RpcError>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenSessionRequest {
    pub name: PrimitiveName,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenSessionResponse {
    pub header: SessionHeader,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepAliveRequest {
    pub header: SessionHeader,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepAliveResponse {
    pub header: SessionHeader,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseSessionRequest {
    pub header: SessionHeader,
    /// Also remove the primitive's server-side state
    pub delete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseSessionResponse {
    pub header: SessionHeader,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetLeadershipRequest {
    pub header: SessionHeader,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetLeadershipResponse {
    pub header: SessionHeader,
    pub term: Term,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnterRequest {
    pub header: SessionHeader,
    pub candidate_id: CandidateId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnterResponse {
    pub header: SessionHeader,
    pub term: Term,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub header: SessionHeader,
    pub candidate_id: CandidateId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawResponse {
    pub header: SessionHeader,
}

/// Request shared by anoint, promote and evict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRequest {
    pub header: SessionHeader,
    pub candidate_id: CandidateId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateResponse {
    pub header: SessionHeader,
    pub succeeded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRequest {
    pub header: SessionHeader,
    /// Messages the server may queue on the stream before it drops events
    pub buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventResponse {
    /// Carries at most one stream position; empty when the event is not
    /// ordered behind any of this session's requests
    pub header: SessionHeader,
    pub term: Term,
}

impl EventResponse {
    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Connection to one partition of the coordination service
#[async_trait]
pub trait ElectionService: Send + Sync {
    async fn open_session(&self, request: OpenSessionRequest)
        -> Result<OpenSessionResponse, RpcError>;

    async fn keep_alive(&self, request: KeepAliveRequest) -> Result<KeepAliveResponse, RpcError>;

    async fn close_session(
        &self,
        request: CloseSessionRequest,
    ) -> Result<CloseSessionResponse, RpcError>;

    async fn get_leadership(
        &self,
        request: GetLeadershipRequest,
    ) -> Result<GetLeadershipResponse, RpcError>;

    async fn enter(&self, request: EnterRequest) -> Result<EnterResponse, RpcError>;

    async fn withdraw(&self, request: WithdrawRequest) -> Result<WithdrawResponse, RpcError>;

    async fn anoint(&self, request: CandidateRequest) -> Result<CandidateResponse, RpcError>;

    async fn promote(&self, request: CandidateRequest) -> Result<CandidateResponse, RpcError>;

    async fn evict(&self, request: CandidateRequest) -> Result<CandidateResponse, RpcError>;

    /// Subscribe to leadership changes
    async fn events(&self, request: EventRequest) -> Result<EventStream, RpcError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StreamHeader;

    #[test]
    fn test_event_response_serialization() {
        let response = EventResponse {
            header: SessionHeader {
                session_id: 4,
                sequence_number: 0,
                last_index: 12,
                streams: vec![StreamHeader {
                    stream_id: 3,
                    offset: 7,
                }],
            },
            term: Term {
                term: 5,
                leader: Some("alpha".into()),
                candidates: vec!["alpha".into()],
            },
        };

        let bytes = response.to_bytes().unwrap();
        let parsed = EventResponse::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.header, response.header);
        assert_eq!(parsed.term, response.term);
    }
}
