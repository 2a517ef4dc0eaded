//! Leader election client.
//!
//! Every mutating call advances the session sequence number; reads reuse the
//! current header. Each response header is merged back into the session
//! before the call returns, which is what releases ordered events held by a
//! listener. Failures are returned as-is without retry.

use crate::config::ElectionConfig;
use crate::error::{ElectionError, Result};
use crate::listener::{EventListener, ListenerHandle};
use crate::router::partition_index;
use crate::service::{
    CandidateRequest, ElectionService, EnterRequest, EventRequest, GetLeadershipRequest,
    WithdrawRequest,
};
use crate::session::Session;
use crate::types::{CandidateId, ElectionEvent, PrimitiveName, SessionId, Term};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Client handle for one election primitive
pub struct Election {
    id: CandidateId,
    session: Session,
}

impl Election {
    /// Route `config.name` to a partition and open a session on it
    pub async fn new(
        config: ElectionConfig,
        partitions: &[Arc<dyn ElectionService>],
        id: CandidateId,
    ) -> Result<Self> {
        config.validate()?;
        if id.as_str().is_empty() {
            return Err(ElectionError::InvalidConfiguration(
                "candidate id must not be empty".to_string(),
            ));
        }

        let index = partition_index(&config.name, partitions.len())?;
        let service = partitions[index].clone();
        let session = Session::open(config.name.clone(), service, &config).await?;

        info!(
            "Election {}: candidate {} on partition {} (session {})",
            config.name,
            id,
            index,
            session.id()
        );

        Ok(Self { id, session })
    }

    pub fn name(&self) -> &PrimitiveName {
        self.session.name()
    }

    /// This client's candidate identity
    pub fn id(&self) -> &CandidateId {
        &self.id
    }

    pub fn session_id(&self) -> SessionId {
        self.session.id()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Read the current term
    pub async fn get_term(&self) -> Result<Term> {
        let header = self.session.headers().current_header()?;
        let response = self
            .session
            .call(
                self.session
                    .service()
                    .get_leadership(GetLeadershipRequest { header }),
            )
            .await?;

        self.session.headers().update_header(&response.header);
        Ok(response.term)
    }

    /// Join the election as this client's candidate
    pub async fn enter(&self) -> Result<Term> {
        let header = self.session.headers().next_header()?;
        debug!(
            "Election {}: enter {} (seq {})",
            self.name(),
            self.id,
            header.sequence_number
        );

        let request = EnterRequest {
            header,
            candidate_id: self.id.clone(),
        };
        let response = self
            .session
            .call(self.session.service().enter(request))
            .await?;

        self.session.headers().update_header(&response.header);
        if response.term.is_leader(&self.id) {
            info!(
                "Election {}: {} is leader for term {}",
                self.name(),
                self.id,
                response.term.term
            );
        }
        Ok(response.term)
    }

    /// Withdraw this client's candidate and return the resulting term.
    ///
    /// Leaving when not a candidate is not an error. The term is read with a
    /// second request after the withdraw; if only that read fails, the error
    /// is returned even though the candidate has already been withdrawn.
    pub async fn leave(&self) -> Result<Term> {
        let header = self.session.headers().next_header()?;
        debug!(
            "Election {}: withdraw {} (seq {})",
            self.name(),
            self.id,
            header.sequence_number
        );

        let request = WithdrawRequest {
            header,
            candidate_id: self.id.clone(),
        };
        let response = self
            .session
            .call(self.session.service().withdraw(request))
            .await?;

        self.session.headers().update_header(&response.header);
        self.get_term().await
    }

    /// Make `id` the leader if it is a candidate
    pub async fn anoint(&self, id: &CandidateId) -> Result<bool> {
        let request = self.candidate_request(id)?;
        let response = self
            .session
            .call(self.session.service().anoint(request))
            .await?;

        self.session.headers().update_header(&response.header);
        debug!("Election {}: anoint {} -> {}", self.name(), id, response.succeeded);
        Ok(response.succeeded)
    }

    /// Move `id` one position toward leadership
    pub async fn promote(&self, id: &CandidateId) -> Result<bool> {
        let request = self.candidate_request(id)?;
        let response = self
            .session
            .call(self.session.service().promote(request))
            .await?;

        self.session.headers().update_header(&response.header);
        debug!("Election {}: promote {} -> {}", self.name(), id, response.succeeded);
        Ok(response.succeeded)
    }

    /// Remove `id` from the election
    pub async fn evict(&self, id: &CandidateId) -> Result<bool> {
        let request = self.candidate_request(id)?;
        let response = self
            .session
            .call(self.session.service().evict(request))
            .await?;

        self.session.headers().update_header(&response.header);
        debug!("Election {}: evict {} -> {}", self.name(), id, response.succeeded);
        Ok(response.succeeded)
    }

    /// Subscribe to leadership changes.
    ///
    /// Events are forwarded to `events` by a background task until the stream
    /// ends, fails, or the session closes. The listener never closes the
    /// caller's channel; keep another sender if the receiver must outlive it.
    pub async fn listen(&self, events: mpsc::Sender<ElectionEvent>) -> Result<ListenerHandle> {
        let request = EventRequest {
            header: self.session.headers().next_header()?,
            buffer: self.session.event_buffer(),
        };
        let stream = self
            .session
            .call(self.session.service().events(request))
            .await?;

        let (task, handle) = EventListener::spawn(
            self.session.headers().clone(),
            stream,
            events,
            self.session.shutdown_signal(),
        );
        self.session.track(task);

        info!("Election {}: listening for leadership changes", self.name());
        Ok(handle)
    }

    /// Close the session; server-side election state is kept
    pub async fn close(&self) -> Result<()> {
        self.session.close().await
    }

    /// Close the session and remove the election's server-side state
    pub async fn delete(&self) -> Result<()> {
        self.session.delete().await
    }

    fn candidate_request(&self, id: &CandidateId) -> Result<CandidateRequest> {
        Ok(CandidateRequest {
            header: self.session.headers().next_header()?,
            candidate_id: id.clone(),
        })
    }
}
