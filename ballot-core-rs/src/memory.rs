//! In-process election controller.
//!
//! Implements [`ElectionService`] without a network so clients can be
//! exercised end to end. Every applied command advances a commit index.
//! Each leadership change bumps the term and pushes an event to every open
//! stream on the same election; the event carries its stream offset only
//! for the session whose request caused the change, and that session's
//! response reports the same offset. Fault hooks cover failed requests,
//! lost responses, latency and broken streams.

use crate::error::RpcError;
use crate::service::{
    CandidateRequest, CandidateResponse, CloseSessionRequest, CloseSessionResponse,
    ElectionService, EnterRequest, EnterResponse, EventRequest, EventResponse, EventStream,
    GetLeadershipRequest, GetLeadershipResponse, KeepAliveRequest, KeepAliveResponse,
    OpenSessionRequest, OpenSessionResponse, WithdrawRequest, WithdrawResponse,
};
use crate::types::{CandidateId, PrimitiveName, SessionHeader, SessionId, StreamHeader, StreamId, Term};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
enum Fault {
    Pass,
    FailRequest(RpcError),
    DropResponse,
}

/// Result of applying a candidate command to an election
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Absent,
    Unchanged,
    Changed,
}

struct StreamRecord {
    stream_id: StreamId,
    offset: u64,
    tx: mpsc::Sender<Result<EventResponse, RpcError>>,
}

struct SessionRecord {
    name: PrimitiveName,
    open: bool,
    timeout: Duration,
    sequences: Vec<u64>,
    keep_alives: u64,
    streams: Vec<StreamRecord>,
}

#[derive(Default)]
struct ElectionRecord {
    term: u64,
    candidates: Vec<CandidateId>,
    owners: HashMap<CandidateId, SessionId>,
}

impl ElectionRecord {
    fn snapshot(&self) -> Term {
        Term {
            term: self.term,
            leader: self.candidates.first().cloned(),
            candidates: self.candidates.clone(),
        }
    }

    fn position(&self, id: &CandidateId) -> Option<usize> {
        self.candidates.iter().position(|c| c == id)
    }

    fn enter(&mut self, id: &CandidateId, session_id: SessionId) -> Change {
        if self.position(id).is_some() {
            return Change::Unchanged;
        }
        self.candidates.push(id.clone());
        self.owners.insert(id.clone(), session_id);
        Change::Changed
    }

    fn remove(&mut self, id: &CandidateId) -> Change {
        match self.position(id) {
            Some(i) => {
                self.candidates.remove(i);
                self.owners.remove(id);
                Change::Changed
            }
            None => Change::Absent,
        }
    }

    fn anoint(&mut self, id: &CandidateId) -> Change {
        match self.position(id) {
            None => Change::Absent,
            Some(0) => Change::Unchanged,
            Some(i) => {
                let candidate = self.candidates.remove(i);
                self.candidates.insert(0, candidate);
                Change::Changed
            }
        }
    }

    fn promote(&mut self, id: &CandidateId) -> Change {
        match self.position(id) {
            None => Change::Absent,
            Some(0) => Change::Unchanged,
            Some(i) => {
                self.candidates.swap(i - 1, i);
                Change::Changed
            }
        }
    }

    /// Withdraw every candidate entered through `session_id`
    fn withdraw_session(&mut self, session_id: SessionId) -> Change {
        let owned: Vec<CandidateId> = self
            .owners
            .iter()
            .filter(|(_, owner)| **owner == session_id)
            .map(|(id, _)| id.clone())
            .collect();

        let mut change = Change::Unchanged;
        for id in owned {
            if self.remove(&id) == Change::Changed {
                change = Change::Changed;
            }
        }
        change
    }
}

#[derive(Default)]
struct ControllerState {
    next_session_id: SessionId,
    next_stream_id: StreamId,
    index: u64,
    sessions: HashMap<SessionId, SessionRecord>,
    elections: HashMap<PrimitiveName, ElectionRecord>,
}

impl ControllerState {
    fn session(&self, session_id: SessionId) -> Result<&SessionRecord, RpcError> {
        match self.sessions.get(&session_id) {
            Some(session) if session.open => Ok(session),
            _ => Err(RpcError::UnknownSession(session_id)),
        }
    }

    fn session_mut(&mut self, session_id: SessionId) -> Result<&mut SessionRecord, RpcError> {
        match self.sessions.get_mut(&session_id) {
            Some(session) if session.open => Ok(session),
            _ => Err(RpcError::UnknownSession(session_id)),
        }
    }

    /// Apply a mutating request: record its sequence number and advance the index
    fn command(&mut self, header: &SessionHeader) -> Result<PrimitiveName, RpcError> {
        let session = self.session_mut(header.session_id)?;
        session.sequences.push(header.sequence_number);
        let name = session.name.clone();
        self.index += 1;
        Ok(name)
    }

    fn response_header(&self, request: &SessionHeader) -> SessionHeader {
        let streams = self
            .sessions
            .get(&request.session_id)
            .map(|session| {
                session
                    .streams
                    .iter()
                    .map(|stream| StreamHeader {
                        stream_id: stream.stream_id,
                        offset: stream.offset,
                    })
                    .collect()
            })
            .unwrap_or_default();

        SessionHeader {
            session_id: request.session_id,
            sequence_number: request.sequence_number,
            last_index: self.index,
            streams,
        }
    }

    fn term(&self, name: &PrimitiveName) -> Term {
        self.elections
            .get(name)
            .map(ElectionRecord::snapshot)
            .unwrap_or_default()
    }

    /// Apply `change` to the election and publish the new term if it changed
    fn update<F>(&mut self, name: &PrimitiveName, origin: Option<SessionId>, change: F) -> Change
    where
        F: FnOnce(&mut ElectionRecord) -> Change,
    {
        let election = self.elections.entry(name.clone()).or_default();
        let result = change(election);
        if result != Change::Changed {
            return result;
        }

        election.term += 1;
        let term = election.snapshot();
        info!(
            "Controller: {} term {} leader {:?}",
            name,
            term.term,
            term.leader.as_ref().map(CandidateId::as_str)
        );
        self.publish(name, origin, term);
        result
    }

    fn publish(&mut self, name: &PrimitiveName, origin: Option<SessionId>, term: Term) {
        let index = self.index;
        for (session_id, session) in self.sessions.iter_mut() {
            if !session.open || session.name != *name {
                continue;
            }

            let session_id = *session_id;
            session.streams.retain_mut(|stream| {
                stream.offset += 1;
                let streams = if origin == Some(session_id) {
                    vec![StreamHeader {
                        stream_id: stream.stream_id,
                        offset: stream.offset,
                    }]
                } else {
                    Vec::new()
                };

                let event = EventResponse {
                    header: SessionHeader {
                        session_id,
                        sequence_number: 0,
                        last_index: index,
                        streams,
                    },
                    term: term.clone(),
                };

                match stream.tx.try_send(Ok(event)) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) => {
                        warn!(
                            "Controller: stream {} of session {} is full, dropping event",
                            stream.stream_id, session_id
                        );
                        true
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!("Controller: stream {} closed by client", stream.stream_id);
                        false
                    }
                }
            });
        }
    }
}

/// In-process implementation of one partition
#[derive(Default)]
pub struct MemoryController {
    state: Mutex<ControllerState>,
    latency: Mutex<Option<(Duration, Duration)>>,
    faults: Mutex<VecDeque<Fault>>,
}

impl MemoryController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every response by a random duration in `[min, max]`
    pub fn with_latency(self, min: Duration, max: Duration) -> Self {
        self.set_latency(min, max);
        self
    }

    pub fn set_latency(&self, min: Duration, max: Duration) {
        *self.latency.lock() = Some((min, max.max(min)));
    }

    /// Let the next election request through so a queued fault lands on a later one
    pub fn pass_next(&self) {
        self.faults.lock().push_back(Fault::Pass);
    }

    /// Fail the next election request before it is applied
    pub fn fail_next(&self, error: RpcError) {
        self.faults.lock().push_back(Fault::FailRequest(error));
    }

    /// Apply the next election request but lose its response
    pub fn drop_next_response(&self) {
        self.faults.lock().push_back(Fault::DropResponse);
    }

    /// Send `error` on every stream of `session_id` and close them
    pub fn break_streams(&self, session_id: SessionId, error: RpcError) {
        let mut state = self.state.lock();
        if let Some(session) = state.sessions.get_mut(&session_id) {
            for stream in session.streams.drain(..) {
                let _ = stream.tx.try_send(Err(error.clone()));
            }
        }
    }

    /// Cleanly end every stream of `session_id`
    pub fn end_streams(&self, session_id: SessionId) {
        let mut state = self.state.lock();
        if let Some(session) = state.sessions.get_mut(&session_id) {
            session.streams.clear();
        }
    }

    pub fn is_session_open(&self, session_id: SessionId) -> bool {
        self.state.lock().session(session_id).is_ok()
    }

    /// Sequence numbers of the mutating requests applied for a session, in arrival order
    pub fn observed_sequences(&self, session_id: SessionId) -> Vec<u64> {
        self.state
            .lock()
            .sessions
            .get(&session_id)
            .map(|session| session.sequences.clone())
            .unwrap_or_default()
    }

    pub fn keep_alives(&self, session_id: SessionId) -> u64 {
        self.state
            .lock()
            .sessions
            .get(&session_id)
            .map(|session| session.keep_alives)
            .unwrap_or(0)
    }

    /// Current term of an election
    pub fn term(&self, name: &PrimitiveName) -> Term {
        self.state.lock().term(name)
    }

    /// Commit index of the last applied command
    pub fn index(&self) -> u64 {
        self.state.lock().index
    }

    fn take_fault(&self) -> Option<Fault> {
        self.faults.lock().pop_front()
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        let Some((min, max)) = latency else {
            return;
        };
        let delay = if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Run an election request through the fault hooks and latency
    async fn handle<T, F>(&self, apply: F) -> Result<T, RpcError>
    where
        F: FnOnce(&mut ControllerState) -> Result<T, RpcError>,
    {
        let fault = self.take_fault();
        if let Some(Fault::FailRequest(error)) = fault {
            debug!("Controller: failing request: {}", error);
            return Err(error);
        }

        let response = apply(&mut *self.state.lock());
        self.delay().await;

        if let Some(Fault::DropResponse) = fault {
            debug!("Controller: dropping response");
            return Err(RpcError::Unavailable("response lost".to_string()));
        }
        response
    }

    fn candidate_command<F>(
        &self,
        state: &mut ControllerState,
        request: &CandidateRequest,
        change: F,
    ) -> Result<CandidateResponse, RpcError>
    where
        F: FnOnce(&mut ElectionRecord) -> Change,
    {
        let name = state.command(&request.header)?;
        let result = state.update(&name, Some(request.header.session_id), change);
        Ok(CandidateResponse {
            header: state.response_header(&request.header),
            succeeded: result != Change::Absent,
        })
    }
}

#[async_trait]
impl ElectionService for MemoryController {
    async fn open_session(
        &self,
        request: OpenSessionRequest,
    ) -> Result<OpenSessionResponse, RpcError> {
        let header = {
            let mut state = self.state.lock();
            state.next_session_id += 1;
            state.index += 1;
            let session_id = state.next_session_id;
            state.sessions.insert(
                session_id,
                SessionRecord {
                    name: request.name.clone(),
                    open: true,
                    timeout: request.timeout,
                    sequences: Vec::new(),
                    keep_alives: 0,
                    streams: Vec::new(),
                },
            );
            debug!("Controller: opened session {} for {}", session_id, request.name);
            SessionHeader {
                session_id,
                sequence_number: 0,
                last_index: state.index,
                streams: Vec::new(),
            }
        };
        self.delay().await;
        Ok(OpenSessionResponse { header })
    }

    async fn keep_alive(&self, request: KeepAliveRequest) -> Result<KeepAliveResponse, RpcError> {
        let header = {
            let mut state = self.state.lock();
            let session = state.session_mut(request.header.session_id)?;
            session.keep_alives += 1;
            debug!(
                "Controller: keep-alive for session {} (timeout {:?})",
                request.header.session_id, session.timeout
            );
            state.response_header(&request.header)
        };
        self.delay().await;
        Ok(KeepAliveResponse { header })
    }

    async fn close_session(
        &self,
        request: CloseSessionRequest,
    ) -> Result<CloseSessionResponse, RpcError> {
        let header = {
            let mut state = self.state.lock();
            let session_id = request.header.session_id;
            let session = state.session_mut(session_id)?;
            session.open = false;
            session.streams.clear();
            let name = session.name.clone();
            state.index += 1;

            state.update(&name, None, |election| election.withdraw_session(session_id));
            if request.delete {
                state.elections.remove(&name);
                info!("Controller: deleted {}", name);
            }
            debug!("Controller: closed session {}", session_id);
            state.response_header(&request.header)
        };
        self.delay().await;
        Ok(CloseSessionResponse { header })
    }

    async fn get_leadership(
        &self,
        request: GetLeadershipRequest,
    ) -> Result<GetLeadershipResponse, RpcError> {
        self.handle(|state| {
            let name = state.session(request.header.session_id)?.name.clone();
            Ok(GetLeadershipResponse {
                header: state.response_header(&request.header),
                term: state.term(&name),
            })
        })
        .await
    }

    async fn enter(&self, request: EnterRequest) -> Result<EnterResponse, RpcError> {
        self.handle(|state| {
            let name = state.command(&request.header)?;
            let session_id = request.header.session_id;
            state.update(&name, Some(session_id), |election| {
                election.enter(&request.candidate_id, session_id)
            });
            Ok(EnterResponse {
                header: state.response_header(&request.header),
                term: state.term(&name),
            })
        })
        .await
    }

    async fn withdraw(&self, request: WithdrawRequest) -> Result<WithdrawResponse, RpcError> {
        self.handle(|state| {
            let name = state.command(&request.header)?;
            state.update(&name, Some(request.header.session_id), |election| {
                election.remove(&request.candidate_id)
            });
            Ok(WithdrawResponse {
                header: state.response_header(&request.header),
            })
        })
        .await
    }

    async fn anoint(&self, request: CandidateRequest) -> Result<CandidateResponse, RpcError> {
        self.handle(|state| {
            self.candidate_command(state, &request, |election| {
                election.anoint(&request.candidate_id)
            })
        })
        .await
    }

    async fn promote(&self, request: CandidateRequest) -> Result<CandidateResponse, RpcError> {
        self.handle(|state| {
            self.candidate_command(state, &request, |election| {
                election.promote(&request.candidate_id)
            })
        })
        .await
    }

    async fn evict(&self, request: CandidateRequest) -> Result<CandidateResponse, RpcError> {
        self.handle(|state| {
            self.candidate_command(state, &request, |election| {
                election.remove(&request.candidate_id)
            })
        })
        .await
    }

    async fn events(&self, request: EventRequest) -> Result<EventStream, RpcError> {
        self.handle(|state| {
            state.command(&request.header)?;
            state.next_stream_id += 1;
            let stream_id = state.next_stream_id;
            let (tx, rx) = mpsc::channel(request.buffer.max(1));

            let session = state.session_mut(request.header.session_id)?;
            session.streams.push(StreamRecord {
                stream_id,
                offset: 0,
                tx,
            });
            debug!(
                "Controller: session {} subscribed with stream {}",
                request.header.session_id, stream_id
            );
            Ok(rx)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name() -> PrimitiveName {
        PrimitiveName::new("default", "leader")
    }

    async fn open(controller: &MemoryController) -> SessionHeader {
        controller
            .open_session(OpenSessionRequest {
                name: name(),
                timeout: Duration::from_secs(30),
            })
            .await
            .unwrap()
            .header
    }

    fn header(session: &SessionHeader, sequence_number: u64) -> SessionHeader {
        SessionHeader {
            sequence_number,
            ..session.clone()
        }
    }

    #[tokio::test]
    async fn test_events_tag_only_own_changes() {
        let controller = MemoryController::new();
        let a = open(&controller).await;
        let b = open(&controller).await;

        let mut a_events = controller
            .events(EventRequest {
                header: header(&a, 1),
                buffer: 16,
            })
            .await
            .unwrap();

        let response = controller
            .enter(EnterRequest {
                header: header(&a, 2),
                candidate_id: "A".into(),
            })
            .await
            .unwrap();
        let own = a_events.recv().await.unwrap().unwrap();
        assert_eq!(own.header.streams, response.header.streams);
        assert_eq!(own.header.streams[0].offset, 1);

        controller
            .enter(EnterRequest {
                header: header(&b, 1),
                candidate_id: "B".into(),
            })
            .await
            .unwrap();
        let foreign = a_events.recv().await.unwrap().unwrap();
        assert!(foreign.header.streams.is_empty());
        assert_eq!(foreign.term.term, 2);
    }

    #[tokio::test]
    async fn test_enter_twice_keeps_term() {
        let controller = MemoryController::new();
        let a = open(&controller).await;

        for seq in 1..=2 {
            let response = controller
                .enter(EnterRequest {
                    header: header(&a, seq),
                    candidate_id: "A".into(),
                })
                .await
                .unwrap();
            assert_eq!(response.term.term, 1);
        }
        assert_eq!(controller.observed_sequences(a.session_id), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_index_advances_per_command() {
        let controller = MemoryController::new();
        let a = open(&controller).await;
        let start = controller.index();

        controller
            .withdraw(WithdrawRequest {
                header: header(&a, 1),
                candidate_id: "A".into(),
            })
            .await
            .unwrap();
        controller
            .get_leadership(GetLeadershipRequest { header: header(&a, 1) })
            .await
            .unwrap();
        assert_eq!(controller.index(), start + 1);
    }

    #[tokio::test]
    async fn test_closed_session_is_unknown() {
        let controller = MemoryController::new();
        let a = open(&controller).await;
        controller
            .close_session(CloseSessionRequest {
                header: a.clone(),
                delete: false,
            })
            .await
            .unwrap();

        let result = controller
            .get_leadership(GetLeadershipRequest { header: a.clone() })
            .await;
        assert_eq!(result.unwrap_err(), RpcError::UnknownSession(a.session_id));
    }

    #[tokio::test]
    async fn test_end_streams_closes_channel() {
        let controller = MemoryController::new();
        let a = open(&controller).await;
        let mut events = controller
            .events(EventRequest {
                header: header(&a, 1),
                buffer: 16,
            })
            .await
            .unwrap();

        controller.end_streams(a.session_id);
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_buffer_bounds_queued_events() {
        let controller = MemoryController::new();
        let a = open(&controller).await;
        let b = open(&controller).await;
        let mut events = controller
            .events(EventRequest {
                header: header(&a, 1),
                buffer: 1,
            })
            .await
            .unwrap();

        for (seq, id) in [(1, "B"), (2, "C")] {
            controller
                .enter(EnterRequest {
                    header: header(&b, seq),
                    candidate_id: id.into(),
                })
                .await
                .unwrap();
        }

        assert_eq!(events.recv().await.unwrap().unwrap().term.term, 1);
        assert!(events.try_recv().is_err());
        assert_eq!(controller.term(&name()).term, 2);
    }

    #[test]
    fn test_promote_swaps_toward_front() {
        let mut election = ElectionRecord::default();
        for id in ["A", "B", "C"] {
            election.enter(&id.into(), 1);
        }

        assert_eq!(election.promote(&"C".into()), Change::Changed);
        assert_eq!(
            election.candidates,
            vec![CandidateId::from("A"), "C".into(), "B".into()]
        );
        assert_eq!(election.promote(&"A".into()), Change::Unchanged);
        assert_eq!(election.promote(&"Z".into()), Change::Absent);
    }
}
