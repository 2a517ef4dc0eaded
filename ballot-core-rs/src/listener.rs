//! Background consumer of the election event stream.
//!
//! State machine: `Streaming` until the server ends the stream (`Done`), a
//! receive fails (`Error`), the caller drops its receiver (`Done`), or the
//! session closes (`Done`). Events tagged with a stream offset are held until
//! the session header has observed that offset, so an event caused by one of
//! this session's own requests is never delivered before that request's
//! response has been merged. Untagged events are delivered as they arrive.
//! The listener never resubscribes.

use crate::header::HeaderStore;
use crate::service::{EventResponse, EventStream};
use crate::session::shutdown_requested;
use crate::types::{ElectionEvent, SessionId};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Lifecycle of an event listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Streaming,
    Done,
    Error,
}

impl ListenerState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ListenerState::Streaming)
    }
}

/// Caller-side view of a running listener
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    state: watch::Receiver<ListenerState>,
}

impl ListenerHandle {
    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Wait for the listener to reach a terminal state
    pub async fn wait(&mut self) -> ListenerState {
        match self.state.wait_for(ListenerState::is_terminal).await {
            Ok(state) => *state,
            // Task dropped without reporting, e.g. aborted at shutdown
            Err(_) => ListenerState::Done,
        }
    }
}

pub(crate) struct EventListener {
    session_id: SessionId,
    headers: Arc<HeaderStore>,
    stream: EventStream,
    events: mpsc::Sender<ElectionEvent>,
    shutdown: watch::Receiver<bool>,
    state: watch::Sender<ListenerState>,
}

impl EventListener {
    /// Start consuming `stream` in a background task
    pub(crate) fn spawn(
        headers: Arc<HeaderStore>,
        stream: EventStream,
        events: mpsc::Sender<ElectionEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> (JoinHandle<()>, ListenerHandle) {
        let (state, state_rx) = watch::channel(ListenerState::Streaming);
        let listener = Self {
            session_id: headers.session_id(),
            headers,
            stream,
            events,
            shutdown,
            state,
        };

        let task = tokio::spawn(listener.run());
        (task, ListenerHandle { state: state_rx })
    }

    async fn run(mut self) {
        let outcome = self.stream_events().await;
        debug!("Session {}: listener stopped ({:?})", self.session_id, outcome);
        self.state.send_replace(outcome);
    }

    async fn stream_events(&mut self) -> ListenerState {
        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => return ListenerState::Done,
                message = self.stream.recv() => message,
            };

            let response = match message {
                None => {
                    info!("Session {}: event stream ended", self.session_id);
                    return ListenerState::Done;
                }
                Some(Err(e)) => {
                    error!("Session {}: failed to receive event stream: {}", self.session_id, e);
                    return ListenerState::Error;
                }
                Some(Ok(response)) => response,
            };

            if !self.wait_until_ordered(&response).await {
                if self.headers.is_closed() {
                    return ListenerState::Done;
                }
                continue;
            }

            let event = ElectionEvent::changed(response.term);
            debug!(
                "Session {}: delivering term {} event",
                self.session_id, event.term.term
            );

            tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => return ListenerState::Done,
                sent = self.events.send(event) => {
                    if sent.is_err() {
                        debug!("Session {}: event receiver dropped", self.session_id);
                        return ListenerState::Done;
                    }
                }
            }
        }
    }

    /// Hold an event until the session has caught up with its stream offset.
    ///
    /// Returns `false` when the event should be dropped.
    async fn wait_until_ordered(&mut self, response: &EventResponse) -> bool {
        let Some(stream) = response.header.streams.first() else {
            return true;
        };

        let wait = self.headers.wait_stream(stream.stream_id, stream.offset);
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut self.shutdown) => false,
            result = wait.wait() => match result {
                Ok(()) => true,
                Err(_) => {
                    debug!(
                        "Session {}: dropping event at stream {} offset {} after close",
                        self.session_id, stream.stream_id, stream.offset
                    );
                    false
                }
            },
        }
    }
}
