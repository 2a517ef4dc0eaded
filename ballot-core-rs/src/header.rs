//! Session header store
//!
//! Holds the session identity, the highest commit index seen, the request
//! sequence counter, and the last known offset of every notification stream.
//! Indices and offsets only move forward: a response older than what is
//! already recorded leaves the store unchanged. Stream waits live under the
//! same lock as the header so a merge and the waits it satisfies are one step.

use crate::error::{ElectionError, Result};
use crate::types::{SessionHeader, SessionId, StreamHeader, StreamId};
use crate::waiter::{StreamWait, StreamWaiters};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::{debug, warn};

struct HeaderState {
    sequence_number: u64,
    last_index: u64,
    streams: BTreeMap<StreamId, u64>,
    waiters: StreamWaiters,
    closed: bool,
}

impl HeaderState {
    fn header(&self, session_id: SessionId) -> SessionHeader {
        SessionHeader {
            session_id,
            sequence_number: self.sequence_number,
            last_index: self.last_index,
            streams: self
                .streams
                .iter()
                .map(|(stream_id, offset)| StreamHeader {
                    stream_id: *stream_id,
                    offset: *offset,
                })
                .collect(),
        }
    }
}

/// Shared header state for one open session
pub struct HeaderStore {
    session_id: SessionId,
    state: RwLock<HeaderState>,
}

impl HeaderStore {
    /// Create a store from the header returned when the session opened
    pub fn new(initial: &SessionHeader) -> Self {
        Self {
            session_id: initial.session_id,
            state: RwLock::new(HeaderState {
                sequence_number: initial.sequence_number,
                last_index: initial.last_index,
                streams: initial
                    .streams
                    .iter()
                    .map(|s| (s.stream_id, s.offset))
                    .collect(),
                waiters: StreamWaiters::new(),
                closed: false,
            }),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Advance the sequence number and return the header for a mutating request
    pub fn next_header(&self) -> Result<SessionHeader> {
        let mut state = self.state.write();
        if state.closed {
            return Err(ElectionError::SessionClosed(self.session_id));
        }
        state.sequence_number += 1;
        Ok(state.header(self.session_id))
    }

    /// Header for a read-only request
    pub fn current_header(&self) -> Result<SessionHeader> {
        let state = self.state.read();
        if state.closed {
            return Err(ElectionError::SessionClosed(self.session_id));
        }
        Ok(state.header(self.session_id))
    }

    /// Merge a response header and complete any stream waits it satisfies
    pub fn update_header(&self, response: &SessionHeader) {
        if response.session_id != self.session_id {
            warn!(
                "Session {}: ignoring header for session {}",
                self.session_id, response.session_id
            );
            return;
        }

        let mut state = self.state.write();
        if state.closed {
            return;
        }

        if response.last_index > state.last_index {
            state.last_index = response.last_index;
        }

        for stream in &response.streams {
            let current = state.streams.entry(stream.stream_id).or_insert(0);
            if stream.offset < *current {
                continue;
            }
            *current = stream.offset;

            let fired = state.waiters.notify(stream.stream_id, stream.offset);
            if fired > 0 {
                debug!(
                    "Session {}: stream {} reached offset {}, released {} waits",
                    self.session_id, stream.stream_id, stream.offset, fired
                );
            }
        }
    }

    /// Wait until `stream_id` is observed at or past `offset`
    pub fn wait_stream(&self, stream_id: StreamId, offset: u64) -> StreamWait {
        let mut state = self.state.write();
        if state.closed {
            return StreamWait::cancelled();
        }
        if state.streams.get(&stream_id).is_some_and(|o| *o >= offset) {
            return StreamWait::ready();
        }
        state.waiters.register(stream_id, offset)
    }

    /// Last recorded offset of a stream
    pub fn stream_offset(&self, stream_id: StreamId) -> Option<u64> {
        self.state.read().streams.get(&stream_id).copied()
    }

    pub fn last_index(&self) -> u64 {
        self.state.read().last_index
    }

    /// Number of stream waits not yet resolved
    pub fn pending_waits(&self) -> usize {
        self.state.read().waiters.len()
    }

    /// Mark the store closed and cancel pending waits.
    ///
    /// Returns the final header, or `None` if the store was already closed.
    pub fn close(&self) -> Option<SessionHeader> {
        let mut state = self.state.write();
        if state.closed {
            return None;
        }
        state.closed = true;
        let cancelled = state.waiters.cancel_all();
        debug!(
            "Session {}: closed header store, cancelled {} stream waits",
            self.session_id, cancelled
        );
        Some(state.header(self.session_id))
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }
}
