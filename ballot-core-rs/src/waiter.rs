//! Waits on notification stream offsets.
//!
//! Each pending wait is keyed by stream and target offset. A wait fires once
//! the session observes the stream at or past its target; closing the session
//! drops every pending sender, which the waiting side reads as cancellation.

use crate::error::Cancelled;
use crate::types::StreamId;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::oneshot;

/// Completion handle for a single stream wait
#[derive(Debug)]
pub struct StreamWait {
    state: WaitState,
}

#[derive(Debug)]
enum WaitState {
    Ready,
    Cancelled,
    Pending(oneshot::Receiver<()>),
}

impl StreamWait {
    pub(crate) fn ready() -> Self {
        Self {
            state: WaitState::Ready,
        }
    }

    pub(crate) fn cancelled() -> Self {
        Self {
            state: WaitState::Cancelled,
        }
    }

    /// Resolve the wait; `Err(Cancelled)` means the session closed first
    pub async fn wait(self) -> Result<(), Cancelled> {
        match self.state {
            WaitState::Ready => Ok(()),
            WaitState::Cancelled => Err(Cancelled),
            WaitState::Pending(rx) => rx.await.map_err(|_| Cancelled),
        }
    }
}

/// Registry of pending stream waits
#[derive(Debug, Default)]
pub struct StreamWaiters {
    pending: HashMap<StreamId, BTreeMap<u64, Vec<oneshot::Sender<()>>>>,
}

impl StreamWaiters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a wait for `stream_id` to reach `offset`
    pub fn register(&mut self, stream_id: StreamId, offset: u64) -> StreamWait {
        let (tx, rx) = oneshot::channel();
        self.pending
            .entry(stream_id)
            .or_default()
            .entry(offset)
            .or_default()
            .push(tx);
        StreamWait {
            state: WaitState::Pending(rx),
        }
    }

    /// Fire every wait on `stream_id` whose target is at or below `offset`.
    ///
    /// Returns the number of waits completed.
    pub fn notify(&mut self, stream_id: StreamId, offset: u64) -> usize {
        let Some(waits) = self.pending.get_mut(&stream_id) else {
            return 0;
        };

        let remaining = match offset.checked_add(1) {
            Some(bound) => waits.split_off(&bound),
            None => BTreeMap::new(),
        };
        let satisfied = std::mem::replace(waits, remaining);
        if waits.is_empty() {
            self.pending.remove(&stream_id);
        }

        let mut fired = 0;
        for tx in satisfied.into_values().flatten() {
            // Receiver may already be gone if the listener stopped
            let _ = tx.send(());
            fired += 1;
        }
        fired
    }

    /// Drop all pending waits so they resolve as cancelled
    pub fn cancel_all(&mut self) -> usize {
        let count = self.len();
        self.pending.clear();
        count
    }

    /// Number of pending waits
    pub fn len(&self) -> usize {
        self.pending
            .values()
            .flat_map(|waits| waits.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notify_fires_satisfied_waits_only() {
        let mut waiters = StreamWaiters::new();
        let low = waiters.register(1, 3);
        let high = waiters.register(1, 5);
        let other = waiters.register(2, 1);

        assert_eq!(waiters.notify(1, 4), 1);
        assert_eq!(low.wait().await, Ok(()));
        assert_eq!(waiters.len(), 2);

        assert_eq!(waiters.notify(1, 5), 1);
        assert_eq!(high.wait().await, Ok(()));

        waiters.cancel_all();
        assert_eq!(other.wait().await, Err(Cancelled));
        assert!(waiters.is_empty());
    }

    #[tokio::test]
    async fn test_wait_fires_exactly_once() {
        let mut waiters = StreamWaiters::new();
        let wait = waiters.register(7, 2);

        assert_eq!(waiters.notify(7, 10), 1);
        assert_eq!(waiters.notify(7, 11), 0);
        assert_eq!(wait.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn test_cancel_resolves_pending() {
        let mut waiters = StreamWaiters::new();
        let a = waiters.register(1, 1);
        let b = waiters.register(1, 1);

        assert_eq!(waiters.cancel_all(), 2);
        assert_eq!(a.wait().await, Err(Cancelled));
        assert_eq!(b.wait().await, Err(Cancelled));
    }

    #[tokio::test]
    async fn test_max_offset_does_not_overflow() {
        let mut waiters = StreamWaiters::new();
        let wait = waiters.register(1, u64::MAX);
        assert_eq!(waiters.notify(1, u64::MAX), 1);
        assert_eq!(wait.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn test_immediate_states() {
        assert_eq!(StreamWait::ready().wait().await, Ok(()));
        assert_eq!(StreamWait::cancelled().wait().await, Err(Cancelled));
    }
}
