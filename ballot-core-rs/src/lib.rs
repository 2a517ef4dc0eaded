//! Ballot Core Library
//!
//! Client-side leader election against a partitioned, session-consistent
//! coordination service. Candidates enter and leave an election, observe
//! leadership changes on a server stream, and reshuffle leadership with
//! anoint/promote/evict. Every request carries a session header; events
//! that depend on the client's own requests are delivered only after the
//! matching response has been observed.

pub mod types;
pub mod error;
pub mod config;
pub mod identity;
pub mod router;
pub mod service;
pub mod waiter;
pub mod header;
pub mod session;
pub mod listener;
pub mod election;

#[cfg(any(test, feature = "memory"))]
pub mod memory;

pub use types::*;
pub use error::{Cancelled, ElectionError, Result, RpcError};
pub use config::ElectionConfig;
pub use identity::NodeIdentity;
pub use router::partition_index;
pub use service::{ElectionService, EventStream};
pub use header::HeaderStore;
pub use session::Session;
pub use listener::{ListenerHandle, ListenerState};
pub use election::Election;

#[cfg(any(test, feature = "memory"))]
pub use memory::MemoryController;
