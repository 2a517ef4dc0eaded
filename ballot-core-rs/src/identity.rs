//! Candidate identity generation
//!
//! A `NodeIdentity` is created once per process from a host-unique value and
//! hands out a distinct `CandidateId` to every election client built from it.

use crate::types::CandidateId;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

/// Length of the node identifier in bytes
pub const NODE_ID_LEN: usize = 6;

/// Process-wide source of candidate identities
#[derive(Debug)]
pub struct NodeIdentity {
    node_id: [u8; NODE_ID_LEN],
    next_instance: AtomicU32,
}

impl NodeIdentity {
    pub fn new(node_id: [u8; NODE_ID_LEN]) -> Self {
        Self {
            node_id,
            next_instance: AtomicU32::new(0),
        }
    }

    /// Derive the node identifier from a host name
    pub fn from_host(host: &str) -> Self {
        let digest = Sha256::digest(host.as_bytes());
        let mut node_id = [0u8; NODE_ID_LEN];
        node_id.copy_from_slice(&digest[..NODE_ID_LEN]);
        Self::new(node_id)
    }

    /// Random node identifier for hosts without a stable name
    pub fn random() -> Self {
        let uuid = Uuid::new_v4();
        let mut node_id = [0u8; NODE_ID_LEN];
        node_id.copy_from_slice(&uuid.as_bytes()[..NODE_ID_LEN]);
        Self::new(node_id)
    }

    pub fn node_id(&self) -> &[u8; NODE_ID_LEN] {
        &self.node_id
    }

    /// Issue the identity for the next client instance
    pub fn next_candidate(&self) -> CandidateId {
        let instance = self.next_instance.fetch_add(1, Ordering::SeqCst);
        let mut bytes = Vec::with_capacity(NODE_ID_LEN + 4);
        bytes.extend_from_slice(&self.node_id);
        bytes.extend_from_slice(&instance.to_be_bytes());
        CandidateId::new(hex::encode(bytes))
    }
}
