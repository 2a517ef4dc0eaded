//! Core types for ballot elections

use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-assigned session identifier
pub type SessionId = u64;

/// Server-assigned identifier of a notification stream
pub type StreamId = u64;

/// Opaque identifier of a candidate within an election
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(String);

impl CandidateId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CandidateId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CandidateId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Namespaced name of a primitive
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrimitiveName {
    pub namespace: String,
    pub name: String,
}

impl PrimitiveName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PrimitiveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// Position of a notification stream as seen by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamHeader {
    pub stream_id: StreamId,
    pub offset: u64,
}

/// Session state carried on every request and response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHeader {
    pub session_id: SessionId,
    /// Client-local request counter, advanced once per mutating request
    pub sequence_number: u64,
    /// Highest commit index observed
    pub last_index: u64,
    pub streams: Vec<StreamHeader>,
}

/// One leadership configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub term: u64,
    /// Current leader, `None` when the election has no candidates
    pub leader: Option<CandidateId>,
    /// Candidates in priority order, leader first
    pub candidates: Vec<CandidateId>,
}

impl Term {
    /// Check whether `id` is the current leader
    pub fn is_leader(&self, id: &CandidateId) -> bool {
        self.leader.as_ref() == Some(id)
    }

    /// Check whether `id` is among the candidates
    pub fn contains(&self, id: &CandidateId) -> bool {
        self.candidates.contains(id)
    }
}

/// Kind of an election notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElectionEventType {
    Changed,
}

impl fmt::Display for ElectionEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElectionEventType::Changed => write!(f, "changed"),
        }
    }
}

/// Leadership change notification with a full term snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionEvent {
    #[serde(rename = "type")]
    pub event_type: ElectionEventType,
    pub term: Term,
}

impl ElectionEvent {
    pub fn changed(term: Term) -> Self {
        Self {
            event_type: ElectionEventType::Changed,
            term,
        }
    }

    /// Serialize event to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize event from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = ElectionEvent::changed(Term {
            term: 2,
            leader: Some("alpha".into()),
            candidates: vec!["alpha".into(), "beta".into()],
        });

        let bytes = event.to_bytes().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["type"], "changed");
        assert_eq!(json["term"]["candidates"][1], "beta");

        let parsed = ElectionEvent::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_term_membership() {
        let term = Term {
            term: 1,
            leader: Some("alpha".into()),
            candidates: vec!["alpha".into()],
        };

        assert!(term.is_leader(&"alpha".into()));
        assert!(!term.contains(&"beta".into()));
        assert!(!Term::default().is_leader(&"alpha".into()));
    }

    #[test]
    fn test_primitive_name_display() {
        assert_eq!(PrimitiveName::new("default", "leader").to_string(), "default.leader");
    }
}
