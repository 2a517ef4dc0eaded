//! Error types for ballot elections

use crate::types::SessionId;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a partition connection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("Partition unavailable: {0}")]
    Unavailable(String),

    #[error("Request rejected by server: {code} - {message}")]
    Rejected { code: u32, message: String },

    #[error("Unknown session {0}")]
    UnknownSession(SessionId),
}

/// Errors surfaced by election operations
#[derive(Debug, Error)]
pub enum ElectionError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Transport error: {0}")]
    Transport(#[from] RpcError),

    #[error("Session {0} is closed")]
    SessionClosed(SessionId),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

impl ElectionError {
    /// Check if the error came from the partition connection
    pub fn is_transport(&self) -> bool {
        matches!(self, ElectionError::Transport(_))
    }
}

/// A stream wait was abandoned because its session closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Stream wait cancelled")]
pub struct Cancelled;

pub type Result<T> = std::result::Result<T, ElectionError>;
