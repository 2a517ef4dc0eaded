//! Configuration for election clients

use crate::error::{ElectionError, Result};
use crate::types::PrimitiveName;
use std::time::Duration;

/// Default namespace for primitives created without one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Election client configuration
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// Name of the election primitive
    pub name: PrimitiveName,

    /// Session timeout requested from the server; keep-alives are sent at half this interval
    pub session_timeout: Duration,

    /// Upper bound on each unary request
    pub request_timeout: Duration,

    /// Buffer size of the server event stream
    pub event_buffer: usize,

    /// How long `close` waits for listener tasks to stop
    pub listener_shutdown_timeout: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            name: PrimitiveName::new(DEFAULT_NAMESPACE, "election"),
            session_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            event_buffer: 64,
            listener_shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl ElectionConfig {
    /// Create config for an election in the default namespace
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: PrimitiveName::new(DEFAULT_NAMESPACE, name),
            ..Default::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.name.namespace = namespace.into();
        self
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_event_buffer(mut self, size: usize) -> Self {
        self.event_buffer = size;
        self
    }

    pub fn with_listener_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.listener_shutdown_timeout = timeout;
        self
    }

    /// Interval between session keep-alives
    pub fn keep_alive_interval(&self) -> Duration {
        self.session_timeout / 2
    }

    /// Reject settings the client cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.name.name.is_empty() {
            return Err(ElectionError::InvalidConfiguration(
                "election name must not be empty".to_string(),
            ));
        }
        if self.session_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err(ElectionError::InvalidConfiguration(
                "timeouts must be non-zero".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(ElectionError::InvalidConfiguration(
                "event buffer must hold at least one message".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ElectionConfig::new("leader");
        assert!(config.validate().is_ok());
        assert_eq!(config.name.namespace, DEFAULT_NAMESPACE);
        assert_eq!(config.keep_alive_interval(), Duration::from_secs(15));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let config = ElectionConfig::new("leader").with_request_timeout(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ElectionError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_rejects_empty_name() {
        let config = ElectionConfig::new("");
        assert!(config.validate().is_err());
    }
}
