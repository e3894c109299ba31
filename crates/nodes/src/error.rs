//! Node-level error type.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by a node's `execute` method.
///
/// The engine does not distinguish transient from permanent failures: every
/// variant consumes one retry attempt. The variants exist so callers can
/// tell *why* a node gave up once the engine has wrapped the error.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NodeError {
    /// Handler logic failed.
    #[error("{0}")]
    Failed(String),

    /// The node payload is missing a field or holds a value of the wrong shape.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The per-attempt deadline (`timeoutMs`) expired before the handler finished.
    #[error("attempt timed out after {0:?}")]
    AttemptTimeout(Duration),

    /// A suspended node gave up waiting for its external event.
    #[error("timed out waiting for external event on {run_id}:{node_id}")]
    WaitTimeout { run_id: String, node_id: String },

    /// A newer registration for the same waiter key replaced this one.
    #[error("wait on {run_id}:{node_id} was pre-empted by a newer registration")]
    Superseded { run_id: String, node_id: String },
}

impl NodeError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}
