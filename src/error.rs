//! Session error types
//!
//! A session ends with one of these errors. The supervisor uses
//! [`SessionError::is_retriable`] to decide whether to start a new session and
//! [`SessionError::was_connected`] to reset its reconnect backoff.

use crate::transport::{BrokerError, WaitError};
use thiserror::Error;

/// Why a session ended
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to create broker client: {0}")]
    Client(#[source] BrokerError),

    #[error("Connect failed: {0}")]
    Connect(#[source] WaitError),

    #[error("Subscribe failed: {0}")]
    Subscribe(#[source] WaitError),

    #[error("Connection lost: {0}")]
    ConnectionLost(#[source] BrokerError),

    #[error("Invalid hex input: {0}")]
    Decode(#[from] hex::FromHexError),
}

impl SessionError {
    /// Whether a fresh session could succeed where this one failed
    pub fn is_retriable(&self) -> bool {
        !matches!(self, SessionError::Client(BrokerError::InvalidBrokerUrl(_)))
    }

    /// Whether the session reached the active state before ending
    pub fn was_connected(&self) -> bool {
        matches!(
            self,
            SessionError::ConnectionLost(_) | SessionError::Decode(_)
        )
    }
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;
