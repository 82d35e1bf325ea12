//! Transport failure taxonomy.
//!
//! None of these are returned from connection setup. They are carried inside
//! the connection status so the UI layer can render them.

use thiserror::Error;

/// Why a realtime connection is not (or no longer) usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The endpoint could not be reached at all.
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    /// The endpoint answered the handshake but refused the credential.
    #[error("credential rejected: {0}")]
    Rejected(String),

    /// The endpoint accepted the socket but never answered the handshake.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// An established socket went away.
    #[error("connection dropped: {0}")]
    Dropped(String),

    /// The connection was torn down locally.
    #[error("connection closed")]
    Closed,
}

impl TransportError {
    /// Whether a retry with the same credential can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Unreachable(_)
                | TransportError::HandshakeTimeout
                | TransportError::Dropped(_)
        )
    }
}
