//! Shared error type across communique crates.

use thiserror::Error;

/// Stable error codes (match on these, not on message text).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Connect/bind/handshake failure.
    Transport,
    /// Malformed envelope.
    Format,
    /// Correlation token domain exhausted.
    Capacity,
    /// Lookup that demanded presence found nothing.
    NotFound,
    /// Unreadable or unparsable certificate material.
    Certificate,
    /// Negative TLS trust decision.
    Verification,
    /// No transport attached.
    NotConnected,
    /// Invalid configuration.
    Config,
}

impl ErrorCode {
    /// String representation used in logs and tests.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Transport => "TRANSPORT",
            ErrorCode::Format => "FORMAT",
            ErrorCode::Capacity => "CAPACITY",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Certificate => "CERTIFICATE",
            ErrorCode::Verification => "VERIFICATION",
            ErrorCode::NotConnected => "NOT_CONNECTED",
            ErrorCode::Config => "CONFIG",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, CommuniqueError>;

/// Unified error type used by core and net.
#[derive(Debug, Error)]
pub enum CommuniqueError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed envelope: {0}")]
    Format(String),
    #[error("no free correlation token")]
    Capacity,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("certificate error: {0}")]
    Certificate(String),
    #[error("verification failed: {0}")]
    Verification(String),
    #[error("not connected")]
    NotConnected,
    #[error("invalid config: {0}")]
    Config(String),
}

impl CommuniqueError {
    /// Map to a stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            CommuniqueError::Transport(_) => ErrorCode::Transport,
            CommuniqueError::Format(_) => ErrorCode::Format,
            CommuniqueError::Capacity => ErrorCode::Capacity,
            CommuniqueError::NotFound(_) => ErrorCode::NotFound,
            CommuniqueError::Certificate(_) => ErrorCode::Certificate,
            CommuniqueError::Verification(_) => ErrorCode::Verification,
            CommuniqueError::NotConnected => ErrorCode::NotConnected,
            CommuniqueError::Config(_) => ErrorCode::Config,
        }
    }
}
