//! Error types for the protocol

use thiserror::Error;

/// Protocol error
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Unknown injection method: {0}")]
    UnknownMethod(String),

    #[error("Finger index out of range: {0}")]
    InvalidFingerIndex(u8),

    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("Unsupported character for key typing: {0:?}")]
    UnsupportedCharacter(char),
}

/// Result type alias for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
