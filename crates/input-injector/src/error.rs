//! Input injection error types

use serde::Serialize;
use thiserror::Error;
use touch_protocol::ProtocolError;

#[derive(Debug, Error)]
pub enum InjectorError {
    #[error("Event construction failed: {0}")]
    Construction(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Delivery rejected: {0}")]
    DeliveryRejected(String),

    #[error("Sender credential not captured")]
    DegradedCredential,

    #[error("Finger {finger} is already down")]
    ReuseBeforeLift { finger: u8 },

    #[error("Finger {finger} is not down")]
    FingerNotDown { finger: u8 },

    #[error("Gesture has no steps")]
    EmptyGesture,

    #[error("Invalid coordinates: ({x}, {y})")]
    InvalidCoordinates { x: f64, y: f64 },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl InjectorError {
    /// Stable classification used in dispatch telemetry
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            InjectorError::Construction(_) | InjectorError::Encoding(_) => FailureKind::Construction,
            InjectorError::BackendUnavailable(_) => FailureKind::BackendUnavailable,
            InjectorError::DeliveryRejected(_) => FailureKind::DeliveryRejected,
            InjectorError::DegradedCredential => FailureKind::DegradedCredential,
            InjectorError::ReuseBeforeLift { .. }
            | InjectorError::FingerNotDown { .. }
            | InjectorError::InvalidCoordinates { .. }
            | InjectorError::EmptyGesture
            | InjectorError::Protocol(_) => FailureKind::InvalidRequest,
            InjectorError::Persistence(_) | InjectorError::Config(_) | InjectorError::Internal(_) => {
                FailureKind::Internal
            }
        }
    }

    /// Whether the router should move on to the next backend after this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(self.failure_kind(), FailureKind::InvalidRequest)
    }
}

impl From<serde_json::Error> for InjectorError {
    fn from(e: serde_json::Error) -> Self {
        InjectorError::Encoding(e.to_string())
    }
}

impl From<config::ConfigError> for InjectorError {
    fn from(e: config::ConfigError) -> Self {
        InjectorError::Config(e.to_string())
    }
}

impl From<bincode::Error> for InjectorError {
    fn from(e: bincode::Error) -> Self {
        InjectorError::Encoding(e.to_string())
    }
}

/// Failure classification recorded with each dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Construction,
    BackendUnavailable,
    DeliveryRejected,
    DegradedCredential,
    InvalidRequest,
    Internal,
}

pub type InjectorResult<T> = Result<T, InjectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kinds() {
        assert_eq!(
            InjectorError::BackendUnavailable("client".into()).failure_kind(),
            FailureKind::BackendUnavailable
        );
        assert_eq!(
            InjectorError::ReuseBeforeLift { finger: 2 }.failure_kind(),
            FailureKind::InvalidRequest
        );
        assert!(!InjectorError::FingerNotDown { finger: 1 }.is_recoverable());
        assert!(InjectorError::DeliveryRejected("unrouted".into()).is_recoverable());
    }
}
