use std::time::Duration;
use thiserror::Error;

use crate::lsp::handshake::SessionState;

/// Coarse classification of session errors
///
/// Callers that only need to decide how to react (retry, give up on the
/// session, fix configuration) match on this rather than on [`SessionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A template placeholder had no value in the resolve context
    UnresolvedPlaceholder,
    /// Template or session configuration is unusable
    Configuration,
    /// Malformed or unexpected message from the backend
    ProtocolViolation,
    /// A call did not complete in time; the session is unaffected
    Timeout,
    /// The negotiated capabilities do not cover the operation
    UnsupportedOperation,
    /// The session is closed or failed
    SessionDead,
    /// The handshake has not completed yet
    NotNegotiatedYet,
    /// Lifecycle transition attempted from the wrong state
    InvalidState,
    /// The backend answered a call with an error response
    Server,
    /// The underlying channel reported an error
    Transport,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Unresolved placeholder '{token}' at {path}")]
    UnresolvedPlaceholder { token: String, path: String },

    #[error("Invalid initialize template: {0}")]
    InvalidTemplate(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Request '{method}' timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("'{method}' requires capability '{capability}', which was not negotiated")]
    UnsupportedOperation { method: String, capability: String },

    #[error("Session is closed or failed")]
    SessionDead,

    #[error("Capabilities have not been negotiated yet")]
    NotNegotiatedYet,

    #[error("Invalid session state: expected {expected}, found {current}")]
    InvalidState {
        current: SessionState,
        expected: SessionState,
    },

    #[error("Backend error ({code}): {message}")]
    Server {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Document is not open: {0}")]
    UnknownDocument(String),

    #[error("Not a valid file URI: {0}")]
    InvalidUri(String),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::UnresolvedPlaceholder { .. } => ErrorKind::UnresolvedPlaceholder,
            SessionError::InvalidTemplate(_)
            | SessionError::UnknownDocument(_)
            | SessionError::InvalidUri(_) => ErrorKind::Configuration,
            SessionError::ProtocolViolation(_) | SessionError::Serialization(_) => {
                ErrorKind::ProtocolViolation
            }
            SessionError::Timeout { .. } => ErrorKind::Timeout,
            SessionError::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
            SessionError::SessionDead => ErrorKind::SessionDead,
            SessionError::NotNegotiatedYet => ErrorKind::NotNegotiatedYet,
            SessionError::InvalidState { .. } => ErrorKind::InvalidState,
            SessionError::Server { .. } => ErrorKind::Server,
            SessionError::Transport(_) => ErrorKind::Transport,
        }
    }

    /// True for errors that leave the session unusable
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::SessionDead | ErrorKind::Transport | ErrorKind::UnresolvedPlaceholder
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err = SessionError::UnsupportedOperation {
            method: "textDocument/rename".into(),
            capability: "rename".into(),
        };
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
        assert!(!err.is_fatal());

        assert_eq!(SessionError::SessionDead.kind(), ErrorKind::SessionDead);
        assert!(SessionError::SessionDead.is_fatal());

        let timeout = SessionError::Timeout {
            method: "textDocument/hover".into(),
            timeout: Duration::from_millis(50),
        };
        assert_eq!(timeout.kind(), ErrorKind::Timeout);
        assert!(timeout.to_string().contains("textDocument/hover"));
    }

    #[test]
    fn test_serialization_is_protocol_violation() {
        let err: SessionError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    }

    #[test]
    fn test_invalid_state_display() {
        let err = SessionError::InvalidState {
            current: SessionState::Uninitialized,
            expected: SessionState::Ready,
        };
        assert_eq!(
            err.to_string(),
            "Invalid session state: expected Ready, found Uninitialized"
        );
    }
}
