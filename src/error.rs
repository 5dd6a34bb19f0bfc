// Error handling module
// Defines the failure taxonomy surfaced to callers of the session client

use reqwest::StatusCode;
use thiserror::Error;

use crate::transport::{ApiResponse, TransportError};

/// Errors returned by the session client
#[derive(Error, Debug)]
pub enum SessionError {
    /// Network or connectivity failure, no status was received
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// 4xx other than 401, body passed through for the caller to interpret
    #[error("Validation error: {status} - {body}")]
    Validation { status: u16, body: String },

    /// The presented credential was rejected (401)
    ///
    /// Triggers refresh internally; callers of the client only ever see it
    /// translated into `SessionExpired`.
    #[error("Authorization expired")]
    AuthorizationExpired,

    /// The session is gone: refresh failed or a terminal 401 was received
    #[error("Session expired: {reason}")]
    SessionExpired { retryable: bool, reason: String },

    /// Anything else the API answered with (5xx and friends)
    #[error("Unexpected API failure: {status} - {body}")]
    Unexpected { status: u16, body: String },

    /// Local failure (request construction, malformed issuance response)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl SessionError {
    /// Classify a non-success response
    pub fn from_response(response: &ApiResponse) -> Self {
        Self::from_status(response.status, response.text())
    }

    pub fn from_status(status: StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 => SessionError::AuthorizationExpired,
            400..=499 => SessionError::Validation {
                status: status.as_u16(),
                body,
            },
            other => SessionError::Unexpected {
                status: other,
                body,
            },
        }
    }

    pub fn session_expired(reason: impl Into<String>) -> Self {
        SessionError::SessionExpired {
            retryable: false,
            reason: reason.into(),
        }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, SessionError::SessionExpired { .. })
    }

    /// Whether repeating the whole operation later may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::Transport(_) | SessionError::Unexpected { .. } => true,
            SessionError::SessionExpired { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SessionError::Validation {
            status: 400,
            body: "{\"email\":\"required\"}".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Validation error: 400 - {\"email\":\"required\"}"
        );

        let err = SessionError::session_expired("refresh rejected");
        assert_eq!(err.to_string(), "Session expired: refresh rejected");

        let err = SessionError::Unexpected {
            status: 503,
            body: "down".to_string(),
        };
        assert_eq!(err.to_string(), "Unexpected API failure: 503 - down");
    }

    #[test]
    fn test_transport_error_message() {
        let err = SessionError::from(TransportError::Connect("refused".to_string()));
        assert_eq!(err.to_string(), "Transport error: connection failed: refused");
    }

    #[test]
    fn test_internal_error_message() {
        let err = SessionError::Internal(anyhow::anyhow!("Something went wrong"));
        assert_eq!(err.to_string(), "Internal error: Something went wrong");
    }

    #[test]
    fn test_classify_unauthorized() {
        let err = SessionError::from_status(StatusCode::UNAUTHORIZED, String::new());
        assert!(matches!(err, SessionError::AuthorizationExpired));
    }

    #[test]
    fn test_classify_client_errors_as_validation() {
        for status in [400, 403, 404, 409, 422, 429] {
            let code = StatusCode::from_u16(status).unwrap();
            let err = SessionError::from_status(code, "body".to_string());
            match err {
                SessionError::Validation { status: s, body } => {
                    assert_eq!(s, status);
                    assert_eq!(body, "body");
                }
                other => panic!("{} classified as {:?}", status, other),
            }
        }
    }

    #[test]
    fn test_classify_server_errors_as_unexpected() {
        for status in [500, 502, 503] {
            let code = StatusCode::from_u16(status).unwrap();
            assert!(matches!(
                SessionError::from_status(code, String::new()),
                SessionError::Unexpected { .. }
            ));
        }
    }

    #[test]
    fn test_classify_from_response_keeps_body() {
        let response = ApiResponse::new(StatusCode::BAD_REQUEST, "missing name");
        match SessionError::from_response(&response) {
            SessionError::Validation { body, .. } => assert_eq!(body, "missing name"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_retryable() {
        assert!(SessionError::Transport(TransportError::Timeout("30s".into())).is_retryable());
        assert!(SessionError::Unexpected {
            status: 500,
            body: String::new()
        }
        .is_retryable());
        assert!(!SessionError::session_expired("gone").is_retryable());
        assert!(SessionError::SessionExpired {
            retryable: true,
            reason: "refresh endpoint unreachable".into()
        }
        .is_retryable());
        assert!(!SessionError::Validation {
            status: 400,
            body: String::new()
        }
        .is_retryable());
    }
}
