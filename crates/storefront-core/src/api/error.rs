use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Connection failed: {0}")]
    Connection(String),
}

/// Why a credential refresh did not produce a new access token.
///
/// Clone because one refresh outcome is handed to every waiting request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RefreshError {
    #[error("Refresh rejected ({status}): {message}")]
    Rejected { status: StatusCode, message: String },

    #[error("Refresh response did not contain an access token")]
    MissingToken,

    #[error("Refresh request failed: {0}")]
    Transport(String),

    #[error("Refresh timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Refresh task aborted: {0}")]
    Aborted(String),
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Session expired: {0}")]
    RefreshFailed(#[source] RefreshError),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("{message}")]
    Application {
        status: Option<StatusCode>,
        message: String,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Failed to save session: {0}")]
    SessionStorage(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

#[derive(Deserialize)]
struct ErrorEnvelope {
    #[serde(rename = "apiError")]
    api_error: Option<ErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Human-readable message for a failed response: the server's
    /// `apiError.message` when present, otherwise the (truncated) body.
    pub fn server_message(body: &str) -> String {
        serde_json::from_str::<ErrorEnvelope>(body)
            .ok()
            .and_then(|e| e.api_error)
            .map(|e| e.message)
            .unwrap_or_else(|| Self::truncate_body(body))
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = Self::server_message(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized(message),
            403 => ApiError::AccessDenied(message),
            404 => ApiError::NotFound(message),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(message),
            _ => ApiError::Application {
                status: Some(status),
                message: format!("Status {}: {}", status, message),
            },
        }
    }

    /// Application-level failure with no usable server message
    pub fn application(message: impl Into<String>) -> Self {
        ApiError::Application {
            status: None,
            message: message.into(),
        }
    }

    /// True when the caller has to sign in again
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_) | ApiError::RefreshFailed(_))
    }
}
