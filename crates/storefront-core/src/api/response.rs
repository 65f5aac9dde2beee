use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::error::{ApiError, ErrorBody};

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON response: {}", e)))
    }

    /// Parse the standard `{ data, apiError }` envelope.
    ///
    /// An empty body is an envelope with neither field.
    pub fn envelope<T: DeserializeOwned>(&self) -> Result<Envelope<T>, ApiError> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Envelope::default());
        }
        self.json()
    }

    /// Convert a failed response into the matching error
    pub fn into_error(self) -> ApiError {
        ApiError::from_status(self.status, &self.text())
    }
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
pub struct Envelope<T> {
    #[serde(default)]
    pub data: Option<T>,
    #[serde(rename = "apiError", default)]
    pub api_error: Option<ErrorBody>,
}

impl<T> Default for Envelope<T> {
    fn default() -> Self {
        Self {
            data: None,
            api_error: None,
        }
    }
}

impl<T> Envelope<T> {
    /// The payload, or an application error carrying the server's message
    /// (falling back to `default_message`).
    pub fn into_data(self, default_message: &str) -> Result<T, ApiError> {
        match self.data {
            Some(data) => Ok(data),
            None => Err(ApiError::application(
                self.api_error
                    .map(|e| e.message)
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| default_message.to_string()),
            )),
        }
    }
}
