use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::Serialize;

use super::error::TransportError;

/// Header carrying the client-generated idempotency key
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

#[derive(Debug, Clone, PartialEq)]
pub enum PartValue {
    Text(String),
    File {
        filename: String,
        content_type: Option<String>,
        data: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormPart {
    pub name: String,
    pub value: PartValue,
}

impl FormPart {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: PartValue::Text(value.into()),
        }
    }

    pub fn file(
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: Option<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            value: PartValue::File {
                filename: filename.into(),
                content_type,
                data,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Bytes {
        content_type: Option<String>,
        data: Vec<u8>,
    },
    Multipart(Vec<FormPart>),
}

impl RequestBody {
    /// Raw and multipart payloads carry their own content type
    pub fn is_raw(&self) -> bool {
        matches!(self, RequestBody::Bytes { .. } | RequestBody::Multipart(_))
    }
}

/// Description of one outbound call, relative to the API base URL.
///
/// Cloned verbatim when a request is retried after a refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json<B: Serialize>(mut self, body: &B) -> Result<Self, TransportError> {
        let value = serde_json::to_value(body)
            .map_err(|e| TransportError::InvalidRequest(format!("Failed to encode body: {}", e)))?;
        self.body = RequestBody::Json(value);
        Ok(self)
    }

    pub fn bytes(mut self, content_type: Option<String>, data: Vec<u8>) -> Self {
        self.body = RequestBody::Bytes { content_type, data };
        self
    }

    pub fn multipart(mut self, parts: Vec<FormPart>) -> Self {
        self.body = RequestBody::Multipart(parts);
        self
    }

    pub fn query(mut self, pairs: Vec<(String, String)>) -> Self {
        self.query.extend(pairs);
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Result<Self, TransportError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::InvalidRequest(format!("Invalid header name {}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::InvalidRequest(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn idempotency_key(self, key: &str) -> Result<Self, TransportError> {
        self.header(IDEMPOTENCY_KEY_HEADER, key)
    }

    pub fn idempotency_key_value(&self) -> Option<&str> {
        self.headers
            .get(IDEMPOTENCY_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
    }
}

/// One attempt at sending a request; `retried` is set on the single retry
/// allowed after a credential refresh.
#[derive(Debug, Clone)]
pub struct RequestAttempt {
    pub request: ApiRequest,
    pub retried: bool,
}

impl RequestAttempt {
    pub fn first(request: ApiRequest) -> Self {
        Self {
            request,
            retried: false,
        }
    }

    /// The retry of this attempt: same request, marked as retried
    pub fn retry(&self) -> Self {
        Self {
            request: self.request.clone(),
            retried: true,
        }
    }
}
