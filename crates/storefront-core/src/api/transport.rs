//! HTTP transport seam.
//!
//! The gateway only talks to a `Transport`; production code uses
//! `ReqwestTransport`, tests substitute a scripted in-memory one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::multipart::{Form, Part};
use reqwest::{header, Client, Url};
use tracing::{debug, warn};

use super::error::TransportError;
use super::request::{ApiRequest, FormPart, PartValue, RequestBody};
use super::response::ApiResponse;

/// Client-readable cookie mirroring the current access token
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request exactly as described and return whatever came back,
    /// including non-2xx responses.
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;

    /// Mirror a freshly issued access token wherever the transport keeps
    /// client-side credentials.
    fn remember_access_token(&self, _token: &str) {}

    /// Cookies the transport would send to `path`, as a `Cookie` header value
    fn cookies_for(&self, _path: &str) -> Option<String> {
        None
    }

    /// Put back cookies previously returned by `cookies_for(path)`
    fn restore_cookies(&self, _path: &str, _cookies: &str) {}
}

/// `reqwest`-backed transport.
/// Clone is cheap - reqwest::Client and the cookie jar are shared.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    base_url: Url,
    cookies: Arc<Jar>,
}

impl ReqwestTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        // A trailing slash keeps the last path segment when joining
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized)
            .map_err(|e| TransportError::InvalidRequest(format!("Invalid base URL {}: {}", base_url, e)))?;

        let cookies = Arc::new(Jar::default());
        let client = Client::builder()
            .timeout(timeout)
            .cookie_provider(Arc::clone(&cookies))
            .build()?;

        Ok(Self {
            client,
            base_url,
            cookies,
        })
    }

    fn url_for(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| TransportError::InvalidRequest(format!("Invalid path {}: {}", path, e)))
    }

    fn build_form(parts: &[FormPart]) -> Result<Form, TransportError> {
        let mut form = Form::new();
        for part in parts {
            form = match &part.value {
                PartValue::Text(value) => form.text(part.name.clone(), value.clone()),
                PartValue::File {
                    filename,
                    content_type,
                    data,
                } => {
                    let mut file = Part::bytes(data.clone()).file_name(filename.clone());
                    if let Some(mime) = content_type {
                        file = file.mime_str(mime)?;
                    }
                    form.part(part.name.clone(), file)
                }
            };
        }
        Ok(form)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = self.url_for(&request.path)?;
        debug!(method = %request.method, url = %url, "Sending request");

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(request.headers.clone());
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => {
                let bytes = serde_json::to_vec(&value).map_err(|e| {
                    TransportError::InvalidRequest(format!("Failed to encode body: {}", e))
                })?;
                builder.body(bytes)
            }
            RequestBody::Bytes { content_type, data } => {
                if let Some(mime) = content_type {
                    builder = builder.header(header::CONTENT_TYPE, mime);
                }
                builder.body(data)
            }
            // Rebuilt every send so a retry carries the same parts
            RequestBody::Multipart(parts) => builder.multipart(Self::build_form(&parts)?),
        };

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }

    fn remember_access_token(&self, token: &str) {
        if token.contains(';') {
            warn!("Refusing to store malformed access token cookie");
            return;
        }
        let cookie = format!("{}={}; Path=/", ACCESS_TOKEN_COOKIE, token);
        self.cookies.add_cookie_str(&cookie, &self.base_url);
    }

    fn cookies_for(&self, path: &str) -> Option<String> {
        let url = self.url_for(path).ok()?;
        let value = self.cookies.cookies(&url)?;
        value.to_str().ok().map(str::to_string)
    }

    fn restore_cookies(&self, path: &str, cookies: &str) {
        let url = match self.url_for(path) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Cannot restore saved cookies");
                return;
            }
        };
        for pair in cookies.split(';').map(str::trim).filter(|p| p.contains('=')) {
            self.cookies.add_cookie_str(&format!("{}; Path=/", pair), &url);
        }
        debug!("Restored saved cookies");
    }
}
