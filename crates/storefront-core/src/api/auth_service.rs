use std::sync::Arc;

use reqwest::header::{HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use tracing::debug;

use super::error::{ApiError, RefreshError};
use super::request::ApiRequest;
use super::transport::Transport;
use crate::models::UserIdentity;

/// Paths of the authentication endpoints, relative to the API base URL
#[derive(Debug, Clone)]
pub struct AuthEndpoints {
    pub login: String,
    pub register: String,
    pub refresh: String,
    pub logout: String,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            login: "/auth/login".to_string(),
            register: "/auth/register".to_string(),
            refresh: "/auth/refresh-token".to_string(),
            logout: "/auth/logout".to_string(),
        }
    }
}

impl AuthEndpoints {
    /// Endpoints whose 401 means "bad credentials", never "token expired"
    pub fn is_excluded(&self, path: &str) -> bool {
        let path = path.split('?').next().unwrap_or(path).trim_end_matches('/');
        [&self.login, &self.register, &self.refresh]
            .iter()
            .any(|p| p.trim_end_matches('/') == path)
    }
}

/// Access token and identity issued by login or refresh
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IssuedCredential {
    pub access_token: String,
    pub user: UserIdentity,
}

#[derive(Deserialize)]
struct RefreshEnvelope {
    data: Option<RefreshPayload>,
}

#[derive(Deserialize)]
struct RefreshPayload {
    access_token: Option<String>,
    user: Option<UserIdentity>,
}

/// Client for the remote authentication service's refresh and logout calls.
///
/// These go straight to the transport: they must never pass back through
/// the gateway's refresh handling.
#[derive(Clone)]
pub struct AuthService {
    transport: Arc<dyn Transport>,
    endpoints: AuthEndpoints,
}

impl AuthService {
    pub fn new(transport: Arc<dyn Transport>, endpoints: AuthEndpoints) -> Self {
        Self {
            transport,
            endpoints,
        }
    }

    pub fn endpoints(&self) -> &AuthEndpoints {
        &self.endpoints
    }

    /// Exchange the ambient refresh cookie for a new access token
    pub async fn refresh(&self) -> Result<IssuedCredential, RefreshError> {
        debug!(path = %self.endpoints.refresh, "Requesting credential refresh");
        let response = self
            .transport
            .send(ApiRequest::post(self.endpoints.refresh.clone()))
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        if !response.is_success() {
            return Err(RefreshError::Rejected {
                status: response.status,
                message: ApiError::server_message(&response.text()),
            });
        }

        let envelope: RefreshEnvelope =
            serde_json::from_slice(&response.body).map_err(|_| RefreshError::MissingToken)?;
        let payload = envelope.data.ok_or(RefreshError::MissingToken)?;
        match (payload.access_token, payload.user) {
            (Some(access_token), Some(user)) if !access_token.is_empty() => {
                Ok(IssuedCredential { access_token, user })
            }
            _ => Err(RefreshError::MissingToken),
        }
    }

    /// Tell the server to end the session; `token` is the access token being
    /// discarded, if any.
    pub async fn logout(&self, token: Option<&str>) -> Result<(), ApiError> {
        let mut request = ApiRequest::post(self.endpoints.logout.clone());
        if let Some(token) = token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
                request.headers.insert(AUTHORIZATION, value);
            }
        }
        let response = self.transport.send(request).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(response.into_error())
        }
    }
}
