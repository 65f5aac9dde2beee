//! REST API layer for the storefront services.
//!
//! All calls flow through the [`Gateway`], which attaches the bearer token
//! from the [`CredentialStore`](crate::auth::CredentialStore), shares a single
//! credential refresh among concurrently rejected requests, and retries each
//! of them once.

pub mod auth_service;
pub mod client;
pub mod error;
pub mod gateway;
pub mod request;
pub mod response;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use auth_service::{AuthEndpoints, AuthService, IssuedCredential};
pub use client::{Registration, StorefrontClient};
pub use error::{ApiError, RefreshError, TransportError};
pub use gateway::{Gateway, GatewayBuilder};
pub use request::{ApiRequest, FormPart, RequestAttempt, RequestBody};
pub use response::{ApiResponse, Envelope};
pub use transport::{ReqwestTransport, Transport};
