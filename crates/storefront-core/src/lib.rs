//! Core library for the storefront client.
//!
//! - `api`: the authenticated request gateway, transport, and typed client
//! - `auth`: session model, persistence backends, and the credential store
//! - `models`: catalog, cart, order, and address wire types
//! - `config`: configuration loading

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiError, Gateway, ReqwestTransport, StorefrontClient};
pub use auth::CredentialStore;
pub use config::Config;

use std::sync::Arc;

/// Build a client from configuration: hydrate the session from the
/// configured storage and wire it to a `reqwest` transport.
pub fn connect(config: &Config) -> anyhow::Result<StorefrontClient> {
    let transport = ReqwestTransport::new(&config.api_base_url, config.request_timeout())?;
    let store = CredentialStore::hydrate(config.session_storage()?);
    let gateway = Gateway::builder(Arc::new(transport), store)
        .refresh_timeout(config.refresh_timeout())
        .build();
    Ok(StorefrontClient::new(gateway))
}
