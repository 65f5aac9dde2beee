//! Authentication state for the storefront client.
//!
//! This module provides:
//! - `SessionData` / `Session`: the signed-in account and its access token
//! - `SessionStorage`: persistence backends (file, OS keychain, memory)
//! - `CredentialStore`: the shared, injectable session handle read by the
//!   gateway before every request
//!
//! The store is hydrated from storage at startup without any network call.

pub mod credentials;
pub mod session;
pub mod store;

pub use credentials::KeyringSessionStorage;
pub use session::{FileSessionStorage, MemorySessionStorage, Session, SessionData, SessionStorage};
pub use store::CredentialStore;
