use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;
use tracing::{debug, info, warn};

use super::session::{MemorySessionStorage, Session, SessionData, SessionStorage};
use crate::models::UserIdentity;

/// Shared handle to the current session.
///
/// Clone is cheap; every clone observes the same state. Only the gateway's
/// refresh handlers and explicit login/logout mutate it. The lock is never
/// held across an await point.
#[derive(Clone)]
pub struct CredentialStore {
    state: Arc<RwLock<Option<SessionData>>>,
    storage: Arc<dyn SessionStorage>,
}

impl CredentialStore {
    /// Empty store backed by process memory
    pub fn in_memory() -> Self {
        Self {
            state: Arc::new(RwLock::new(None)),
            storage: Arc::new(MemorySessionStorage::new()),
        }
    }

    /// Build a store from persisted storage.
    ///
    /// Only checks the storage for an existing session; never talks to the
    /// network. An unreadable record leaves the store logged out.
    pub fn hydrate(storage: Arc<dyn SessionStorage>) -> Self {
        let data = if storage.exists() {
            match storage.load() {
                Ok(data) => data,
                Err(e) => {
                    warn!(error = %e, "Discarding unreadable persisted session");
                    None
                }
            }
        } else {
            None
        };
        debug!(authenticated = data.is_some(), "Credential store hydrated");

        Self {
            state: Arc::new(RwLock::new(data)),
            storage,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<SessionData>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<SessionData>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Session {
        Session::from(self.read().as_ref())
    }

    pub fn access_token(&self) -> Option<String> {
        self.read().as_ref().map(|d| d.access_token.clone())
    }

    pub fn identity(&self) -> Option<UserIdentity> {
        self.read().as_ref().map(|d| d.user.clone())
    }

    /// Cookies saved alongside the session
    pub fn cookies(&self) -> Option<String> {
        self.read().as_ref().and_then(|d| d.cookies.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().is_some()
    }

    /// Replace the session after an explicit login
    pub fn login(&self, data: SessionData) -> Result<()> {
        info!(user = %data.user.email, "Session established");
        *self.write() = Some(data.clone());
        self.storage.save(&data)
    }

    /// Install a refreshed access token and identity.
    ///
    /// Without new `cookies` the previously saved ones are kept. In-memory
    /// state is always updated; a persistence failure is logged.
    pub fn apply_refresh(&self, access_token: String, user: UserIdentity, cookies: Option<String>) {
        let data = {
            let mut state = self.write();
            let cookies = cookies.or_else(|| state.as_ref().and_then(|d| d.cookies.clone()));
            let data = SessionData::new(access_token, user).with_cookies(cookies);
            *state = Some(data.clone());
            data
        };
        if let Err(e) = self.storage.save(&data) {
            warn!(error = %e, "Failed to persist refreshed session");
        }
        debug!(user = %data.user.email, "Session refreshed");
    }

    /// Drop the session. Calling this on an empty store is a no-op.
    pub fn clear(&self) {
        let had_session = self.write().take().is_some();
        if let Err(e) = self.storage.clear() {
            warn!(error = %e, "Failed to remove persisted session");
        }
        if had_session {
            info!("Session cleared");
        }
    }
}
