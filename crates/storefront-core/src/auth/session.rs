use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::UserIdentity;

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub access_token: String,
    pub user: UserIdentity,
    pub authenticated_at: DateTime<Utc>,
    /// Cookie pairs the server set for the refresh endpoint, as sent back in
    /// a `Cookie` header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies: Option<String>,
}

impl SessionData {
    pub fn new(access_token: String, user: UserIdentity) -> Self {
        Self {
            access_token,
            user,
            authenticated_at: Utc::now(),
            cookies: None,
        }
    }

    pub fn with_cookies(mut self, cookies: Option<String>) -> Self {
        self.cookies = cookies;
        self
    }
}

/// Point-in-time view of the authentication state.
///
/// `authenticated` is true exactly when `access_token` is present.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Session {
    pub authenticated: bool,
    pub identity: Option<UserIdentity>,
    pub access_token: Option<String>,
}

impl From<Option<&SessionData>> for Session {
    fn from(data: Option<&SessionData>) -> Self {
        match data {
            Some(data) => Self {
                authenticated: true,
                identity: Some(data.user.clone()),
                access_token: Some(data.access_token.clone()),
            },
            None => Self::default(),
        }
    }
}

/// Where a session survives process restarts.
pub trait SessionStorage: Send + Sync {
    fn load(&self) -> Result<Option<SessionData>>;

    fn save(&self, data: &SessionData) -> Result<()>;

    /// Remove the persisted session. Removing nothing is not an error.
    fn clear(&self) -> Result<()>;

    fn exists(&self) -> bool;
}

/// Session persisted as JSON in the cache directory
pub struct FileSessionStorage {
    cache_dir: PathBuf,
}

impl FileSessionStorage {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    fn session_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }
}

impl SessionStorage for FileSessionStorage {
    fn load(&self) -> Result<Option<SessionData>> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)
            .context("Failed to read session file")?;
        let data: SessionData = serde_json::from_str(&contents)
            .context("Failed to parse session file")?;
        Ok(Some(data))
    }

    fn save(&self, data: &SessionData) -> Result<()> {
        let path = self.session_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(data)?;
        std::fs::write(path, contents).context("Failed to write session file")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let path = self.session_path();
        if path.exists() {
            std::fs::remove_file(path).context("Failed to remove session file")?;
        }
        Ok(())
    }

    fn exists(&self) -> bool {
        self.session_path().exists()
    }
}

/// Process-local storage; nothing survives a restart
#[derive(Default)]
pub struct MemorySessionStorage {
    data: Mutex<Option<SessionData>>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(data: SessionData) -> Self {
        Self {
            data: Mutex::new(Some(data)),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<SessionData>> {
        self.data.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl SessionStorage for MemorySessionStorage {
    fn load(&self) -> Result<Option<SessionData>> {
        Ok(self.slot().clone())
    }

    fn save(&self, data: &SessionData) -> Result<()> {
        *self.slot() = Some(data.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot() = None;
        Ok(())
    }

    fn exists(&self) -> bool {
        self.slot().is_some()
    }
}
