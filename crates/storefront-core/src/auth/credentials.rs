use anyhow::{Context, Result};
use keyring::Entry;

use super::session::{SessionData, SessionStorage};

const SERVICE_NAME: &str = "storefront";

/// Keychain account under which the serialized session is kept
const SESSION_ACCOUNT: &str = "session";

/// Session persisted in the OS keychain instead of a plain file.
pub struct KeyringSessionStorage {
    service: String,
}

impl KeyringSessionStorage {
    pub fn new() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, SESSION_ACCOUNT).context("Failed to create keyring entry")
    }
}

impl Default for KeyringSessionStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStorage for KeyringSessionStorage {
    fn load(&self) -> Result<Option<SessionData>> {
        match self.entry()?.get_password() {
            Ok(secret) => {
                let data = serde_json::from_str(&secret)
                    .context("Failed to parse session from keychain")?;
                Ok(Some(data))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve session from keychain"),
        }
    }

    fn save(&self, data: &SessionData) -> Result<()> {
        let secret = serde_json::to_string(data)?;
        self.entry()?
            .set_password(&secret)
            .context("Failed to store session in keychain")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete session from keychain"),
        }
    }

    fn exists(&self) -> bool {
        self.entry()
            .map(|entry| entry.get_password().is_ok())
            .unwrap_or(false)
    }
}
