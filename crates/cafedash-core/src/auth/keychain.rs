use std::sync::{Mutex, MutexGuard};

use keyring::Entry;

use super::store::{StoreError, StoredTokens, TokenStore};

const SERVICE_NAME: &str = "cafedash";

/// Keychain account name holding the session record
const SESSION_ACCOUNT: &str = "session";

/// Token store backed by the OS keychain.
///
/// Both tokens live in a single entry so they are written and removed
/// together. The entry is read from the keychain once; later reads are
/// served from memory and every write goes through to the keychain.
pub struct KeyringTokenStore {
    account: String,
    /// `None` until the keychain has been read.
    cached: Mutex<Option<Option<StoredTokens>>>,
}

impl KeyringTokenStore {
    pub fn new() -> Self {
        Self::for_account(SESSION_ACCOUNT)
    }

    /// Use a separate keychain entry, e.g. one per API environment.
    pub fn for_account(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            cached: Mutex::new(None),
        }
    }

    fn cache(&self) -> MutexGuard<'_, Option<Option<StoredTokens>>> {
        self.cached.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn entry(&self) -> Result<Entry, StoreError> {
        Ok(Entry::new(SERVICE_NAME, &self.account)?)
    }
}

impl Default for KeyringTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore for KeyringTokenStore {
    fn load(&self) -> Result<Option<StoredTokens>, StoreError> {
        let mut cache = self.cache();
        if let Some(ref tokens) = *cache {
            return Ok(tokens.clone());
        }
        let tokens = match self.entry()?.get_password() {
            Ok(secret) => Some(serde_json::from_str(&secret)?),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => return Err(e.into()),
        };
        *cache = Some(tokens.clone());
        Ok(tokens)
    }

    fn save(&self, tokens: &StoredTokens) -> Result<(), StoreError> {
        let secret = serde_json::to_string(tokens)?;
        let mut cache = self.cache();
        let result = self
            .entry()
            .and_then(|entry| entry.set_password(&secret).map_err(StoreError::from));
        *cache = match result {
            Ok(()) => Some(Some(tokens.clone())),
            Err(_) => None,
        };
        result
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut cache = self.cache();
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {
                *cache = Some(None);
                Ok(())
            }
            Err(e) => {
                // Unknown keychain state; read it again next time
                *cache = None;
                Err(e.into())
            }
        }
    }
}
