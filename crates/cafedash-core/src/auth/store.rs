//! Durable token persistence.
//!
//! A [`TokenStore`] is a dumb persistence layer: it never validates what it
//! holds. The access and refresh tokens are always written and removed
//! together, except for [`TokenStore::set_access_only`] which swaps in a
//! refreshed access token next to the existing refresh token.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Session file name in cache directory
pub const SESSION_FILE: &str = "session.json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Token store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Token store contents are malformed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Keychain access failed: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("No refresh token is stored")]
    NoRefreshToken,
}

/// An access/refresh token pair.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// On-disk layout shared by the file and keychain backends.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTokens {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub is_authenticated: bool,
    #[serde(default)]
    pub remember_me: bool,
}

impl StoredTokens {
    pub fn new(pair: &TokenPair, remember_me: bool) -> Self {
        Self {
            access_token: pair.access_token.clone(),
            refresh_token: pair.refresh_token.clone(),
            is_authenticated: true,
            remember_me,
        }
    }

    pub fn pair(&self) -> TokenPair {
        TokenPair::new(self.access_token.clone(), self.refresh_token.clone())
    }
}

/// Synchronous key-value persistence for the token pair.
///
/// The lifecycle manager reads and writes the store while holding its state
/// lock, from async tasks. Implementations must return promptly: a local
/// file or an in-memory slot is fine, a network round trip is not.
pub trait TokenStore: Send + Sync {
    /// Load the whole stored record, if any.
    fn load(&self) -> Result<Option<StoredTokens>, StoreError>;

    /// Replace the whole stored record.
    fn save(&self, tokens: &StoredTokens) -> Result<(), StoreError>;

    /// Remove every key. Callers never observe a half-cleared store.
    fn clear(&self) -> Result<(), StoreError>;

    fn get(&self) -> Result<Option<TokenPair>, StoreError> {
        Ok(self.load()?.map(|stored| stored.pair()))
    }

    fn set(&self, pair: &TokenPair, remember_me: bool) -> Result<(), StoreError> {
        self.save(&StoredTokens::new(pair, remember_me))
    }

    /// Replace the access token, keeping the stored refresh token.
    fn set_access_only(&self, access_token: &str) -> Result<(), StoreError> {
        let mut stored = self.load()?.ok_or(StoreError::NoRefreshToken)?;
        stored.access_token = access_token.to_string();
        self.save(&stored)
    }

    fn remember_me(&self) -> Result<bool, StoreError> {
        Ok(self.load()?.map(|stored| stored.remember_me).unwrap_or(false))
    }
}

/// In-process store. Used when nothing should outlive the process and as a
/// test double.
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<Option<StoredTokens>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pair(pair: &TokenPair) -> Self {
        Self {
            tokens: Mutex::new(Some(StoredTokens::new(pair, false))),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<StoredTokens>> {
        // A poisoned slot still holds a whole record; writes replace it in one step.
        self.tokens.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<StoredTokens>, StoreError> {
        Ok(self.slot().clone())
    }

    fn save(&self, tokens: &StoredTokens) -> Result<(), StoreError> {
        *self.slot() = Some(tokens.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.slot() = None;
        Ok(())
    }
}

/// JSON file store, written with tmp-file + rename so readers only ever see
/// a complete record.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store `session.json` inside the given cache directory.
    pub fn in_dir(cache_dir: &Path) -> Self {
        Self::new(cache_dir.join(SESSION_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_atomic(&self, contents: &str) -> Result<(), StoreError> {
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_name = format!(
            "{}.{}.{}.tmp",
            self.path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
            seq,
        );
        let tmp_path = self.path.with_file_name(tmp_name);

        let result = write_private(&tmp_path, contents)
            .and_then(|()| std::fs::rename(&tmp_path, &self.path));
        if result.is_err() {
            let _ = std::fs::remove_file(&tmp_path);
        }
        result.map_err(StoreError::from)
    }
}

/// Create `path` readable by the owner only, then write `contents`.
fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<StoredTokens>, StoreError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn save(&self, tokens: &StoredTokens) -> Result<(), StoreError> {
        let contents = serde_json::to_string_pretty(tokens)?;
        self.write_atomic(&contents)
    }

    fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
