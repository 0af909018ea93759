//! Durable storage for per-provider access tokens.
//!
//! A [`TokenRecord`] is spread over three plain string keys so the layout
//! stays readable with nothing but a text editor:
//!
//! | key                      | value                    |
//! |--------------------------|--------------------------|
//! | `{provider}_access_token`| opaque bearer token      |
//! | `{provider}_user`        | profile JSON             |
//! | `{provider}_expires_at`  | RFC 3339 UTC (optional)  |
//!
//! Any [`KeyValueStore`] is a [`TokenStore`]. The store does not look at
//! expiry; that is the session's job.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use campusdesk_core::{ProviderKind, UserProfile};
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::error::{ApiError, ApiResult};

/// Seconds shaved off the server-reported lifetime so a token is treated as
/// expired slightly before Google stops accepting it.
pub const EXPIRY_SKEW_SECS: i64 = 60;

/// A persisted sign-in for one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub provider: ProviderKind,
    pub access_token: String,
    pub user: UserProfile,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    pub fn new(provider: ProviderKind, access_token: impl Into<String>, user: UserProfile) -> Self {
        Self {
            provider,
            access_token: access_token.into(),
            user,
            expires_at: None,
        }
    }

    pub fn with_expires_at(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }

    /// Returns true if the token is past its expiry at `now`. Records
    /// without an expiry never expire locally.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Converts a token endpoint `expires_in` into an absolute expiry.
pub fn expiry_from_lifetime(now: DateTime<Utc>, expires_in_secs: Option<i64>) -> Option<DateTime<Utc>> {
    expires_in_secs.map(|secs| now + Duration::seconds(secs) - Duration::seconds(EXPIRY_SKEW_SECS))
}

/// Storage for token records, keyed by provider. Last write wins.
pub trait TokenStore: Send + Sync + fmt::Debug {
    /// Loads the record for `provider`.
    ///
    /// # Errors
    ///
    /// `DecodeFailed` when a record exists but cannot be parsed, `Storage`
    /// when the backend fails.
    fn get(&self, provider: ProviderKind) -> ApiResult<Option<TokenRecord>>;

    /// Persists `record`, replacing any previous one for the same provider.
    fn set(&self, record: &TokenRecord) -> ApiResult<()>;

    /// Removes the record for `provider`. Clearing a missing record is not
    /// an error.
    fn clear(&self, provider: ProviderKind) -> ApiResult<()>;
}

/// Flat string storage underneath a [`TokenStore`].
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    fn read(&self, key: &str) -> ApiResult<Option<String>>;
    fn write(&self, key: &str, value: &str) -> ApiResult<()>;
    fn remove(&self, key: &str) -> ApiResult<()>;
}

/// Storage key for one field of a provider's record.
pub fn storage_key(provider: ProviderKind, field: &str) -> String {
    format!("{}_{field}", provider.as_str())
}

const TOKEN_FIELD: &str = "access_token";
const USER_FIELD: &str = "user";
const EXPIRES_FIELD: &str = "expires_at";

impl<S: KeyValueStore> TokenStore for S {
    fn get(&self, provider: ProviderKind) -> ApiResult<Option<TokenRecord>> {
        let Some(access_token) = self.read(&storage_key(provider, TOKEN_FIELD))? else {
            return Ok(None);
        };

        let user_json = self.read(&storage_key(provider, USER_FIELD))?.ok_or_else(|| {
            ApiError::decode("stored token has no user profile").with_provider(provider)
        })?;
        let user: UserProfile = serde_json::from_str(&user_json).map_err(|e| {
            ApiError::decode(format!("stored user profile is not valid JSON: {e}"))
                .with_provider(provider)
        })?;

        let expires_at = match self.read(&storage_key(provider, EXPIRES_FIELD))? {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw.trim())
                    .map_err(|e| {
                        ApiError::decode(format!("stored expiry '{raw}' is not RFC 3339: {e}"))
                            .with_provider(provider)
                    })?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        Ok(Some(
            TokenRecord::new(provider, access_token, user).with_expires_at(expires_at),
        ))
    }

    fn set(&self, record: &TokenRecord) -> ApiResult<()> {
        let provider = record.provider;
        let user_json = serde_json::to_string(&record.user)
            .map_err(|e| ApiError::internal(format!("failed to serialize profile: {e}")))?;

        self.write(&storage_key(provider, USER_FIELD), &user_json)?;
        match record.expires_at {
            Some(at) => self.write(&storage_key(provider, EXPIRES_FIELD), &at.to_rfc3339())?,
            None => self.remove(&storage_key(provider, EXPIRES_FIELD))?,
        }
        // The token key goes last: its presence marks a complete record.
        self.write(&storage_key(provider, TOKEN_FIELD), &record.access_token)?;
        debug!(%provider, "stored token record");
        Ok(())
    }

    fn clear(&self, provider: ProviderKind) -> ApiResult<()> {
        self.remove(&storage_key(provider, TOKEN_FIELD))?;
        self.remove(&storage_key(provider, USER_FIELD))?;
        self.remove(&storage_key(provider, EXPIRES_FIELD))?;
        debug!(%provider, "cleared token record");
        Ok(())
    }
}

/// One file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    dir: PathBuf,
}

impl FileTokenStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

fn storage_error(action: &str, path: &Path, err: io::Error) -> ApiError {
    ApiError::storage(format!("failed to {action} {}: {err}", path.display())).with_source(err)
}

impl KeyValueStore for FileTokenStore {
    fn read(&self, key: &str) -> ApiResult<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error("read", &path, e)),
        }
    }

    fn write(&self, key: &str, value: &str) -> ApiResult<()> {
        fs::create_dir_all(&self.dir).map_err(|e| storage_error("create", &self.dir, e))?;

        let path = self.path_for(key);
        let temp_path = self.path_for(&format!("{key}.tmp"));
        fs::write(&temp_path, value).map_err(|e| storage_error("write", &temp_path, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&temp_path, fs::Permissions::from_mode(0o600))
                .map_err(|e| storage_error("set permissions on", &temp_path, e))?;
        }

        fs::rename(&temp_path, &path).map_err(|e| storage_error("rename", &temp_path, e))
    }

    fn remove(&self, key: &str) -> ApiResult<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error("remove", &path, e)),
        }
    }
}

/// In-process store. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of raw keys held.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryTokenStore {
    fn read(&self, key: &str) -> ApiResult<Option<String>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> ApiResult<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> ApiResult<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}
