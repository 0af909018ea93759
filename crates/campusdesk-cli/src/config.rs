//! Client configuration.
//!
//! Settings live in `~/.config/campusdesk/config.toml` unless `--config` or
//! `CAMPUSDESK_CONFIG` points elsewhere.
//!
//! ```toml
//! [google]
//! client_id = "pass::campusdesk/client-id"
//! client_secret = "env::CAMPUSDESK_CLIENT_SECRET"
//! token_dir = "/home/me/.local/share/campusdesk/tokens"
//! timeout_secs = 30
//! loopback_ports = [8080, 8090]
//! ```
//!
//! `client_id` and `client_secret` accept [secret references](crate::secret).
//! A Google Cloud Console JSON file can be given instead with
//! `credentials_file`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use campusdesk_google::{GoogleConfig, OAuthCredentials};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ClientError, ClientResult};

/// Contents of `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub google: Option<GoogleSettings>,
    /// Same as passing `--debug`.
    pub debug: bool,
}

/// The `[google]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleSettings {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Google Cloud Console OAuth client JSON.
    pub credentials_file: Option<PathBuf>,
    pub token_dir: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub consent_timeout_secs: Option<u64>,
    /// Inclusive range for the OAuth loopback listener.
    pub loopback_ports: Option<[u16; 2]>,
}

/// Credentials given on the command line, overriding the file.
#[derive(Debug, Clone, Default)]
pub struct CredentialOverrides {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub credentials_file: Option<PathBuf>,
}

/// Where the OAuth credentials came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    CommandLine,
    ConfigFile,
}

impl ClientConfig {
    /// Loads `path`, or the default file when `path` is `None`.
    ///
    /// A missing default file yields the default configuration; a missing
    /// explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, String> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (Self::default_path(), false),
        };
        if !required && !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
        toml::from_str(&content).map_err(|e| format!("failed to parse {}: {e}", path.display()))
    }

    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("campusdesk")
    }

    /// Resolves credentials and builds the Google configuration.
    pub fn google_config(
        &self,
        overrides: &CredentialOverrides,
    ) -> ClientResult<(GoogleConfig, CredentialSource)> {
        let settings = self.google.clone().unwrap_or_default();
        let (credentials, source) = resolve_credentials(overrides, &settings)?;
        let config = settings.apply(GoogleConfig::new(credentials));
        config
            .validate()
            .map_err(|e| ClientError::Config(e.message().to_string()))?;
        Ok((config, source))
    }
}

impl GoogleSettings {
    /// Applies the optional settings on top of `config`.
    pub fn apply(&self, mut config: GoogleConfig) -> GoogleConfig {
        if let Some(dir) = &self.token_dir {
            config = config.with_token_dir(dir);
        }
        if let Some(secs) = self.timeout_secs {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.consent_timeout_secs {
            config = config.with_consent_timeout(Duration::from_secs(secs));
        }
        if let Some([start, end]) = self.loopback_ports {
            config = config.with_loopback_port_range(start, end);
        }
        config
    }

    /// Inline credentials with secret references expanded, if both are set.
    pub fn inline_credentials(&self) -> Result<Option<OAuthCredentials>, String> {
        match (self.client_id.as_deref(), self.client_secret.as_deref()) {
            (Some(id), Some(secret)) => {
                let id = crate::secret::resolve(id)
                    .map_err(|e| format!("failed to resolve client_id: {e}"))?;
                let secret = crate::secret::resolve(secret)
                    .map_err(|e| format!("failed to resolve client_secret: {e}"))?;
                Ok(Some(OAuthCredentials::new(id, secret)))
            }
            (None, None) => Ok(None),
            (Some(_), None) => Err("client_secret is missing from [google]".to_string()),
            (None, Some(_)) => Err("client_id is missing from [google]".to_string()),
        }
    }
}

/// Picks credentials by priority: command-line id and secret, command-line
/// credentials file, inline `[google]` values, then `[google]`
/// `credentials_file`.
pub fn resolve_credentials(
    overrides: &CredentialOverrides,
    settings: &GoogleSettings,
) -> ClientResult<(OAuthCredentials, CredentialSource)> {
    match (&overrides.client_id, &overrides.client_secret) {
        (Some(id), Some(secret)) => {
            return Ok((
                OAuthCredentials::new(id.clone(), secret.clone()),
                CredentialSource::CommandLine,
            ));
        }
        (Some(_), None) | (None, Some(_)) => {
            return Err(ClientError::Config(
                "both --client-id and --client-secret are required".to_string(),
            ));
        }
        (None, None) => {}
    }

    if let Some(path) = &overrides.credentials_file {
        let credentials = load_credentials_file(path)?;
        return Ok((credentials, CredentialSource::CommandLine));
    }

    if let Some(credentials) = settings.inline_credentials().map_err(ClientError::Config)? {
        return Ok((credentials, CredentialSource::ConfigFile));
    }

    if let Some(path) = &settings.credentials_file {
        let credentials = load_credentials_file(path)?;
        return Ok((credentials, CredentialSource::ConfigFile));
    }

    Err(ClientError::Config(format!(
        "Google OAuth credentials are required. Provide them with:\n  \
         - client_id and client_secret under [google] in {}\n  \
         - --client-id and --client-secret (or GOOGLE_CLIENT_ID / GOOGLE_CLIENT_SECRET)\n  \
         - --credentials-file <client_secret.json>",
        ClientConfig::default_path().display()
    )))
}

fn load_credentials_file(path: &Path) -> ClientResult<OAuthCredentials> {
    OAuthCredentials::from_file(path).map_err(|e| {
        ClientError::Config(format!(
            "failed to load credentials from {}: {}",
            path.display(),
            e.message()
        ))
    })
}

/// Writes `client_id` and `client_secret` into the `[google]` table of
/// `path`, keeping the rest of the file intact.
pub fn persist_credentials(path: &Path, credentials: &OAuthCredentials) -> Result<(), String> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(format!("failed to read {}: {e}", path.display())),
    };
    let mut doc = content
        .parse::<toml_edit::DocumentMut>()
        .map_err(|e| format!("failed to parse {}: {e}", path.display()))?;

    if !doc.contains_key("google") {
        doc["google"] = toml_edit::Item::Table(toml_edit::Table::new());
    }
    let google = doc["google"]
        .as_table_mut()
        .ok_or_else(|| format!("[google] in {} is not a table", path.display()))?;
    google["client_id"] = toml_edit::value(credentials.client_id.as_str());
    google["client_secret"] = toml_edit::value(credentials.client_secret.as_str());

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
    }
    std::fs::write(path, doc.to_string())
        .map_err(|e| format!("failed to write {}: {e}", path.display()))?;
    info!(path = %path.display(), "saved credentials");
    Ok(())
}
