//! OAuth client credentials and Google endpoint configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ApiError, ApiResult};

/// OAuth 2.0 client registered in the Google Cloud Console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Shape of a credentials JSON file: either an `installed`/`web` section or
/// `client_id`/`client_secret` at the root.
#[derive(Debug, Deserialize)]
struct CredentialsFile {
    installed: Option<ClientSection>,
    web: Option<ClientSection>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClientSection {
    client_id: String,
    client_secret: String,
}

impl OAuthCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Loads credentials from a JSON file downloaded from the Cloud Console.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the file is unreadable or has
    /// neither supported layout.
    pub fn from_file(path: impl AsRef<Path>) -> ApiResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ApiError::configuration(format!(
                "failed to read credentials file {}: {e}",
                path.display()
            ))
            .with_source(e)
        })?;
        Self::from_json(&content)
    }

    /// Parses credentials from JSON text.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for malformed JSON or a missing client.
    pub fn from_json(json: &str) -> ApiResult<Self> {
        let file: CredentialsFile = serde_json::from_str(json).map_err(|e| {
            ApiError::configuration(format!("failed to parse credentials JSON: {e}"))
        })?;

        if let Some(section) = file.installed.or(file.web) {
            return Ok(Self::new(section.client_id, section.client_secret));
        }
        match (file.client_id, file.client_secret) {
            (Some(id), Some(secret)) => Ok(Self::new(id, secret)),
            _ => Err(ApiError::configuration(
                "credentials JSON needs an 'installed' or 'web' section, or root-level client_id and client_secret",
            )),
        }
    }

    /// Checks the credentials look like a Google OAuth client.
    ///
    /// # Errors
    ///
    /// Describes the first problem found.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.client_id.trim().is_empty() {
            return Err("client_id is required");
        }
        if !self.client_id.ends_with(".apps.googleusercontent.com") {
            return Err("client_id should end with .apps.googleusercontent.com");
        }
        if self.client_secret.trim().is_empty() {
            return Err("client_secret is required");
        }
        Ok(())
    }
}

/// Base URLs for every Google endpoint the crate talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleEndpoints {
    pub auth_url: String,
    pub token_url: String,
    pub revoke_url: String,
    pub userinfo_url: String,
    pub gmail_base: String,
    pub drive_base: String,
    pub drive_upload_base: String,
    pub classroom_base: String,
    pub calendar_base: String,
}

impl Default for GoogleEndpoints {
    fn default() -> Self {
        Self {
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            revoke_url: "https://oauth2.googleapis.com/revoke".to_string(),
            userinfo_url: "https://www.googleapis.com/oauth2/v2/userinfo".to_string(),
            gmail_base: "https://gmail.googleapis.com/gmail/v1".to_string(),
            drive_base: "https://www.googleapis.com/drive/v3".to_string(),
            drive_upload_base: "https://www.googleapis.com/upload/drive/v3".to_string(),
            classroom_base: "https://classroom.googleapis.com/v1".to_string(),
            calendar_base: "https://www.googleapis.com/calendar/v3".to_string(),
        }
    }
}

/// Everything needed to build a [`SessionContext`](crate::SessionContext).
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub credentials: OAuthCredentials,
    /// Directory for the file token store.
    pub token_dir: PathBuf,
    pub timeout: Duration,
    pub user_agent: String,
    /// Inclusive port range tried for the OAuth loopback listener.
    pub loopback_port_range: (u16, u16),
    /// How long to wait for the browser to hit the loopback redirect.
    pub consent_timeout: Duration,
    pub endpoints: GoogleEndpoints,
}

impl GoogleConfig {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
    pub const DEFAULT_CONSENT_TIMEOUT_SECS: u64 = 300;

    pub fn new(credentials: OAuthCredentials) -> Self {
        Self {
            credentials,
            token_dir: Self::default_token_dir(),
            timeout: Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS),
            user_agent: format!("campusdesk/{}", env!("CARGO_PKG_VERSION")),
            loopback_port_range: (8080, 8090),
            consent_timeout: Duration::from_secs(Self::DEFAULT_CONSENT_TIMEOUT_SECS),
            endpoints: GoogleEndpoints::default(),
        }
    }

    /// `~/.local/share/campusdesk/tokens`.
    pub fn default_token_dir() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".local").join("share"))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("campusdesk")
            .join("tokens")
    }

    pub fn with_token_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.token_dir = dir.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_loopback_port_range(mut self, start: u16, end: u16) -> Self {
        self.loopback_port_range = (start, end);
        self
    }

    pub fn with_consent_timeout(mut self, timeout: Duration) -> Self {
        self.consent_timeout = timeout;
        self
    }

    pub fn with_endpoints(mut self, endpoints: GoogleEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Validates credentials and the port range.
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing the first problem.
    pub fn validate(&self) -> ApiResult<()> {
        self.credentials
            .validate()
            .map_err(|e| ApiError::configuration(format!("invalid credentials: {e}")))?;
        let (start, end) = self.loopback_port_range;
        if start == 0 || start > end {
            return Err(ApiError::configuration(format!(
                "invalid loopback port range {start}-{end}"
            )));
        }
        if self.timeout.is_zero() {
            return Err(ApiError::configuration("timeout must be greater than zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> OAuthCredentials {
        OAuthCredentials::new("portal.apps.googleusercontent.com", "secret")
    }

    #[test]
    fn credentials_validation() {
        assert!(credentials().validate().is_ok());
        assert!(OAuthCredentials::new("", "secret").validate().is_err());
        assert!(OAuthCredentials::new("portal", "secret").validate().is_err());
        assert!(
            OAuthCredentials::new("portal.apps.googleusercontent.com", " ")
                .validate()
                .is_err()
        );
    }

    #[test]
    fn credentials_from_installed_section() {
        let json = r#"{
            "installed": {
                "client_id": "desk.apps.googleusercontent.com",
                "client_secret": "s3cret",
                "project_id": "campus"
            }
        }"#;
        let creds = OAuthCredentials::from_json(json).unwrap();
        assert_eq!(creds.client_id, "desk.apps.googleusercontent.com");
        assert_eq!(creds.client_secret, "s3cret");
    }

    #[test]
    fn credentials_from_flat_json() {
        let json = r#"{"client_id": "flat.apps.googleusercontent.com", "client_secret": "x"}"#;
        let creds = OAuthCredentials::from_json(json).unwrap();
        assert_eq!(creds.client_id, "flat.apps.googleusercontent.com");
    }

    #[test]
    fn credentials_json_without_client_is_rejected() {
        let err = OAuthCredentials::from_json(r#"{"type": "service_account"}"#).unwrap_err();
        assert_eq!(err.code(), crate::error::ApiErrorCode::Configuration);
    }

    #[test]
    fn credentials_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.json");
        std::fs::write(
            &path,
            r#"{"web": {"client_id": "w.apps.googleusercontent.com", "client_secret": "y"}}"#,
        )
        .unwrap();
        let creds = OAuthCredentials::from_file(&path).unwrap();
        assert_eq!(creds.client_secret, "y");
        assert!(OAuthCredentials::from_file(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn config_defaults_point_at_google() {
        let config = GoogleConfig::new(credentials());
        assert!(config.token_dir.ends_with("campusdesk/tokens"));
        assert_eq!(config.endpoints.gmail_base, "https://gmail.googleapis.com/gmail/v1");
        assert_eq!(config.consent_timeout, Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_validation() {
        let config = GoogleConfig::new(credentials()).with_loopback_port_range(9000, 8000);
        assert!(config.validate().is_err());

        let config = GoogleConfig::new(credentials()).with_timeout(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = GoogleConfig::new(credentials())
            .with_token_dir("/tmp/desk")
            .with_loopback_port_range(9000, 9010)
            .with_user_agent("desk-test");
        assert!(config.validate().is_ok());
        assert_eq!(config.token_dir, PathBuf::from("/tmp/desk"));
        assert_eq!(config.user_agent, "desk-test");
    }
}
