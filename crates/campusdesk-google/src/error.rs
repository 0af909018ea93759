//! Error types shared by the sessions and the REST clients.
//!
//! Every failure a caller can observe is an [`ApiError`]. The [`ApiErrorCode`]
//! is the stable part: front-ends switch on it to decide whether to prompt
//! for a new sign-in, show a retry hint, or report a bug.

use std::fmt;

use campusdesk_core::ProviderKind;
use serde::Serialize;
use thiserror::Error;

/// The category of an [`ApiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorCode {
    /// No access token in memory or in the token store.
    NotSignedIn,
    /// The stored token has passed its expiry time.
    SessionExpired,
    /// The user closed or refused the consent prompt.
    ConsentDenied,
    /// The authorization server rejected a request (bad code, bad client).
    OAuth,
    /// The provider answered with a non-success HTTP status.
    RequestFailed,
    /// Connection, TLS or timeout failure before a status was received.
    NetworkError,
    /// A response body did not have the expected shape.
    DecodeFailed,
    /// Input was rejected locally before any request was made.
    ValidationFailed,
    /// The operation was cancelled by its owner.
    Cancelled,
    /// Reading or writing the token store failed.
    Storage,
    /// Missing or invalid configuration, e.g. no OAuth client id.
    Configuration,
    /// Unexpected internal state.
    Internal,
}

impl ApiErrorCode {
    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotSignedIn => "not_signed_in",
            Self::SessionExpired => "session_expired",
            Self::ConsentDenied => "consent_denied",
            Self::OAuth => "oauth",
            Self::RequestFailed => "request_failed",
            Self::NetworkError => "network_error",
            Self::DecodeFailed => "decode_failed",
            Self::ValidationFailed => "validation_failed",
            Self::Cancelled => "cancelled",
            Self::Storage => "storage",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        }
    }

    /// Returns true when signing in again is the way out.
    pub fn needs_sign_in(&self) -> bool {
        matches!(self, Self::NotSignedIn | Self::SessionExpired)
    }
}

impl fmt::Display for ApiErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error from a session or a provider client.
#[derive(Debug, Error)]
pub struct ApiError {
    code: ApiErrorCode,
    message: String,
    provider: Option<ProviderKind>,
    /// HTTP status for `RequestFailed`.
    status: Option<u16>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ApiError {
    /// Creates an error with the given code and message.
    pub fn new(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider: None,
            status: None,
            source: None,
        }
    }

    pub fn not_signed_in(provider: ProviderKind) -> Self {
        Self::new(
            ApiErrorCode::NotSignedIn,
            format!("not signed in to {}", provider.label()),
        )
        .with_provider(provider)
    }

    pub fn session_expired(provider: ProviderKind) -> Self {
        Self::new(
            ApiErrorCode::SessionExpired,
            format!("{} session has expired, sign in again", provider.label()),
        )
        .with_provider(provider)
    }

    pub fn consent_denied(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::ConsentDenied, message)
    }

    pub fn oauth(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::OAuth, message)
    }

    /// A non-success HTTP status from the provider.
    pub fn request_failed(status: u16, message: impl Into<String>) -> Self {
        let mut err = Self::new(ApiErrorCode::RequestFailed, message);
        err.status = Some(status);
        err
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::NetworkError, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::DecodeFailed, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::ValidationFailed, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ApiErrorCode::Cancelled, "operation cancelled")
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::Storage, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::Configuration, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::Internal, message)
    }

    /// Tags the error with the provider it came from.
    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Attaches the underlying cause.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn code(&self) -> ApiErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn provider(&self) -> Option<ProviderKind> {
        self.provider
    }

    /// HTTP status, present only for `RequestFailed`.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == ApiErrorCode::Cancelled
    }

    /// Returns true when signing in again is the way out.
    pub fn needs_sign_in(&self) -> bool {
        self.code.needs_sign_in() || self.status == Some(401)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(provider) = self.provider {
            write!(f, "[{provider}] ")?;
        }
        match self.status {
            Some(status) => write!(f, "{} ({status}): {}", self.code, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

/// Result alias for session and client operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_names_are_snake_case() {
        assert_eq!(ApiErrorCode::NotSignedIn.as_str(), "not_signed_in");
        assert_eq!(ApiErrorCode::RequestFailed.to_string(), "request_failed");
        let json = serde_json::to_string(&ApiErrorCode::SessionExpired).unwrap();
        assert_eq!(json, "\"session_expired\"");
    }

    #[test]
    fn request_failed_carries_status() {
        let err = ApiError::request_failed(403, "insufficient permissions")
            .with_provider(ProviderKind::Drive);
        assert_eq!(err.code(), ApiErrorCode::RequestFailed);
        assert_eq!(err.status(), Some(403));
        assert_eq!(err.provider(), Some(ProviderKind::Drive));
        assert_eq!(
            err.to_string(),
            "[drive] request_failed (403): insufficient permissions"
        );
    }

    #[test]
    fn sign_in_hint() {
        assert!(ApiError::not_signed_in(ProviderKind::Mail).needs_sign_in());
        assert!(ApiError::session_expired(ProviderKind::Mail).needs_sign_in());
        assert!(ApiError::request_failed(401, "invalid credentials").needs_sign_in());
        assert!(!ApiError::request_failed(500, "backend error").needs_sign_in());
        assert!(!ApiError::cancelled().needs_sign_in());
    }

    #[test]
    fn source_is_kept() {
        use std::error::Error;
        let io_err = std::io::Error::other("disk full");
        let err = ApiError::storage("could not persist token").with_source(io_err);
        assert!(err.source().is_some());
        assert!(err.provider().is_none());
    }
}
