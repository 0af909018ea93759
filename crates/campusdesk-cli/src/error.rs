//! Client error types.

use std::fmt;

use campusdesk_core::ProviderKind;
use campusdesk_google::{ApiError, ApiErrorCode};

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the `campusdesk` binary.
#[derive(Debug)]
pub enum ClientError {
    /// Configuration file or credential problem.
    Config(String),
    /// Bad command-line input.
    Input(String),
    /// IO error.
    Io(std::io::Error),
    /// The provider needs an interactive sign-in first.
    AuthRequired(ProviderKind),
    /// Sign-in or sign-out did not complete.
    Auth(String),
    /// Interrupted with Ctrl-C.
    Interrupted,
    /// Failure reported by a Google API or the OAuth flow.
    Api(ApiError),
}

impl ClientError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) | Self::Input(_) => 2,
            Self::AuthRequired(_) => 3,
            Self::Interrupted => 130,
            Self::Io(_) | Self::Auth(_) | Self::Api(_) => 1,
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Input(msg) => write!(f, "invalid input: {msg}"),
            Self::Io(err) => write!(f, "IO error: {err}"),
            Self::AuthRequired(provider) => write!(
                f,
                "not signed in to {}; run `campusdesk auth signin {provider}`",
                provider.label()
            ),
            Self::Auth(msg) => write!(f, "authentication failed: {msg}"),
            Self::Interrupted => f.write_str("interrupted"),
            Self::Api(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Api(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<ApiError> for ClientError {
    fn from(err: ApiError) -> Self {
        match (err.code(), err.provider()) {
            (ApiErrorCode::Cancelled, _) => Self::Interrupted,
            (ApiErrorCode::NotSignedIn | ApiErrorCode::SessionExpired, Some(provider)) => {
                Self::AuthRequired(provider)
            }
            _ => Self::Api(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_in_errors_become_auth_required() {
        let err: ClientError = ApiError::session_expired(ProviderKind::Drive).into();
        assert!(matches!(err, ClientError::AuthRequired(ProviderKind::Drive)));
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("campusdesk auth signin drive"));
    }

    #[test]
    fn cancellation_becomes_interrupted() {
        let err: ClientError = ApiError::cancelled().into();
        assert!(matches!(err, ClientError::Interrupted));
        assert_eq!(err.exit_code(), 130);
    }

    #[test]
    fn other_api_errors_keep_message() {
        let err: ClientError = ApiError::request_failed(404, "File not found: abc").into();
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("File not found: abc"));
    }
}
