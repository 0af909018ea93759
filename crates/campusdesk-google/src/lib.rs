//! Google OAuth sessions and REST clients for the campusdesk portal.
//!
//! The crate is organized bottom-up:
//!
//! - [`transport`]: the HTTP seam and its reqwest implementation
//! - [`tokens`]: persisted per-provider token records
//! - [`oauth`] and [`session`]: consent, sign-in, sign-out and restore
//! - [`rest`]: authenticated request plumbing shared by the API clients
//! - [`mail`], [`drive`], [`classroom`], [`calendar`]: the API clients
//! - [`context`]: one handle owning all of the above
//!
//! ```no_run
//! # async fn demo() -> campusdesk_google::ApiResult<()> {
//! use campusdesk_core::ProviderKind;
//! use campusdesk_google::{GoogleConfig, OAuthCredentials, SessionContext};
//!
//! let config = GoogleConfig::new(OAuthCredentials::from_file("client_secret.json")?);
//! let context = SessionContext::from_config(&config)?;
//! context.restore_all().await;
//! if !context.is_signed_in(ProviderKind::Mail) {
//!     context.sign_in(ProviderKind::Mail).await;
//! }
//! let inbox = context.mail().list_inbox(10).await?;
//! println!("{} messages", inbox.len());
//! # Ok(())
//! # }
//! ```

pub mod calendar;
pub mod classroom;
pub mod config;
pub mod context;
pub mod drive;
pub mod error;
pub mod mail;
pub mod oauth;
pub mod outcome;
pub mod rest;
pub mod session;
pub mod tokens;
pub mod transport;

#[cfg(test)]
mod fake;

pub use calendar::{CalendarClient, CalendarEvent, EventDraft};
pub use classroom::{
    Announcement, Attachment, ClassroomClient, Course, CourseDetails, CourseWork, Roster,
    RosterMember, Submission, SubmissionState,
};
pub use config::{GoogleConfig, GoogleEndpoints, OAuthCredentials};
pub use context::{AuthSnapshot, SessionContext, SignOutReport};
pub use drive::{DriveClient, DriveFile, FilePage, UploadFile};
pub use error::{ApiError, ApiErrorCode, ApiResult};
pub use mail::{MailClient, MailMessage};
pub use oauth::{ConsentFlow, LoopbackConsent, TokenGrant};
pub use outcome::{Listing, Outcome};
pub use rest::{AccessToken, RestClient};
pub use session::{AuthSession, OAuthSession, RestoreOutcome, SessionState};
pub use tokens::{FileTokenStore, MemoryTokenStore, TokenRecord, TokenStore};
pub use transport::{HttpTransport, ReqwestTransport};
pub use tokio_util::sync::CancellationToken;
