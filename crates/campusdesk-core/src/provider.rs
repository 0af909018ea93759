//! Google Workspace providers integrated by the portal.
//!
//! Each [`ProviderKind`] maps to its own OAuth session, its own scope set and
//! its own set of storage keys. The four providers are independent: signing
//! in to Drive says nothing about Mail.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const SCOPE_PROFILE: &str = "https://www.googleapis.com/auth/userinfo.profile";
const SCOPE_EMAIL: &str = "https://www.googleapis.com/auth/userinfo.email";

const MAIL_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.readonly",
    SCOPE_PROFILE,
    SCOPE_EMAIL,
];

const DRIVE_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/drive",
    SCOPE_PROFILE,
    SCOPE_EMAIL,
];

const CLASSROOM_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/classroom.courses.readonly",
    "https://www.googleapis.com/auth/classroom.coursework.me",
    "https://www.googleapis.com/auth/classroom.announcements.readonly",
    "https://www.googleapis.com/auth/classroom.rosters.readonly",
    "https://www.googleapis.com/auth/classroom.profile.emails",
    "https://www.googleapis.com/auth/classroom.profile.photos",
    "https://www.googleapis.com/auth/drive.readonly",
    SCOPE_PROFILE,
    SCOPE_EMAIL,
];

const CALENDAR_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/calendar.events",
    "https://www.googleapis.com/auth/calendar.readonly",
    SCOPE_PROFILE,
    SCOPE_EMAIL,
];

/// One of the four external Google services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Gmail.
    Mail,
    /// Google Drive.
    Drive,
    /// Google Classroom.
    Classroom,
    /// Google Calendar.
    Calendar,
}

impl ProviderKind {
    /// All providers, in display order.
    pub const ALL: [ProviderKind; 4] = [Self::Mail, Self::Drive, Self::Classroom, Self::Calendar];

    /// Stable lowercase identifier, also used as the storage key prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mail => "mail",
            Self::Drive => "drive",
            Self::Classroom => "classroom",
            Self::Calendar => "calendar",
        }
    }

    /// Human-readable product name.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Mail => "Gmail",
            Self::Drive => "Google Drive",
            Self::Classroom => "Google Classroom",
            Self::Calendar => "Google Calendar",
        }
    }

    /// OAuth scopes requested during consent for this provider.
    pub fn scopes(&self) -> &'static [&'static str] {
        match self {
            Self::Mail => MAIL_SCOPES,
            Self::Drive => DRIVE_SCOPES,
            Self::Classroom => CLASSROOM_SCOPES,
            Self::Calendar => CALENDAR_SCOPES,
        }
    }

    /// The scope list joined into the single space-separated string sent to
    /// the authorization endpoint.
    pub fn scope_string(&self) -> String {
        self.scopes().join(" ")
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a known provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown provider '{0}' (expected mail, drive, classroom or calendar)")]
pub struct ParseProviderError(String);

impl FromStr for ProviderKind {
    type Err = ParseProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mail" | "gmail" => Ok(Self::Mail),
            "drive" => Ok(Self::Drive),
            "classroom" => Ok(Self::Classroom),
            "calendar" => Ok(Self::Calendar),
            other => Err(ParseProviderError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_aliases_and_case() {
        assert_eq!("Mail".parse::<ProviderKind>().unwrap(), ProviderKind::Mail);
        assert_eq!("gmail".parse::<ProviderKind>().unwrap(), ProviderKind::Mail);
        assert_eq!(" drive ".parse::<ProviderKind>().unwrap(), ProviderKind::Drive);
        assert!("photos".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn every_provider_requests_profile_scope() {
        for provider in ProviderKind::ALL {
            assert!(provider.scopes().contains(&SCOPE_PROFILE), "{provider}");
        }
    }

    #[test]
    fn classroom_can_read_drive_attachments() {
        assert!(
            ProviderKind::Classroom
                .scope_string()
                .contains("auth/drive.readonly")
        );
    }

    #[test]
    fn display_matches_storage_prefix() {
        assert_eq!(ProviderKind::Calendar.to_string(), "calendar");
        let json = serde_json::to_string(&ProviderKind::Classroom).unwrap();
        assert_eq!(json, "\"classroom\"");
    }
}
