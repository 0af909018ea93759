//! Minimal user profile kept alongside each access token.

use serde::{Deserialize, Serialize};

/// The signed-in user as reported by the userinfo endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Display name.
    pub name: String,
    /// Primary email address.
    pub email: String,
    /// Avatar URL, if the account has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl UserProfile {
    /// Creates a profile without an avatar.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            image_url: None,
        }
    }

    /// Builder method to set the avatar URL.
    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    /// Name to show in a status line: the display name, or the email when
    /// the account has no name set.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.email
        } else {
            &self.name
        }
    }
}
