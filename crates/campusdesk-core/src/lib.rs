//! Core types shared by the campusdesk crates: provider kinds, user profiles,
//! event times and tracing setup.

pub mod profile;
pub mod provider;
pub mod time;
pub mod tracing;

pub use profile::UserProfile;
pub use provider::{ParseProviderError, ProviderKind};
pub use time::{EventTime, TimeWindow};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
