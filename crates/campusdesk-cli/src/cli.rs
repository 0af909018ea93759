//! Command-line interface definition.

use std::path::PathBuf;

use campusdesk_core::{ProviderKind, TracingConfig, TracingOutputFormat};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::Level;

use crate::config::CredentialOverrides;

/// campusdesk - Gmail, Drive, Classroom and Calendar for the college portal
#[derive(Debug, Parser)]
#[command(name = "campusdesk")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, global = true, env = "CAMPUSDESK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v', global = true)]
    pub debug: bool,

    /// Print results as `{success, data | error}` JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Format of log lines on stderr
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = LogFormat::Compact,
        env = "CAMPUSDESK_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(flatten)]
    pub credentials: CredentialArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One terse line per event
    Compact,
    /// Multi-line, for reading while debugging
    Pretty,
    /// One JSON object per line, with spans and locations
    Json,
}

impl LogFormat {
    /// Tracing setup for this format; `debug` lowers the level to debug.
    pub fn tracing_config(self, debug: bool) -> TracingConfig {
        match self {
            Self::Compact => TracingConfig::cli(debug),
            Self::Pretty => TracingConfig::cli(debug).with_format(TracingOutputFormat::Pretty),
            Self::Json => {
                let level = if debug { Level::DEBUG } else { Level::INFO };
                TracingConfig::structured().with_level(level)
            }
        }
    }
}

/// OAuth client credentials, overriding `config.toml`.
#[derive(Debug, Clone, Default, Args)]
pub struct CredentialArgs {
    /// OAuth client ID (from Google Cloud Console)
    #[arg(long, global = true, env = "GOOGLE_CLIENT_ID")]
    pub client_id: Option<String>,

    /// OAuth client secret (from Google Cloud Console)
    #[arg(long, global = true, env = "GOOGLE_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Path to a Google Cloud Console credentials JSON file
    #[arg(long, global = true, env = "GOOGLE_CREDENTIALS_FILE")]
    pub credentials_file: Option<PathBuf>,
}

impl From<CredentialArgs> for CredentialOverrides {
    fn from(args: CredentialArgs) -> Self {
        Self {
            client_id: args.client_id,
            client_secret: args.client_secret,
            credentials_file: args.credentials_file,
        }
    }
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sign in, sign out and show session state
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },

    /// Read Gmail
    Mail {
        #[command(subcommand)]
        action: MailAction,
    },

    /// Browse and manage Google Drive
    Drive {
        #[command(subcommand)]
        action: DriveAction,
    },

    /// Courses, coursework and submissions in Google Classroom
    Classroom {
        #[command(subcommand)]
        action: ClassroomAction,
    },

    /// Google Calendar events
    Calendar {
        #[command(subcommand)]
        action: CalendarAction,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum AuthAction {
    /// Sign in to a provider through the browser
    Signin {
        /// mail, drive, classroom or calendar
        provider: ProviderKind,

        /// Sign in again even when a session exists
        #[arg(long, short)]
        force: bool,
    },

    /// Sign out of one provider, or all of them
    Signout {
        /// Provider to sign out of; all when omitted
        provider: Option<ProviderKind>,
    },

    /// Show who is signed in where
    Status,
}

#[derive(Debug, Subcommand)]
pub enum MailAction {
    /// Latest inbox messages
    Inbox {
        #[arg(long, short = 'n', default_value = "20")]
        limit: u32,
    },

    /// Search with Gmail query syntax
    Search {
        query: String,

        #[arg(long, short = 'n', default_value = "20")]
        limit: u32,
    },

    /// Show one message with its body
    Show { id: String },
}

#[derive(Debug, Subcommand)]
pub enum DriveAction {
    /// List files in a folder, or matching a Drive query
    Ls {
        /// Folder ID; the Drive root when omitted
        folder: Option<String>,

        /// Raw Drive query (`q`), instead of a folder listing
        #[arg(long, short, conflicts_with = "folder")]
        query: Option<String>,

        #[arg(long, default_value = "50")]
        page_size: u32,

        /// Continue from a previous listing
        #[arg(long)]
        page_token: Option<String>,
    },

    /// Show file metadata
    Info { id: String },

    /// Create a folder
    Mkdir {
        name: String,

        #[arg(long)]
        parent: Option<String>,
    },

    /// Upload a local file
    Upload {
        path: PathBuf,

        #[arg(long)]
        parent: Option<String>,

        /// Name in Drive; the local file name when omitted
        #[arg(long)]
        name: Option<String>,

        #[arg(long, default_value = "application/octet-stream")]
        mime_type: String,
    },

    /// Rename a file or folder
    Rename { id: String, name: String },

    /// Delete a file or folder
    Rm { id: String },

    /// Download a file, exporting Google documents
    Get {
        id: String,

        /// Destination path
        #[arg(long, short)]
        output: PathBuf,

        /// Export MIME type for Google documents
        #[arg(long, default_value = "application/pdf")]
        export_as: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum ClassroomAction {
    /// Active courses
    Courses,

    /// Coursework, announcements, roster and submissions for one course
    Course { id: String },

    /// Your submission for a piece of coursework
    Submission { course: String, work: String },

    /// Turn in a submission
    TurnIn {
        course: String,
        work: String,
        submission: String,
    },

    /// Reclaim a turned-in submission
    Reclaim {
        course: String,
        work: String,
        submission: String,
    },

    /// Attach Drive files or links to a submission
    Attach {
        course: String,
        work: String,
        submission: String,

        /// Drive file ID (can be repeated)
        #[arg(long = "drive-file", action = clap::ArgAction::Append)]
        drive_files: Vec<String>,

        /// URL (can be repeated)
        #[arg(long = "link", action = clap::ArgAction::Append)]
        links: Vec<String>,
    },
}

/// Fields shared by `calendar add` and `calendar update`.
#[derive(Debug, Clone, Args)]
pub struct EventArgs {
    pub summary: String,

    /// RFC 3339 date-time, or YYYY-MM-DD for an all-day event
    #[arg(long)]
    pub start: String,

    /// RFC 3339 date-time, or YYYY-MM-DD (exclusive) for an all-day event
    #[arg(long)]
    pub end: String,

    #[arg(long)]
    pub description: Option<String>,

    #[arg(long)]
    pub location: Option<String>,

    /// Attendee email (can be repeated)
    #[arg(long = "attendee", action = clap::ArgAction::Append)]
    pub attendees: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum CalendarAction {
    /// Events in the coming days
    Events {
        #[arg(long, default_value = "7")]
        days: u32,

        /// First day to show (YYYY-MM-DD); today when omitted
        #[arg(long)]
        from: Option<String>,
    },

    /// Create an event
    Add {
        #[command(flatten)]
        event: EventArgs,
    },

    /// Replace an event
    Update {
        id: String,

        #[command(flatten)]
        event: EventArgs,
    },

    /// Delete an event
    Rm { id: String },
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration file path
    Path,
}
