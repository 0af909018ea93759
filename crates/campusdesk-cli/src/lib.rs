//! The `campusdesk` command-line front-end.
//!
//! Parses arguments, loads `config.toml`, restores saved sessions and runs
//! one subcommand against the Google clients.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod output;
pub mod secret;

pub use cli::Cli;
pub use error::{ClientError, ClientResult};
