//! Configuration commands.

use std::path::Path;

use crate::config::{ClientConfig, CredentialOverrides};
use crate::error::{ClientError, ClientResult};

/// Prints the configuration as loaded, secret references unexpanded.
pub fn dump(config: &ClientConfig, path: &Path) -> ClientResult<()> {
    let toml_str = toml::to_string_pretty(config)
        .map_err(|e| ClientError::Config(format!("failed to serialize config: {e}")))?;
    println!("# {}", path.display());
    println!("{toml_str}");
    Ok(())
}

/// Resolves credentials and checks every setting.
pub fn validate(config: &ClientConfig, overrides: &CredentialOverrides) -> ClientResult<()> {
    let (google, _) = config.google_config(overrides)?;
    println!("Google credentials resolve ({}).", google.credentials.client_id);
    println!("Tokens are stored in {}.", google.token_dir.display());
    println!("Configuration is valid.");
    Ok(())
}

pub fn path(path: &Path) -> ClientResult<()> {
    println!("config: {}", path.display());
    Ok(())
}
