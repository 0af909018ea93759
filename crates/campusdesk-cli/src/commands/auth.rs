//! Authentication commands.

use std::path::Path;

use campusdesk_core::ProviderKind;
use campusdesk_google::{AuthSnapshot, OAuthCredentials, Outcome, SignOutReport};
use tracing::{info, warn};

use crate::commands::App;
use crate::config::{CredentialSource, persist_credentials};
use crate::error::{ClientError, ClientResult};
use crate::output::format_datetime;

/// Signs in through the browser.
///
/// Credentials given on the command line are saved to `config_path` once
/// the sign-in succeeds.
pub async fn signin(
    app: &App,
    provider: ProviderKind,
    force: bool,
    credentials: &OAuthCredentials,
    source: CredentialSource,
    config_path: &Path,
) -> ClientResult<()> {
    if app.context.is_signed_in(provider) && !force {
        let snapshot = app.context.session(provider).snapshot();
        app.printer.emit_outcome(&Outcome::ok(snapshot), |session| {
            let email = session.user().map(|u| u.email.as_str()).unwrap_or("unknown");
            println!("Already signed in to {} as {email}.", provider.label());
            println!("Use --force to sign in again.");
        });
        return Ok(());
    }

    if !app.printer.is_json() {
        println!("Signing in to {}...", provider.label());
        println!("A browser window will open; approve access there.");
    }

    let outcome = app.context.sign_in(provider).await;
    app.printer.emit_outcome(&outcome, |user| {
        println!("Signed in to {} as {} <{}>.", provider.label(), user.name, user.email);
    });
    if !outcome.is_success() {
        return Err(outcome_error(&outcome));
    }

    if source == CredentialSource::CommandLine {
        match persist_credentials(config_path, credentials) {
            Ok(()) if !app.printer.is_json() => {
                println!("Credentials saved to {}", config_path.display());
            }
            Ok(()) => {}
            Err(e) => warn!("could not save credentials: {e}"),
        }
    }
    info!(%provider, "sign-in complete");
    Ok(())
}

/// Signs out of `provider`, or every provider when `None`.
pub async fn signout(app: &App, provider: Option<ProviderKind>) -> ClientResult<()> {
    match provider {
        Some(provider) => {
            let outcome = app.context.sign_out(provider).await;
            app.printer.emit_outcome(&outcome, |_| {
                println!("Signed out of {}.", provider.label());
            });
            if outcome.is_success() {
                Ok(())
            } else {
                Err(outcome_error(&outcome))
            }
        }
        None => {
            let report = app.context.sign_out_all().await;
            let all_succeeded = report.all_succeeded();
            app.printer.emit_outcome(&Outcome::ok(report), print_report);
            if all_succeeded {
                Ok(())
            } else {
                Err(ClientError::Auth(
                    "some providers could not be signed out".to_string(),
                ))
            }
        }
    }
}

pub fn status(app: &App) -> ClientResult<()> {
    app.printer
        .emit_outcome(&Outcome::ok(app.context.snapshot()), print_status);
    Ok(())
}

fn print_report(report: &SignOutReport) {
    for (provider, outcome) in &report.results {
        match &outcome.error {
            None => println!("{:<18} signed out", provider.label()),
            Some(error) => println!("{:<18} failed: {error}", provider.label()),
        }
    }
}

fn print_status(snapshot: &AuthSnapshot) {
    for provider in ProviderKind::ALL {
        let session = snapshot.get(provider);
        let line = match session.user() {
            Some(user) if session.is_signed_in() => {
                let expiry = session
                    .expires_at()
                    .map(|at| format!(" (until {})", format_datetime(&at)))
                    .unwrap_or_default();
                format!("{} <{}>{expiry}", user.name, user.email)
            }
            _ => "not signed in".to_string(),
        };
        println!("{:<18} {line}", provider.label());
    }
}

fn outcome_error<T>(outcome: &Outcome<T>) -> ClientError {
    ClientError::Auth(
        outcome
            .error
            .clone()
            .unwrap_or_else(|| "unknown error".to_string()),
    )
}
