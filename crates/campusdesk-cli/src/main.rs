//! campusdesk CLI entry point.

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, warn};

use campusdesk_cli::cli::{AuthAction, Cli, Command, ConfigAction};
use campusdesk_cli::commands::{self, App};
use campusdesk_cli::config::{ClientConfig, CredentialOverrides};
use campusdesk_cli::error::{ClientError, ClientResult};
use campusdesk_cli::output::Printer;
use campusdesk_core::init_tracing;
use campusdesk_google::{RestoreOutcome, SessionContext};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(ClientConfig::default_path);
    let config = match ClientConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    if let Err(e) = init_tracing(cli.log_format.tracing_config(cli.debug || config.debug)) {
        eprintln!("warning: {e}");
    }

    match run(cli, config, &config_path).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli, config: ClientConfig, config_path: &Path) -> ClientResult<()> {
    let overrides = CredentialOverrides::from(cli.credentials);

    let command = match cli.command {
        Command::Config { action } => {
            return match action {
                ConfigAction::Dump => commands::config::dump(&config, config_path),
                ConfigAction::Validate => commands::config::validate(&config, &overrides),
                ConfigAction::Path => commands::config::path(config_path),
            };
        }
        command => command,
    };

    let (google, source) = config.google_config(&overrides)?;
    let context = SessionContext::from_config(&google)?;
    let app = App::new(context, Printer::new(cli.json));
    restore_sessions(&app).await;

    let interrupt = app.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let dispatch = async {
        match command {
            Command::Auth { action } => match action {
                AuthAction::Signin { provider, force } => {
                    commands::auth::signin(
                        &app,
                        provider,
                        force,
                        &google.credentials,
                        source,
                        config_path,
                    )
                    .await
                }
                AuthAction::Signout { provider } => commands::auth::signout(&app, provider).await,
                AuthAction::Status => commands::auth::status(&app),
            },
            Command::Mail { action } => commands::mail::run(&app, action).await,
            Command::Drive { action } => commands::drive::run(&app, action).await,
            Command::Classroom { action } => commands::classroom::run(&app, action).await,
            Command::Calendar { action } => commands::calendar::run(&app, action).await,
            Command::Config { .. } => Ok(()),
        }
    };

    tokio::select! {
        result = dispatch => result,
        () = app.cancel.cancelled() => Err(ClientError::Interrupted),
    }
}

/// Brings back saved sessions; problems are logged, never fatal.
async fn restore_sessions(app: &App) {
    for (provider, outcome) in app.context.restore_all().await {
        match (outcome.data, outcome.error) {
            (Some(RestoreOutcome::Discarded(reason)), _) => {
                warn!(%provider, "saved session discarded: {reason}");
            }
            (Some(RestoreOutcome::Restored(user)), _) => {
                debug!(%provider, email = %user.email, "session restored");
            }
            (_, Some(error)) => warn!(%provider, "could not restore session: {error}"),
            _ => {}
        }
    }
}
