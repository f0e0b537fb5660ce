use anyhow::{Context, Result};
use clap::Parser;
use clap::error::ErrorKind;
use ffton_core::{Config, Role, SessionError, SessionReport, run_session};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Args, Invocation};

const EXIT_USAGE: u8 = 1;
const EXIT_SENDER_CONNECT: u8 = 5;
const EXIT_FRAMING: u8 = 6;
const EXIT_ENDED_EARLY: u8 = 7;
const EXIT_RECEIVER_CONNECT: u8 = 8;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(EXIT_USAGE);
        }
    };

    // Load environment variables from .env file (RUST_LOG, FFTON_CONFIG)
    let _ = dotenvy::dotenv();
    init_logging(args.verbose);

    let invocation = match args.validate() {
        Ok(invocation) => invocation,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(e.exit_code());
        }
    };

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let role = invocation.role;
    let result = run(invocation, &config).await;
    ExitCode::from(exit_code(role, &result))
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load_or_default().context("Failed to load config")?,
    };
    if args.checksum {
        config.transfer.verify_checksum = true;
    }
    Ok(config)
}

async fn run(invocation: Invocation, config: &Config) -> Result<SessionReport, SessionError> {
    let report = run_session(
        invocation.role,
        invocation.my_port,
        &invocation.peer,
        &invocation.files,
        config,
    )
    .await?;

    for skipped in &report.skipped {
        info!("Skipped '{}'", skipped.path.display());
    }
    Ok(report)
}

fn exit_code(role: Role, result: &Result<SessionReport, SessionError>) -> u8 {
    match result {
        Ok(report) if report.is_complete() => 0,
        Ok(_) => EXIT_ENDED_EARLY,
        Err(SessionError::Connect { .. }) => match role {
            Role::Sender => EXIT_SENDER_CONNECT,
            Role::Receiver => EXIT_RECEIVER_CONNECT,
        },
        Err(SessionError::Transfer(e)) if e.is_framing() => EXIT_FRAMING,
        Err(SessionError::Transfer(_)) | Err(SessionError::Close(_)) => EXIT_ENDED_EARLY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffton_core::transfer::{AbortedFile, TransferError};
    use ffton_core::transport::ConnectionError;
    use std::io;
    use std::path::PathBuf;

    fn connect_error() -> SessionError {
        SessionError::Connect {
            message: "Address translation failed".to_string(),
            source: ConnectionError::PeerFinished,
        }
    }

    #[test]
    fn test_connect_failure_depends_on_role() {
        assert_eq!(exit_code(Role::Sender, &Err(connect_error())), 5);
        assert_eq!(exit_code(Role::Receiver, &Err(connect_error())), 8);
    }

    #[test]
    fn test_framing_and_early_end() {
        let framing = Err(SessionError::Transfer(TransferError::Framing(
            ConnectionError::PeerFinished,
        )));
        assert_eq!(exit_code(Role::Receiver, &framing), 6);

        let negative = Err(SessionError::Transfer(TransferError::InvalidPrefix(-5)));
        assert_eq!(exit_code(Role::Receiver, &negative), 6);

        let create = Err(SessionError::Transfer(TransferError::DestinationCreate {
            path: PathBuf::from("/nope/out"),
            source: io::Error::from(io::ErrorKind::NotFound),
        }));
        assert_eq!(exit_code(Role::Receiver, &create), 7);

        let aborted = Ok(SessionReport {
            aborted: Some(AbortedFile {
                path: PathBuf::from("a"),
                error: TransferError::Body {
                    path: PathBuf::from("a"),
                    source: ConnectionError::PeerFinished,
                },
            }),
            ..SessionReport::default()
        });
        assert_eq!(exit_code(Role::Sender, &aborted), 7);
    }

    #[test]
    fn test_unconfirmed_delivery_ends_early() {
        let unconfirmed = Err(SessionError::Close(ConnectionError::StoppedEarly(0)));
        assert_eq!(exit_code(Role::Sender, &unconfirmed), 7);
    }

    #[test]
    fn test_success_even_with_skips() {
        assert_eq!(exit_code(Role::Sender, &Ok(SessionReport::default())), 0);
    }
}
