use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use clical::app;
use clical::cli::{Cli, Commands};
use clical::clock::ClockError;
use clical::config::{ClicalConfig, DataHome};
use clical::util::{format_timestamp, setup_tracing};

const EXIT_FAILURE: u8 = 1;
/// The credential was rejected mid clock-out and the session was discarded.
const EXIT_CREDENTIAL_RESET: u8 = 2;

fn main() -> ExitCode {
    setup_tracing();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::from(EXIT_FAILURE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            report(&err);
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn run(cli: Cli) -> Result<u8> {
    let home = DataHome::resolve();
    let config = ClicalConfig::load_or_init(&home)?;

    match cli.command {
        Commands::ClockIn => {
            app::clock_in(&home, &config, cli.summary.as_deref())?;
            Ok(0)
        }
        Commands::ClockOut => {
            app::clock_out(&home, &config)?;
            Ok(0)
        }
        Commands::Status => {
            app::print_status(&home, &config)?;
            Ok(0)
        }
        Commands::Upcoming { max } => {
            app::upcoming(&home, &config, max)?;
            Ok(0)
        }
        Commands::Doctor => app::doctor(&home, &config),
    }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<ClockError>() {
        Some(ClockError::CredentialExpired { .. }) => EXIT_CREDENTIAL_RESET,
        _ => EXIT_FAILURE,
    }
}

fn report(err: &anyhow::Error) {
    match err.downcast_ref::<ClockError>() {
        Some(ClockError::CredentialExpired { session, detail }) => {
            eprintln!(
                "\nWARNING: Failed to create an event on Google Calendar:\
                 \n\t*Your Google OAuth token has expired or was revoked ({detail}).*\
                 \n\tClock in again to restart the authorization process.\
                 \n\tYour last clock-in was erased, but here it is for your records:\
                 \n\t\t{} ({})\
                 \n\t\tsummary: {}",
                format_timestamp(session.started_at),
                session.started_at_rfc3339(),
                session.summary
            );
        }
        Some(ClockError::AlreadyActive { started_at, summary }) => {
            eprintln!(
                "Already clocked in since {} ({summary}). Clock out first.",
                format_timestamp(*started_at)
            );
        }
        _ => eprintln!("clical error: {err:#}"),
    }
}
