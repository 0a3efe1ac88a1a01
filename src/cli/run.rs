//! CLI entry point and dispatch logic
//!
//! This module owns the `run()` function which:
//! - Parses CLI arguments
//! - Builds CliArgs and discovers Config
//! - Creates the tokio runtime
//! - Dispatches to command handlers
//! - Handles all error output

use clap::Parser;

use super::args::{Cli, Commands};
use super::commands;

use crate::{AblationStore, AblatorError, CliArgs, Config, ExitCode};
use ablator_utils::error::{
    ConfigError, DefinitionError, SessionError, SnapshotError, StoreError,
};
use ablator_utils::logging::init_tracing;

/// Recover a typed error from an `anyhow` chain so it can be reported with
/// context, suggestions and a specific exit code.
pub(crate) fn into_ablator_error(err: anyhow::Error) -> Result<AblatorError, anyhow::Error> {
    let err = match err.downcast::<AblatorError>() {
        Ok(e) => return Ok(e),
        Err(err) => err,
    };
    let err = match err.downcast::<DefinitionError>() {
        Ok(e) => return Ok(e.into()),
        Err(err) => err,
    };
    let err = match err.downcast::<StoreError>() {
        Ok(e) => return Ok(e.into()),
        Err(err) => err,
    };
    let err = match err.downcast::<ConfigError>() {
        Ok(e) => return Ok(e.into()),
        Err(err) => err,
    };
    let err = match err.downcast::<SessionError>() {
        Ok(e) => return Ok(e.into()),
        Err(err) => err,
    };
    err.downcast::<SnapshotError>().map(AblatorError::from)
}

/// Print `err` for the user and pick the exit code.
fn report_error(err: anyhow::Error, operation: &str) -> ExitCode {
    match into_ablator_error(err) {
        Ok(err) => {
            eprintln!("{}", err.display_for_user());
            err.to_exit_code()
        }
        Err(err) => {
            eprintln!("✗ {operation} failed: {err:#}");
            ExitCode::INTERNAL
        }
    }
}

/// Main CLI execution function.
///
/// This function handles ALL output including errors. On error it prints the
/// report and returns the exit code; main.rs only calls
/// `std::process::exit(code.as_i32())`.
pub fn run() -> Result<(), ExitCode> {
    let cli = Cli::parse();

    let cli_args = CliArgs {
        config_path: cli.config.clone(),
        home: cli.home.clone(),
        outputs_dir: cli.outputs_dir.clone(),
        tool_timeout_secs: cli.tool_timeout,
        verbose: cli.verbose.then_some(true),
    };

    let config = match Config::discover(&cli_args) {
        Ok(config) => config,
        Err(err) => return Err(report_error(err, "config")),
    };

    if let Err(e) = init_tracing(config.verbose()) {
        eprintln!("Warning: failed to initialize logging: {e}");
    }
    for (key, (value, source)) in config.effective_config() {
        tracing::debug!(%key, %value, %source, "Effective config");
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("✗ Failed to create async runtime: {e}");
            return Err(ExitCode::INTERNAL);
        }
    };

    let operation = cli.command.operation();
    let store = AblationStore::new(config.ablations_dir());

    let result = rt.block_on(async {
        match cli.command {
            Commands::List { json } => commands::execute_list_command(&store, json),
            Commands::Show { name, json } => commands::execute_show_command(&store, &name, json),
            Commands::Import { file, force } => {
                commands::execute_import_command(&store, &file, force)
            }
            Commands::Validate { target } => commands::execute_validate_command(&store, &target),
            Commands::Delete { name } => commands::execute_delete_command(&store, &name),
            Commands::Run {
                name,
                args,
                dry_run,
                json,
            } => commands::execute_run_command(&config, &store, &name, args, dry_run, json).await,
            Commands::Runs { name, json } => commands::execute_runs_command(&store, &name, json),
            Commands::Totals { name, json } => {
                commands::execute_totals_command(&store, &name, json)
            }
        }
    });

    match result {
        Ok(code) if code == ExitCode::SUCCESS => Ok(()),
        Ok(code) => Err(code),
        Err(err) => Err(report_error(err, operation)),
    }
}
