//! CLI entry point for the kumo graph analytics drivers.
//!
//! Parses command-line arguments with clap, executes the selected
//! analytic, renders the verification decision to stdout, and maps errors
//! to exit codes. Logging is initialized eagerly so subsequent operations
//! can emit structured diagnostics via `tracing`.

use std::io::{self, BufWriter, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use kumo_cli::{
    cli::{Cli, CliError, render_summary, run_cli},
    logging::{self, LoggingError},
};
use tracing::error;

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let summary = run_cli(&cli).context("failed to execute command")?;
    let stdout = io::stdout();
    let mut writer = BufWriter::new(stdout.lock());
    render_summary(&summary, &mut writer).context("failed to render summary")?;
    writer.flush().context("failed to flush output")?;
    if summary.verified {
        Ok(())
    } else {
        anyhow::bail!("{} output failed verification", summary.algorithm)
    }
}

fn main() -> ExitCode {
    if let Err(err) = logging::init_logging() {
        report_logging_init_error(&err);
        return ExitCode::FAILURE;
    }

    if let Err(err) = try_main() {
        // Surface the structured error code when a CliError is in the chain.
        let code = err.chain().find_map(|cause| {
            let cause: &(dyn std::error::Error + 'static) = cause;
            cause.downcast_ref::<CliError>().map(|cli_error| match cli_error {
                CliError::Core(core) => core.code().as_str(),
                CliError::Io { .. } => "IO_ERROR",
                CliError::Parse { .. } => "PARSE_ERROR",
                CliError::MissingWeights { .. } => "MISSING_WEIGHTS",
            })
        });

        error!(error = %err, code = ?code, "command execution failed");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Emit a fallback diagnostic to stderr when tracing initialization fails.
fn report_logging_init_error(err: &LoggingError) {
    eprintln!("failed to initialize logging: {err}");
}
