//! wgmesh binary entrypoint.

use std::io;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use wgmesh::{Cli, LogFormat, OutputFormat, ProvisioningDriver};

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_format) {
        eprintln!("error: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("wgmesh=info"),
    };
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer().with_writer(io::stderr)).try_init()?,
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(io::stderr))
            .try_init()?,
    }
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let format = OutputFormat::new(cli.format);
    let driver = ProvisioningDriver::new(cli.into_settings());
    let outcome = driver.run()?;

    let mut stdout = io::stdout().lock();
    format
        .write(&mut stdout, &outcome)
        .context("failed to print summary")?;
    Ok(())
}
