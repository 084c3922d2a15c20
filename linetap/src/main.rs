mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use linetap_core::conf::{CaptureSettings, SettingsFile};
use linetap_core::logging::init_logging;
use linetap_core::service::{self, ShutdownReason};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    match run(cli) {
        Ok(ShutdownReason::SourceFailed) => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("linetap failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ShutdownReason> {
    let base = match &cli.config {
        Some(path) => SettingsFile::load(path)?,
        None => SettingsFile::default(),
    };
    let settings = CaptureSettings::try_from(base.overlay(cli.settings_layer()))
        .context("invalid settings")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("linetap-rt")
        .build()
        .context("failed to build the async runtime")?;

    runtime.block_on(service::run(settings))
}
