use std::fs::OpenOptions;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Mutex;

use chrono::{Local, Utc};
use clap::Parser;
use kindle_sync::{Cli, RunOutcome, Syncer};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Logs to stderr and, when it can be opened, appends to the log file.
fn init_tracing(log_file: &Path) {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file = OpenOptions::new().create(true).append(true).open(log_file);
    let file_layer = file.as_ref().ok().and_then(|f| f.try_clone().ok()).map(|f| {
        fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(f))
            .with_filter(filter())
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_filter(filter()))
        .with(file_layer)
        .init();

    if let Err(e) = file {
        warn!("Could not open log file {:?}: {}", log_file, e);
    }
}

fn main() -> ExitCode {
    let config = Cli::parse().into_config();
    init_tracing(&config.log_file);

    info!("Kindle highlight sync started");

    let result = Syncer::new(config).and_then(|syncer| {
        let now = Utc::now();
        syncer.run(now, now.with_timezone(&Local).date_naive())
    });

    match result {
        Ok(RunOutcome::LockHeld(_)) => ExitCode::SUCCESS,
        Ok(RunOutcome::Completed(summary)) if summary.has_failures() => {
            for failure in &summary.failures {
                error!("Not synced: {} ({:?}): {}", failure.title, failure.path, failure.error);
            }
            ExitCode::from(2)
        }
        Ok(RunOutcome::Completed(_)) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Sync aborted: {}", e);
            ExitCode::FAILURE
        }
    }
}
