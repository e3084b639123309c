//! DB4S country stats generator
//!
//! Reads the DB4S download log from PostgreSQL and writes the number of
//! active users per country and per day into a local SQLite database:
//! - Reporting window from the first to the last current release download
//! - One row per day and country with at least one download
//! - Output table recreated on every run

mod aggregate;
mod config;
mod db;
mod error;
mod pipeline;
mod source;
mod window;

use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Load .env file if present (before any other initialization)
    let _ = dotenvy::dotenv();

    // RUST_LOG overrides the default level.
    // Use LOG_FORMAT=gcp for structured GCP Cloud Logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "gcp" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let config = config::Config::load()?;
    info!("Configuration loaded");

    let summary = pipeline::execute(&config).await?;
    info!(
        "Done: {} days, {} rows, {} active users written to {}",
        summary.days,
        summary.rows,
        summary.users,
        config.output.path.display()
    );

    Ok(())
}
