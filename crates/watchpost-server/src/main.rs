//! Watchpost server binary

use clap::Parser;

use watchpost_server::{app, cli, config::Config, logging};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::Cli::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::load()?,
    };

    logging::init(&config.logging);
    tracing::info!(
        execution_environment = config.engine.execution_environment,
        "Watchpost starting"
    );

    // Registration-time validation happens here; configuration defects
    // abort with the full aggregated report.
    let engine = app::build_engine(&config)?;

    cli::run(args.command, engine, &config).await
}
