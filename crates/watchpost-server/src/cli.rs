//! CLI argument parsing and command implementations.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use watchpost::{CheckKind, Engine, PollOptions};

use crate::config::Config;
use crate::http::{self, AppState};
use crate::metrics::ServerMetrics;
use crate::telemetry;

/// Command-line arguments for `watchpost`.
#[derive(Debug, Parser)]
#[command(
    name = "watchpost",
    version,
    about = "Turn check functions into a Checkmk agent feed.",
    long_about = None
)]
pub struct Cli {
    /// Path to the config file (YAML). Default: standard search paths.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print each registered check and its parameters.
    ListChecks,

    /// Run one full poll and print a result table.
    RunChecks(RunChecksArgs),

    /// Run registration-time validation only.
    VerifyCheckConfiguration,

    /// Print the resolved piggyback hostname for every (check, environment).
    GetCheckHostnames,

    /// Serve the agent feed over HTTP.
    Serve,
}

#[derive(Debug, Args)]
pub struct RunChecksArgs {
    /// Use cached results where available (the default).
    #[arg(long, overrides_with = "no_cache")]
    pub cache: bool,

    /// Ignore the cache for this poll.
    #[arg(long)]
    pub no_cache: bool,

    /// Only run checks whose id starts with this prefix.
    #[arg(long, value_name = "S")]
    pub filter_prefix: Option<String>,

    /// Only run checks whose id contains this substring.
    #[arg(long, value_name = "S")]
    pub filter_contains: Option<String>,

    /// Only run synchronous checks.
    #[arg(long = "sync", conflicts_with = "async_only")]
    pub sync_only: bool,

    /// Only run asynchronous checks.
    #[arg(long = "async", conflicts_with = "sync_only")]
    pub async_only: bool,
}

impl RunChecksArgs {
    fn poll_options(&self) -> PollOptions {
        PollOptions {
            use_cache: !self.no_cache,
            filter_prefix: self.filter_prefix.clone(),
            filter_contains: self.filter_contains.clone(),
            kind: if self.sync_only {
                Some(CheckKind::Sync)
            } else if self.async_only {
                Some(CheckKind::Async)
            } else {
                None
            },
        }
    }
}

/// Dispatch one parsed command against a validated engine.
pub async fn run(
    command: Command,
    engine: Engine,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::ListChecks => {
            for check in engine.checks().iter() {
                println!("{}", check.signature_line());
            }
            engine.shutdown(false).await;
        }
        Command::RunChecks(args) => {
            let results = engine.poll_with(&args.poll_options()).await;
            print_result_table(&results);
            engine.shutdown(true).await;
        }
        Command::VerifyCheckConfiguration => {
            // Building the engine already ran every registration-time
            // validation; arriving here means the configuration is sound.
            println!(
                "configuration OK: {} check(s), {} environment(s)",
                engine.checks().len(),
                engine.environments().len()
            );
            engine.shutdown(false).await;
        }
        Command::GetCheckHostnames => {
            for (check, environment, hostname) in engine.resolved_hostnames() {
                println!("{check} [{environment}] -> {hostname}");
            }
            engine.shutdown(false).await;
        }
        Command::Serve => {
            let _telemetry = telemetry::init_telemetry(&config.telemetry).await?;
            let state = AppState {
                engine: Arc::new(engine),
                metrics: Arc::new(ServerMetrics::new()),
            };
            http::serve(state, &config.server.listen).await?;
        }
    }
    Ok(())
}

fn print_result_table(results: &[watchpost::ExecutionResult]) {
    let headers = ["State", "Environment", "Service", "Summary"];
    let rows: Vec<[String; 4]> = results
        .iter()
        .map(|r| {
            [
                r.state.to_string(),
                r.environment.clone(),
                r.service_name.clone(),
                r.summary.clone(),
            ]
        })
        .collect();

    let mut widths = headers.map(str::len);
    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(cell.len());
        }
    }

    let print_row = |cells: [&str; 4]| {
        println!(
            "{:<w0$}  {:<w1$}  {:<w2$}  {:<w3$}",
            cells[0],
            cells[1],
            cells[2],
            cells[3],
            w0 = widths[0],
            w1 = widths[1],
            w2 = widths[2],
            w3 = widths[3],
        );
    };

    print_row(headers);
    for row in &rows {
        print_row([
            row[0].as_str(),
            row[1].as_str(),
            row[2].as_str(),
            row[3].as_str(),
        ]);
    }
}
