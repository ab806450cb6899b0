//! diagscope CLI: inspect diagnostic bundles from the command line.

mod cli_logger;

use clap::{Parser, Subcommand};
use tracing_subscriber::prelude::*;

use std::path::PathBuf;
use std::process::ExitCode;

use cli_logger::CliLogger;
use diagscope::{Config, LogsCommand, ProfileCommand, Reporter};

#[derive(Debug, Parser)]
#[command(name = "diagscope")]
#[command(about = "Inspect diagnostic bundles: overview, configuration, logs and profiles")]
#[command(version)]
struct Cli {
    /// Emit machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// Disable ANSI colors in human output
    #[arg(long, global = true)]
    no_color: bool,

    /// Config file path (TOML)
    #[arg(long, global = true, default_value = "diagscope.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Version, agent state, components and profile availability
    Overview {
        #[arg(value_name = "BUNDLE")]
        bundle: PathBuf,
    },
    /// Configuration documents packed in the bundle
    Config {
        #[arg(value_name = "BUNDLE")]
        bundle: PathBuf,
        /// Case-insensitive term matched against file names and contents
        #[arg(long)]
        search: Option<String>,
        /// Render documents as YAML text
        #[arg(long)]
        raw: bool,
    },
    /// Query the bundle's NDJSON logs
    #[command(subcommand)]
    Logs(LogsCommand),
    /// Inspect pprof profiles
    #[command(subcommand)]
    Profile(ProfileCommand),
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::load_optional(&cli.config);
    let json = cli.json || config.reporter == Reporter::Json;
    let logger = CliLogger::new(json, cli.no_color);

    match run(&cli.command, &config, &logger) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            logger.print_error(&format!("{err:#}"));
            ExitCode::FAILURE
        }
    }
}

fn run(command: &Command, config: &Config, logger: &CliLogger) -> anyhow::Result<()> {
    match command {
        Command::Overview { bundle } => {
            let report = diagscope::overview_command(config, bundle)?;
            logger.print_overview(&report)
        }
        Command::Config {
            bundle,
            search,
            raw,
        } => {
            let out = diagscope::config_command(config, bundle, search.as_deref(), *raw)?;
            logger.print_serialized(&out)
        }
        Command::Logs(command) => {
            let out = diagscope::logs_command(config, command)?;
            logger.print_serialized(&out)
        }
        Command::Profile(command) => {
            let out = diagscope::profile_command(config, command)?;
            logger.print_serialized(&out)
        }
    }
}
