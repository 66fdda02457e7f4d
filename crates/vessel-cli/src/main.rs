//! Vessel CLI
//!
//! Command-line interface for Vessel - a persisted, observable JSON document.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod json_file;
mod output;

use config::Config;
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "vessel")]
#[command(about = "Vessel - a persisted, observable JSON document")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the stored document
    Show,
    /// Replace the document with a JSON value
    Set {
        /// JSON value
        value: String,
    },
    /// Merge a JSON object into the document (existing keys only)
    Merge {
        /// JSON object
        patch: String,
    },
    /// Remove the stored document
    Clear,
    /// Show store and document status
    Status,
    /// Show configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_ref();

    // Config commands don't need the store
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), config_path, &output);
    }

    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    init_logging(&config, cli.verbose);

    let store = commands::open_store(&config).await?;

    match cli.command {
        Commands::Show => commands::document::show(&store, &output).await,
        Commands::Set { value } => commands::document::set(&store, &value, &output).await,
        Commands::Merge { patch } => commands::document::merge(&store, &patch, &output).await,
        Commands::Clear => commands::document::clear(&store, &output).await,
        Commands::Status => commands::status::show(&store, &config, &output),
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Path) => commands::config::path(config_path, output),
    }
}

/// Initialize logging
///
/// RUST_LOG takes precedence over the verbosity flag. Logs go to
/// `config.log_file` when set, stderr otherwise.
fn init_logging(config: &Config, verbose: u8) {
    let log_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("vessel_core={},vessel_cli={}", log_level, log_level))
    });

    let writer = match &config.log_file {
        Some(path) => match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => BoxMakeWriter::new(Mutex::new(file)),
            Err(e) => {
                eprintln!("Warning: Could not open log file {:?}: {}", path, e);
                BoxMakeWriter::new(std::io::stderr)
            }
        },
        None => BoxMakeWriter::new(std::io::stderr),
    };

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(config.log_file.is_none())
        .with_writer(writer)
        .try_init();
}
