//! Config command handlers

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "document": config.document,
                    "log_file": config.log_file,
                    "store": {
                        "allow_undefined_data": config.store.allow_undefined_data,
                        "load_on_create": config.store.load_on_create
                    }
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.document_path().display());
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  data_dir:  {}", config.data_dir.display());
            println!("  document:  {}", config.document);
            println!(
                "  log_file:  {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Store:");
            println!(
                "  allow_undefined_data: {}",
                config.store.allow_undefined_data
            );
            println!("  load_on_create:       {}", config.store.load_on_create);
            println!();
            println!("Config file: {}", effective_path(config_path).display());
        }
    }

    Ok(())
}

/// Print the config file location
pub fn path(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let path = effective_path(config_path);

    if output.is_json() {
        println!(
            "{}",
            serde_json::json!({ "path": path, "exists": path.exists() })
        );
    } else {
        println!("{}", path.display());
    }

    Ok(())
}

fn effective_path(config_path: Option<&PathBuf>) -> PathBuf {
    config_path.cloned().unwrap_or_else(Config::config_file_path)
}
