//! Status command handler

use anyhow::Result;
use serde_json::Value;

use vessel_core::{LifecycleState, Store};

use crate::config::Config;
use crate::output::{Output, OutputFormat};

/// Show status information
pub fn show(store: &Store<Value>, config: &Config, output: &Output) -> Result<()> {
    let path = config.document_path();
    let exists = path.exists();
    let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    let lifecycle = lifecycle_label(store.lifecycle());
    let options = store.options();

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "lifecycle": lifecycle,
                    "version": store.version(),
                    "document": {
                        "path": path,
                        "exists": exists,
                        "size": size
                    },
                    "store": {
                        "allow_undefined_data": options.allow_undefined_data,
                        "load_on_create": options.load_on_create
                    }
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", lifecycle);
        }
        OutputFormat::Human => {
            println!("Vessel Status");
            println!("=============");
            println!();
            println!("Store:");
            println!("  Lifecycle: {}", lifecycle);
            println!("  Version:   {}", store.version());
            println!("  Allow undefined data: {}", options.allow_undefined_data);
            println!("  Load on create:       {}", options.load_on_create);
            println!();
            println!("Document:");
            println!("  Location: {}", path.display());
            if exists {
                println!("  Size:     {} bytes", size);
            } else {
                println!("  (not stored)");
            }
        }
    }

    Ok(())
}

fn lifecycle_label(state: LifecycleState) -> &'static str {
    match state {
        LifecycleState::NotStarted => "not-started",
        LifecycleState::Loading => "loading",
        LifecycleState::Ready => "ready",
        LifecycleState::Failed => "failed",
    }
}
