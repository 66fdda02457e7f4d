//! Command handlers

pub mod config;
pub mod document;
pub mod status;

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use vessel_core::{SaveReport, Store, StoreError};

use crate::config::Config;
use crate::json_file::JsonFilePersistence;

/// How long a write command waits for its save to settle
const SAVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Open the document store described by `config` and wait until it is ready
///
/// A missing document is not an error; a document that can't be read is.
pub async fn open_store(config: &Config) -> Result<Store<Value>> {
    let adapter = JsonFilePersistence::new(config.document_path());
    debug!("Opening document {:?}", adapter.path());
    let store = Store::builder()
        .options(config.store)
        .persistence(adapter)
        .build()
        .context("Failed to create document store")?;

    match store.initialized().await {
        Ok(_) => debug!("Document store ready"),
        Err(StoreError::NoPersistedData) => debug!("No document stored yet"),
        Err(e) => {
            return Err(e).with_context(|| {
                format!("Failed to load document {:?}", config.document_path())
            })
        }
    }

    Ok(store)
}

/// Apply `write` to the store and wait for the save it triggers
///
/// `write` returns the revision it committed. Fails if the write was dropped
/// and nothing was committed.
pub async fn write_and_confirm<F>(store: &Store<Value>, write: F) -> Result<SaveReport>
where
    F: FnOnce(&Store<Value>) -> Option<u64>,
{
    let mut reports = store.subscribe_saves();

    let Some(revision) = write(store) else {
        bail!(
            "Nothing was written: the value was empty or there was no document to merge into \
             (set store.allow_undefined_data = true to store empty values)"
        );
    };
    debug!("Waiting for save of revision {}", revision);

    let wait = async {
        loop {
            match reports.recv().await {
                Ok(report) if report.revision == revision => return Ok(report),
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => bail!("Save channel closed"),
            }
        }
    };

    tokio::time::timeout(SAVE_TIMEOUT, wait)
        .await
        .context("Timed out waiting for the document to be saved")?
}
