//! JSON document persistence
//!
//! Stores the document as a single pretty-printed JSON file. Writes are
//! atomic (write to a uniquely named temp file, sync, then rename) so the
//! file is never left partially written. Committing an absent document
//! deletes the file.
//!
//! All file I/O runs on Tokio's blocking pool. Saves may run concurrently, so
//! each one takes a ticket when it is issued and writes under a per-adapter
//! gate; a save that reaches the disk after a newer one has landed is skipped.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};
use tempfile::Builder;
use tracing::{debug, trace};

use vessel_core::{LoadOutcome, OperationError, OperationResult, Persistence, SaveOutcome};

/// Persistence adapter backed by one JSON file
///
/// Clones share the same write gate.
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
    gate: Arc<WriteGate>,
}

/// Orders writes to the document file
#[derive(Debug, Default)]
struct WriteGate {
    /// Last ticket handed out
    issued: AtomicU64,
    /// Ticket of the last write that reached the disk
    landed: Mutex<u64>,
}

impl JsonFilePersistence {
    /// Create an adapter for the file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            gate: Arc::default(),
        }
    }

    /// Location of the document file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Persistence<Value> for JsonFilePersistence {
    fn load(&self) -> BoxFuture<'static, LoadOutcome<Value>> {
        let path = self.path.clone();
        async move {
            tokio::task::spawn_blocking(move || read_document(&path))
                .await
                .context("Document load task failed")?
        }
        .boxed()
    }

    fn save(&self, value: Option<Value>) -> BoxFuture<'static, SaveOutcome> {
        let path = self.path.clone();
        let gate = Arc::clone(&self.gate);
        // Taken now, while saves are still being issued in commit order
        let ticket = gate.issued.fetch_add(1, Ordering::SeqCst) + 1;

        async move {
            let target = path.clone();
            let written = tokio::task::spawn_blocking(move || -> Result<Option<usize>> {
                let mut landed = gate.landed.lock().unwrap_or_else(PoisonError::into_inner);
                if *landed > ticket {
                    trace!(
                        "Skipping save {} of {:?}; save {} already landed",
                        ticket,
                        target,
                        *landed
                    );
                    return Ok(None);
                }

                let bytes = match value {
                    Some(document) => write_document(&target, &document)?,
                    None => remove_document(&target)?,
                };
                *landed = ticket;
                Ok(Some(bytes))
            })
            .await;

            let location = path.display().to_string();
            match written {
                Ok(Ok(Some(bytes))) => Ok(OperationResult::with_meta(json!({
                    "path": location,
                    "bytes": bytes,
                    "saved_at": Utc::now().to_rfc3339(),
                }))),
                Ok(Ok(None)) => Ok(OperationResult::with_meta(json!({
                    "path": location,
                    "superseded": true,
                }))),
                Ok(Err(e)) => {
                    Err(OperationError::new(format!("{:#}", e)).with_meta(json!({ "path": location })))
                }
                Err(e) => Err(OperationError::new(format!("Document save task failed: {}", e))
                    .with_meta(json!({ "path": location }))),
            }
        }
        .boxed()
    }
}

/// Read the document file
///
/// Returns `None` if the file doesn't exist.
fn read_document(path: &Path) -> Result<Option<Value>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read document from {:?}", path))
        }
    };

    let document = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse document {:?}", path))?;
    debug!("Read document from {:?}", path);
    Ok(Some(document))
}

/// Serialize and atomically write the document; returns the byte count
fn write_document(path: &Path, document: &Value) -> Result<usize> {
    let bytes = serde_json::to_vec_pretty(document).context("Failed to serialize document")?;
    atomic_write(path, &bytes)
        .with_context(|| format!("Failed to save document to {:?}", path))?;
    debug!("Wrote {} bytes to {:?}", bytes.len(), path);
    Ok(bytes.len())
}

/// Delete the document file if present
fn remove_document(path: &Path) -> Result<usize> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed document {:?}", path);
            Ok(0)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e).with_context(|| format!("Failed to remove document {:?}", path)),
    }
}

/// Write data atomically using a unique temp file + rename
fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    // Same directory, so the rename stays on one filesystem
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("Failed to create directory {:?}", dir))?;

    let mut file = Builder::new()
        .prefix(".vessel-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .with_context(|| format!("Failed to create temp file in {:?}", dir))?;
    file.write_all(data)
        .with_context(|| format!("Failed to write to temp file {:?}", file.path()))?;
    file.as_file()
        .sync_all()
        .with_context(|| format!("Failed to sync temp file {:?}", file.path()))?;

    file.persist(path)
        .with_context(|| format!("Failed to rename temp file to {:?}", path))?;

    Ok(())
}
