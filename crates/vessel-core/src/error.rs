//! Store error handling
//!
//! Validation problems (empty values, unknown patch keys) never become
//! errors: they are logged and the write is dropped. The errors here cover
//! construction, explicit loads and the initialization outcome.

use std::sync::Arc;

use thiserror::Error;

/// Errors surfaced by a [`Store`](crate::Store)
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// The load function ran but found nothing to restore
    #[error("No persisted data: the load function returned an empty value")]
    NoPersistedData,

    /// The load function itself failed
    #[error("Load failed: {0:#}")]
    Load(Arc<anyhow::Error>),

    /// `load()` was called on a store built without a load function
    #[error("No load function configured for this store")]
    LoadUnavailable,

    /// The initialization task went away before settling readiness
    #[error("Initialization ended before the readiness signal settled")]
    InitializationDropped,

    /// The store was built outside of a Tokio runtime
    #[error("A Tokio runtime is required to build a store: {0}")]
    NoRuntime(String),
}

impl StoreError {
    /// Wrap an error returned by a load function
    pub fn load(error: anyhow::Error) -> Self {
        StoreError::Load(Arc::new(error))
    }

    /// True when initialization failed only because nothing was stored yet
    ///
    /// Callers typically treat this as "first run" rather than a failure.
    pub fn is_no_data(&self) -> bool {
        matches!(self, StoreError::NoPersistedData)
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
