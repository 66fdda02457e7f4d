//! Persistence adapter boundary
//!
//! A store persists through two independent async functions supplied by the
//! caller:
//!
//! - [`LoadFn`]: fetch the stored value, `Ok(None)` when nothing is stored
//! - [`SaveFn`]: write a committed value, resolving to an [`OperationResult`]
//!   or an [`OperationError`]
//!
//! The store calls save after every commit and never awaits or inspects the
//! outcome on the write path. Callers that need confirmation listen for
//! [`SaveReport`]s via [`Store::subscribe_saves`](crate::Store::subscribe_saves)
//! or wrap their save function.
//!
//! Save functions are called in commit order, right after each commit has
//! reached its subscribers, even though the returned futures may complete in
//! any order.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Successful save
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    /// Adapter-specific details (location, size, timestamps, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl OperationResult {
    /// Result carrying adapter metadata
    pub fn with_meta(meta: Value) -> Self {
        Self { meta: Some(meta) }
    }
}

/// Failed save
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{msg}")]
pub struct OperationError {
    /// Human-readable description
    pub msg: String,
    /// Adapter-specific details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl OperationError {
    /// Error with a message and no metadata
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            meta: None,
        }
    }

    /// Attach adapter metadata
    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Outcome of one save call
pub type SaveOutcome = Result<OperationResult, OperationError>;

/// Outcome of one load call
pub type LoadOutcome<T> = anyhow::Result<Option<T>>;

/// Save function: receives the post-commit value (`None` when an absent
/// value was committed)
pub type SaveFn<T> = Arc<dyn Fn(Option<T>) -> BoxFuture<'static, SaveOutcome> + Send + Sync>;

/// Load function
pub type LoadFn<T> = Arc<dyn Fn() -> BoxFuture<'static, LoadOutcome<T>> + Send + Sync>;

/// Box a closure returning a future into a [`SaveFn`]
pub fn save_fn<T, F, Fut>(f: F) -> SaveFn<T>
where
    F: Fn(Option<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SaveOutcome> + Send + 'static,
{
    Arc::new(move |value| f(value).boxed())
}

/// Box a closure returning a future into a [`LoadFn`]
pub fn load_fn<T, F, Fut>(f: F) -> LoadFn<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = LoadOutcome<T>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// Load and save bundled in one adapter
pub trait Persistence<T>: Send + Sync + 'static {
    /// Fetch the stored value
    fn load(&self) -> BoxFuture<'static, LoadOutcome<T>>;

    /// Store a committed value
    fn save(&self, value: Option<T>) -> BoxFuture<'static, SaveOutcome>;
}

/// Split an adapter into the two functions a store takes
pub(crate) fn split<T, P>(adapter: P) -> (LoadFn<T>, SaveFn<T>)
where
    P: Persistence<T>,
{
    let adapter = Arc::new(adapter);
    let loader = Arc::clone(&adapter);
    let load: LoadFn<T> = Arc::new(move || loader.load());
    let save: SaveFn<T> = Arc::new(move |value| adapter.save(value));
    (load, save)
}

/// Outcome of a background save, published after the save future settles
#[derive(Debug, Clone, PartialEq)]
pub struct SaveReport {
    /// Store version produced by the commit that triggered the save
    pub revision: u64,
    /// What the save function resolved to
    pub outcome: SaveOutcome,
}

impl SaveReport {
    /// True if the save succeeded
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

struct InMemoryState<T> {
    stored: Option<T>,
    saves: Vec<Option<T>>,
    loads: usize,
    failure: Option<OperationError>,
}

/// Adapter keeping the value in memory
///
/// Clones share the same storage, so a test can hand one clone to the store
/// and inspect the other. Every save is recorded at call time.
pub struct InMemoryPersistence<T> {
    state: Arc<Mutex<InMemoryState<T>>>,
}

impl<T> Clone for InMemoryPersistence<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Clone + Send + 'static> InMemoryPersistence<T> {
    /// Adapter with nothing stored
    pub fn new() -> Self {
        Self::from_stored(None)
    }

    /// Adapter that already holds `value`
    pub fn with_value(value: T) -> Self {
        Self::from_stored(Some(value))
    }

    fn from_stored(stored: Option<T>) -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryState {
                stored,
                saves: Vec::new(),
                loads: 0,
                failure: None,
            })),
        }
    }

    /// Make every following save fail with `error` (the value is still
    /// recorded in [`saves`](Self::saves) but not stored)
    pub fn fail_saves_with(&self, error: OperationError) {
        self.lock().failure = Some(error);
    }

    /// Currently stored value
    pub fn stored(&self) -> Option<T> {
        self.lock().stored.clone()
    }

    /// Every value passed to save, in call order
    pub fn saves(&self) -> Vec<Option<T>> {
        self.lock().saves.clone()
    }

    /// Number of load calls
    pub fn load_count(&self) -> usize {
        self.lock().loads
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InMemoryState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone + Send + 'static> Default for InMemoryPersistence<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> Persistence<T> for InMemoryPersistence<T> {
    fn load(&self) -> BoxFuture<'static, LoadOutcome<T>> {
        let stored = {
            let mut state = self.lock();
            state.loads += 1;
            state.stored.clone()
        };
        async move { Ok(stored) }.boxed()
    }

    fn save(&self, value: Option<T>) -> BoxFuture<'static, SaveOutcome> {
        let outcome = {
            let mut state = self.lock();
            state.saves.push(value.clone());
            match state.failure.clone() {
                Some(error) => Err(error),
                None => {
                    state.stored = value;
                    Ok(OperationResult::default())
                }
            }
        };
        async move { outcome }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let adapter = InMemoryPersistence::<serde_json::Value>::new();
        assert_eq!(adapter.load().await.unwrap(), None);

        adapter.save(Some(json!({"a": 1}))).await.unwrap();
        assert_eq!(adapter.load().await.unwrap(), Some(json!({"a": 1})));
        assert_eq!(adapter.load_count(), 2);
    }

    #[tokio::test]
    async fn test_in_memory_records_at_call_time() {
        let adapter = InMemoryPersistence::new();

        // Futures are not polled yet
        let first = adapter.save(Some(1));
        let second = adapter.save(Some(2));
        assert_eq!(adapter.saves(), vec![Some(1), Some(2)]);

        second.await.unwrap();
        first.await.unwrap();
        assert_eq!(adapter.stored(), Some(2));
    }

    #[tokio::test]
    async fn test_in_memory_failure() {
        let adapter = InMemoryPersistence::with_value(1);
        adapter.fail_saves_with(OperationError::new("quota exceeded"));

        let err = adapter.save(Some(2)).await.unwrap_err();
        assert_eq!(err.msg, "quota exceeded");
        assert_eq!(adapter.stored(), Some(1));
        assert_eq!(adapter.saves(), vec![Some(2)]);
    }

    #[tokio::test]
    async fn test_split_shares_adapter() {
        let adapter = InMemoryPersistence::with_value("seed".to_string());
        let (load, save) = split(adapter.clone());

        save(Some("next".to_string())).await.unwrap();
        assert_eq!(load().await.unwrap(), Some("next".to_string()));
        assert_eq!(adapter.load_count(), 1);
    }

    #[tokio::test]
    async fn test_closure_helpers() {
        let save = save_fn(|value: Option<i32>| async move {
            match value {
                Some(v) if v < 0 => Err(OperationError::new("negative")),
                _ => Ok(OperationResult::with_meta(json!({"ok": true}))),
            }
        });
        let load = load_fn(|| async { anyhow::Ok(Some(5)) });

        assert!(save(Some(-1)).await.is_err());
        let result = save(Some(1)).await.unwrap();
        assert_eq!(result.meta, Some(json!({"ok": true})));
        assert_eq!(load().await.unwrap(), Some(5));
    }

    #[test]
    fn test_operation_error_display_and_serde() {
        let err = OperationError::new("write refused").with_meta(json!({"code": 409}));
        assert_eq!(err.to_string(), "write refused");

        let encoded = serde_json::to_value(&err).unwrap();
        assert_eq!(encoded, json!({"msg": "write refused", "meta": {"code": 409}}));

        let plain = serde_json::to_value(OperationResult::default()).unwrap();
        assert_eq!(plain, json!({}));
    }
}
