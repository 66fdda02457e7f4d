//! Initialization lifecycle
//!
//! ```text
//! NotStarted ── load configured ──> Loading ──┬─> Ready   (value committed)
//!      │                                      └─> Failed  (no data / load error)
//!      └──────── otherwise ─────────────────────> Ready   (placeholder, nothing committed)
//! ```
//!
//! The readiness signal settles exactly once. Awaiting it after it settled
//! returns the settled outcome again; initialization is never re-run.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::model::Model;
use crate::observable::Observable;
use crate::persistence::LoadOutcome;
use crate::store::Store;

/// Callback fired when initialization settles
pub type InitializedFn<T> = Arc<dyn Fn(Option<&T>) + Send + Sync>;

/// Where a store is in its initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Built, initialization not yet decided
    NotStarted,
    /// Waiting for the initial load
    Loading,
    /// Readiness resolved
    Ready,
    /// Readiness rejected
    Failed,
}

impl LifecycleState {
    /// True once readiness has resolved or rejected
    pub fn is_settled(&self) -> bool {
        matches!(self, LifecycleState::Ready | LifecycleState::Failed)
    }
}

/// State and one-shot readiness slot
pub(crate) struct Lifecycle<T> {
    state: watch::Sender<LifecycleState>,
    readiness: watch::Sender<Option<StoreResult<T>>>,
}

impl<T: Clone> Lifecycle<T> {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(LifecycleState::NotStarted);
        let (readiness, _) = watch::channel(None);
        Self { state, readiness }
    }

    fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    fn enter(&self, state: LifecycleState) {
        self.state.send_replace(state);
    }

    /// Fill the readiness slot; returns false if it was already settled
    fn settle(&self, outcome: StoreResult<T>) -> bool {
        let state = if outcome.is_ok() {
            LifecycleState::Ready
        } else {
            LifecycleState::Failed
        };

        let settled = self.readiness.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        });
        if settled {
            self.enter(state);
        }
        settled
    }

    async fn wait(&self) -> StoreResult<T> {
        let mut rx = self.readiness.subscribe();
        let settled = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| StoreError::InitializationDropped)?;
        settled
            .clone()
            .unwrap_or(Err(StoreError::InitializationDropped))
    }
}

impl<T: Model, O: Observable<T>> Store<T, O> {
    /// Await the readiness signal
    ///
    /// Resolves to the loaded value, or to `T::default()` when no load was
    /// configured (that placeholder is not committed). Rejects with
    /// [`StoreError::NoPersistedData`] when the load found nothing and with
    /// [`StoreError::Load`] when the load function failed.
    pub async fn initialized(&self) -> StoreResult<T> {
        self.shared.lifecycle.wait().await
    }

    /// Current lifecycle state
    pub fn lifecycle(&self) -> LifecycleState {
        self.shared.lifecycle.state()
    }

    /// Watch lifecycle transitions
    pub fn watch_lifecycle(&self) -> watch::Receiver<LifecycleState> {
        self.shared.lifecycle.state.subscribe()
    }

    /// Kick off initialization; called once by the builder
    pub(crate) fn start(&self) {
        let shared = &self.shared;
        let load = match (&shared.load, shared.options.load_on_create) {
            (Some(load), true) => load,
            _ => {
                debug!("Skipping initial load");
                shared.lifecycle.settle(Ok(T::default()));
                self.notify_initialized(None);
                return;
            }
        };

        shared.lifecycle.enter(LifecycleState::Loading);
        debug!("Loading initial value");

        // A load function can panic before handing back its future
        let pending = match panic::catch_unwind(AssertUnwindSafe(|| load())) {
            Ok(future) => AssertUnwindSafe(future).catch_unwind(),
            Err(_) => {
                warn!("Initial load failed: load function panicked");
                let err = anyhow::anyhow!("load function panicked");
                shared.lifecycle.settle(Err(StoreError::load(err)));
                self.notify_initialized(None);
                return;
            }
        };
        let store = self.clone();
        shared.runtime.spawn(async move {
            let outcome = pending
                .await
                .unwrap_or_else(|_| Err(anyhow::anyhow!("load function panicked")));
            store.finish_initial_load(outcome);
        });
    }

    fn finish_initial_load(&self, outcome: LoadOutcome<T>) {
        let result = match outcome {
            Ok(Some(value)) if !value.is_empty() => {
                self.shared.observable.set(Some(value.clone()), None);
                debug!("Initial value loaded");
                Ok(value)
            }
            Ok(_) => {
                debug!("Initial load found no data");
                Err(StoreError::NoPersistedData)
            }
            Err(e) => {
                warn!("Initial load failed: {:#}", e);
                Err(StoreError::load(e))
            }
        };

        let loaded = result.as_ref().ok().cloned();
        self.shared.lifecycle.settle(result);
        self.notify_initialized(loaded.as_ref());
    }

    fn notify_initialized(&self, value: Option<&T>) {
        if let Some(callback) = &self.shared.on_initialized {
            callback(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryPersistence;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_load_populated_value_resolves_and_commits() {
        let adapter = InMemoryPersistence::with_value(json!({"a": 1}));
        let store = Store::builder().persistence(adapter.clone()).build().unwrap();
        assert_eq!(store.lifecycle(), LifecycleState::Loading);

        let ready = store.initialized().await.unwrap();

        assert_eq!(ready, json!({"a": 1}));
        assert_eq!(store.get().await, Some(json!({"a": 1})));
        assert_eq!(store.lifecycle(), LifecycleState::Ready);
        // Loaded values are not written back
        assert!(adapter.saves().is_empty());
    }

    #[tokio::test]
    async fn test_load_absent_rejects_without_commit() {
        let adapter = InMemoryPersistence::<Value>::new();
        let store = Store::builder().persistence(adapter).build().unwrap();

        let err = store.initialized().await.unwrap_err();

        assert!(err.is_no_data());
        assert_eq!(store.get().await, None);
        assert_eq!(store.version(), 0);
        assert_eq!(store.lifecycle(), LifecycleState::Failed);
    }

    #[tokio::test]
    async fn test_load_empty_value_rejects() {
        let store = Store::builder()
            .load_with(|| async { anyhow::Ok(Some(Value::Null)) })
            .build()
            .unwrap();

        assert!(store.initialized().await.unwrap_err().is_no_data());
        assert_eq!(store.get().await, None);
    }

    #[tokio::test]
    async fn test_load_error_rejects() {
        let store = Store::<Value>::builder()
            .load_with(|| async { Err(anyhow::anyhow!("permission denied")) })
            .build()
            .unwrap();

        let err = store.initialized().await.unwrap_err();
        assert!(matches!(err, StoreError::Load(_)));
        assert!(err.to_string().contains("permission denied"));
    }

    #[tokio::test]
    async fn test_load_panic_rejects() {
        let explode = true;
        let store = Store::<Value>::builder()
            .load_with(move || async move {
                if explode {
                    panic!("loader bug");
                }
                anyhow::Ok(None)
            })
            .build()
            .unwrap();

        let err = store.initialized().await.unwrap_err();
        assert!(err.to_string().contains("panicked"));
        assert_eq!(store.lifecycle(), LifecycleState::Failed);
    }

    #[tokio::test]
    async fn test_load_panic_before_future_rejects() {
        let explode = true;
        let store = Store::<Value>::builder()
            .load_with(move || {
                if explode {
                    panic!("loader bug");
                }
                async { anyhow::Ok(None) }
            })
            .build()
            .unwrap();

        assert_eq!(store.lifecycle(), LifecycleState::Failed);
        let err = store.initialized().await.unwrap_err();
        assert!(matches!(err, StoreError::Load(_)));
        assert!(err.to_string().contains("panicked"));
    }

    #[tokio::test]
    async fn test_skip_load_resolves_immediately_with_placeholder() {
        let adapter = InMemoryPersistence::with_value(json!({"a": 1}));
        let store = Store::builder()
            .persistence(adapter.clone())
            .load_on_create(false)
            .build()
            .unwrap();

        assert_eq!(store.lifecycle(), LifecycleState::Ready);
        assert_eq!(store.initialized().await.unwrap(), Value::Null);
        assert_eq!(adapter.load_count(), 0);
        assert_eq!(store.get().await, None);
    }

    #[tokio::test]
    async fn test_no_load_function_is_ready() {
        let store = Store::<Value>::builder().build().unwrap();

        assert_eq!(store.lifecycle(), LifecycleState::Ready);
        assert!(store.initialized().await.is_ok());
    }

    #[tokio::test]
    async fn test_readiness_settles_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let store = Store::builder()
            .load_with(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { anyhow::Ok(Some(json!({"n": 1}))) }
            })
            .build()
            .unwrap();

        let first = store.initialized().await.unwrap();
        let second = store.initialized().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!store.shared.lifecycle.settle(Ok(json!("late"))));
        assert_eq!(store.initialized().await.unwrap(), json!({"n": 1}));
    }

    #[tokio::test]
    async fn test_concurrent_waiters_see_same_outcome() {
        let store = Store::builder()
            .persistence(InMemoryPersistence::with_value(json!([1, 2])))
            .build()
            .unwrap();

        let (a, b) = tokio::join!(store.initialized(), store.initialized());
        assert_eq!(a.unwrap(), json!([1, 2]));
        assert_eq!(b.unwrap(), json!([1, 2]));
    }

    #[tokio::test]
    async fn test_watch_lifecycle() {
        let store = Store::builder()
            .persistence(InMemoryPersistence::with_value(json!(true)))
            .build()
            .unwrap();
        let mut states = store.watch_lifecycle();
        assert_eq!(*states.borrow(), LifecycleState::Loading);

        let settled = *states.wait_for(LifecycleState::is_settled).await.unwrap();
        assert_eq!(settled, LifecycleState::Ready);
    }

    #[tokio::test]
    #[allow(deprecated)]
    async fn test_on_initialized_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let store = Store::builder()
            .persistence(InMemoryPersistence::with_value(json!({"a": 1})))
            .on_initialized(move |value| sink.lock().unwrap().push(value.cloned()))
            .build()
            .unwrap();
        store.initialized().await.unwrap();

        let sink = Arc::clone(&seen);
        let skipped = Store::<Value>::builder()
            .on_initialized(move |value| sink.lock().unwrap().push(value.cloned()))
            .build()
            .unwrap();
        skipped.initialized().await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![Some(json!({"a": 1})), None]);
    }
}
