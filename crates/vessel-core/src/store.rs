//! Store core
//!
//! The `Store` owns a single model value and coordinates between:
//! - the observable primitive (notification)
//! - the mutation engine (`set`, `update`, `mutate`)
//! - the persistence adapter (load at startup, save after every commit)
//!
//! ## Usage
//!
//! ```ignore
//! let adapter = InMemoryPersistence::with_value(json!({"theme": "dark"}));
//! let store = Store::builder().persistence(adapter).build()?;
//!
//! let settings = store.initialized().await?;
//! let _sub = store.subscribe(|value| println!("now: {:?}", value));
//!
//! store.mutate(patch);  // merged, committed, saved in the background
//! ```
//!
//! A `Store` is a cheap handle: clones share the same value, subscribers and
//! adapter functions.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::warn;

use crate::config::StoreOptions;
use crate::error::{StoreError, StoreResult};
use crate::lifecycle::{InitializedFn, Lifecycle};
use crate::model::Model;
use crate::observable::{Observable, ObserverList, Subscriber, Subscription};
use crate::persistence::{self, LoadFn, LoadOutcome, Persistence, SaveFn, SaveOutcome, SaveReport};

/// Buffered save reports per receiver before the oldest are dropped
const SAVE_REPORT_CAPACITY: usize = 64;

/// Custom merge function replacing the default `mutate` path
pub type MutateFn<T, O = ObserverList<T>> =
    Arc<dyn Fn(&Store<T, O>, <T as Model>::Patch) + Send + Sync>;

/// Observable model container
pub struct Store<T: Model, O = ObserverList<T>> {
    pub(crate) shared: Arc<Shared<T, O>>,
}

/// State shared by every handle of one store
pub(crate) struct Shared<T: Model, O> {
    pub(crate) observable: Arc<O>,
    pub(crate) options: StoreOptions,
    pub(crate) save: Option<SaveFn<T>>,
    pub(crate) load: Option<LoadFn<T>>,
    pub(crate) mutate: Option<MutateFn<T, O>>,
    pub(crate) on_initialized: Option<InitializedFn<T>>,
    pub(crate) lifecycle: Lifecycle<T>,
    pub(crate) saves: broadcast::Sender<SaveReport>,
    pub(crate) runtime: Handle,
}

impl<T: Model, O> Clone for Store<T, O> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Model> Store<T> {
    /// Start configuring a store backed by an [`ObserverList`]
    pub fn builder() -> StoreBuilder<T> {
        StoreBuilder::new()
    }
}

impl<T: Model, O: Observable<T>> Store<T, O> {
    /// Register a callback for committed values
    ///
    /// The callback runs immediately with the current value (`None` if
    /// nothing has been committed) and then after every commit.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Option<&T>) + Send + Sync + 'static,
    {
        let subscriber: Subscriber<T> = Arc::new(callback);
        Subscription::attach(&self.shared.observable, subscriber)
    }

    /// Snapshot of the current value
    pub async fn get(&self) -> Option<T> {
        self.shared.observable.get()
    }

    /// Call the load function on demand
    ///
    /// Independent of the initialization lifecycle and repeatable. The
    /// returned value is not committed.
    pub async fn load(&self) -> StoreResult<Option<T>> {
        let load = self
            .shared
            .load
            .as_ref()
            .ok_or(StoreError::LoadUnavailable)?;
        load().await.map_err(StoreError::load)
    }

    /// Receive a [`SaveReport`] for every save that settles from now on
    pub fn subscribe_saves(&self) -> broadcast::Receiver<SaveReport> {
        self.shared.saves.subscribe()
    }

    /// Number of commits so far
    pub fn version(&self) -> u64 {
        self.shared.observable.version()
    }

    /// Options this store was built with
    pub fn options(&self) -> &StoreOptions {
        &self.shared.options
    }

    /// The underlying observable primitive
    pub fn observable(&self) -> &Arc<O> {
        &self.shared.observable
    }
}

impl<T, O> fmt::Debug for Store<T, O>
where
    T: Model + fmt::Debug,
    O: Observable<T>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("value", &self.shared.observable.get())
            .field("version", &self.version())
            .field("lifecycle", &self.lifecycle())
            .field("options", &self.shared.options)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Store`]
///
/// Option precedence: explicit `allow_undefined_data` / `load_on_create`
/// calls win over [`StoreOptions`] passed to [`options`](Self::options),
/// which win over the defaults. Call order does not matter.
pub struct StoreBuilder<T: Model, O = ObserverList<T>> {
    observable: O,
    options: StoreOptions,
    allow_undefined_data: Option<bool>,
    load_on_create: Option<bool>,
    save: Option<SaveFn<T>>,
    load: Option<LoadFn<T>>,
    mutate: Option<MutateFn<T, O>>,
    on_initialized: Option<InitializedFn<T>>,
    initial: Option<T>,
}

impl<T: Model> StoreBuilder<T> {
    /// Builder using the built-in [`ObserverList`]
    pub fn new() -> Self {
        Self::with_observable(ObserverList::new())
    }
}

impl<T: Model> Default for StoreBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Model, O: Observable<T>> StoreBuilder<T, O> {
    /// Builder using a caller-supplied observable primitive
    pub fn with_observable(observable: O) -> Self {
        Self {
            observable,
            options: StoreOptions::default(),
            allow_undefined_data: None,
            load_on_create: None,
            save: None,
            load: None,
            mutate: None,
            on_initialized: None,
            initial: None,
        }
    }

    /// Base options (typically loaded from TOML / environment)
    pub fn options(mut self, options: StoreOptions) -> Self {
        self.options = options;
        self
    }

    /// Permit committing empty or absent values
    pub fn allow_undefined_data(mut self, allow: bool) -> Self {
        self.allow_undefined_data = Some(allow);
        self
    }

    /// Run the load function while building
    pub fn load_on_create(mut self, load: bool) -> Self {
        self.load_on_create = Some(load);
        self
    }

    /// Save after every commit
    pub fn save_fn(mut self, save: SaveFn<T>) -> Self {
        self.save = Some(save);
        self
    }

    /// Save after every commit, from a closure returning a future
    pub fn save_with<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Option<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SaveOutcome> + Send + 'static,
    {
        self.save_fn(persistence::save_fn(f))
    }

    /// Enable `load()` and auto-load
    pub fn load_fn(mut self, load: LoadFn<T>) -> Self {
        self.load = Some(load);
        self
    }

    /// Enable `load()` and auto-load, from a closure returning a future
    pub fn load_with<F, Fut>(self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LoadOutcome<T>> + Send + 'static,
    {
        self.load_fn(persistence::load_fn(f))
    }

    /// Use one adapter for both load and save
    pub fn persistence<P: Persistence<T>>(mut self, adapter: P) -> Self {
        let (load, save) = persistence::split(adapter);
        self.load = Some(load);
        self.save = Some(save);
        self
    }

    /// Replace the default merge performed by `mutate`
    ///
    /// The function receives the store handle and the patch. `mutate` does
    /// not save on this path; the function is responsible for persistence.
    pub fn mutate_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&Store<T, O>, T::Patch) + Send + Sync + 'static,
    {
        self.mutate = Some(Arc::new(f));
        self
    }

    /// Callback fired once initialization settles, with the loaded value or
    /// `None`
    #[deprecated(note = "await `Store::initialized()` instead")]
    pub fn on_initialized<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<&T>) + Send + Sync + 'static,
    {
        self.on_initialized = Some(Arc::new(f));
        self
    }

    /// Value held before anything is loaded or written
    ///
    /// Not saved. A successful auto-load replaces it.
    pub fn initial(mut self, value: T) -> Self {
        self.initial = Some(value);
        self
    }

    /// Build the store and start its initialization
    ///
    /// Must be called from within a Tokio runtime; background loads and
    /// saves are spawned onto it.
    pub fn build(self) -> StoreResult<Store<T, O>> {
        let runtime = Handle::try_current().map_err(|e| StoreError::NoRuntime(e.to_string()))?;

        let mut options = self.options;
        if let Some(allow) = self.allow_undefined_data {
            options.allow_undefined_data = allow;
        }
        if let Some(load) = self.load_on_create {
            options.load_on_create = load;
        }

        if let Some(initial) = self.initial {
            if options.allow_undefined_data || !initial.is_empty() {
                self.observable.set(Some(initial), None);
            } else {
                warn!("Ignoring empty initial value; enable allow_undefined_data to keep it");
            }
        }

        let (saves, _) = broadcast::channel(SAVE_REPORT_CAPACITY);
        let store = Store {
            shared: Arc::new(Shared {
                observable: Arc::new(self.observable),
                options,
                save: self.save,
                load: self.load,
                mutate: self.mutate,
                on_initialized: self.on_initialized,
                lifecycle: Lifecycle::new(),
                saves,
                runtime,
            }),
        };

        store.start();
        Ok(store)
    }
}
