//! Vessel Core Library
//!
//! This crate provides an observable model container: a [`Store`] holds one
//! application value, notifies subscribers synchronously on every change and
//! persists each committed value through caller-supplied async functions.
//!
//! # Architecture
//!
//! - **Observable**: pluggable publish/subscribe cell, [`ObserverList`] by default
//! - **Mutation engine**: `set`, `update` and `mutate` with emptiness and
//!   unknown-key guards
//! - **Persistence**: load at startup, fire-and-forget save after each commit
//!
//! # Quick Start
//!
//! ```text
//! let store = Store::builder()
//!     .persistence(InMemoryPersistence::with_value(json!({"theme": "dark"})))
//!     .build()?;
//!
//! let settings = store.initialized().await?;
//! let _sub = store.subscribe(|value| println!("{:?}", value));
//!
//! store.mutate(patch);
//! ```
//!
//! # Modules
//!
//! - `store`: Store handle and builder (main entry point)
//! - `observable`: Observable trait, observer list and subscriptions
//! - `model`: Model trait, merge reports and the `model_patch!` macro
//! - `persistence`: Load/save function types and adapters
//! - `lifecycle`: Initialization state machine and readiness signal
//! - `config`: Store options
//! - `error`: Error types

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod model;
mod mutation;
pub mod observable;
pub mod persistence;
pub mod store;

pub use config::StoreOptions;
pub use error::{StoreError, StoreResult};
pub use lifecycle::{InitializedFn, LifecycleState};
pub use model::{MergeReport, Model};
pub use observable::{
    AfterCommit, Observable, ObserverList, Subscriber, SubscriberId, Subscription, Transition,
};
pub use persistence::{
    load_fn, save_fn, InMemoryPersistence, LoadFn, LoadOutcome, OperationError, OperationResult,
    Persistence, SaveFn, SaveOutcome, SaveReport,
};
pub use store::{MutateFn, Store, StoreBuilder};
