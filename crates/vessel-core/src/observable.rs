//! Observable primitive
//!
//! The store does not own its notification mechanism: it talks to anything
//! implementing [`Observable`], a minimal publish/subscribe cell. The
//! contract an implementation must honour:
//!
//! - notification happens after the new value is in place
//! - subscribers are notified in registration order
//! - commits are delivered in commit order: a commit made from inside a
//!   subscriber is queued and delivered once the current one has reached
//!   every subscriber
//! - the [`AfterCommit`] action of a commit runs right after its delivery, so
//!   those actions also run in commit order
//! - a new subscriber receives the current value (even if absent) during
//!   `subscribe`
//! - `update` runs its closure and the resulting commit as one step; no other
//!   commit can land in between
//!
//! [`ObserverList`] is the built-in implementation.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Callback registered against an observable
pub type Subscriber<T> = Arc<dyn Fn(Option<&T>) + Send + Sync>;

/// Runs once a commit has reached every subscriber, with its version and value
pub type AfterCommit<T> = Box<dyn FnOnce(u64, Option<T>) + Send>;

/// Identifies one registered subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// What an `update` closure decided to do with the current value
#[derive(Debug, Clone, PartialEq)]
pub enum Transition<T> {
    /// Replace the current value and notify subscribers
    Commit(Option<T>),
    /// Leave the current value alone
    Keep,
}

impl<T> Transition<T> {
    /// True if this transition replaced the value
    pub fn is_commit(&self) -> bool {
        matches!(self, Transition::Commit(_))
    }
}

/// A subscribe / publish / read-current cell
pub trait Observable<T>: Send + Sync + 'static {
    /// Register a subscriber and deliver the current value to it
    fn subscribe(&self, subscriber: Subscriber<T>) -> SubscriberId;

    /// Remove a subscriber; returns false if it was not registered
    fn unsubscribe(&self, id: SubscriberId) -> bool;

    /// Snapshot of the current value
    fn get(&self) -> Option<T>;

    /// Replace the value and notify subscribers
    ///
    /// Returns the version of this commit.
    fn set(&self, value: Option<T>, after: Option<AfterCommit<T>>) -> u64;

    /// Read, decide and commit as a single step
    ///
    /// Returns the version of the commit, or `None` if the closure kept the
    /// current value (`after` is then dropped without running).
    fn update<F>(&self, f: F, after: Option<AfterCommit<T>>) -> Option<u64>
    where
        F: FnOnce(Option<&T>) -> Transition<T>;

    /// Number of commits so far
    fn version(&self) -> u64;
}

/// A commit waiting to be delivered
struct Delivery<T> {
    version: u64,
    value: Option<T>,
    subscribers: Vec<Subscriber<T>>,
    after: Option<AfterCommit<T>>,
}

struct ObserverListInner<T> {
    value: Option<T>,
    version: u64,
    next_id: u64,
    subscribers: Vec<(SubscriberId, Subscriber<T>)>,
    pending: VecDeque<Delivery<T>>,
    delivering: bool,
}

/// Observer list guarded by a mutex
///
/// Subscriber callbacks are invoked after the lock is released, so they may
/// read from or write to the list again. `update` closures run under the lock
/// and must not touch the list.
///
/// Commits are queued. Whichever caller finds no delivery in progress drains
/// the queue, so a commit made while another is being delivered (from a
/// subscriber or from another thread) returns at once and is delivered by
/// that caller, after the commits before it.
pub struct ObserverList<T> {
    inner: Mutex<ObserverListInner<T>>,
}

impl<T> ObserverList<T> {
    /// Create an empty list holding no value
    pub fn new() -> Self {
        Self::with_value(None)
    }

    /// Create a list holding `value`
    pub fn with_value(value: Option<T>) -> Self {
        Self {
            inner: Mutex::new(ObserverListInner {
                value,
                version: 0,
                next_id: 0,
                subscribers: Vec::new(),
                pending: VecDeque::new(),
                delivering: false,
            }),
        }
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, ObserverListInner<T>> {
        // A panicking subscriber never holds the lock, so the data is intact
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for ObserverList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ObserverList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("ObserverList")
            .field("value", &inner.value)
            .field("version", &inner.version)
            .field("subscriber_count", &inner.subscribers.len())
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> ObserverList<T> {
    /// Store `value`, bump the version and queue its delivery
    ///
    /// Returns the version and whether the caller must drain the queue.
    fn commit(
        inner: &mut ObserverListInner<T>,
        value: Option<T>,
        after: Option<AfterCommit<T>>,
    ) -> (u64, bool) {
        inner.value = value;
        inner.version += 1;
        let delivery = Delivery {
            version: inner.version,
            value: inner.value.clone(),
            subscribers: inner.subscribers.iter().map(|(_, s)| Arc::clone(s)).collect(),
            after,
        };
        inner.pending.push_back(delivery);

        let drain = !inner.delivering;
        inner.delivering = true;
        (inner.version, drain)
    }

    /// Deliver queued commits in order until the queue is empty
    fn drain(&self) {
        let mut draining = Draining {
            list: self,
            finished: false,
        };
        loop {
            let delivery = {
                let mut inner = self.lock();
                match inner.pending.pop_front() {
                    Some(delivery) => delivery,
                    None => {
                        // Same lock as the enqueue, so no commit is stranded
                        inner.delivering = false;
                        draining.finished = true;
                        return;
                    }
                }
            };
            for subscriber in &delivery.subscribers {
                subscriber(delivery.value.as_ref());
            }
            if let Some(after) = delivery.after {
                after(delivery.version, delivery.value);
            }
        }
    }
}

/// Hands draining to the next committer if a subscriber panics mid-delivery
struct Draining<'a, T> {
    list: &'a ObserverList<T>,
    finished: bool,
}

impl<T> Drop for Draining<'_, T> {
    fn drop(&mut self) {
        if !self.finished {
            self.list.lock().delivering = false;
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Observable<T> for ObserverList<T> {
    fn subscribe(&self, subscriber: Subscriber<T>) -> SubscriberId {
        let (id, current) = {
            let mut inner = self.lock();
            let id = SubscriberId(inner.next_id);
            inner.next_id += 1;
            inner.subscribers.push((id, Arc::clone(&subscriber)));
            (id, inner.value.clone())
        };
        subscriber(current.as_ref());
        id
    }

    fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut inner = self.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(sid, _)| *sid != id);
        inner.subscribers.len() != before
    }

    fn get(&self) -> Option<T> {
        self.lock().value.clone()
    }

    fn set(&self, value: Option<T>, after: Option<AfterCommit<T>>) -> u64 {
        let (version, drain) = {
            let mut inner = self.lock();
            Self::commit(&mut inner, value, after)
        };
        if drain {
            self.drain();
        }
        version
    }

    fn update<F>(&self, f: F, after: Option<AfterCommit<T>>) -> Option<u64>
    where
        F: FnOnce(Option<&T>) -> Transition<T>,
    {
        let (version, drain) = {
            let mut inner = self.lock();
            match f(inner.value.as_ref()) {
                Transition::Keep => return None,
                Transition::Commit(next) => Self::commit(&mut inner, next, after),
            }
        };
        if drain {
            self.drain();
        }
        Some(version)
    }

    fn version(&self) -> u64 {
        self.lock().version
    }
}

/// Handle that keeps a subscriber registered
///
/// Dropping the handle or calling [`unsubscribe`](Self::unsubscribe) removes
/// the subscriber. [`detach`](Self::detach) keeps it registered for as long as
/// the observable lives.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: SubscriberId,
    release: Option<Box<dyn FnOnce(SubscriberId) + Send + Sync>>,
}

impl Subscription {
    /// Subscribe to `observable`, holding it weakly
    pub fn attach<T, O>(observable: &Arc<O>, subscriber: Subscriber<T>) -> Self
    where
        O: Observable<T>,
    {
        let id = observable.subscribe(subscriber);
        let weak: Weak<O> = Arc::downgrade(observable);
        Self {
            id,
            release: Some(Box::new(move |id| {
                if let Some(observable) = weak.upgrade() {
                    observable.unsubscribe(id);
                }
            })),
        }
    }

    /// Identifier of the registered subscriber
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Stop receiving notifications
    pub fn unsubscribe(mut self) {
        self.release();
    }

    /// Keep the subscriber registered without holding a handle
    pub fn detach(mut self) -> SubscriberId {
        self.release = None;
        self.id
    }

    fn release(&mut self) {
        if let Some(release) = self.release.take() {
            release(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("attached", &self.release.is_some())
            .finish()
    }
}
