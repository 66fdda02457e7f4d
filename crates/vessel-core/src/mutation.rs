//! Mutation engine
//!
//! The three write paths of a store. Each one either commits exactly once
//! and then hands the post-commit value to the save function, or does
//! nothing at all. Validation problems are logged and never returned:
//!
//! - an empty or absent value is dropped unless `allow_undefined_data` is set
//! - patch keys missing from the current value are skipped
//!
//! Every write returns the revision it committed, or `None` if it was dropped.
//!
//! Saves are fire-and-forget. The save function is called once the commit has
//! reached every subscriber, in commit order, even when a subscriber writes
//! back. Its future runs as a background task and its outcome is only
//! published as a [`SaveReport`].

use tracing::{debug, trace, warn};

use crate::model::Model;
use crate::observable::{AfterCommit, Observable, Transition};
use crate::persistence::SaveReport;
use crate::store::Store;

impl<T: Model, O: Observable<T>> Store<T, O> {
    /// Replace the value
    ///
    /// Accepts `T` or `Option<T>`. An empty or absent value is ignored with a
    /// warning unless the store allows undefined data.
    pub fn set(&self, value: impl Into<Option<T>>) -> Option<u64> {
        let value = value.into();
        if !admits(self.shared.options.allow_undefined_data, value.as_ref()) {
            warn!("Ignoring set() with an empty value; enable allow_undefined_data to store it");
            return None;
        }

        Some(self.shared.observable.set(value, self.after_commit()))
    }

    /// Commit an absent value (requires `allow_undefined_data`)
    pub fn clear(&self) -> Option<u64> {
        self.set(Option::<T>::None)
    }

    /// Derive the next value from the current one
    ///
    /// Reading, transforming and committing happen as one step, so no other
    /// write can interleave. `transform` must not call back into the store.
    pub fn update<F, R>(&self, transform: F) -> Option<u64>
    where
        F: FnOnce(Option<&T>) -> R,
        R: Into<Option<T>>,
    {
        let allow = self.shared.options.allow_undefined_data;
        let mut rejected = false;

        let revision = self.shared.observable.update(
            |current| {
                let next = transform(current).into();
                if admits(allow, next.as_ref()) {
                    Transition::Commit(next)
                } else {
                    rejected = true;
                    Transition::Keep
                }
            },
            self.after_commit(),
        );

        if rejected {
            warn!("Ignoring update() that produced an empty value; enable allow_undefined_data to store it");
        }
        revision
    }

    /// Merge a partial update into the value
    ///
    /// With a custom merge function configured, the patch goes to it and
    /// nothing is saved automatically; no revision is reported in that case.
    /// Otherwise keys present on the current value are overwritten, unknown
    /// keys are skipped with a warning, and the merged value is committed and
    /// saved.
    pub fn mutate(&self, patch: T::Patch) -> Option<u64> {
        if let Some(custom) = &self.shared.mutate {
            debug!("Delegating mutate() to custom merge function");
            custom(self, patch);
            return None;
        }

        let allow = self.shared.options.allow_undefined_data;
        let mut report = None;
        let mut rejected = false;

        let revision = self.shared.observable.update(
            |current| {
                let Some(current) = current else {
                    return Transition::Keep;
                };

                let mut next = current.clone();
                report = Some(next.merge(patch));
                if admits(allow, Some(&next)) {
                    Transition::Commit(Some(next))
                } else {
                    rejected = true;
                    Transition::Keep
                }
            },
            self.after_commit(),
        );

        match report {
            None => warn!("Ignoring mutate(): there is no current value to merge into"),
            Some(report) => {
                for key in &report.skipped {
                    warn!(key = %key, "Ignoring unknown key in mutate(); no new field was created");
                }
            }
        }
        if rejected {
            warn!("Ignoring mutate() that produced an empty value; enable allow_undefined_data to store it");
        }
        revision
    }

    /// Save action run by the observable once a commit has been delivered
    fn after_commit(&self) -> Option<AfterCommit<T>> {
        let save = self.shared.save.clone()?;
        let reports = self.shared.saves.clone();
        let runtime = self.shared.runtime.clone();

        Some(Box::new(move |revision: u64, value: Option<T>| {
            let pending = save(value);
            runtime.spawn(async move {
                let outcome = pending.await;
                trace!(revision, ok = outcome.is_ok(), "Save settled");
                // No receivers is the common case
                let _ = reports.send(SaveReport { revision, outcome });
            });
        }))
    }
}

fn admits<T: Model>(allow_undefined_data: bool, value: Option<&T>) -> bool {
    allow_undefined_data || value.is_some_and(|v| !v.is_empty())
}
