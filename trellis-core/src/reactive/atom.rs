//! Atoms and observable values.
//!
//! An [`Atom`] is the smallest observable unit: it owns no value of its
//! own, only the observer bookkeeping, and exposes the two primitives
//! everything else is built from: `report_observed` on reads and
//! `report_changed` on writes. [`ObservableValue`] pairs an atom with a
//! value cell to form the Read/Write wrapper used by property-style
//! accessors.
//!
//! # Lifecycle hooks
//!
//! Atoms created with hooks fire `on_become_observed` when their observer
//! count goes 0→1 (first tracked read) and `on_become_unobserved` when it
//! returns to 0 (processed at batch end). Computed values use the same
//! transition to start and stop their own upstream subscriptions.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use super::error::ReactiveError;
use super::graph::{ObservableId, ObservableKind, ObservableNode};
use super::state::SharedState;

struct AtomCore {
    state: SharedState,
    id: ObservableId,
    name: String,
}

impl Drop for AtomCore {
    fn drop(&mut self) {
        self.state.graph().observables.remove(&self.id);
    }
}

/// A single observable cell.
///
/// Cloning shares the cell; the graph node is removed when the last
/// handle drops.
pub struct Atom {
    core: Arc<AtomCore>,
}

impl Clone for Atom {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl Atom {
    pub(crate) fn with_raw_hooks(
        state: &SharedState,
        name: String,
        on_observed: Option<Arc<dyn Fn() + Send + Sync>>,
        on_unobserved: Option<Arc<dyn Fn() + Send + Sync>>,
    ) -> Self {
        let id = ObservableId::next();
        let node = ObservableNode::new(name.clone(), ObservableKind::Atom)
            .with_hooks(on_observed, on_unobserved);
        state.graph().add_observable(id, node);
        Self {
            core: Arc::new(AtomCore {
                state: state.clone(),
                id,
                name,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Report a read of this cell. Returns whether a tracking context
    /// existed; callers can use a `false` return to warn about reads that
    /// will never trigger anything.
    ///
    /// # Panics
    ///
    /// Panics when reads are currently disallowed.
    pub fn report_observed(&self) -> bool {
        match self.try_report_observed() {
            Ok(tracked) => tracked,
            Err(err) => panic!("{err}"),
        }
    }

    /// Fallible form of [`report_observed`](Self::report_observed).
    pub fn try_report_observed(&self) -> Result<bool, ReactiveError> {
        let (tracked, hook) = {
            let mut graph = self.core.state.graph();
            graph.check_state_read_allowed(self.core.id)?;
            let outcome = graph.report_observed(self.core.id);
            (outcome.tracked, outcome.become_observed)
        };
        // Hooks run outside the graph lock; they may touch the runtime.
        if let Some(hook) = hook {
            hook();
        }
        Ok(tracked)
    }

    /// Report that this cell changed, propagating staleness to observers
    /// inside a batch.
    ///
    /// # Panics
    ///
    /// Panics when the enforce-actions policy (or the computed-purity
    /// rule) forbids the mutation.
    pub fn report_changed(&self) {
        if let Err(err) = self.try_report_changed() {
            panic!("{err}");
        }
    }

    /// Fallible form of [`report_changed`](Self::report_changed).
    pub fn try_report_changed(&self) -> Result<(), ReactiveError> {
        self.check_write_allowed()?;
        self.propagate_changed();
        Ok(())
    }

    /// Run only the mutation policy gate, without propagating.
    pub fn check_write_allowed(&self) -> Result<(), ReactiveError> {
        let graph = self.core.state.graph();
        graph.check_state_change_allowed(self.core.id, self.core.state.config().enforce_actions)
    }

    /// Propagate a change without re-running the policy gate. Callers must
    /// have already passed [`check_write_allowed`](Self::check_write_allowed).
    pub(crate) fn propagate_changed(&self) {
        self.core.state.start_batch();
        self.core.state.graph().propagate_changed(self.core.id);
        self.core.state.end_batch();
    }

    /// Number of derivations whose most recent run read this cell.
    pub fn observer_count(&self) -> usize {
        self.core.state.graph().observer_count(self.core.id)
    }

    /// Whether any derivation currently observes this cell.
    pub fn is_being_observed(&self) -> bool {
        self.core
            .state
            .graph()
            .observables
            .get(&self.core.id)
            .map(|n| n.is_being_observed)
            .unwrap_or(false)
    }
}

impl Debug for Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Atom")
            .field("name", &self.name())
            .field("observers", &self.observer_count())
            .finish()
    }
}

/// A reactive value cell.
///
/// Reads inside a tracking context register the reader as an observer;
/// writes propagate to observers when the surrounding batch settles.
/// Cloning shares the cell.
pub struct ObservableValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<ValueCore<T>>,
}

struct ValueCore<T> {
    atom: Atom,
    value: RwLock<T>,
}

impl<T> ObservableValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn name(&self) -> &str {
        self.inner.atom.name()
    }

    pub fn atom(&self) -> &Atom {
        &self.inner.atom
    }

    /// Read the current value, registering a dependency when a derivation
    /// is being tracked.
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Fallible form of [`get`](Self::get).
    pub fn try_get(&self) -> Result<T, ReactiveError> {
        self.inner.atom.try_report_observed()?;
        Ok(self.inner.value.read().clone())
    }

    /// Read the current value without establishing a dependency.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Write a new value and notify observers.
    ///
    /// # Panics
    ///
    /// Panics when the enforce-actions policy forbids the mutation.
    pub fn set(&self, value: T) {
        if let Err(err) = self.try_set(value) {
            panic!("{err}");
        }
    }

    /// Fallible form of [`set`](Self::set). The policy gate runs before
    /// the value is touched, so a rejected write leaves the cell intact.
    pub fn try_set(&self, value: T) -> Result<(), ReactiveError> {
        self.inner.atom.check_write_allowed()?;
        *self.inner.value.write() = value;
        self.inner.atom.propagate_changed();
        Ok(())
    }

    /// Update the value from its current state.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let current = self.inner.value.read().clone();
        self.set(f(&current));
    }

    pub fn observer_count(&self) -> usize {
        self.inner.atom.observer_count()
    }
}

impl<T> Clone for ObservableValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for ObservableValue<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableValue")
            .field("name", &self.name())
            .field("value", &self.get_untracked())
            .field("observers", &self.observer_count())
            .finish()
    }
}

impl SharedState {
    /// Create a bare atom with no lifecycle hooks.
    pub fn create_atom(&self, name: impl Into<String>) -> Atom {
        Atom::with_raw_hooks(self, name.into(), None, None)
    }

    /// Create an atom that is told when it gains its first observer and
    /// when it loses its last one.
    pub fn create_atom_with_hooks(
        &self,
        name: impl Into<String>,
        on_become_observed: impl Fn() + Send + Sync + 'static,
        on_become_unobserved: impl Fn() + Send + Sync + 'static,
    ) -> Atom {
        Atom::with_raw_hooks(
            self,
            name.into(),
            Some(Arc::new(on_become_observed)),
            Some(Arc::new(on_become_unobserved)),
        )
    }

    /// Create an observable value cell.
    pub fn observable<T>(&self, name: impl Into<String>, value: T) -> ObservableValue<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        ObservableValue {
            inner: Arc::new(ValueCore {
                atom: self.create_atom(name),
                value: RwLock::new(value),
            }),
        }
    }
}
