//! Computed values.
//!
//! A [`ComputedValue`] is both halves of the graph at once: a derivation
//! that tracks what its getter reads, and an observable that downstream
//! derivations can depend on. Its cached result is recomputed only when a
//! dependency actually changed, and only a result the equality comparer
//! considers different propagates further. That cut-off is what keeps
//! long derivation chains cheap.
//!
//! # Suspension
//!
//! A computed value with no observers (and without `keep_alive`) carries
//! no cache and no upstream subscriptions. Reading it in that state
//! evaluates the getter once, untracked, without recording any dependency
//! edge ("peek" semantics). The full memoizing lifecycle starts when the
//! first observer arrives and is torn down again, at batch end, when the
//! last one leaves.
//!
//! # Purity
//!
//! Getters are presumed pure: evaluating one while it is already
//! evaluating is a cycle error, and mutating an observed cell from inside
//! a getter is rejected unless the caller opted into the explicit escape
//! scope. Several memoization invariants depend on this asymmetry with
//! actions, which are free to mutate.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::error::ReactiveError;
use super::graph::{
    DerivationId, DerivationKind, DerivationNode, DerivationState, ObservableId, ObservableKind,
    ObservableNode,
};
use super::state::SharedState;

/// Type-erased view of a computed value, used by the runtime to force
/// recomputation while resolving `PossiblyStale` and to suspend values
/// that lost their last observer.
pub(crate) trait ErasedComputed: Send + Sync {
    fn ensure_up_to_date(&self);
    fn suspend(&self);
}

struct ComputedCore<T>
where
    T: Clone + Send + Sync + 'static,
{
    state: SharedState,
    observable_id: ObservableId,
    derivation_id: DerivationId,
    name: String,
    getter: Box<dyn Fn() -> T + Send + Sync>,
    setter: Option<Box<dyn Fn(T) + Send + Sync>>,
    equals: Box<dyn Fn(&T, &T) -> bool + Send + Sync>,
    value: Mutex<Option<T>>,
    /// Re-entrancy guard; a getter that reaches itself again is a cycle.
    is_computing: AtomicBool,
    keep_alive: bool,
    requires_reaction: bool,
}

impl<T> ComputedCore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn try_get(&self) -> Result<T, ReactiveError> {
        if self.is_computing.load(Ordering::Relaxed) {
            return Err(ReactiveError::ComputationCycle {
                name: self.name.clone(),
            });
        }
        let (batch_depth, observed, tracked) = {
            let graph = self.state.graph();
            graph.check_state_read_allowed(self.observable_id)?;
            (
                graph.batch_depth,
                graph.observer_count(self.observable_id) > 0,
                graph.tracking.is_some(),
            )
        };
        if self.requires_reaction && !tracked {
            return Err(ReactiveError::ComputedRequiresReaction {
                name: self.name.clone(),
            });
        }

        if batch_depth == 0 && !observed && !self.keep_alive {
            // Suspended read: evaluate once, untracked, caching nothing.
            if self.state.should_compute(self.derivation_id) {
                tracing::trace!(computed = %self.name, "untracked read of suspended computed");
                return Ok(self.state.batch(|| self.compute(false)));
            }
        } else {
            let hook = self
                .state
                .graph()
                .report_observed(self.observable_id)
                .become_observed;
            if let Some(hook) = hook {
                hook();
            }
            if self.state.should_compute(self.derivation_id) {
                self.refresh_tracked();
            }
        }

        Ok(self
            .value
            .lock()
            .clone()
            .expect("computed value missing after refresh"))
    }

    /// Recompute inside a batch and propagate only if the comparer says
    /// the result actually changed.
    fn refresh_tracked(&self) {
        self.state.batch(|| {
            if self.track_and_compute() {
                self.state
                    .graph()
                    .propagate_change_confirmed(self.observable_id);
            }
        });
    }

    fn track_and_compute(&self) -> bool {
        let was_suspended = self
            .state
            .graph()
            .derivations
            .get(&self.derivation_id)
            .map(|d| d.dependencies_state == DerivationState::NotTracking)
            .unwrap_or(true);
        let new_value = self.compute(true);
        let mut slot = self.value.lock();
        let changed = was_suspended
            || match slot.as_ref() {
                Some(old) => !(self.equals)(old, &new_value),
                None => true,
            };
        if changed {
            *slot = Some(new_value);
        }
        changed
    }

    fn compute(&self, track: bool) -> T {
        self.is_computing.store(true, Ordering::Relaxed);
        self.state.graph().computation_depth += 1;
        let _guard = ComputeGuard {
            state: &self.state,
            flag: &self.is_computing,
        };
        if track {
            self.state.track(self.derivation_id, || (self.getter)())
        } else {
            (self.getter)()
        }
    }
}

impl<T> ErasedComputed for ComputedCore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn ensure_up_to_date(&self) {
        if self.is_computing.load(Ordering::Relaxed) {
            panic!(
                "{}",
                ReactiveError::ComputationCycle {
                    name: self.name.clone(),
                }
            );
        }
        if self.state.should_compute(self.derivation_id) {
            self.refresh_tracked();
        }
    }

    fn suspend(&self) {
        if self.keep_alive {
            return;
        }
        {
            let mut graph = self.state.graph();
            graph.clear_observing(self.derivation_id);
            if let Some(der) = graph.derivations.get_mut(&self.derivation_id) {
                der.dependencies_state = DerivationState::NotTracking;
            }
        }
        *self.value.lock() = None;
        tracing::trace!(computed = %self.name, "suspended");
    }
}

impl<T> Drop for ComputedCore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        {
            let mut graph = self.state.graph();
            graph.clear_observing(self.derivation_id);
            graph.derivations.remove(&self.derivation_id);
            graph.observables.remove(&self.observable_id);
        }
        self.state.unregister_computed(self.observable_id);
    }
}

struct ComputeGuard<'a> {
    state: &'a SharedState,
    flag: &'a AtomicBool,
}

impl Drop for ComputeGuard<'_> {
    fn drop(&mut self) {
        self.state.graph().computation_depth -= 1;
        self.flag.store(false, Ordering::Relaxed);
    }
}

/// A memoized derived value.
///
/// Cloning shares the value; the graph nodes are removed when the last
/// handle drops.
pub struct ComputedValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    core: Arc<ComputedCore<T>>,
}

impl<T> ComputedValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Current value, recomputing if a dependency changed.
    ///
    /// # Panics
    ///
    /// Panics on a self-referential getter cycle, and on an untracked
    /// read when the value was configured with `requires_reaction`.
    pub fn get(&self) -> T {
        match self.core.try_get() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Fallible form of [`get`](Self::get).
    pub fn try_get(&self) -> Result<T, ReactiveError> {
        self.core.try_get()
    }

    /// Push a value back through the configured setter, inside an
    /// implicit action.
    ///
    /// # Panics
    ///
    /// Panics when no setter was configured.
    pub fn set(&self, value: T) {
        if let Err(err) = self.try_set(value) {
            panic!("{err}");
        }
    }

    /// Fallible form of [`set`](Self::set).
    pub fn try_set(&self, value: T) -> Result<(), ReactiveError> {
        match &self.core.setter {
            Some(setter) => {
                let name = format!("{}.set", self.core.name);
                self.core.state.run_in_action(&name, || setter(value));
                Ok(())
            }
            None => Err(ReactiveError::SetterMissing {
                name: self.core.name.clone(),
            }),
        }
    }

    /// Whether a memoized value is currently held. False before the first
    /// observed read and again after suspension.
    pub fn has_value(&self) -> bool {
        self.core.value.lock().is_some()
    }

    pub fn observer_count(&self) -> usize {
        self.core.state.graph().observer_count(self.core.observable_id)
    }
}

impl<T> Clone for ComputedValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> Debug for ComputedValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputedValue")
            .field("name", &self.name())
            .field("has_value", &self.has_value())
            .field("observers", &self.observer_count())
            .finish()
    }
}

/// Builder for computed values with non-default options.
pub struct ComputedBuilder<T>
where
    T: Clone + Send + Sync + 'static,
{
    state: SharedState,
    name: String,
    getter: Box<dyn Fn() -> T + Send + Sync>,
    setter: Option<Box<dyn Fn(T) + Send + Sync>>,
    equals: Box<dyn Fn(&T, &T) -> bool + Send + Sync>,
    keep_alive: bool,
    requires_reaction: bool,
}

impl<T> ComputedBuilder<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Keep the cache and upstream subscriptions alive even with no
    /// observers.
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Reject reads outside any reactive context.
    pub fn requires_reaction(mut self, requires_reaction: bool) -> Self {
        self.requires_reaction = requires_reaction;
        self
    }

    /// Replace the equality comparer deciding whether a recomputed result
    /// counts as changed for downstream propagation.
    pub fn with_comparer(mut self, equals: impl Fn(&T, &T) -> bool + Send + Sync + 'static) -> Self {
        self.equals = Box::new(equals);
        self
    }

    /// Accept writes through `set`, routed into this closure inside an
    /// implicit action.
    pub fn with_setter(mut self, setter: impl Fn(T) + Send + Sync + 'static) -> Self {
        self.setter = Some(Box::new(setter));
        self
    }

    pub fn build(self) -> ComputedValue<T> {
        let observable_id = ObservableId::next();
        let derivation_id = DerivationId::next();
        {
            let mut graph = self.state.graph();
            graph.add_observable(
                observable_id,
                ObservableNode::new(self.name.clone(), ObservableKind::Computed(derivation_id)),
            );
            graph.add_derivation(
                derivation_id,
                DerivationNode::new(self.name.clone(), DerivationKind::Computed(observable_id)),
            );
        }
        let core = Arc::new(ComputedCore {
            state: self.state.clone(),
            observable_id,
            derivation_id,
            name: self.name,
            getter: self.getter,
            setter: self.setter,
            equals: self.equals,
            value: Mutex::new(None),
            is_computing: AtomicBool::new(false),
            keep_alive: self.keep_alive,
            requires_reaction: self.requires_reaction,
        });
        let weak = Arc::downgrade(&core);
        let erased: Weak<dyn ErasedComputed> = weak;
        self.state.register_computed(observable_id, erased);
        ComputedValue { core }
    }
}

impl SharedState {
    /// Create a computed value with default options and `PartialEq`
    /// change detection.
    pub fn computed<T>(
        &self,
        name: impl Into<String>,
        getter: impl Fn() -> T + Send + Sync + 'static,
    ) -> ComputedValue<T>
    where
        T: Clone + Send + Sync + PartialEq + 'static,
    {
        self.computed_with(name, getter).build()
    }

    /// Start building a computed value with non-default options.
    pub fn computed_with<T>(
        &self,
        name: impl Into<String>,
        getter: impl Fn() -> T + Send + Sync + 'static,
    ) -> ComputedBuilder<T>
    where
        T: Clone + Send + Sync + PartialEq + 'static,
    {
        ComputedBuilder {
            state: self.clone(),
            name: name.into(),
            getter: Box::new(getter),
            setter: None,
            equals: Box::new(|a, b| a == b),
            keep_alive: false,
            requires_reaction: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::config::{Configuration, EnforceActions};
    use std::sync::atomic::AtomicI32;

    fn relaxed() -> SharedState {
        SharedState::with_config(Configuration {
            enforce_actions: EnforceActions::Never,
            ..Configuration::default()
        })
    }

    #[test]
    fn suspended_reads_recompute_every_time() {
        let state = relaxed();
        let calls = Arc::new(AtomicI32::new(0));
        let calls_in = calls.clone();
        let base = state.observable("base", 3);
        let base_in = base.clone();
        let squared = state.computed("squared", move || {
            calls_in.fetch_add(1, Ordering::SeqCst);
            let v = base_in.get();
            v * v
        });

        // No observers: each read evaluates the getter again and nothing
        // is cached.
        assert_eq!(squared.get(), 9);
        assert_eq!(squared.get(), 9);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!squared.has_value());

        base.set(4);
        assert_eq!(squared.get(), 16);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn keep_alive_memoizes_without_observers() {
        let state = relaxed();
        let calls = Arc::new(AtomicI32::new(0));
        let calls_in = calls.clone();
        let base = state.observable("base", 5);
        let base_in = base.clone();
        let doubled = state
            .computed_with("doubled", move || {
                calls_in.fetch_add(1, Ordering::SeqCst);
                base_in.get() * 2
            })
            .keep_alive(true)
            .build();

        assert_eq!(doubled.get(), 10);
        assert_eq!(doubled.get(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(doubled.has_value());

        base.set(6);
        assert_eq!(doubled.get(), 12);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn set_without_setter_is_an_error() {
        let state = relaxed();
        let computed = state.computed("fixed", || 1);
        assert_eq!(
            computed.try_set(2),
            Err(ReactiveError::SetterMissing {
                name: "fixed".to_string()
            })
        );
    }

    #[test]
    fn setter_routes_through_an_action() {
        let state = relaxed();
        let base = state.observable("base", 1);
        let base_read = base.clone();
        let base_write = base.clone();
        let doubled = state
            .computed_with("doubled", move || base_read.get() * 2)
            .with_setter(move |v| base_write.set(v / 2))
            .build();

        doubled.set(10);
        assert_eq!(base.get(), 5);
        assert_eq!(doubled.get(), 10);
    }

    #[test]
    fn self_referential_getter_is_a_cycle() {
        let state = relaxed();
        let slot: Arc<Mutex<Option<ComputedValue<i32>>>> = Arc::new(Mutex::new(None));
        let slot_in = slot.clone();
        let looped = state.computed("looped", move || {
            let inner = slot_in.lock().clone();
            match inner {
                Some(c) => c.get(),
                None => 0,
            }
        });
        *slot.lock() = Some(looped.clone());

        let err = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| looped.get()));
        assert!(err.is_err());
    }

    #[test]
    fn requires_reaction_rejects_untracked_reads() {
        let state = relaxed();
        let strict = state
            .computed_with("strict", || 1)
            .requires_reaction(true)
            .build();
        assert_eq!(
            strict.try_get(),
            Err(ReactiveError::ComputedRequiresReaction {
                name: "strict".to_string()
            })
        );
    }

    #[test]
    fn dropping_the_last_handle_removes_both_graph_halves() {
        let state = relaxed();
        let computed = state.computed("ephemeral", || 1);
        assert_eq!(state.graph().observables.len(), 1);
        assert_eq!(state.graph().derivations.len(), 1);
        drop(computed);
        assert_eq!(state.graph().observables.len(), 0);
        assert_eq!(state.graph().derivations.len(), 0);
    }
}
