//! Shared runtime state.
//!
//! A [`SharedState`] is one independent reactive universe: it owns the
//! observable/observer graph, the batch counter, the pending-reaction and
//! pending-unobservation queues, and the registries that map graph ids back
//! to the reaction and computed-value handles that can actually run user
//! code.
//!
//! # Scheduling model
//!
//! Single-threaded cooperative per instance: correctness relies on the
//! nested save/restore discipline of actions and tracked runs, not on the
//! locks. The locks exist so a `SharedState` handle is cheap to clone and
//! hand around (the teacher pattern for runtime handles); they are never
//! held across user closures, which is what keeps re-entrant reads and
//! writes from deadlocking. Distinct instances are fully isolated.
//!
//! # Settle cycle
//!
//! Closing the outermost batch drains the pending reactions to a fixpoint
//! and then processes pending unobservations, atomically as one settle
//! cycle. Reactions that fail to converge within the configured iteration
//! bound are discarded and the cycle fails loudly; an infeasible reactive
//! cycle is a program bug, not something to loop on forever.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard, RwLock};
use smallvec::SmallVec;

use super::computed::ErasedComputed;
use super::config::Configuration;
use super::error::ReactiveError;
use super::graph::{DerivationId, DerivationState, Graph, ObservableId};
use super::reaction::ReactionCore;
use super::spy::SpyEvent;

pub(crate) type SpyListener = Arc<dyn Fn(&SpyEvent) + Send + Sync>;

pub(crate) struct StateInner {
    pub(crate) graph: Mutex<Graph>,
    pub(crate) config: Configuration,
    /// Reactions stay registered until disposed; `dispose` is the only
    /// teardown primitive for them.
    pub(crate) reactions: Mutex<HashMap<DerivationId, Arc<ReactionCore>>>,
    /// Computed values register weakly; dropping the last user handle
    /// removes them from the universe.
    pub(crate) computeds: Mutex<HashMap<ObservableId, Weak<dyn ErasedComputed>>>,
    pub(crate) spy: RwLock<Vec<(u64, SpyListener)>>,
    pub(crate) next_spy_id: Mutex<u64>,
}

/// Handle to one reactive universe.
///
/// Cloning is cheap and shares the universe. Every public entry point of
/// the crate hangs off this type (or off the ambient-context convenience
/// wrappers that resolve to one).
pub struct SharedState {
    pub(crate) inner: Arc<StateInner>,
}

impl Clone for SharedState {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SharedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let graph = self.graph();
        f.debug_struct("SharedState")
            .field("observables", &graph.observables.len())
            .field("derivations", &graph.derivations.len())
            .field("batch_depth", &graph.batch_depth)
            .field("pending_reactions", &graph.pending_reactions.len())
            .finish()
    }
}

impl SharedState {
    /// Create a universe with the default configuration.
    pub fn new() -> Self {
        Self::with_config(Configuration::default())
    }

    /// Create a universe with an explicit configuration.
    pub fn with_config(config: Configuration) -> Self {
        Self {
            inner: Arc::new(StateInner {
                graph: Mutex::new(Graph::new()),
                config,
                reactions: Mutex::new(HashMap::new()),
                computeds: Mutex::new(HashMap::new()),
                spy: RwLock::new(Vec::new()),
                next_spy_id: Mutex::new(1),
            }),
        }
    }

    pub fn config(&self) -> &Configuration {
        &self.inner.config
    }

    pub(crate) fn graph(&self) -> MutexGuard<'_, Graph> {
        self.inner.graph.lock()
    }

    /// True while two universes share the same underlying state.
    pub fn same_universe(&self, other: &SharedState) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Current batch nesting depth.
    pub fn batch_depth(&self) -> usize {
        self.graph().batch_depth
    }

    // ------------------------------------------------------------------
    // Batching
    // ------------------------------------------------------------------

    /// Open a (reentrant) batch. Propagation is deferred until the
    /// outermost matching [`end_batch`](Self::end_batch).
    pub fn start_batch(&self) {
        self.graph().batch_depth += 1;
    }

    /// Close a batch. Closing the outermost batch runs the settle cycle:
    /// reaction drain to a fixpoint, then pending unobservations.
    ///
    /// # Panics
    ///
    /// Panics on a batch that was never started (a caller bug) and on
    /// reaction non-convergence.
    pub fn end_batch(&self) {
        let depth = {
            let mut graph = self.graph();
            assert!(
                graph.batch_depth > 0,
                "{}",
                ReactiveError::UnbalancedBatch
            );
            graph.batch_depth -= 1;
            graph.batch_depth
        };
        if depth == 0 {
            self.run_pending_reactions();
            self.process_pending_unobservations();
        }
    }

    /// Run `body` inside a batch.
    pub fn batch<R>(&self, body: impl FnOnce() -> R) -> R {
        self.start_batch();
        let _guard = BatchGuard { state: self };
        body()
    }

    // ------------------------------------------------------------------
    // Settle cycle
    // ------------------------------------------------------------------

    /// Drain the pending-reaction queue to a fixpoint. No-op while a batch
    /// is open or a drain is already in progress on this universe.
    pub(crate) fn run_pending_reactions(&self) {
        {
            let mut graph = self.graph();
            if graph.batch_depth > 0 || graph.is_running_reactions {
                return;
            }
            graph.is_running_reactions = true;
        }

        let max_iterations = self.inner.config.max_reaction_iterations;
        let mut iterations = 0usize;
        let mut failure: Option<ReactiveError> = None;

        loop {
            let batch: Vec<DerivationId> = {
                let mut graph = self.graph();
                if graph.pending_reactions.is_empty() {
                    break;
                }
                iterations += 1;
                if iterations == max_iterations {
                    // The program has an infeasible reactive cycle; drop
                    // the remaining queue so work stays bounded.
                    let first = graph
                        .pending_reactions
                        .first()
                        .and_then(|id| graph.derivations.get(id))
                        .map(|d| d.name.clone())
                        .unwrap_or_default();
                    for id in std::mem::take(&mut graph.pending_reactions) {
                        if let Some(der) = graph.derivations.get_mut(&id) {
                            der.is_scheduled = false;
                        }
                    }
                    failure = Some(ReactiveError::NonConvergence {
                        iterations,
                        reaction: first,
                    });
                    break;
                }
                std::mem::take(&mut graph.pending_reactions)
            };

            let cores: Vec<Arc<ReactionCore>> = {
                let registry = self.inner.reactions.lock();
                batch.iter().filter_map(|id| registry.get(id).cloned()).collect()
            };
            tracing::trace!(iteration = iterations, reactions = cores.len(), "settling");
            for core in cores {
                core.run_reaction();
            }
        }

        {
            let mut graph = self.graph();
            graph.is_running_reactions = false;
            // A failing action suppresses reaction-error noise only for
            // the settle cycle it belongs to.
            graph.suppress_reaction_errors = false;
        }

        if let Some(err) = failure {
            tracing::error!(%err, "reaction queue discarded");
            panic!("{err}");
        }
    }

    /// Fire become-unobserved hooks and suspend computed values whose last
    /// observer went away during the batch. Suspending a computed releases
    /// its own upstream subscriptions, which may queue further
    /// unobservations; those are handled in the same pass.
    fn process_pending_unobservations(&self) {
        loop {
            let (hooks, to_suspend) = {
                let mut graph = self.graph();
                if graph.pending_unobservations.is_empty() {
                    return;
                }
                let ids = std::mem::take(&mut graph.pending_unobservations);
                let mut hooks: Vec<Arc<dyn Fn() + Send + Sync>> = Vec::new();
                let mut to_suspend: Vec<ObservableId> = Vec::new();
                for id in ids {
                    let Some(node) = graph.observables.get_mut(&id) else {
                        continue;
                    };
                    node.is_pending_unobservation = false;
                    if !node.observers.is_empty() {
                        continue;
                    }
                    if node.is_being_observed {
                        node.is_being_observed = false;
                        if let Some(hook) = node.on_become_unobserved.clone() {
                            hooks.push(hook);
                        }
                    }
                    if matches!(node.kind, super::graph::ObservableKind::Computed(_)) {
                        to_suspend.push(id);
                    }
                }
                (hooks, to_suspend)
            };
            for hook in hooks {
                hook();
            }
            for id in to_suspend {
                if let Some(computed) = self.computed_for(id) {
                    computed.suspend();
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Derivation support
    // ------------------------------------------------------------------

    /// Decide whether a derivation must re-run, resolving `PossiblyStale`
    /// by forcing its computed dependencies depth-first.
    pub(crate) fn should_compute(&self, derivation: DerivationId) -> bool {
        let (state, observing): (DerivationState, SmallVec<[ObservableId; 8]>) = {
            let graph = self.graph();
            let Some(der) = graph.derivations.get(&derivation) else {
                return false;
            };
            (der.dependencies_state, der.observing.iter().copied().collect())
        };
        match state {
            DerivationState::UpToDate => false,
            DerivationState::NotTracking | DerivationState::Stale => true,
            DerivationState::PossiblyStale => self.untracked(|| {
                for observable in observing {
                    if let Some(computed) = self.computed_for(observable) {
                        computed.ensure_up_to_date();
                        let now = self
                            .graph()
                            .derivations
                            .get(&derivation)
                            .map(|d| d.dependencies_state);
                        if now == Some(DerivationState::Stale) {
                            return true;
                        }
                    }
                }
                self.graph().reset_dependencies_state(derivation);
                false
            }),
        }
    }

    /// Run `body` as a tracked derivation run: dependencies read during
    /// the run are collected and bound (diffed against the previous run)
    /// when the run ends, even if the body panics.
    pub(crate) fn track<R>(&self, derivation: DerivationId, body: impl FnOnce() -> R) -> R {
        let (prev_tracking, prev_allow_reads) = {
            let mut graph = self.graph();
            let prev_reads = std::mem::replace(&mut graph.allow_state_reads, true);
            (graph.start_tracking(derivation), prev_reads)
        };
        let _guard = TrackGuard {
            state: self,
            derivation,
            prev_tracking,
            prev_allow_reads,
        };
        body()
    }

    /// Run `body` with dependency tracking suspended.
    pub fn untracked<R>(&self, body: impl FnOnce() -> R) -> R {
        let prev = self.graph().tracking.take();
        let _guard = UntrackedGuard { state: self, prev };
        body()
    }

    /// Run `body` with state reads allowed or disallowed.
    pub fn allow_state_reads<R>(&self, allow: bool, body: impl FnOnce() -> R) -> R {
        let prev = {
            let mut graph = self.graph();
            std::mem::replace(&mut graph.allow_state_reads, allow)
        };
        let _guard = AllowReadsGuard { state: self, prev };
        body()
    }

    /// Escape hatch: run `body` with the computed-purity check lifted, so
    /// a computed getter may mutate observed cells. Use sparingly; the
    /// memoization invariants assume getters are pure.
    pub fn allow_state_changes_inside_computed<R>(&self, body: impl FnOnce() -> R) -> R {
        let prev = {
            let mut graph = self.graph();
            std::mem::replace(&mut graph.allow_changes_inside_computed, true)
        };
        let _guard = AllowComputedChangesGuard { state: self, prev };
        body()
    }

    // ------------------------------------------------------------------
    // Registries
    // ------------------------------------------------------------------

    pub(crate) fn register_reaction(&self, id: DerivationId, core: Arc<ReactionCore>) {
        self.inner.reactions.lock().insert(id, core);
    }

    pub(crate) fn unregister_reaction(&self, id: DerivationId) {
        self.inner.reactions.lock().remove(&id);
    }

    pub(crate) fn register_computed(&self, id: ObservableId, core: Weak<dyn ErasedComputed>) {
        self.inner.computeds.lock().insert(id, core);
    }

    pub(crate) fn unregister_computed(&self, id: ObservableId) {
        self.inner.computeds.lock().remove(&id);
    }

    pub(crate) fn computed_for(&self, id: ObservableId) -> Option<Arc<dyn ErasedComputed>> {
        self.inner.computeds.lock().get(&id).and_then(Weak::upgrade)
    }
}

struct BatchGuard<'a> {
    state: &'a SharedState,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.state.end_batch();
    }
}

struct TrackGuard<'a> {
    state: &'a SharedState,
    derivation: DerivationId,
    prev_tracking: Option<DerivationId>,
    prev_allow_reads: bool,
}

impl Drop for TrackGuard<'_> {
    fn drop(&mut self) {
        let mut graph = self.state.graph();
        graph.tracking = self.prev_tracking;
        graph.allow_state_reads = self.prev_allow_reads;
        graph.bind_dependencies(self.derivation);
    }
}

struct UntrackedGuard<'a> {
    state: &'a SharedState,
    prev: Option<DerivationId>,
}

impl Drop for UntrackedGuard<'_> {
    fn drop(&mut self) {
        self.state.graph().tracking = self.prev;
    }
}

struct AllowReadsGuard<'a> {
    state: &'a SharedState,
    prev: bool,
}

impl Drop for AllowReadsGuard<'_> {
    fn drop(&mut self) {
        self.state.graph().allow_state_reads = self.prev;
    }
}

struct AllowComputedChangesGuard<'a> {
    state: &'a SharedState,
    prev: bool,
}

impl Drop for AllowComputedChangesGuard<'_> {
    fn drop(&mut self) {
        self.state.graph().allow_changes_inside_computed = self.prev;
    }
}
