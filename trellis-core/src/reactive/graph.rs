//! Observable/observer graph bookkeeping.
//!
//! This module holds the data half of the runtime: the arenas of observable
//! cells and derivations, the invalidation state machine, and the
//! propagation routines that mark dependents stale when a cell changes.
//!
//! # Design
//!
//! The graph is a directed bipartite structure: observables on one side,
//! derivations (reactions and computed values) on the other. Edges are
//! stored as id sets in both directions rather than as owning references,
//! so the inherently cyclic observable/observer relationship never turns
//! into an ownership cycle. All methods here are pure bookkeeping: no user
//! closure is ever invoked while the graph lock is held. Work that must
//! happen outside the lock (become-observed hooks) is returned to the
//! caller instead of executed in place.
//!
//! # Invalidation states
//!
//! Propagation distinguishes "definitely changed" (a cell was written) from
//! "possibly changed" (a computed value one hop upstream was invalidated
//! but has not been recomputed yet). Derivations downstream of a computed
//! value become `PossiblyStale` and defer the decision until someone
//! actually needs them, which is what makes propagation glitch-free
//! without redundant recomputation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexSet;
use smallvec::SmallVec;

use super::config::EnforceActions;
use super::error::ReactiveError;

/// Unique identifier for an observable cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ObservableId(u64);

impl ObservableId {
    /// Generate a new unique observable ID.
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Unique identifier for a derivation (reaction or computed value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct DerivationId(u64);

impl DerivationId {
    /// Generate a new unique derivation ID.
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// State of a derivation relative to its dependencies.
///
/// The variants form a total order that doubles as a numeric priority:
/// `NotTracking < UpToDate < PossiblyStale < Stale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i8)]
pub enum DerivationState {
    /// Never run, or suspended; holds no dependency edges.
    NotTracking = -1,

    /// All dependencies are known to be unchanged since the last run.
    UpToDate = 0,

    /// A computed dependency was invalidated but has not been recomputed
    /// yet; whether this derivation is actually stale is still unknown.
    PossiblyStale = 1,

    /// At least one dependency definitely changed; the derivation must
    /// re-run before its result can be trusted.
    Stale = 2,
}

/// What an observable node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ObservableKind {
    /// A plain cell (atom, observable value, observable collection).
    Atom,

    /// The output side of a computed value; the id is its derivation half.
    Computed(DerivationId),
}

/// What a derivation node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DerivationKind {
    /// A side-effecting reaction, scheduled through the pending queue.
    Reaction,

    /// The input side of a computed value; the id is its observable half.
    Computed(ObservableId),
}

type Hook = Arc<dyn Fn() + Send + Sync>;

/// One observable cell in the graph.
pub(crate) struct ObservableNode {
    pub(crate) name: String,
    pub(crate) kind: ObservableKind,
    /// Derivations whose most recent completed run read this cell.
    /// Insertion order determines reaction enqueue order.
    pub(crate) observers: IndexSet<DerivationId>,
    pub(crate) is_pending_unobservation: bool,
    pub(crate) is_being_observed: bool,
    /// Run id of the derivation run that last read this cell. Avoids
    /// quadratic duplicate-dependency bookkeeping within one run.
    pub(crate) last_accessed_by: u64,
    /// Minimum state among current observers; used to fast-path repeated
    /// propagation from the same cell.
    pub(crate) lowest_observer_state: DerivationState,
    pub(crate) on_become_observed: Option<Hook>,
    pub(crate) on_become_unobserved: Option<Hook>,
}

impl ObservableNode {
    pub(crate) fn new(name: String, kind: ObservableKind) -> Self {
        Self {
            name,
            kind,
            observers: IndexSet::new(),
            is_pending_unobservation: false,
            is_being_observed: false,
            last_accessed_by: 0,
            lowest_observer_state: DerivationState::UpToDate,
            on_become_observed: None,
            on_become_unobserved: None,
        }
    }

    pub(crate) fn with_hooks(mut self, observed: Option<Hook>, unobserved: Option<Hook>) -> Self {
        self.on_become_observed = observed;
        self.on_become_unobserved = unobserved;
        self
    }
}

/// One derivation in the graph.
pub(crate) struct DerivationNode {
    pub(crate) name: String,
    pub(crate) kind: DerivationKind,
    /// Dependency set from the previous completed run.
    pub(crate) observing: IndexSet<ObservableId>,
    /// Dependencies collected during the current run; swapped into
    /// `observing` by [`Graph::bind_dependencies`].
    pub(crate) new_observing: IndexSet<ObservableId>,
    pub(crate) dependencies_state: DerivationState,
    pub(crate) run_id: u64,
    /// Reactions only: currently sitting in the pending queue.
    pub(crate) is_scheduled: bool,
    /// Reactions only: permanently inert after `dispose`.
    pub(crate) is_disposed: bool,
}

impl DerivationNode {
    pub(crate) fn new(name: String, kind: DerivationKind) -> Self {
        Self {
            name,
            kind,
            observing: IndexSet::new(),
            new_observing: IndexSet::new(),
            dependencies_state: DerivationState::NotTracking,
            run_id: 0,
            is_scheduled: false,
            is_disposed: false,
        }
    }
}

/// Result of a `report_observed` call.
///
/// The become-observed hook must be fired by the caller after releasing
/// the graph lock.
pub(crate) struct ReportOutcome {
    pub(crate) tracked: bool,
    pub(crate) become_observed: Option<Hook>,
}

/// The mutable half of a `SharedState`: arenas, queues, and counters.
///
/// Always accessed under the owning `SharedState`'s mutex.
pub(crate) struct Graph {
    pub(crate) observables: HashMap<ObservableId, ObservableNode>,
    pub(crate) derivations: HashMap<DerivationId, DerivationNode>,

    /// Reentrant batch counter; propagation settles when it returns to 0.
    pub(crate) batch_depth: usize,
    /// The single derivation currently collecting dependencies.
    pub(crate) tracking: Option<DerivationId>,
    /// Nesting depth of computed-value evaluations.
    pub(crate) computation_depth: usize,

    /// Reactions waiting for the next settle cycle, in schedule order.
    pub(crate) pending_reactions: Vec<DerivationId>,
    /// Observables whose observer count dropped to zero during the batch.
    pub(crate) pending_unobservations: Vec<ObservableId>,

    pub(crate) run_id_counter: u64,
    pub(crate) next_action_id: u64,
    /// Innermost running action, 0 when outside any action.
    pub(crate) current_action_id: u64,

    pub(crate) is_running_reactions: bool,
    pub(crate) allow_state_changes: bool,
    pub(crate) allow_state_reads: bool,
    pub(crate) allow_changes_inside_computed: bool,
    pub(crate) suppress_reaction_errors: bool,
}

impl Graph {
    pub(crate) fn new() -> Self {
        Self {
            observables: HashMap::new(),
            derivations: HashMap::new(),
            batch_depth: 0,
            tracking: None,
            computation_depth: 0,
            pending_reactions: Vec::new(),
            pending_unobservations: Vec::new(),
            run_id_counter: 0,
            next_action_id: 1,
            current_action_id: 0,
            is_running_reactions: false,
            allow_state_changes: false,
            allow_state_reads: true,
            allow_changes_inside_computed: false,
            suppress_reaction_errors: false,
        }
    }

    pub(crate) fn add_observable(&mut self, id: ObservableId, node: ObservableNode) {
        self.observables.insert(id, node);
    }

    pub(crate) fn add_derivation(&mut self, id: DerivationId, node: DerivationNode) {
        self.derivations.insert(id, node);
    }

    /// Record a read of `id` by the currently tracked derivation, if any.
    pub(crate) fn report_observed(&mut self, id: ObservableId) -> ReportOutcome {
        if let Some(derivation) = self.tracking {
            let run_id = self
                .derivations
                .get(&derivation)
                .map(|d| d.run_id)
                .unwrap_or(0);
            let mut hook = None;
            if let Some(node) = self.observables.get_mut(&id) {
                if node.last_accessed_by != run_id {
                    node.last_accessed_by = run_id;
                    if !node.is_being_observed {
                        node.is_being_observed = true;
                        hook = node.on_become_observed.clone();
                    }
                    if let Some(der) = self.derivations.get_mut(&derivation) {
                        der.new_observing.insert(id);
                    }
                }
            }
            ReportOutcome {
                tracked: true,
                become_observed: hook,
            }
        } else {
            // An untracked read inside a batch of a cell nobody observes:
            // queue it so a computed evaluated this way is suspended again
            // at batch end.
            if self.batch_depth > 0 {
                let unobserved = self
                    .observables
                    .get(&id)
                    .map(|n| n.observers.is_empty())
                    .unwrap_or(false);
                if unobserved {
                    self.queue_for_unobservation(id);
                }
            }
            ReportOutcome {
                tracked: false,
                become_observed: None,
            }
        }
    }

    /// A directly-observed cell changed: mark every observer at least
    /// `Stale` and enqueue reaction observers.
    pub(crate) fn propagate_changed(&mut self, id: ObservableId) {
        let observers: SmallVec<[DerivationId; 8]> = {
            let Some(node) = self.observables.get_mut(&id) else {
                return;
            };
            if node.lowest_observer_state == DerivationState::Stale {
                return;
            }
            node.lowest_observer_state = DerivationState::Stale;
            node.observers.iter().copied().collect()
        };
        for derivation in observers {
            let became_stale = {
                let Some(der) = self.derivations.get_mut(&derivation) else {
                    continue;
                };
                let was_up_to_date = der.dependencies_state == DerivationState::UpToDate;
                der.dependencies_state = DerivationState::Stale;
                was_up_to_date
            };
            if became_stale {
                self.on_become_stale(derivation);
            }
        }
    }

    /// A computed value was invalidated but not yet recomputed: mark
    /// `UpToDate` observers `PossiblyStale`, deferring their decision.
    pub(crate) fn propagate_maybe_changed(&mut self, id: ObservableId) {
        let observers: SmallVec<[DerivationId; 8]> = {
            let Some(node) = self.observables.get_mut(&id) else {
                return;
            };
            if node.lowest_observer_state != DerivationState::UpToDate {
                return;
            }
            node.lowest_observer_state = DerivationState::PossiblyStale;
            node.observers.iter().copied().collect()
        };
        for derivation in observers {
            let became_stale = {
                let Some(der) = self.derivations.get_mut(&derivation) else {
                    continue;
                };
                if der.dependencies_state == DerivationState::UpToDate {
                    der.dependencies_state = DerivationState::PossiblyStale;
                    true
                } else {
                    false
                }
            };
            if became_stale {
                self.on_become_stale(derivation);
            }
        }
    }

    /// A computed value's memoized result definitely changed: promote
    /// `PossiblyStale` observers to `Stale`. An observer that is already
    /// `UpToDate` has re-read the fresh value, so the cell's
    /// lowest-observer fast path is reset instead.
    pub(crate) fn propagate_change_confirmed(&mut self, id: ObservableId) {
        let observers: SmallVec<[DerivationId; 8]> = {
            let Some(node) = self.observables.get_mut(&id) else {
                return;
            };
            if node.lowest_observer_state == DerivationState::Stale {
                return;
            }
            node.lowest_observer_state = DerivationState::Stale;
            node.observers.iter().copied().collect()
        };
        let mut reset_lowest = false;
        for derivation in observers {
            if let Some(der) = self.derivations.get_mut(&derivation) {
                match der.dependencies_state {
                    DerivationState::PossiblyStale => {
                        der.dependencies_state = DerivationState::Stale;
                    }
                    DerivationState::UpToDate => reset_lowest = true,
                    _ => {}
                }
            }
        }
        if reset_lowest {
            if let Some(node) = self.observables.get_mut(&id) {
                node.lowest_observer_state = DerivationState::UpToDate;
            }
        }
    }

    fn on_become_stale(&mut self, derivation: DerivationId) {
        match self.derivations.get(&derivation).map(|d| d.kind) {
            Some(DerivationKind::Reaction) => {
                self.schedule_reaction(derivation);
            }
            Some(DerivationKind::Computed(observable)) => {
                self.propagate_maybe_changed(observable);
            }
            None => {}
        }
    }

    /// Enqueue a reaction for the next settle cycle. Idempotent while the
    /// reaction is still queued; no-op after disposal.
    pub(crate) fn schedule_reaction(&mut self, derivation: DerivationId) -> bool {
        if let Some(der) = self.derivations.get_mut(&derivation) {
            if matches!(der.kind, DerivationKind::Reaction) && !der.is_disposed && !der.is_scheduled
            {
                der.is_scheduled = true;
                self.pending_reactions.push(derivation);
                return true;
            }
        }
        false
    }

    /// Begin a tracked run: assign a fresh run id, clear the collection
    /// buffer, reset stale bookkeeping, and install the derivation as the
    /// tracking context. Returns the previous tracking context.
    pub(crate) fn start_tracking(&mut self, derivation: DerivationId) -> Option<DerivationId> {
        self.run_id_counter += 1;
        let run_id = self.run_id_counter;
        self.reset_dependencies_state(derivation);
        if let Some(der) = self.derivations.get_mut(&derivation) {
            der.run_id = run_id;
            der.new_observing.clear();
        }
        self.tracking.replace(derivation)
    }

    /// Set the derivation back to `UpToDate` and lower the fast-path state
    /// of everything it observes, so future propagation is not skipped.
    pub(crate) fn reset_dependencies_state(&mut self, derivation: DerivationId) {
        let observing: SmallVec<[ObservableId; 8]> = {
            let Some(der) = self.derivations.get_mut(&derivation) else {
                return;
            };
            if der.dependencies_state == DerivationState::UpToDate {
                return;
            }
            der.dependencies_state = DerivationState::UpToDate;
            der.observing.iter().copied().collect()
        };
        for id in observing {
            if let Some(node) = self.observables.get_mut(&id) {
                node.lowest_observer_state = DerivationState::UpToDate;
            }
        }
    }

    /// Diff the dependencies collected during the run that just finished
    /// against the previous run's set, and update observer edges to match.
    ///
    /// Dependencies are re-derived from the most recent execution, so a
    /// derivation's dependency set shrinks and grows with conditional
    /// reads; removed cells that lose their last observer are queued for
    /// unobservation at batch end.
    pub(crate) fn bind_dependencies(&mut self, derivation: DerivationId) {
        let (added, removed): (SmallVec<[ObservableId; 8]>, SmallVec<[ObservableId; 8]>) = {
            let Some(der) = self.derivations.get_mut(&derivation) else {
                return;
            };
            let new_set = std::mem::take(&mut der.new_observing);
            let old_set = std::mem::replace(&mut der.observing, new_set);
            // The state was reset to UpToDate when the run started; a
            // dependency written during the run has legitimately marked it
            // Stale again, and that mark must survive binding so the
            // re-queued run actually executes.
            let added = der
                .observing
                .iter()
                .filter(|id| !old_set.contains(*id))
                .copied()
                .collect();
            let removed = old_set
                .iter()
                .filter(|id| !der.observing.contains(*id))
                .copied()
                .collect();
            (added, removed)
        };
        for id in added {
            self.add_observer(id, derivation);
        }
        for id in removed {
            self.remove_observer(id, derivation);
        }
    }

    fn add_observer(&mut self, id: ObservableId, derivation: DerivationId) {
        let state = self
            .derivations
            .get(&derivation)
            .map(|d| d.dependencies_state)
            .unwrap_or(DerivationState::UpToDate);
        if let Some(node) = self.observables.get_mut(&id) {
            node.observers.insert(derivation);
            if node.lowest_observer_state > state {
                node.lowest_observer_state = state;
            }
        }
    }

    pub(crate) fn remove_observer(&mut self, id: ObservableId, derivation: DerivationId) {
        let now_unobserved = if let Some(node) = self.observables.get_mut(&id) {
            node.observers.shift_remove(&derivation);
            node.observers.is_empty()
        } else {
            false
        };
        if now_unobserved {
            self.queue_for_unobservation(id);
        }
    }

    pub(crate) fn queue_for_unobservation(&mut self, id: ObservableId) {
        if let Some(node) = self.observables.get_mut(&id) {
            if !node.is_pending_unobservation {
                node.is_pending_unobservation = true;
                self.pending_unobservations.push(id);
            }
        }
    }

    /// Drop every dependency edge of a derivation. Used by reaction
    /// disposal and computed suspension.
    pub(crate) fn clear_observing(&mut self, derivation: DerivationId) {
        let observing: SmallVec<[ObservableId; 8]> = self
            .derivations
            .get_mut(&derivation)
            .map(|der| der.observing.drain(..).collect())
            .unwrap_or_default();
        for id in observing {
            self.remove_observer(id, derivation);
        }
    }

    /// Gate for mutations of observable cells: the computed-purity check
    /// applies under every policy, the action check per configuration.
    pub(crate) fn check_state_change_allowed(
        &self,
        id: ObservableId,
        policy: EnforceActions,
    ) -> Result<(), ReactiveError> {
        let Some(node) = self.observables.get(&id) else {
            return Ok(());
        };
        let observed = !node.observers.is_empty();
        if self.computation_depth > 0 && observed && !self.allow_changes_inside_computed {
            return Err(ReactiveError::SideEffectInsideComputed {
                cell: node.name.clone(),
            });
        }
        let violated = match policy {
            EnforceActions::Never => false,
            EnforceActions::Observed => !self.allow_state_changes && observed,
            EnforceActions::Always => !self.allow_state_changes,
        };
        if violated {
            return Err(ReactiveError::StateChangeOutsideAction {
                cell: node.name.clone(),
                policy,
            });
        }
        Ok(())
    }

    pub(crate) fn check_state_read_allowed(&self, id: ObservableId) -> Result<(), ReactiveError> {
        if self.allow_state_reads {
            return Ok(());
        }
        let cell = self
            .observables
            .get(&id)
            .map(|n| n.name.clone())
            .unwrap_or_default();
        Err(ReactiveError::ReadNotAllowed { cell })
    }

    pub(crate) fn observer_count(&self, id: ObservableId) -> usize {
        self.observables
            .get(&id)
            .map(|n| n.observers.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(graph: &mut Graph, name: &str) -> ObservableId {
        let id = ObservableId::next();
        graph.add_observable(id, ObservableNode::new(name.to_string(), ObservableKind::Atom));
        id
    }

    fn reaction(graph: &mut Graph, name: &str) -> DerivationId {
        let id = DerivationId::next();
        graph.add_derivation(id, DerivationNode::new(name.to_string(), DerivationKind::Reaction));
        id
    }

    /// Run `derivation` as if it had read exactly `reads`.
    fn run_with_reads(graph: &mut Graph, derivation: DerivationId, reads: &[ObservableId]) {
        let prev = graph.start_tracking(derivation);
        for &id in reads {
            graph.report_observed(id);
        }
        graph.tracking = prev;
        graph.bind_dependencies(derivation);
    }

    #[test]
    fn state_order_matches_numeric_priority() {
        assert!(DerivationState::NotTracking < DerivationState::UpToDate);
        assert!(DerivationState::UpToDate < DerivationState::PossiblyStale);
        assert!(DerivationState::PossiblyStale < DerivationState::Stale);
    }

    #[test]
    fn tracked_read_records_dependency_once() {
        let mut graph = Graph::new();
        let a = atom(&mut graph, "a");
        let r = reaction(&mut graph, "r");

        let prev = graph.start_tracking(r);
        assert!(graph.report_observed(a).tracked);
        // Second read in the same run hits the run-id fast path.
        graph.report_observed(a);
        graph.tracking = prev;
        graph.bind_dependencies(r);

        assert_eq!(graph.observer_count(a), 1);
        assert_eq!(
            graph.derivations[&r].observing.iter().count(),
            1
        );
    }

    #[test]
    fn untracked_read_reports_no_context() {
        let mut graph = Graph::new();
        let a = atom(&mut graph, "a");
        assert!(!graph.report_observed(a).tracked);
    }

    #[test]
    fn propagate_changed_marks_observers_stale_and_schedules() {
        let mut graph = Graph::new();
        let a = atom(&mut graph, "a");
        let r = reaction(&mut graph, "r");
        run_with_reads(&mut graph, r, &[a]);

        graph.propagate_changed(a);

        assert_eq!(graph.derivations[&r].dependencies_state, DerivationState::Stale);
        assert_eq!(graph.pending_reactions, vec![r]);

        // Repeated propagation from the same cell takes the fast path and
        // does not enqueue twice.
        graph.propagate_changed(a);
        assert_eq!(graph.pending_reactions, vec![r]);
    }

    #[test]
    fn schedule_is_idempotent_and_respects_disposal() {
        let mut graph = Graph::new();
        let r = reaction(&mut graph, "r");

        assert!(graph.schedule_reaction(r));
        assert!(!graph.schedule_reaction(r));
        assert_eq!(graph.pending_reactions.len(), 1);

        graph.pending_reactions.clear();
        graph.derivations.get_mut(&r).unwrap().is_scheduled = false;
        graph.derivations.get_mut(&r).unwrap().is_disposed = true;
        assert!(!graph.schedule_reaction(r));
    }

    #[test]
    fn rebinding_drops_stale_edges_and_queues_unobservation() {
        let mut graph = Graph::new();
        let a = atom(&mut graph, "a");
        let b = atom(&mut graph, "b");
        let r = reaction(&mut graph, "r");

        run_with_reads(&mut graph, r, &[a, b]);
        assert_eq!(graph.observer_count(a), 1);
        assert_eq!(graph.observer_count(b), 1);

        // Next run only reads `a`: `b` loses its last observer.
        run_with_reads(&mut graph, r, &[a]);
        assert_eq!(graph.observer_count(b), 0);
        assert!(graph.pending_unobservations.contains(&b));
        assert!(graph.observables[&b].is_pending_unobservation);
    }

    #[test]
    fn staleness_acquired_during_a_run_survives_binding() {
        let mut graph = Graph::new();
        let a = atom(&mut graph, "a");
        let r = reaction(&mut graph, "r");
        run_with_reads(&mut graph, r, &[a]);

        // Re-run `r`, writing its own dependency mid-run.
        let prev = graph.start_tracking(r);
        graph.report_observed(a);
        graph.propagate_changed(a);
        graph.tracking = prev;
        graph.bind_dependencies(r);

        // The write re-queued the reaction; binding must leave the Stale
        // mark in place so the re-run is not skipped.
        assert_eq!(graph.derivations[&r].dependencies_state, DerivationState::Stale);
        assert_eq!(graph.pending_reactions, vec![r]);
    }

    #[test]
    fn maybe_changed_defers_and_confirmed_promotes() {
        let mut graph = Graph::new();
        // One computed value: derivation half `cd`, observable half `co`.
        let co = ObservableId::next();
        let cd = DerivationId::next();
        graph.add_observable(
            co,
            ObservableNode::new("c".to_string(), ObservableKind::Computed(cd)),
        );
        graph.add_derivation(
            cd,
            DerivationNode::new("c".to_string(), DerivationKind::Computed(co)),
        );
        let r = reaction(&mut graph, "r");
        run_with_reads(&mut graph, r, &[co]);

        graph.propagate_maybe_changed(co);
        assert_eq!(
            graph.derivations[&r].dependencies_state,
            DerivationState::PossiblyStale
        );
        assert_eq!(graph.pending_reactions, vec![r]);

        graph.propagate_change_confirmed(co);
        assert_eq!(graph.derivations[&r].dependencies_state, DerivationState::Stale);
    }

    #[test]
    fn change_policy_gates() {
        let mut graph = Graph::new();
        let a = atom(&mut graph, "a");
        let r = reaction(&mut graph, "r");

        // Unobserved cell, Observed policy: allowed.
        assert!(graph
            .check_state_change_allowed(a, EnforceActions::Observed)
            .is_ok());
        // Always policy outside an action: rejected.
        assert!(matches!(
            graph.check_state_change_allowed(a, EnforceActions::Always),
            Err(ReactiveError::StateChangeOutsideAction { .. })
        ));

        run_with_reads(&mut graph, r, &[a]);
        // Observed cell outside an action: rejected under Observed.
        assert!(matches!(
            graph.check_state_change_allowed(a, EnforceActions::Observed),
            Err(ReactiveError::StateChangeOutsideAction { .. })
        ));
        // Never disables the check entirely.
        assert!(graph
            .check_state_change_allowed(a, EnforceActions::Never)
            .is_ok());

        // Inside an action the flag is forced on.
        graph.allow_state_changes = true;
        assert!(graph
            .check_state_change_allowed(a, EnforceActions::Always)
            .is_ok());
    }

    #[test]
    fn computed_side_effect_gate_names_the_cell() {
        let mut graph = Graph::new();
        let a = atom(&mut graph, "price");
        let r = reaction(&mut graph, "r");
        run_with_reads(&mut graph, r, &[a]);

        graph.computation_depth = 1;
        let err = graph
            .check_state_change_allowed(a, EnforceActions::Never)
            .unwrap_err();
        assert_eq!(
            err,
            ReactiveError::SideEffectInsideComputed {
                cell: "price".to_string()
            }
        );

        // The explicit escape scope lifts the restriction.
        graph.allow_changes_inside_computed = true;
        assert!(graph
            .check_state_change_allowed(a, EnforceActions::Never)
            .is_ok());
    }

    #[test]
    fn read_gate() {
        let mut graph = Graph::new();
        let a = atom(&mut graph, "a");
        assert!(graph.check_state_read_allowed(a).is_ok());
        graph.allow_state_reads = false;
        assert!(matches!(
            graph.check_state_read_allowed(a),
            Err(ReactiveError::ReadNotAllowed { .. })
        ));
    }
}
