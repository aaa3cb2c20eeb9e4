//! Actions.
//!
//! An action is the unit of intentional mutation: a named, batched scope
//! in which writes are permitted regardless of the enforcement policy and
//! dependency tracking is suspended. Nested actions flatten into the
//! outermost one; reactions observe only the settled end state.
//!
//! State is saved on entry and restored through a drop guard, so a body
//! that panics still unwinds the runtime to exactly the state it had
//! before the action, with the batch closed and pending work settled.

use std::time::Instant;

use super::graph::DerivationId;
use super::spy::SpyEvent;
use super::state::SharedState;

struct ActionGuard<'a> {
    state: &'a SharedState,
    action_id: u64,
    name: String,
    prev_action_id: u64,
    prev_tracking: Option<DerivationId>,
    prev_allow_changes: bool,
    prev_allow_reads: bool,
    started: Instant,
}

impl<'a> ActionGuard<'a> {
    fn enter(state: &'a SharedState, name: &str, scope: Option<&str>) -> Self {
        let (action_id, prev_action_id, prev_tracking, prev_allow_changes, prev_allow_reads) = {
            let mut graph = state.graph();
            let prev_tracking = graph.tracking.take();
            let action_id = graph.next_action_id;
            graph.next_action_id += 1;
            let prev_action_id = std::mem::replace(&mut graph.current_action_id, action_id);
            let prev_allow_changes = std::mem::replace(&mut graph.allow_state_changes, true);
            let prev_allow_reads = std::mem::replace(&mut graph.allow_state_reads, true);
            graph.batch_depth += 1;
            (
                action_id,
                prev_action_id,
                prev_tracking,
                prev_allow_changes,
                prev_allow_reads,
            )
        };
        state.emit_spy(&SpyEvent::ActionStart {
            action_id,
            parent_action_id: prev_action_id,
            name: name.to_string(),
            scope: scope.map(str::to_string),
        });
        Self {
            state,
            action_id,
            name: name.to_string(),
            prev_action_id,
            prev_tracking,
            prev_allow_changes,
            prev_allow_reads,
            started: Instant::now(),
        }
    }
}

impl Drop for ActionGuard<'_> {
    fn drop(&mut self) {
        let failed = std::thread::panicking();
        {
            let mut graph = self.state.graph();
            if failed {
                // The settle cycle of a failed action should not double-
                // report; the propagating panic is the signal.
                graph.suppress_reaction_errors = true;
            }
            graph.current_action_id = self.prev_action_id;
            graph.allow_state_changes = self.prev_allow_changes;
            graph.allow_state_reads = self.prev_allow_reads;
        }
        self.state.emit_spy(&SpyEvent::ActionEnd {
            action_id: self.action_id,
            name: self.name.clone(),
            duration: self.started.elapsed(),
            failed,
        });
        self.state.end_batch();
        self.state.graph().tracking = self.prev_tracking;
    }
}

impl SharedState {
    /// Run `body` as a named action.
    pub fn run_in_action<R>(&self, name: &str, body: impl FnOnce() -> R) -> R {
        let _guard = ActionGuard::enter(self, name, None);
        body()
    }

    /// Run `body` as an action carrying a scope label, for telemetry that
    /// groups actions by the entity they belong to.
    pub fn run_in_scoped_action<R>(&self, name: &str, scope: &str, body: impl FnOnce() -> R) -> R {
        let _guard = ActionGuard::enter(self, name, Some(scope));
        body()
    }

    /// Wrap a closure so every invocation runs as a named action.
    pub fn create_action(
        &self,
        name: impl Into<String>,
        body: impl Fn() + Send + Sync + 'static,
    ) -> impl Fn() + Send + Sync + 'static {
        let state = self.clone();
        let name = name.into();
        move || state.run_in_action(&name, &body)
    }

    /// [`create_action`](Self::create_action) with a scope label.
    pub fn create_scoped_action(
        &self,
        name: impl Into<String>,
        scope: impl Into<String>,
        body: impl Fn() + Send + Sync + 'static,
    ) -> impl Fn() + Send + Sync + 'static {
        let state = self.clone();
        let name = name.into();
        let scope = scope.into();
        move || state.run_in_scoped_action(&name, &scope, &body)
    }
}
