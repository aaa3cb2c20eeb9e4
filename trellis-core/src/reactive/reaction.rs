//! Reactions.
//!
//! A reaction is a derivation whose output is a side effect instead of a
//! value. It re-runs whenever a dependency of its most recent run changes,
//! with each run re-deriving the dependency set, and it lives until
//! explicitly disposed. A panic inside one reaction is caught and reported
//! rather than tearing down the settle cycle, so one faulty effect cannot
//! starve its siblings.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::graph::{DerivationId, DerivationKind, DerivationNode, DerivationState};
use super::spy::SpyEvent;
use super::state::SharedState;

/// The runnable half of a reaction, shared between the user handle and the
/// runtime's reaction registry.
pub(crate) struct ReactionCore {
    state: SharedState,
    derivation_id: DerivationId,
    name: String,
    effect: Box<dyn Fn() + Send + Sync>,
}

impl ReactionCore {
    /// Execute one run: decide staleness, track the effect, rebind
    /// dependencies. Called by the settle cycle with no locks held.
    pub(crate) fn run_reaction(&self) {
        {
            let mut graph = self.state.graph();
            let Some(der) = graph.derivations.get_mut(&self.derivation_id) else {
                return;
            };
            if der.is_disposed {
                return;
            }
            der.is_scheduled = false;
        }

        self.state.start_batch();
        if self.state.should_compute(self.derivation_id) {
            let effect = &self.effect;
            let result = catch_unwind(AssertUnwindSafe(|| {
                self.state.track(self.derivation_id, || effect())
            }));
            if let Err(payload) = result {
                self.state
                    .report_reaction_error(&self.name, &panic_message(payload.as_ref()));
            }
        }
        // The effect may have disposed its own handle; the tracked run
        // just re-bound edges that must not outlive the reaction.
        {
            let mut graph = self.state.graph();
            let disposed = graph
                .derivations
                .get(&self.derivation_id)
                .map(|d| d.is_disposed)
                .unwrap_or(false);
            if disposed {
                graph.clear_observing(self.derivation_id);
                if let Some(der) = graph.derivations.get_mut(&self.derivation_id) {
                    der.dependencies_state = DerivationState::NotTracking;
                }
            }
        }
        self.state.end_batch();
    }
}

impl Drop for ReactionCore {
    // The registry holds the core strongly until `dispose` unregisters
    // it, so this runs only for disposed reactions whose last user
    // handle is gone; edges were already cleared by `dispose`.
    fn drop(&mut self) {
        self.state.graph().derivations.remove(&self.derivation_id);
    }
}

/// Disposer handle for a running reaction.
///
/// The reaction keeps running while undisposed even if this handle is
/// dropped; [`dispose`](Reaction::dispose) is the only teardown.
pub struct Reaction {
    core: Arc<ReactionCore>,
}

impl Reaction {
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Force a re-run, as if a dependency had changed. Settles immediately
    /// outside a batch, at batch close inside one. No-op after disposal or
    /// while already scheduled.
    pub fn schedule(&self) {
        let scheduled = {
            let mut graph = self.core.state.graph();
            if let Some(der) = graph.derivations.get_mut(&self.core.derivation_id) {
                if der.dependencies_state == DerivationState::UpToDate {
                    der.dependencies_state = DerivationState::Stale;
                }
            }
            graph.schedule_reaction(self.core.derivation_id)
        };
        if scheduled {
            self.core.state.run_pending_reactions();
        }
    }

    /// Permanently stop the reaction and release its dependency edges.
    /// Idempotent; safe to call from inside the reaction's own effect.
    pub fn dispose(&self) {
        let state = &self.core.state;
        let id = self.core.derivation_id;
        {
            let mut graph = state.graph();
            let Some(der) = graph.derivations.get_mut(&id) else {
                return;
            };
            if der.is_disposed {
                return;
            }
            der.is_disposed = true;
            der.is_scheduled = false;
        }
        state.start_batch();
        {
            let mut graph = state.graph();
            graph.clear_observing(id);
            if let Some(der) = graph.derivations.get_mut(&id) {
                der.dependencies_state = DerivationState::NotTracking;
            }
        }
        state.end_batch();
        state.unregister_reaction(id);
        tracing::debug!(reaction = %self.core.name, "disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.core
            .state
            .graph()
            .derivations
            .get(&self.core.derivation_id)
            .map(|d| d.is_disposed)
            .unwrap_or(true)
    }
}

impl Clone for Reaction {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl std::fmt::Debug for Reaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reaction")
            .field("name", &self.name())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl SharedState {
    /// Start a reaction that runs `effect` immediately and again whenever
    /// an observable read by its most recent run changes.
    ///
    /// Inside a batch or action the first run is deferred to the settle
    /// cycle like any other scheduled reaction.
    pub fn autorun(
        &self,
        name: impl Into<String>,
        effect: impl Fn() + Send + Sync + 'static,
    ) -> Reaction {
        let name = name.into();
        let derivation_id = DerivationId::next();
        self.graph().add_derivation(
            derivation_id,
            DerivationNode::new(name.clone(), DerivationKind::Reaction),
        );
        let core = Arc::new(ReactionCore {
            state: self.clone(),
            derivation_id,
            name,
            effect: Box::new(effect),
        });
        self.register_reaction(derivation_id, Arc::clone(&core));
        self.graph().schedule_reaction(derivation_id);
        self.run_pending_reactions();
        Reaction { core }
    }

    /// Log and publish a reaction failure. Logging is muted for the settle
    /// cycle of a failing action, where the action's own error is the
    /// signal; spy listeners always see the event.
    pub(crate) fn report_reaction_error(&self, reaction: &str, message: &str) {
        let suppressed = self.graph().suppress_reaction_errors;
        if !suppressed {
            tracing::error!(reaction, message, "reaction failed");
        }
        self.emit_spy(&SpyEvent::ReactionError {
            reaction: reaction.to_string(),
            message: message.to_string(),
        });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
