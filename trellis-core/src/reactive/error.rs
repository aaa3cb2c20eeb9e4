//! Error types for the reactive runtime.
//!
//! The taxonomy distinguishes caller bugs (protocol violations, which are
//! always fatal), policy violations (raised at the point of violation and
//! naming the offending cell), and non-convergence of the reaction queue.
//! User-body panics are not represented here; they unwind through the
//! RAII guards and never corrupt runtime bookkeeping.

use thiserror::Error;

use super::config::EnforceActions;

/// Everything that can go wrong inside the reactive runtime.
///
/// Fallible `try_*` entry points return this; the ergonomic variants
/// (`get`, `set`, `report_changed`, ...) panic with its `Display` output.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReactiveError {
    /// A batch was ended that was never started. Indicates mismatched
    /// `start_batch`/`end_batch` calls in the caller.
    #[error("batch ended without a matching start")]
    UnbalancedBatch,

    /// A cell was mutated outside an action while the enforce-actions
    /// policy forbids it.
    #[error(
        "changing observable '{cell}' outside an action is not allowed \
         (enforce-actions policy is {policy:?}); wrap the change in an action"
    )]
    StateChangeOutsideAction { cell: String, policy: EnforceActions },

    /// A computed getter mutated a cell that currently has observers.
    /// Computed getters are presumed pure; use the explicit escape scope
    /// if the mutation is intentional.
    #[error("computed value tried to change observed cell '{cell}' during its evaluation")]
    SideEffectInsideComputed { cell: String },

    /// A cell was read inside a scope that disallows state reads.
    #[error("reading observable '{cell}' is not allowed here")]
    ReadNotAllowed { cell: String },

    /// A computed value's getter re-entered itself.
    #[error("cycle detected while evaluating computed value '{name}'")]
    ComputationCycle { name: String },

    /// A computed value configured with `requires_reaction` was read
    /// outside any reactive context.
    #[error("computed value '{name}' requires a reactive context but was read outside one")]
    ComputedRequiresReaction { name: String },

    /// `set` was called on a computed value that has no setter.
    #[error("computed value '{name}' has no setter configured")]
    SetterMissing { name: String },

    /// The reaction queue did not drain to a fixpoint within the
    /// configured iteration limit. The remaining queue is discarded.
    #[error(
        "reactions did not converge after {iterations} iterations; \
         this usually means a reaction writes to its own dependencies \
         (first still pending: '{reaction}')"
    )]
    NonConvergence { iterations: usize, reaction: String },

    /// No ambient `SharedState` was configured and none was passed
    /// explicitly.
    #[error("no ambient reactive context configured; pass a SharedState explicitly or install a default")]
    NoAmbientContext,
}
