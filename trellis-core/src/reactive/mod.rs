//! Reactive primitives.
//!
//! This module implements the core reactive system: observable state,
//! computed values, and reactions, tied together by transparent dependency
//! tracking and glitch-free propagation.
//!
//! # Concepts
//!
//! ## Observables
//!
//! An observable cell holds mutable state. Reading one inside a tracking
//! context (a computed getter or a reaction effect) records a dependency
//! edge automatically; writing one invalidates everything downstream.
//! [`ObservableValue`] and [`ObservableList`] are value-carrying wrappers
//! over the bare [`Atom`].
//!
//! ## Computed values
//!
//! A [`ComputedValue`] derives a memoized result from other observables.
//! It re-evaluates only when a dependency actually changed, propagates
//! only when its result differs under the configured comparer, and
//! releases its cache entirely while nothing observes it.
//!
//! ## Reactions
//!
//! A [`Reaction`] is a side-effecting computation that re-runs whenever
//! its dependencies change. Reactions are the bridge out of the reactive
//! graph, toward rendering, persistence, or logging.
//!
//! ## Actions
//!
//! Mutations happen inside named actions, which batch invalidation so
//! reactions observe only settled states, never intermediate ones. The
//! [`Configuration`] policy decides how strictly stray writes outside
//! actions are rejected.
//!
//! # Implementation notes
//!
//! All bookkeeping for one universe hangs off a [`SharedState`]. Multiple
//! universes coexist in one process and never interact; the [`context`]
//! module adds opt-in ambient resolution for applications that want a
//! single implicit one.

mod action;
mod atom;
mod collection;
mod computed;
mod config;
pub mod context;
mod error;
mod graph;
mod reaction;
mod spy;
mod state;

pub use atom::{Atom, ObservableValue};
pub use collection::ObservableList;
pub use computed::{ComputedBuilder, ComputedValue};
pub use config::{Configuration, EnforceActions};
pub use error::ReactiveError;
pub use graph::DerivationState;
pub use reaction::Reaction;
pub use spy::{SpyEvent, SpyListenerId};
pub use state::SharedState;
