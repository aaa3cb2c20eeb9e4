//! Trellis Core
//!
//! This crate provides the core runtime of the Trellis reactive state
//! system: transparent dependency tracking between observable state,
//! memoized computed values, and side-effecting reactions, with batched,
//! glitch-free change propagation.
//!
//! # Architecture
//!
//! Everything lives under the [`reactive`] module. One [`reactive::SharedState`]
//! is one isolated reactive universe; all primitives are created from it
//! and handles stay cheap to clone. Dependency edges are re-derived on
//! every run of a derivation, so the graph always reflects what the last
//! execution actually read.
//!
//! # Example
//!
//! ```rust
//! use trellis_core::reactive::SharedState;
//!
//! let state = SharedState::new();
//! let count = state.observable("count", 0);
//!
//! let count_in = count.clone();
//! let doubled = state.computed("doubled", move || count_in.get() * 2);
//!
//! let doubled_in = doubled.clone();
//! let reaction = state.autorun("print", move || {
//!     println!("doubled = {}", doubled_in.get());
//! });
//!
//! // Reactions re-run when a dependency settles to a new value.
//! state.run_in_action("bump", || count.set(5));
//! assert_eq!(doubled.get(), 10);
//!
//! reaction.dispose();
//! ```

pub mod reactive;
