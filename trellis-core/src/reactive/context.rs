//! Ambient context.
//!
//! Every primitive takes its [`SharedState`] explicitly; the functions
//! here are the convenience boundary for applications that want one
//! process-wide universe without threading the handle everywhere.
//!
//! Resolution order: innermost scoped state on the current thread, then
//! the process-wide global default, then [`ReactiveError::NoAmbientContext`].
//! Libraries should keep accepting an explicit `SharedState` and leave
//! ambient resolution to application edges.

use std::cell::RefCell;

use parking_lot::RwLock;

use super::atom::ObservableValue;
use super::collection::ObservableList;
use super::computed::ComputedValue;
use super::error::ReactiveError;
use super::reaction::Reaction;
use super::state::SharedState;

static GLOBAL_DEFAULT: RwLock<Option<SharedState>> = RwLock::new(None);

thread_local! {
    static SCOPED: RefCell<Vec<SharedState>> = const { RefCell::new(Vec::new()) };
}

/// Install a process-wide default universe, replacing any previous one.
pub fn set_global_default(state: SharedState) {
    *GLOBAL_DEFAULT.write() = Some(state);
}

/// Remove the process-wide default universe.
pub fn clear_global_default() {
    *GLOBAL_DEFAULT.write() = None;
}

/// Run `body` with `state` as the ambient universe on this thread. Scopes
/// nest; the innermost wins.
pub fn with_scoped_state<R>(state: &SharedState, body: impl FnOnce() -> R) -> R {
    SCOPED.with(|stack| stack.borrow_mut().push(state.clone()));
    let _guard = ScopeGuard;
    body()
}

struct ScopeGuard;

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        SCOPED.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Resolve the ambient universe.
pub fn ambient_state() -> Result<SharedState, ReactiveError> {
    let scoped = SCOPED.with(|stack| stack.borrow().last().cloned());
    if let Some(state) = scoped {
        return Ok(state);
    }
    GLOBAL_DEFAULT
        .read()
        .clone()
        .ok_or(ReactiveError::NoAmbientContext)
}

fn resolved() -> SharedState {
    match ambient_state() {
        Ok(state) => state,
        Err(err) => panic!("{err}"),
    }
}

/// Ambient [`SharedState::observable`].
pub fn observable<T: Clone + Send + Sync + 'static>(
    name: impl Into<String>,
    value: T,
) -> ObservableValue<T> {
    resolved().observable(name, value)
}

/// Ambient [`SharedState::observable_list`].
pub fn observable_list<T: Clone + Send + Sync + 'static>(
    name: impl Into<String>,
) -> ObservableList<T> {
    resolved().observable_list(name)
}

/// Ambient [`SharedState::computed`].
pub fn computed<T: Clone + Send + Sync + PartialEq + 'static>(
    name: impl Into<String>,
    getter: impl Fn() -> T + Send + Sync + 'static,
) -> ComputedValue<T> {
    resolved().computed(name, getter)
}

/// Ambient [`SharedState::autorun`].
pub fn autorun(name: impl Into<String>, effect: impl Fn() + Send + Sync + 'static) -> Reaction {
    resolved().autorun(name, effect)
}

/// Ambient [`SharedState::run_in_action`].
pub fn run_in_action<R>(name: &str, body: impl FnOnce() -> R) -> R {
    resolved().run_in_action(name, body)
}

/// Ambient [`SharedState::batch`].
pub fn batch<R>(body: impl FnOnce() -> R) -> R {
    resolved().batch(body)
}

/// Ambient [`SharedState::untracked`].
pub fn untracked<R>(body: impl FnOnce() -> R) -> R {
    resolved().untracked(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_state_wins_and_unwinds() {
        let outer = SharedState::new();
        let inner = SharedState::new();

        with_scoped_state(&outer, || {
            assert!(ambient_state().unwrap().same_universe(&outer));
            with_scoped_state(&inner, || {
                assert!(ambient_state().unwrap().same_universe(&inner));
            });
            assert!(ambient_state().unwrap().same_universe(&outer));
        });
    }

    #[test]
    fn scoped_primitives_land_in_the_scoped_universe() {
        let state = SharedState::new();
        // Return the handle so the cell outlives the scope; dropping it
        // would remove its graph node.
        let value = with_scoped_state(&state, || {
            let value = observable("value", 1);
            run_in_action("bump", || value.set(2));
            value
        });
        assert_eq!(value.get_untracked(), 2);
        assert_eq!(state.graph().observables.len(), 1);

        drop(value);
        assert_eq!(state.graph().observables.len(), 0);
    }

    #[test]
    fn scope_survives_a_panicking_body() {
        let state = SharedState::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            with_scoped_state(&state, || panic!("boom"))
        }));
        assert!(result.is_err());
        let depth = SCOPED.with(|stack| stack.borrow().len());
        assert_eq!(depth, 0);
    }
}
