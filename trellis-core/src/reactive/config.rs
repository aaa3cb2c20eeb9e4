//! Runtime configuration.
//!
//! A `Configuration` is fixed at `SharedState` creation time and never
//! changes afterwards; there is no partial reset of a running universe.

/// Policy controlling when observable cells may be mutated outside an
/// action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnforceActions {
    /// Mutations are allowed anywhere. Useful for tests and migration.
    Never,

    /// Mutating a cell that currently has observers requires an action.
    /// Unobserved cells may be mutated freely.
    #[default]
    Observed,

    /// Every mutation requires an action, observed or not.
    Always,
}

/// Configuration for one reactive universe.
#[derive(Debug, Clone)]
pub struct Configuration {
    /// When mutations outside actions are rejected. See [`EnforceActions`].
    pub enforce_actions: EnforceActions,

    /// Upper bound on reaction drain iterations per settle cycle. A settle
    /// cycle that reaches this bound discards the remaining queue and
    /// fails with [`ReactiveError::NonConvergence`].
    ///
    /// [`ReactiveError::NonConvergence`]: super::ReactiveError::NonConvergence
    pub max_reaction_iterations: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            enforce_actions: EnforceActions::default(),
            max_reaction_iterations: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Configuration::default();
        assert_eq!(config.enforce_actions, EnforceActions::Observed);
        assert_eq!(config.max_reaction_iterations, 100);
    }
}
