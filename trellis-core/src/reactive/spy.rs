//! Telemetry events.
//!
//! Spy listeners receive a structured event stream describing action
//! boundaries and contained reaction failures. The stream is meant for
//! devtools and audit logs; it carries names and ids, never values.
//! Listeners run outside every runtime lock, after the state transition
//! they describe, so a listener may freely read observables (it should
//! not write them).

use std::sync::Arc;
use std::time::Duration;

use super::state::{SharedState, SpyListener};

/// One telemetry event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpyEvent {
    /// An action began. `parent_action_id` is 0 for top-level actions.
    ActionStart {
        action_id: u64,
        parent_action_id: u64,
        name: String,
        scope: Option<String>,
    },

    /// An action finished, normally or by panic.
    ActionEnd {
        action_id: u64,
        name: String,
        duration: Duration,
        failed: bool,
    },

    /// A reaction effect panicked and was contained by the settle cycle.
    ReactionError { reaction: String, message: String },
}

/// Token for removing a registered spy listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpyListenerId(u64);

impl SharedState {
    /// Register a listener for telemetry events on this universe.
    pub fn add_spy_listener(
        &self,
        listener: impl Fn(&SpyEvent) + Send + Sync + 'static,
    ) -> SpyListenerId {
        let id = {
            let mut next = self.inner.next_spy_id.lock();
            let id = *next;
            *next += 1;
            id
        };
        self.inner.spy.write().push((id, Arc::new(listener)));
        SpyListenerId(id)
    }

    /// Remove a listener. Unknown ids are ignored.
    pub fn remove_spy_listener(&self, id: SpyListenerId) {
        self.inner.spy.write().retain(|(entry, _)| *entry != id.0);
    }

    pub(crate) fn emit_spy(&self, event: &SpyEvent) {
        let listeners: Vec<SpyListener> = {
            let spy = self.inner.spy.read();
            if spy.is_empty() {
                return;
            }
            spy.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in listeners {
            listener(event);
        }
    }
}
