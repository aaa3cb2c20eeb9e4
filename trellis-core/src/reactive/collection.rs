//! Observable collections.
//!
//! [`ObservableList`] is the collection form of the Read/Write wrapper: a
//! `Vec` guarded by a single atom, with whole-collection invalidation.
//! Any read registers the reader as an observer of the list; any
//! structural or element write invalidates every observer. Finer-grained
//! per-element reactivity belongs to adapter layers, not this runtime.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use super::atom::Atom;
use super::error::ReactiveError;
use super::state::SharedState;

/// A reactive list with whole-collection change granularity.
///
/// Cloning shares the list.
pub struct ObservableList<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<ListCore<T>>,
}

struct ListCore<T> {
    atom: Atom,
    items: RwLock<Vec<T>>,
}

impl<T> ObservableList<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn name(&self) -> &str {
        self.inner.atom.name()
    }

    pub fn atom(&self) -> &Atom {
        &self.inner.atom
    }

    /// Number of elements. A tracked read.
    pub fn len(&self) -> usize {
        self.inner.atom.report_observed();
        self.inner.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `index`, if present. A tracked read.
    pub fn get(&self, index: usize) -> Option<T> {
        self.inner.atom.report_observed();
        self.inner.items.read().get(index).cloned()
    }

    /// Snapshot of the whole list. A tracked read.
    pub fn to_vec(&self) -> Vec<T> {
        self.inner.atom.report_observed();
        self.inner.items.read().clone()
    }

    /// Append an element.
    pub fn push(&self, value: T) {
        if let Err(err) = self.try_push(value) {
            panic!("{err}");
        }
    }

    pub fn try_push(&self, value: T) -> Result<(), ReactiveError> {
        self.inner.atom.check_write_allowed()?;
        self.inner.items.write().push(value);
        self.inner.atom.propagate_changed();
        Ok(())
    }

    /// Remove and return the last element.
    pub fn pop(&self) -> Option<T> {
        match self.try_pop() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    pub fn try_pop(&self) -> Result<Option<T>, ReactiveError> {
        self.inner.atom.check_write_allowed()?;
        let removed = self.inner.items.write().pop();
        if removed.is_some() {
            self.inner.atom.propagate_changed();
        }
        Ok(removed)
    }

    /// Replace the element at `index`. Returns `false` when out of range.
    pub fn set(&self, index: usize, value: T) -> bool {
        match self.try_set(index, value) {
            Ok(replaced) => replaced,
            Err(err) => panic!("{err}"),
        }
    }

    pub fn try_set(&self, index: usize, value: T) -> Result<bool, ReactiveError> {
        self.inner.atom.check_write_allowed()?;
        let replaced = {
            let mut items = self.inner.items.write();
            match items.get_mut(index) {
                Some(slot) => {
                    *slot = value;
                    true
                }
                None => false,
            }
        };
        if replaced {
            self.inner.atom.propagate_changed();
        }
        Ok(replaced)
    }

    /// Remove every element.
    pub fn clear(&self) {
        if let Err(err) = self.try_clear() {
            panic!("{err}");
        }
    }

    pub fn try_clear(&self) -> Result<(), ReactiveError> {
        self.inner.atom.check_write_allowed()?;
        let was_empty = {
            let mut items = self.inner.items.write();
            let was_empty = items.is_empty();
            items.clear();
            was_empty
        };
        if !was_empty {
            self.inner.atom.propagate_changed();
        }
        Ok(())
    }

    pub fn observer_count(&self) -> usize {
        self.inner.atom.observer_count()
    }
}

impl<T> Clone for ObservableList<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for ObservableList<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableList")
            .field("name", &self.name())
            .field("len", &self.inner.items.read().len())
            .field("observers", &self.observer_count())
            .finish()
    }
}

impl SharedState {
    /// Create an empty observable list.
    pub fn observable_list<T>(&self, name: impl Into<String>) -> ObservableList<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        ObservableList {
            inner: Arc::new(ListCore {
                atom: self.create_atom(name),
                items: RwLock::new(Vec::new()),
            }),
        }
    }
}
