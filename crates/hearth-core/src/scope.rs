//! Scope-bound disposal.
//!
//! A [`Scope`] represents one unit of plugin lifetime. Every registration made
//! on behalf of a scope appends a disposal action to it; [`Scope::dispose`]
//! runs the actions in registration order and clears the list.
//!
//! ```rust,ignore
//! let scope = Scope::new("status");
//! router.scoped(&scope).get("/status", handler)?;
//!
//! // …plugin unload…
//! scope.dispose(); // the route is gone
//! scope.dispose(); // no-op
//! ```
//!
//! Disposal actions must tolerate the resource being gone already: a route may
//! have been removed explicitly before its scope is torn down.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

type Disposable = Box<dyn FnOnce() + Send>;

struct ScopeInner {
    name: String,
    disposables: Mutex<Vec<(u64, Disposable)>>,
    next_id: AtomicU64,
    /// The parent and the id of this scope's entry in the parent's list.
    parent: Mutex<Option<(Weak<ScopeInner>, u64)>>,
}

impl ScopeInner {
    fn push(&self, action: Disposable) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.disposables.lock().push((id, action));
        id
    }

    /// Removes this scope's entry from its parent, if it still has one.
    fn detach(&self) {
        let Some((parent, id)) = self.parent.lock().take() else {
            return;
        };
        if let Some(parent) = parent.upgrade() {
            parent.disposables.lock().retain(|(entry, _)| *entry != id);
        }
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        self.detach();
    }
}

/// A unit of lifetime owning an ordered list of disposal actions.
///
/// `Scope` is a cheap, cloneable handle; clones share the same list.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    /// Creates an empty scope.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                name: name.into(),
                disposables: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                parent: Mutex::new(None),
            }),
        }
    }

    /// Returns the scope's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Appends a disposal action.
    pub fn defer(&self, action: impl FnOnce() + Send + 'static) {
        self.inner.push(Box::new(action));
        trace!(scope = %self.inner.name, "Disposable registered");
    }

    /// Returns the number of pending disposal actions.
    pub fn pending(&self) -> usize {
        self.inner.disposables.lock().len()
    }

    /// Creates a child scope that is disposed together with this one.
    ///
    /// The parent only holds a weak reference to the child. A child that is
    /// disposed or dropped on its own detaches from the parent, so the
    /// parent's list does not grow across child lifetimes.
    pub fn child(&self, name: impl Into<String>) -> Scope {
        let child = Scope::new(name);
        let weak = child.downgrade();
        let id = self.inner.push(Box::new(move || {
            if let Some(child) = weak.upgrade() {
                child.dispose();
            }
        }));
        *child.inner.parent.lock() = Some((Arc::downgrade(&self.inner), id));
        child
    }

    /// Runs every pending disposal action in registration order.
    ///
    /// The list is taken before any action runs, so actions may register new
    /// disposables (they will run on the next call). Calling `dispose` on an
    /// already-disposed scope does nothing. A disposed child is no longer
    /// tied to its parent.
    pub fn dispose(&self) {
        self.inner.detach();
        let actions = std::mem::take(&mut *self.inner.disposables.lock());
        if actions.is_empty() {
            return;
        }
        debug!(scope = %self.inner.name, count = actions.len(), "Disposing scope");
        for (_, action) in actions {
            action();
        }
    }

    fn downgrade(&self) -> WeakScope {
        WeakScope(Arc::downgrade(&self.inner))
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.inner.name)
            .field("pending", &self.pending())
            .finish()
    }
}

struct WeakScope(Weak<ScopeInner>);

impl WeakScope {
    fn upgrade(&self) -> Option<Scope> {
        self.0.upgrade().map(|inner| Scope { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispose_runs_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let scope = Scope::new("test");
        for i in 0..3 {
            let log = Arc::clone(&log);
            scope.defer(move || log.lock().push(i));
        }
        assert_eq!(scope.pending(), 3);

        scope.dispose();
        assert_eq!(*log.lock(), vec![0, 1, 2]);
        assert_eq!(scope.pending(), 0);
    }

    #[test]
    fn test_dispose_twice_is_noop() {
        let log = Arc::new(Mutex::new(0));
        let scope = Scope::new("test");
        let l = Arc::clone(&log);
        scope.defer(move || *l.lock() += 1);

        scope.dispose();
        scope.dispose();
        assert_eq!(*log.lock(), 1);
    }

    #[test]
    fn test_scope_is_reusable_after_dispose() {
        let log = Arc::new(Mutex::new(0));
        let scope = Scope::new("test");
        scope.dispose();

        let l = Arc::clone(&log);
        scope.defer(move || *l.lock() += 1);
        scope.dispose();
        assert_eq!(*log.lock(), 1);
    }

    #[test]
    fn test_child_disposed_with_parent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let parent = Scope::new("parent");
        let child = parent.child("child");

        let l = Arc::clone(&log);
        child.defer(move || l.lock().push("child"));
        let l = Arc::clone(&log);
        parent.defer(move || l.lock().push("parent"));

        parent.dispose();
        assert_eq!(*log.lock(), vec!["child", "parent"]);
        assert_eq!(child.pending(), 0);
    }

    #[test]
    fn test_dropped_child_detaches() {
        let parent = Scope::new("parent");
        drop(parent.child("child"));
        assert_eq!(parent.pending(), 0);
        parent.dispose();
    }

    #[test]
    fn test_disposed_children_do_not_accumulate() {
        let parent = Scope::new("parent");
        let kept = parent.child("kept");
        for _ in 0..100 {
            let child = parent.child("cycle");
            child.defer(|| {});
            child.dispose();
        }
        assert_eq!(parent.pending(), 1);

        let log = Arc::new(Mutex::new(0));
        let l = Arc::clone(&log);
        kept.defer(move || *l.lock() += 1);
        parent.dispose();
        assert_eq!(*log.lock(), 1);
    }

    #[test]
    fn test_action_may_defer_during_dispose() {
        let scope = Scope::new("test");
        let s = scope.clone();
        scope.defer(move || s.defer(|| {}));
        scope.dispose();
        assert_eq!(scope.pending(), 1);
    }
}
