/*
 * Copyright 2020 Joyent, Inc.
 */

//! Shared-state helpers used by the long-lived services.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use arc_swap::ArcSwap;

/// Owner of a lazily created service shared by every holder of an `Arc`
/// to it.
///
/// The first call to `acquire` constructs the service; later calls return
/// the same instance for as long as any holder keeps its `Arc`. Once the
/// last holder drops its reference the service is torn down by its own
/// `Drop` implementation, and the next `acquire` builds a fresh one.
pub struct SharedResource<T> {
    instance: Mutex<Weak<T>>,
    create: fn() -> T,
}

impl<T> SharedResource<T> {
    pub const fn new(create: fn() -> T) -> Self {
        SharedResource {
            instance: Mutex::new(Weak::new()),
            create,
        }
    }

    pub fn acquire(&self) -> Arc<T> {
        let mut instance = self
            .instance
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = instance.upgrade() {
            return existing;
        }
        let created = Arc::new((self.create)());
        *instance = Arc::downgrade(&created);
        created
    }

    /// Whether an instance is currently held by anyone.
    pub fn is_active(&self) -> bool {
        self.instance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .strong_count()
            > 0
    }
}

// Listener identity is the address of the shared object, not its value.
pub(crate) fn same_object<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// A copy-on-write set of listeners.
///
/// Iteration works on an immutable snapshot, so listeners may add or
/// remove themselves (or others) while a notification pass is running.
pub struct ListenerSet<T: ?Sized> {
    listeners: ArcSwap<Vec<Arc<T>>>,
}

impl<T: ?Sized> ListenerSet<T> {
    pub fn new() -> Self {
        ListenerSet {
            listeners: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Returns `false` if the listener was already registered.
    pub fn insert(&self, listener: Arc<T>) -> bool {
        let mut inserted = false;
        self.listeners.rcu(|current| {
            if current.iter().any(|l| same_object(l, &listener)) {
                inserted = false;
                Arc::clone(current)
            } else {
                inserted = true;
                let mut next = Vec::clone(current);
                next.push(Arc::clone(&listener));
                Arc::new(next)
            }
        });
        inserted
    }

    /// Returns `false` if the listener was not registered.
    pub fn remove(&self, listener: &Arc<T>) -> bool {
        let mut removed = false;
        self.listeners.rcu(|current| {
            removed = current.iter().any(|l| same_object(l, listener));
            if removed {
                let next: Vec<Arc<T>> = current
                    .iter()
                    .filter(|l| !same_object(l, listener))
                    .cloned()
                    .collect();
                Arc::new(next)
            } else {
                Arc::clone(current)
            }
        });
        removed
    }

    pub fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.listeners.load_full()
    }

    pub fn len(&self) -> usize {
        self.listeners.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: ?Sized> Default for ListenerSet<T> {
    fn default() -> Self {
        Self::new()
    }
}
