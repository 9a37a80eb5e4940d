//! Single-value reactive cell with change-only notification.

use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};

type Listener<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// An ordered set of listeners that can be detached through [`Unbind`].
pub(crate) struct Listeners<A> {
    inner: Arc<Mutex<ListenerSet<A>>>,
}

struct ListenerSet<A> {
    next_id: u64,
    entries: Vec<(u64, Listener<A>)>,
}

impl<A: 'static> Listeners<A> {
    pub(crate) fn new() -> Self {
        Listeners {
            inner: Arc::new(Mutex::new(ListenerSet {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    pub(crate) fn add(&self, listener: impl Fn(&A) + Send + Sync + 'static) -> Unbind {
        let id = {
            let mut set = self.inner.lock();
            let id = set.next_id;
            set.next_id += 1;
            set.entries.push((id, Arc::new(listener)));
            id
        };

        let set: Weak<Mutex<ListenerSet<A>>> = Arc::downgrade(&self.inner);
        Unbind::new(move || {
            if let Some(set) = set.upgrade() {
                set.lock().entries.retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Listeners attached right now, to be called without holding the lock.
    pub(crate) fn snapshot(&self) -> Vec<Listener<A>> {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

/// Handle returned when attaching a listener.
///
/// The listener stays attached until [`Unbind::unbind`] is called. Dropping the
/// handle without calling it keeps the listener alive.
pub struct Unbind {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Unbind {
    fn new(detach: impl FnOnce() + Send + Sync + 'static) -> Self {
        Unbind {
            detach: Some(Box::new(detach)),
        }
    }

    /// Detach the listener.
    pub fn unbind(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

/// A value that notifies observers whenever it changes.
///
/// `update_value` compares the new value with the current one and does nothing
/// when they are equal; this is the only de-duplication of notifications.
/// Observers run after the internal locks are released, so they may read or
/// update the cell they observe.
pub struct ObservableValue<T> {
    value: RwLock<T>,
    observers: Listeners<T>,
}

impl<T> ObservableValue<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(value: T) -> Self {
        ObservableValue {
            value: RwLock::new(value),
            observers: Listeners::new(),
        }
    }

    /// Current value.
    pub fn value(&self) -> T {
        self.value.read().clone()
    }

    /// Run `f` against the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.value.read())
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Attach an observer called with every new value.
    pub fn observe(&self, observer: impl Fn(&T) + Send + Sync + 'static) -> Unbind {
        self.observers.add(observer)
    }

    /// Replace the value and notify observers, unless it is unchanged.
    pub fn update_value(&self, new_value: T) {
        if let Some(update) = self.replace_value(new_value) {
            update.notify();
        }
    }

    /// Replace the value without calling observers. The caller runs the
    /// returned update once it holds no locks observers could contend on.
    pub(crate) fn replace_value(&self, new_value: T) -> Option<PendingUpdate<T>> {
        let mut value = self.value.write();
        if *value == new_value {
            return None;
        }
        *value = new_value.clone();
        Some(PendingUpdate {
            value: new_value,
            observers: self.observers.snapshot(),
        })
    }
}

/// A change already applied to an [`ObservableValue`] whose observers have
/// not run yet.
pub(crate) struct PendingUpdate<T> {
    value: T,
    observers: Vec<Listener<T>>,
}

impl<T> PendingUpdate<T> {
    pub(crate) fn notify(self) {
        for observer in self.observers {
            observer(&self.value);
        }
    }
}

impl<T> std::fmt::Debug for ObservableValue<T>
where
    T: std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableValue")
            .field("value", &*self.value.read())
            .field("observers", &self.observers.len())
            .finish()
    }
}
