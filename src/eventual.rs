use std::fmt;
use std::sync::Arc;

/// A value that may not be available yet.
///
/// `Set` holds the value behind an `Arc`. Equality is by identity: two `Empty`
/// values are equal, two `Set` values are equal only when they share the same
/// allocation. Feeding a freshly constructed `Set` into an
/// [`ObservableValue`](crate::ObservableValue) therefore always notifies, even
/// when the wrapped values compare equal.
pub enum EventualValue<T: ?Sized> {
    /// No value yet.
    Empty,
    /// The value is available.
    Set(Arc<T>),
}

impl<T> EventualValue<T> {
    /// Wrap `value` in a new allocation.
    pub fn set(value: T) -> Self {
        EventualValue::Set(Arc::new(value))
    }
}

impl<T: ?Sized> EventualValue<T> {
    /// Wrap an already shared value.
    pub fn from_arc(value: Arc<T>) -> Self {
        EventualValue::Set(value)
    }

    pub fn is_set(&self) -> bool {
        matches!(self, EventualValue::Set(_))
    }

    /// The value, if set.
    pub fn get(&self) -> Option<&Arc<T>> {
        match self {
            EventualValue::Set(value) => Some(value),
            EventualValue::Empty => None,
        }
    }
}

impl<T: ?Sized> Clone for EventualValue<T> {
    fn clone(&self) -> Self {
        match self {
            EventualValue::Empty => EventualValue::Empty,
            EventualValue::Set(value) => EventualValue::Set(Arc::clone(value)),
        }
    }
}

impl<T: ?Sized> Default for EventualValue<T> {
    fn default() -> Self {
        EventualValue::Empty
    }
}

impl<T: ?Sized> PartialEq for EventualValue<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (EventualValue::Empty, EventualValue::Empty) => true,
            (EventualValue::Set(a), EventualValue::Set(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            _ => false,
        }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for EventualValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventualValue::Empty => f.write_str("Empty"),
            EventualValue::Set(value) => f.debug_tuple("Set").field(&value).finish(),
        }
    }
}
