//! Values passed from one step to a later one.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::FlowError;

/// A named slot an earlier step fills and a later step reads.
///
/// Clones share the slot. A retried step may write again; the latest value
/// wins.
pub struct Handoff<T> {
    name: Arc<str>,
    slot: Arc<Mutex<Option<T>>>,
}

impl<T> Handoff<T> {
    /// Create an empty slot.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// The slot's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store a value.
    pub fn set(&self, value: T) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }

    /// Returns whether a value has been stored.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl<T: Clone> Handoff<T> {
    /// Read the stored value.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::MissingHandoff` when no earlier step stored one.
    pub fn get(&self) -> Result<T, FlowError> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| FlowError::MissingHandoff {
                name: self.name.to_string(),
            })
    }
}

impl<T> Clone for Handoff<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Handoff<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Handoff")
            .field("name", &self.name)
            .field("value", &*slot)
            .finish()
    }
}
