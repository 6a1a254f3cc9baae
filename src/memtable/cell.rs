use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::types::Value;

/// A buffered value that can be replaced in place.
///
/// The write buffer never removes and reinserts a key: a second upsert
/// swaps the value inside the existing cell, so concurrent writers to the
/// same key cannot lose each other's updates, and each writer learns the
/// exact value it replaced for size accounting. `None` is a tombstone.
#[derive(Debug)]
pub struct ValueCell {
    value: ArcSwapOption<Value>,
}

impl ValueCell {
    pub fn new(value: Option<Value>) -> Self {
        ValueCell {
            value: ArcSwapOption::new(value.map(Arc::new)),
        }
    }

    /// Current value, copied out.
    pub fn get(&self) -> Option<Value> {
        self.value.load_full().map(|v| Value::clone(&v))
    }

    /// Store `value` and return the one it replaced.
    pub fn replace(&self, value: Option<Value>) -> Option<Arc<Value>> {
        self.value.swap(value.map(Arc::new))
    }

    /// Empty the cell, handing back its value.
    pub(crate) fn take(&self) -> Option<Value> {
        self.value
            .swap(None)
            .map(|v| Arc::try_unwrap(v).unwrap_or_else(|shared| Value::clone(&shared)))
    }
}
