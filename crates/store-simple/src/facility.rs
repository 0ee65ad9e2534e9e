use std::fmt::Debug;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::WriteError;

/// A synchronous, shared, flat string map (the `localStorage` model).
///
/// Every caller sharing the execution context sees the same entries, which
/// is why the driver scopes its keys with a namespace. Writes may fail when
/// the facility runs out of space.
pub trait SimpleFacility: Debug + Send + Sync + 'static {
    /// Value stored under `key`.
    fn get_item(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`.
    ///
    /// # Errors
    ///
    /// Fails when the write would exceed the facility's capacity.
    fn set_item(&self, key: &str, value: &str) -> Result<(), WriteError>;

    /// Removes `key`, doing nothing if it is absent.
    fn remove_item(&self, key: &str);

    /// Whether `key` is present, regardless of its value.
    fn contains_key(&self, key: &str) -> bool;

    /// Every key in the facility's native enumeration order.
    fn keys(&self) -> Vec<String>;

    /// Total number of entries, including foreign ones.
    fn len(&self) -> usize;

    /// Whether the facility holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entry, including foreign ones.
    fn clear(&self);
}

/// In-memory simple facility for local development and tests.
///
/// Enumerates keys in insertion order. An optional quota bounds the total
/// number of key and value bytes held.
#[derive(Clone, Debug, Default)]
pub struct MemorySimpleFacility {
    entries: Arc<Mutex<IndexMap<String, String>>>,
    quota: Option<usize>,
}

impl MemorySimpleFacility {
    /// Creates an unbounded facility.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a facility that rejects writes beyond `quota` bytes.
    #[must_use]
    pub fn with_quota(quota: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(IndexMap::new())),
            quota: Some(quota),
        }
    }

    fn used_bytes(entries: &IndexMap<String, String>) -> usize {
        entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

impl SimpleFacility for MemorySimpleFacility {
    fn get_item(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), WriteError> {
        let mut entries = self.entries.lock();

        if let Some(quota) = self.quota {
            let replaced = entries.get(key).map_or(0, |old| key.len() + old.len());
            let needed = Self::used_bytes(&entries) - replaced + key.len() + value.len();
            if needed > quota {
                return Err(WriteError(format!(
                    "QuotaExceededError: setting '{key}' needs {needed} bytes, quota is {quota}"
                )));
            }
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) {
        self.entries.lock().shift_remove(key);
    }

    fn contains_key(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }
}
