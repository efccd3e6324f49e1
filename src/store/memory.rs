//! In-process store.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::Store;
use crate::error::{Error, Result};

/// Map held in process memory. Clones share the same entries, so several
/// lockers (or threads standing in for workers) can coordinate through it.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Result<BTreeMap<String, Vec<u8>>> {
        Ok(self.entries()?.clone())
    }

    fn entries(&self) -> Result<MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.entries
            .lock()
            .map_err(|e| Error::store("memory", e.to_string()))
    }
}

impl Store for MemoryStore {
    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.entries()?.contains_key(key))
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries()?.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries()?.keys().cloned().collect())
    }
}
