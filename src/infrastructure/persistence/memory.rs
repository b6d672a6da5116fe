use crate::foundation::{KeepId, NodeError, Result};
use crate::infrastructure::persistence::Persistence;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

struct MemoryInner {
    current: HashMap<KeepId, Vec<u8>>,
    archived: HashMap<KeepId, Vec<u8>>,
}

/// Volatile persistence used by tests.
pub struct MemoryPersistence {
    inner: Mutex<MemoryInner>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self { inner: Mutex::new(MemoryInner { current: HashMap::new(), archived: HashMap::new() }) }
    }

    fn lock_inner(&self) -> Result<MutexGuard<'_, MemoryInner>> {
        self.inner.lock().map_err(|_| NodeError::Storage {
            operation: "memory persistence lock".to_string(),
            details: "lock poisoned".to_string(),
        })
    }

    pub fn archived_count(&self) -> usize {
        self.lock_inner().map(|inner| inner.archived.len()).unwrap_or(0)
    }
}

impl Default for MemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

impl Persistence for MemoryPersistence {
    fn save(&self, keep_id: &KeepId, snapshot: &[u8]) -> Result<()> {
        self.lock_inner()?.current.insert(*keep_id, snapshot.to_vec());
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<(KeepId, Vec<u8>)>> {
        Ok(self.lock_inner()?.current.iter().map(|(keep_id, bytes)| (*keep_id, bytes.clone())).collect())
    }

    fn archive(&self, keep_id: &KeepId) -> Result<()> {
        let mut inner = self.lock_inner()?;
        if let Some(snapshot) = inner.current.remove(keep_id) {
            inner.archived.insert(*keep_id, snapshot);
        }
        Ok(())
    }

    fn has(&self, keep_id: &KeepId) -> Result<bool> {
        Ok(self.lock_inner()?.current.contains_key(keep_id))
    }
}
