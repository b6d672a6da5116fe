//! Durable map of active keep to signer material.

use crate::domain::KeepSigner;
use crate::foundation::{KeepId, NodeError, Result};
use crate::infrastructure::persistence::Persistence;
use log::{error, info};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Owns every persisted signer. Coordinators hold non-owning clones of the
/// signer value and never touch storage directly.
///
/// Writes are serialized by the interior lock, which also keeps readers on a
/// consistent snapshot; `register` only returns after the snapshot is
/// durable.
pub struct KeepsRegistry {
    persistence: Arc<dyn Persistence>,
    signers: Mutex<HashMap<KeepId, KeepSigner>>,
}

impl KeepsRegistry {
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence, signers: Mutex::new(HashMap::new()) }
    }

    fn lock_signers(&self) -> Result<MutexGuard<'_, HashMap<KeepId, KeepSigner>>> {
        self.signers.lock().map_err(|_| NodeError::Storage {
            operation: "registry lock".to_string(),
            details: "signer map lock poisoned".to_string(),
        })
    }

    /// Loads every persisted snapshot into the in-memory map. Corrupt
    /// entries are logged and skipped rather than taking the node down.
    pub fn load_existing(&self) -> Result<Vec<KeepId>> {
        let mut loaded = Vec::new();
        let mut signers = self.lock_signers()?;
        for (keep_id, snapshot) in self.persistence.load_all()? {
            match KeepSigner::from_snapshot(&snapshot) {
                Ok(signer) => {
                    signers.insert(keep_id, signer);
                    loaded.push(keep_id);
                }
                Err(err) => {
                    error!("failed to decode persisted signer keep={keep_id} error={err}");
                }
            }
        }
        info!("loaded {} keep(s) from storage", loaded.len());
        Ok(loaded)
    }

    pub fn register(&self, signer: KeepSigner) -> Result<()> {
        let keep_id = signer.keep_id;
        let mut signers = self.lock_signers()?;
        if signers.contains_key(&keep_id) || self.persistence.has(&keep_id)? {
            return Err(NodeError::DuplicateSigner(keep_id.to_string()));
        }
        self.persistence.save(&keep_id, &signer.to_snapshot()?)?;
        signers.insert(keep_id, signer);
        Ok(())
    }

    /// Archives the signer material; repeating the call is harmless.
    pub fn unregister(&self, keep_id: &KeepId) -> Result<()> {
        let mut signers = self.lock_signers()?;
        self.persistence.archive(keep_id)?;
        signers.remove(keep_id);
        Ok(())
    }

    pub fn get_signer(&self, keep_id: &KeepId) -> Result<KeepSigner> {
        self.lock_signers()?
            .get(keep_id)
            .cloned()
            .ok_or_else(|| NodeError::SignerNotFound(keep_id.to_string()))
    }

    pub fn has_signer(&self, keep_id: &KeepId) -> bool {
        self.lock_signers().map(|signers| signers.contains_key(keep_id)).unwrap_or(false)
    }

    pub fn keep_ids(&self) -> Vec<KeepId> {
        self.lock_signers().map(|signers| signers.keys().copied().collect()).unwrap_or_default()
    }
}
