//! Guards against double-handling of chain events.
//!
//! The same event can be observed from several sources at once: the historic
//! scan at startup, the live subscription, and reorg-driven re-deliveries.
//! Each event kind gets an in-flight guard per key; callers must release the
//! guard on every path out of handling.

use crate::foundation::{Digest, KeepId, NodeError, Result};
use crate::infrastructure::chain::KeepHandle;
use crate::infrastructure::registry::KeepsRegistry;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};

const CHAIN_CHECK_RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct EventDeduplicator {
    registry: Arc<KeepsRegistry>,
    signing_check_timeout: Duration,
    keygen: Mutex<HashSet<KeepId>>,
    signing: Mutex<HashSet<(KeepId, Digest)>>,
    closing: Mutex<HashSet<KeepId>>,
    terminating: Mutex<HashSet<KeepId>>,
}

impl EventDeduplicator {
    pub fn new(registry: Arc<KeepsRegistry>, signing_check_timeout: Duration) -> Self {
        Self {
            registry,
            signing_check_timeout,
            keygen: Mutex::new(HashSet::new()),
            signing: Mutex::new(HashSet::new()),
            closing: Mutex::new(HashSet::new()),
            terminating: Mutex::new(HashSet::new()),
        }
    }

    /// A key generation should run when none is in flight and no signer is
    /// already persisted; a persisted signer means an earlier run completed,
    /// whether or not the on-chain submission landed yet.
    pub async fn notify_keygen_started(&self, keep_id: &KeepId) -> bool {
        let mut inflight = self.keygen.lock().await;
        if inflight.contains(keep_id) || self.registry.has_signer(keep_id) {
            return false;
        }
        inflight.insert(*keep_id)
    }

    pub async fn notify_keygen_completed(&self, keep_id: &KeepId) {
        self.keygen.lock().await.remove(keep_id);
    }

    /// In addition to the in-flight guard, confirms on-chain that the keep
    /// is still awaiting this exact digest. Transient read errors are
    /// retried until the configured check timeout elapses; minor reorgs and
    /// slightly stale chain clients resolve within that window.
    pub async fn notify_signing_started(&self, keep: &dyn KeepHandle, digest: &Digest) -> Result<bool> {
        let key = (keep.id(), *digest);
        {
            let inflight = self.signing.lock().await;
            if inflight.contains(&key) {
                return Ok(false);
            }
        }

        let awaiting = timeout(self.signing_check_timeout, async {
            loop {
                match keep.is_awaiting_signature(digest).await {
                    Ok(awaiting) => return awaiting,
                    Err(err) => {
                        log::warn!(
                            "could not check awaiting signature for keep={} digest={digest} error={err}; retrying",
                            keep.id()
                        );
                        sleep(CHAIN_CHECK_RETRY_DELAY).await;
                    }
                }
            }
        })
        .await
        .map_err(|_| NodeError::Timeout {
            operation: "awaiting-signature event check".to_string(),
            seconds: self.signing_check_timeout.as_secs(),
        })?;

        if !awaiting {
            return Ok(false);
        }

        let mut inflight = self.signing.lock().await;
        Ok(inflight.insert(key))
    }

    pub async fn notify_signing_completed(&self, keep_id: &KeepId, digest: &Digest) {
        self.signing.lock().await.remove(&(*keep_id, *digest));
    }

    pub async fn notify_closing_started(&self, keep_id: &KeepId) -> bool {
        self.closing.lock().await.insert(*keep_id)
    }

    pub async fn notify_closing_completed(&self, keep_id: &KeepId) {
        self.closing.lock().await.remove(keep_id);
    }

    pub async fn notify_terminating_started(&self, keep_id: &KeepId) -> bool {
        self.terminating.lock().await.insert(*keep_id)
    }

    pub async fn notify_terminating_completed(&self, keep_id: &KeepId) {
        self.terminating.lock().await.remove(keep_id);
    }
}
