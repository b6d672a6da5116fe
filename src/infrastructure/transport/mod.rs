//! Keep-scoped broadcast channel seam used by liquidation recovery.

pub mod memory;

pub use memory::MemoryBroadcastNetwork;

use crate::domain::RecoveryAnnouncement;
use crate::foundation::{KeepId, Result};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::sync::Arc;

pub struct BroadcastSubscription {
    inner: BoxStream<'static, Result<RecoveryAnnouncement>>,
}

impl BroadcastSubscription {
    pub fn new(inner: BoxStream<'static, Result<RecoveryAnnouncement>>) -> Self {
        Self { inner }
    }

    pub async fn next(&mut self) -> Option<Result<RecoveryAnnouncement>> {
        self.inner.next().await
    }
}

/// One keep's broadcast channel. Owned by a single liquidation-recovery run
/// and never shared across keeps.
///
/// Implementations are expected to retransmit published frames periodically
/// for the lifetime of the protocol; membership is provided by the channel.
#[async_trait]
pub trait BroadcastChannel: Send + Sync {
    async fn send(&self, announcement: &RecoveryAnnouncement) -> Result<()>;

    async fn subscribe(&self) -> Result<BroadcastSubscription>;
}

#[async_trait]
pub trait BroadcastNetwork: Send + Sync {
    async fn channel(&self, keep_id: &KeepId) -> Result<Arc<dyn BroadcastChannel>>;
}
