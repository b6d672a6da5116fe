use crate::domain::RecoveryAnnouncement;
use crate::foundation::{KeepId, NodeError, Result};
use crate::infrastructure::transport::{BroadcastChannel, BroadcastNetwork, BroadcastSubscription};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

const CHANNEL_CAPACITY: usize = 64;

/// In-memory broadcast hub: one topic per keep, every subscriber sees every
/// frame including its own. Frames cross the hub in wire encoding so the
/// codec is exercised the same way a real transport would.
pub struct MemoryBroadcastNetwork {
    topics: Mutex<HashMap<KeepId, broadcast::Sender<Vec<u8>>>>,
}

impl MemoryBroadcastNetwork {
    pub fn new() -> Self {
        Self { topics: Mutex::new(HashMap::new()) }
    }

    async fn topic(&self, keep_id: &KeepId) -> broadcast::Sender<Vec<u8>> {
        let mut topics = self.topics.lock().await;
        topics.entry(*keep_id).or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0).clone()
    }
}

impl Default for MemoryBroadcastNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BroadcastNetwork for MemoryBroadcastNetwork {
    async fn channel(&self, keep_id: &KeepId) -> Result<Arc<dyn BroadcastChannel>> {
        let sender = self.topic(keep_id).await;
        Ok(Arc::new(MemoryBroadcastChannel { sender }))
    }
}

struct MemoryBroadcastChannel {
    sender: broadcast::Sender<Vec<u8>>,
}

#[async_trait]
impl BroadcastChannel for MemoryBroadcastChannel {
    async fn send(&self, announcement: &RecoveryAnnouncement) -> Result<()> {
        let frame = announcement.to_wire()?;
        // Publishing to a topic with no peers is not an error.
        let _ = self.sender.send(frame);
        Ok(())
    }

    async fn subscribe(&self) -> Result<BroadcastSubscription> {
        let mut receiver = self.sender.subscribe();
        let stream = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(frame) => yield RecoveryAnnouncement::from_wire(&frame),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        yield Err(NodeError::transport("broadcast receive", format!("lagged by {skipped} frames")));
                    }
                }
            }
        };
        Ok(BroadcastSubscription::new(Box::pin(stream)))
    }
}
