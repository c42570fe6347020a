//! Shared event channel used to propagate registry changes across the fleet

use crate::{CoreError, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// One record on the event bus
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusRecord {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

impl BusRecord {
    pub fn new(topic: impl Into<String>, key: Option<&str>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: key.map(str::to_string),
            payload,
        }
    }
}

/// Stream of deliveries for one subscription. Delivery errors are reported
/// in-band; the subscription ends when the channel closes.
pub type BusSubscription = mpsc::Receiver<Result<BusRecord>>;

/// Depth of the per-subscription delivery buffer
pub const SUBSCRIPTION_BUFFER: usize = 256;

/// Durable, at-least-once broadcast channel shared by all nodes
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a record to every subscriber of its topic
    async fn publish(&self, record: BusRecord) -> Result<()>;

    /// Subscribe to `topic`, starting at the newest record
    async fn subscribe(&self, topic: &str) -> Result<BusSubscription>;
}

/// Event bus living inside one process.
///
/// Cloning shares the channel, so several simulated nodes can run against the
/// same bus in one test. Every published record is also kept in a log for
/// inspection.
#[derive(Clone)]
pub struct InMemoryBus {
    sender: broadcast::Sender<BusRecord>,
    published: Arc<Mutex<Vec<BusRecord>>>,
}

impl InMemoryBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            published: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every record published so far, in publish order
    pub fn published(&self) -> Vec<BusRecord> {
        self.published
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, record: BusRecord) -> Result<()> {
        if let Ok(mut log) = self.published.lock() {
            log.push(record.clone());
        }

        // No subscribers is not an error: the record is simply not retained
        if self.sender.send(record).is_err() {
            debug!("In-memory bus published with no subscribers");
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BusSubscription> {
        let mut receiver = self.sender.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let topic = topic.to_string();

        tokio::spawn(async move {
            loop {
                let delivery = match receiver.recv().await {
                    Ok(record) if record.topic == topic => Ok(record),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("In-memory bus subscriber lagged by {} records", skipped);
                        Err(CoreError::Bus(format!("subscriber lagged by {} records", skipped)))
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                if tx.send(delivery).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }
}
