//! Sync relay: applies registrations broadcast by peers to the local registry

use crate::bus::{BusRecord, BusSubscription, EventBus};
use crate::registration::{ServiceRegistration, SyncMessage, SYNC_ROUTING_KEY, SYNC_TOPIC};
use crate::registry::ServiceRegistry;
use crate::{NodeId, Result};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Sync relay configuration
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Topic carrying sync records
    pub topic: String,
    /// Capacity of the queue between the bus consumer and the registry worker
    pub queue_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            topic: SYNC_TOPIC.to_string(),
            queue_capacity: 1024,
        }
    }
}

/// What the relay does with one bus record
#[derive(Debug, PartialEq, Eq)]
pub enum RelayDecision {
    /// Not a sync record
    Ignored,
    /// Sync record whose payload could not be decoded
    Malformed(String),
    /// Broadcast by this node; already applied locally
    SelfOriginated,
    /// Registration to apply
    Accepted(ServiceRegistration),
}

/// Decide what to do with a bus record received by node `local`
pub fn classify(local: &NodeId, record: &BusRecord) -> RelayDecision {
    if record.key.as_deref() != Some(SYNC_ROUTING_KEY) {
        return RelayDecision::Ignored;
    }

    let message = match SyncMessage::decode(&record.payload) {
        Ok(message) => message,
        Err(e) => return RelayDecision::Malformed(e.to_string()),
    };

    if message.origin_node_id == *local {
        return RelayDecision::SelfOriginated;
    }

    RelayDecision::Accepted(message.into_registration())
}

/// Consumes the sync topic and feeds peer registrations into the registry.
///
/// The consumer never touches the registry itself: accepted registrations go
/// through a bounded queue to a single worker, so a slow directory lookup can
/// not stall bus consumption.
pub struct SyncRelay {
    registry: Arc<ServiceRegistry>,
    bus: Arc<dyn EventBus>,
    config: RelayConfig,
}

/// Handles to the relay's background tasks
pub struct RelayHandle {
    consumer: JoinHandle<()>,
    worker: JoinHandle<()>,
}

impl RelayHandle {
    /// Stop both tasks
    pub fn abort(&self) {
        self.consumer.abort();
        self.worker.abort();
    }

    /// Wait until the subscription closes and the queue is drained
    pub async fn join(self) {
        if let Err(e) = self.consumer.await {
            if !e.is_cancelled() {
                error!("Sync relay consumer task failed: {}", e);
            }
        }
        if let Err(e) = self.worker.await {
            if !e.is_cancelled() {
                error!("Sync relay worker task failed: {}", e);
            }
        }
    }
}

impl SyncRelay {
    pub fn new(registry: Arc<ServiceRegistry>, bus: Arc<dyn EventBus>, config: RelayConfig) -> Self {
        Self {
            registry,
            bus,
            config,
        }
    }

    /// Subscribe to the sync topic and spawn the consumer and worker tasks.
    ///
    /// A subscription failure is returned to the caller; everything after
    /// that is logged and never ends the relay.
    pub async fn start(self) -> Result<RelayHandle> {
        let subscription = self.bus.subscribe(&self.config.topic).await?;
        let (queue, pending) = mpsc::channel(self.config.queue_capacity.max(1));
        let local = self.registry.node_id().clone();

        info!(
            "Sync relay consuming topic {} as node {}",
            self.config.topic, local
        );

        let worker = tokio::spawn(apply_registrations(pending, self.registry.clone()));
        let consumer = tokio::spawn(consume(subscription, local, queue));

        Ok(RelayHandle { consumer, worker })
    }
}

async fn consume(
    mut subscription: BusSubscription,
    local: NodeId,
    queue: mpsc::Sender<ServiceRegistration>,
) {
    while let Some(delivery) = subscription.recv().await {
        let record = match delivery {
            Ok(record) => record,
            Err(e) => {
                error!("Event bus consume error: {}", e);
                continue;
            }
        };

        match classify(&local, &record) {
            RelayDecision::Ignored => {
                debug!("Ignoring non-sync record on {}", record.topic);
            }
            RelayDecision::Malformed(reason) => {
                warn!("Dropping malformed sync message: {}", reason);
            }
            RelayDecision::SelfOriginated => {
                debug!("Skipping self-originated sync message");
            }
            RelayDecision::Accepted(registration) => match queue.try_send(registration) {
                Ok(()) => {}
                Err(TrySendError::Full(registration)) => {
                    warn!(
                        "Relay queue full; dropping sync of {} from {}",
                        registration.service_name, registration.origin
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    error!("Relay worker has stopped; ending sync consumption");
                    return;
                }
            },
        }
    }

    info!("Sync subscription closed");
}

async fn apply_registrations(
    mut pending: mpsc::Receiver<ServiceRegistration>,
    registry: Arc<ServiceRegistry>,
) {
    while let Some(registration) = pending.recv().await {
        match registry
            .register(
                &registration.service_name,
                &registration.directory_address,
                &registration.origin,
            )
            .await
        {
            Ok(outcome) => {
                debug!(
                    "Applied synced registration of {}: {:?}",
                    registration.service_name, outcome
                );
            }
            Err(e) => {
                warn!(
                    "Failed to apply synced registration of {} from {}: {}",
                    registration.service_name, registration.origin, e
                );
            }
        }
    }
}
