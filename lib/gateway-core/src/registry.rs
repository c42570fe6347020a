//! Service registry shared by the RPC server, the HTTP gateway and the sync relay

use crate::bus::{BusRecord, EventBus};
use crate::pool::{ClientPoolFactory, PooledClient};
use crate::registration::{ServiceRegistration, SYNC_ROUTING_KEY, SYNC_TOPIC};
use crate::{NodeId, Result};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// A registered service and the pooled client used to reach it
#[derive(Debug)]
pub struct RegistryEntry {
    pub registration: ServiceRegistration,
    pub client: PooledClient,
}

/// Result of a successful [`ServiceRegistry::register`] call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// A new entry was created
    Registered,
    /// The name already had an entry; nothing changed
    AlreadyRegistered,
}

/// ServiceRegistry maps service names to pooled clients.
///
/// Entries are only ever added. A registration that originates on this node
/// is broadcast on the event bus once it has been applied locally;
/// registrations that came from peers never are.
pub struct ServiceRegistry {
    node_id: NodeId,
    services: RwLock<HashMap<String, Arc<RegistryEntry>>>,
    pools: ClientPoolFactory,
    bus: Arc<dyn EventBus>,
    topic: String,
}

impl ServiceRegistry {
    pub fn new(node_id: NodeId, pools: ClientPoolFactory, bus: Arc<dyn EventBus>) -> Self {
        Self {
            node_id,
            services: RwLock::new(HashMap::new()),
            pools,
            bus,
            topic: SYNC_TOPIC.to_string(),
        }
    }

    /// Broadcast on `topic` instead of the default sync topic
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Register a service, or do nothing if the name is already known
    pub async fn register(
        &self,
        service_name: &str,
        directory_address: &str,
        origin: &NodeId,
    ) -> Result<RegisterOutcome> {
        let registration =
            ServiceRegistration::new(service_name, directory_address, origin.clone());
        registration.validate()?;

        if self.services.read().await.contains_key(service_name) {
            info!(
                "Service {} is already registered; a new backend instance has probably come online",
                service_name
            );
            return Ok(RegisterOutcome::AlreadyRegistered);
        }

        // The client is built without holding the lock; a concurrent
        // registration of the same name may win the insert below.
        let client = self.pools.build(service_name, directory_address).await?;

        {
            let mut services = self.services.write().await;
            match services.entry(service_name.to_string()) {
                Entry::Occupied(_) => {
                    info!(
                        "Service {} was registered concurrently; discarding duplicate client",
                        service_name
                    );
                    return Ok(RegisterOutcome::AlreadyRegistered);
                }
                Entry::Vacant(slot) => {
                    slot.insert(Arc::new(RegistryEntry {
                        registration: registration.clone(),
                        client,
                    }));
                }
            }
        }

        info!(
            "Registered service {} via {} (origin {})",
            service_name, directory_address, origin
        );

        if *origin == self.node_id {
            self.broadcast(&registration).await;
        }

        Ok(RegisterOutcome::Registered)
    }

    /// Look up a registered service
    pub async fn get(&self, service_name: &str) -> Option<Arc<RegistryEntry>> {
        self.services.read().await.get(service_name).cloned()
    }

    /// Names of all registered services, sorted
    pub async fn list_services(&self) -> Vec<String> {
        let services = self.services.read().await;
        let mut names: Vec<String> = services.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn service_count(&self) -> usize {
        self.services.read().await.len()
    }

    async fn broadcast(&self, registration: &ServiceRegistration) {
        let payload = match registration.to_sync_message().encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!(
                    "Failed to encode sync message for {}: {}",
                    registration.service_name, e
                );
                return;
            }
        };

        debug!("Starting service sync for {}", registration.service_name);
        let record = BusRecord::new(self.topic.clone(), Some(SYNC_ROUTING_KEY), payload);
        if let Err(e) = self.bus.publish(record).await {
            error!(
                "Failed to broadcast registration of {}: {}",
                registration.service_name, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::SelectionPolicy;
    use crate::registration::SyncMessage;
    use crate::bus::BusSubscription;
    use crate::test_support::RecordingTransport;
    use crate::{CoreError, InMemoryBus, StaticDirectory};
    use async_trait::async_trait;

    fn registry(node: &str, bus: &InMemoryBus, directory: Arc<StaticDirectory>) -> ServiceRegistry {
        let pools = ClientPoolFactory::new(
            directory,
            Arc::new(RecordingTransport::new("pong")),
            SelectionPolicy::Random,
        );
        ServiceRegistry::new(NodeId::from(node), pools, Arc::new(bus.clone()))
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let bus = InMemoryBus::default();
        let registry = registry("a", &bus, Arc::new(StaticDirectory::new()));
        let local = registry.node_id().clone();

        let first = registry.register("orders", "consul:orders", &local).await.unwrap();
        let second = registry.register("orders", "consul:other", &local).await.unwrap();

        assert_eq!(first, RegisterOutcome::Registered);
        assert_eq!(second, RegisterOutcome::AlreadyRegistered);
        assert_eq!(registry.service_count().await, 1);

        let entry = registry.get("orders").await.unwrap();
        assert_eq!(entry.registration.directory_address, "consul:orders");
        assert_eq!(bus.published().len(), 1);
    }

    #[tokio::test]
    async fn test_local_registration_is_broadcast() {
        let bus = InMemoryBus::default();
        let registry = registry("a", &bus, Arc::new(StaticDirectory::new()));
        let local = registry.node_id().clone();

        registry.register("billing", "consul:billing", &local).await.unwrap();

        let published = bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, SYNC_TOPIC);
        assert_eq!(published[0].key.as_deref(), Some(SYNC_ROUTING_KEY));

        let message = SyncMessage::decode(&published[0].payload).unwrap();
        assert_eq!(message.service_name, "billing");
        assert_eq!(message.directory_address, "consul:billing");
        assert_eq!(message.origin_node_id, local);
    }

    #[tokio::test]
    async fn test_peer_registration_is_not_rebroadcast() {
        let bus = InMemoryBus::default();
        let registry = registry("a", &bus, Arc::new(StaticDirectory::new()));

        let outcome = registry
            .register("billing", "consul:billing", &NodeId::from("b"))
            .await
            .unwrap();

        assert_eq!(outcome, RegisterOutcome::Registered);
        assert!(registry.get("billing").await.is_some());
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_resolver_failure_leaves_registry_untouched() {
        let bus = InMemoryBus::default();
        let directory = Arc::new(StaticDirectory::new());
        directory.reject_address("consul:down").await;
        let registry = registry("a", &bus, directory);
        let local = registry.node_id().clone();

        let result = registry.register("orders", "consul:down", &local).await;
        assert!(matches!(result, Err(CoreError::Directory(_))));
        assert!(registry.get("orders").await.is_none());
        assert!(bus.published().is_empty());

        // A later registration with a reachable directory still succeeds
        let outcome = registry.register("orders", "consul:orders", &local).await.unwrap();
        assert_eq!(outcome, RegisterOutcome::Registered);
    }

    #[tokio::test]
    async fn test_invalid_registration_rejected() {
        let bus = InMemoryBus::default();
        let registry = registry("a", &bus, Arc::new(StaticDirectory::new()));
        let local = registry.node_id().clone();

        let result = registry.register("", "consul:x", &local).await;
        assert!(matches!(result, Err(CoreError::InvalidRegistration(_))));
        assert_eq!(registry.service_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_registrations_yield_one_entry() {
        let bus = InMemoryBus::default();
        let registry = Arc::new(registry("a", &bus, Arc::new(StaticDirectory::new())));
        let local = registry.node_id().clone();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            let local = local.clone();
            handles.push(tokio::spawn(async move {
                registry.register("orders", "consul:orders", &local).await
            }));
        }

        let mut registered = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() == RegisterOutcome::Registered {
                registered += 1;
            }
        }

        assert_eq!(registered, 1);
        assert_eq!(registry.service_count().await, 1);
        assert_eq!(bus.published().len(), 1);
    }

    #[tokio::test]
    async fn test_list_services_sorted() {
        let bus = InMemoryBus::default();
        let registry = registry("a", &bus, Arc::new(StaticDirectory::new()));
        let peer = NodeId::from("b");

        registry.register("orders", "consul:orders", &peer).await.unwrap();
        registry.register("billing", "consul:billing", &peer).await.unwrap();

        assert_eq!(registry.list_services().await, vec!["billing", "orders"]);
    }

    /// Bus whose brokers are unreachable
    struct UnreachableBus;

    #[async_trait]
    impl EventBus for UnreachableBus {
        async fn publish(&self, _record: BusRecord) -> Result<()> {
            Err(CoreError::Bus("broker unreachable".to_string()))
        }

        async fn subscribe(&self, _topic: &str) -> Result<BusSubscription> {
            Err(CoreError::Bus("broker unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_broadcast_failure_keeps_local_registration() {
        let pools = ClientPoolFactory::new(
            Arc::new(StaticDirectory::new()),
            Arc::new(RecordingTransport::new("pong")),
            SelectionPolicy::Random,
        );
        let registry = ServiceRegistry::new(NodeId::from("a"), pools, Arc::new(UnreachableBus));
        let local = registry.node_id().clone();

        let outcome = registry.register("billing", "consul:billing", &local).await.unwrap();
        assert_eq!(outcome, RegisterOutcome::Registered);

        let entry = registry.get("billing").await.unwrap();
        assert_eq!(entry.registration.origin, local);
        assert_eq!(registry.service_count().await, 1);
    }
}
