//! Core registry and synchronization functionality
//!
//! This library provides:
//! - Service registry mapping service names to load-balanced RPC clients
//! - Registry synchronization across gateway nodes over a shared event bus
//! - Directory resolution and endpoint selection for pooled clients

pub mod balancer;
pub mod bus;
pub mod directory;
pub mod endpoint;
pub mod error;
pub mod node;
pub mod pool;
pub mod registration;
pub mod registry;
pub mod relay;

#[cfg(test)]
mod test_support;

pub use balancer::{LoadBalancer, SelectionPolicy};
pub use bus::{BusRecord, BusSubscription, EventBus, InMemoryBus};
pub use directory::{DirectoryResolver, EndpointWatch, StaticDirectory};
pub use endpoint::Endpoint;
pub use error::{CoreError, Result};
pub use node::NodeId;
pub use pool::{ClientPoolFactory, PooledClient, RpcTransport};
pub use registration::{
    ServiceRegistration, SyncMessage, SYNC_MESSAGE_VERSION, SYNC_ROUTING_KEY, SYNC_TOPIC,
};
pub use registry::{RegisterOutcome, RegistryEntry, ServiceRegistry};
pub use relay::{classify, RelayConfig, RelayDecision, RelayHandle, SyncRelay};
