//! Load-balanced RPC clients, one per registered service

use crate::balancer::{LoadBalancer, SelectionPolicy};
use crate::directory::{DirectoryResolver, EndpointWatch};
use crate::{CoreError, Endpoint, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Wire transport used to invoke a method on one backend endpoint
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(&self, endpoint: &Endpoint, method: &str, payload: Bytes) -> Result<Bytes>;
}

/// A single long-lived client for one service, multiplexed over the
/// service's live endpoints.
pub struct PooledClient {
    service_name: String,
    endpoints: EndpointWatch,
    balancer: LoadBalancer,
    transport: Arc<dyn RpcTransport>,
}

impl PooledClient {
    /// Snapshot of the endpoints currently able to take calls
    pub fn live_endpoints(&self) -> Vec<Endpoint> {
        self.endpoints
            .borrow()
            .iter()
            .filter(|e| e.ready)
            .cloned()
            .collect()
    }

    /// Invoke `method` on one live endpoint chosen by the selection policy
    pub async fn call(&self, method: &str, payload: Bytes) -> Result<Bytes> {
        let endpoint = {
            let endpoints = self.endpoints.borrow();
            self.balancer.select(&endpoints).cloned()
        }
        .ok_or_else(|| CoreError::NoLiveEndpoints(self.service_name.clone()))?;

        debug!(
            "Calling {}.{} on {}",
            self.service_name,
            method,
            endpoint.authority()
        );
        self.transport.call(&endpoint, method, payload).await
    }
}

impl fmt::Debug for PooledClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledClient")
            .field("service_name", &self.service_name)
            .field("policy", &self.balancer.policy())
            .field("live_endpoints", &self.live_endpoints().len())
            .finish()
    }
}

/// Builds [`PooledClient`]s. Holds no cache; the registry keeps one client
/// per service name.
pub struct ClientPoolFactory {
    resolver: Arc<dyn DirectoryResolver>,
    transport: Arc<dyn RpcTransport>,
    policy: SelectionPolicy,
}

impl ClientPoolFactory {
    pub fn new(
        resolver: Arc<dyn DirectoryResolver>,
        transport: Arc<dyn RpcTransport>,
        policy: SelectionPolicy,
    ) -> Self {
        Self {
            resolver,
            transport,
            policy,
        }
    }

    pub async fn build(&self, service_name: &str, directory_address: &str) -> Result<PooledClient> {
        let endpoints = self.resolver.resolve(service_name, directory_address).await?;

        debug!(
            "Built {} client for {} via {} ({} endpoints known)",
            self.policy,
            service_name,
            directory_address,
            endpoints.borrow().len()
        );

        Ok(PooledClient {
            service_name: service_name.to_string(),
            endpoints,
            balancer: LoadBalancer::new(self.policy),
            transport: self.transport.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingTransport;
    use crate::StaticDirectory;

    #[tokio::test]
    async fn test_build_is_lazy_and_call_fails_without_endpoints() {
        let directory = Arc::new(StaticDirectory::new());
        let transport = Arc::new(RecordingTransport::new("pong"));
        let factory = ClientPoolFactory::new(directory, transport.clone(), SelectionPolicy::Random);

        let client = factory.build("orders", "consul:orders").await.unwrap();
        assert!(client.live_endpoints().is_empty());

        let result = client.call("Say", Bytes::new()).await;
        assert!(matches!(result, Err(CoreError::NoLiveEndpoints(name)) if name == "orders"));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_call_tracks_directory_changes() {
        let directory = Arc::new(StaticDirectory::new());
        let transport = Arc::new(RecordingTransport::new("pong"));
        let factory =
            ClientPoolFactory::new(directory.clone(), transport.clone(), SelectionPolicy::RoundRobin);

        let client = factory.build("orders", "consul:orders").await.unwrap();
        directory
            .set_endpoints("orders", vec![Endpoint::new("10.0.0.7", 9000)])
            .await;

        let reply = client.call("Say", Bytes::from_static(b"hi")).await.unwrap();
        assert_eq!(reply, Bytes::from_static(b"pong"));
        assert_eq!(
            transport.calls(),
            vec![("10.0.0.7:9000".to_string(), "Say".to_string())]
        );
    }

    #[tokio::test]
    async fn test_resolver_failure_surfaces() {
        let directory = Arc::new(StaticDirectory::new());
        directory.reject_address("consul:down").await;
        let factory = ClientPoolFactory::new(
            directory,
            Arc::new(RecordingTransport::new("pong")),
            SelectionPolicy::Random,
        );
        assert!(factory.build("orders", "consul:down").await.is_err());
    }
}
