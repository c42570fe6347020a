//! Directory resolution: service name to a live set of endpoints

use crate::{CoreError, Endpoint, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::{watch, RwLock};
use tracing::debug;

/// Live view of a service's endpoints, updated as directory membership changes
pub type EndpointWatch = watch::Receiver<Vec<Endpoint>>;

/// Resolves a service through a directory and keeps watching it.
///
/// Resolution is lazy: implementations must not wait for the service to have
/// live endpoints. An empty watch is a valid result.
#[async_trait]
pub trait DirectoryResolver: Send + Sync {
    async fn resolve(&self, service_name: &str, directory_address: &str) -> Result<EndpointWatch>;
}

/// In-process directory with endpoints set by hand.
///
/// Several registries may share one `StaticDirectory`, which then behaves like
/// a directory service seen by the whole fleet.
#[derive(Default)]
pub struct StaticDirectory {
    services: RwLock<HashMap<String, watch::Sender<Vec<Endpoint>>>>,
    rejected: RwLock<HashSet<String>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the endpoints published for a service
    pub async fn set_endpoints(&self, service_name: &str, endpoints: Vec<Endpoint>) {
        let mut services = self.services.write().await;
        match services.get(service_name) {
            Some(sender) => {
                sender.send_replace(endpoints);
            }
            None => {
                let (sender, _) = watch::channel(endpoints);
                services.insert(service_name.to_string(), sender);
            }
        }
        debug!("Static directory updated endpoints for {}", service_name);
    }

    /// Make every resolution against `directory_address` fail
    pub async fn reject_address(&self, directory_address: &str) {
        self.rejected
            .write()
            .await
            .insert(directory_address.to_string());
    }
}

#[async_trait]
impl DirectoryResolver for StaticDirectory {
    async fn resolve(&self, service_name: &str, directory_address: &str) -> Result<EndpointWatch> {
        if self.rejected.read().await.contains(directory_address) {
            return Err(CoreError::Directory(format!(
                "directory {} is unreachable",
                directory_address
            )));
        }

        let mut services = self.services.write().await;
        let sender = services
            .entry(service_name.to_string())
            .or_insert_with(|| watch::channel(Vec::new()).0);
        Ok(sender.subscribe())
    }
}
