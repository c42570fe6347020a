//! Directory resolver backed by Consul health queries

use crate::client::{ConsulClient, ConsulConfig};
use async_trait::async_trait;
use gateway_core::{CoreError, DirectoryResolver, Endpoint, EndpointWatch};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Resolves services against the Consul agent named by each registration's
/// directory address, and keeps the endpoint set current with blocking
/// queries for as long as a client holds the watch.
#[derive(Clone, Debug, Default)]
pub struct ConsulResolver {
    config: ConsulConfig,
}

impl ConsulResolver {
    pub fn new(config: ConsulConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DirectoryResolver for ConsulResolver {
    async fn resolve(
        &self,
        service_name: &str,
        directory_address: &str,
    ) -> gateway_core::Result<EndpointWatch> {
        let client = ConsulClient::new(directory_address, self.config.clone())
            .map_err(|e| CoreError::Directory(e.to_string()))?;

        let (sender, receiver) = watch::channel(Vec::new());
        info!(
            "Watching {} in Consul at {}",
            service_name,
            client.address()
        );
        tokio::spawn(watch_service(client, service_name.to_string(), sender));

        Ok(receiver)
    }
}

async fn watch_service(client: ConsulClient, service: String, sender: watch::Sender<Vec<Endpoint>>) {
    let backoff = client.config().retry_backoff;
    let mut index: Option<u64> = None;

    loop {
        let result = tokio::select! {
            _ = sender.closed() => break,
            result = client.health_service(&service, index) => result,
        };

        match result {
            Ok((endpoints, new_index)) => {
                let changed = sender.send_if_modified(|current| {
                    if *current != endpoints {
                        *current = endpoints;
                        true
                    } else {
                        false
                    }
                });
                if changed {
                    debug!("Endpoints for {} changed at index {}", service, new_index);
                }

                // Consul resets its index when its state is rebuilt; start
                // over with a non-blocking query if it goes backwards.
                let went_backwards = index.map_or(false, |previous| new_index < previous);
                if new_index == 0 || went_backwards {
                    index = None;
                    if !pause(&sender, backoff).await {
                        break;
                    }
                } else {
                    index = Some(new_index);
                }
            }
            Err(e) => {
                warn!("Consul health query for {} failed: {}", service, e);
                if !pause(&sender, backoff).await {
                    break;
                }
            }
        }
    }

    debug!("No clients left for {}; directory watch stopped", service);
}

/// Sleep for `delay`; false if every receiver went away meanwhile
async fn pause(sender: &watch::Sender<Vec<Endpoint>>, delay: Duration) -> bool {
    tokio::select! {
        _ = sender.closed() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
