use crate::pool::RpcTransport;
use crate::registry::ServiceRegistry;
use crate::{Endpoint, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Transport that answers every call with a fixed reply and records the
/// `(authority, method)` of each call.
pub struct RecordingTransport {
    reply: Bytes,
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingTransport {
    pub fn new(reply: &'static str) -> Self {
        Self {
            reply: Bytes::from_static(reply.as_bytes()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RpcTransport for RecordingTransport {
    async fn call(&self, endpoint: &Endpoint, method: &str, _payload: Bytes) -> Result<Bytes> {
        self.calls
            .lock()
            .unwrap()
            .push((endpoint.authority(), method.to_string()));
        Ok(self.reply.clone())
    }
}

/// Poll `registry` until `service` is registered or `timeout` elapses
pub async fn wait_for_service(registry: &ServiceRegistry, service: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if registry.get(service).await.is_some() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    registry.get(service).await.is_some()
}
