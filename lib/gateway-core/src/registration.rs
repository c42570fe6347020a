//! Service registrations and their broadcast wire form

use crate::{CoreError, NodeId, Result};
use serde::{Deserialize, Serialize};

/// Topic shared by every node of the fleet
pub const SYNC_TOPIC: &str = "microservice-gateway";

/// Routing key marking a bus record as a registry sync event
pub const SYNC_ROUTING_KEY: &str = "/sync";

/// Current version of the [`SyncMessage`] schema
pub const SYNC_MESSAGE_VERSION: u32 = 1;

/// A request to make `service_name` reachable through the gateway fleet
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceRegistration {
    pub service_name: String,
    pub directory_address: String,
    pub origin: NodeId,
}

impl ServiceRegistration {
    pub fn new(
        service_name: impl Into<String>,
        directory_address: impl Into<String>,
        origin: NodeId,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            directory_address: directory_address.into(),
            origin,
        }
    }

    /// Reject registrations that could never resolve
    pub fn validate(&self) -> Result<()> {
        if self.service_name.trim().is_empty() {
            return Err(CoreError::InvalidRegistration(
                "service name must not be empty".to_string(),
            ));
        }
        if !self.service_name.chars().all(is_unreserved) {
            return Err(CoreError::InvalidRegistration(format!(
                "service name must be a single unescaped path segment \
                 (letters, digits, '-', '.', '_', '~'): {:?}",
                self.service_name
            )));
        }
        if self.directory_address.trim().is_empty() {
            return Err(CoreError::InvalidRegistration(format!(
                "directory address must not be empty for service {}",
                self.service_name
            )));
        }
        Ok(())
    }

    pub fn to_sync_message(&self) -> SyncMessage {
        SyncMessage {
            version: SYNC_MESSAGE_VERSION,
            service_name: self.service_name.clone(),
            directory_address: self.directory_address.clone(),
            origin_node_id: self.origin.clone(),
        }
    }
}

/// Characters a URL path segment carries without percent-encoding
fn is_unreserved(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
}

fn default_version() -> u32 {
    SYNC_MESSAGE_VERSION
}

/// Payload of a registry sync broadcast.
///
/// Unknown fields are ignored so newer nodes can extend the record without
/// breaking older consumers. All three registration fields are required:
/// a partial record is rejected as a whole.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMessage {
    #[serde(default = "default_version")]
    pub version: u32,
    pub service_name: String,
    pub directory_address: String,
    pub origin_node_id: NodeId,
}

impl SyncMessage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let message: SyncMessage = serde_json::from_slice(payload)
            .map_err(|e| CoreError::MalformedMessage(e.to_string()))?;

        if message.origin_node_id.is_empty() {
            return Err(CoreError::MalformedMessage(
                "origin_node_id is empty".to_string(),
            ));
        }

        message
            .clone()
            .into_registration()
            .validate()
            .map_err(|e| CoreError::MalformedMessage(e.to_string()))?;

        Ok(message)
    }

    pub fn into_registration(self) -> ServiceRegistration {
        ServiceRegistration {
            service_name: self.service_name,
            directory_address: self.directory_address,
            origin: self.origin_node_id,
        }
    }
}
