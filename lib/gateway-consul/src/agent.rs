//! Self-registration of a gateway node in Consul, kept alive by a TTL heartbeat

use crate::client::{AgentServiceCheck, AgentServiceRegistration, ConsulClient};
use crate::Result;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Service name every gateway node registers under
pub const GATEWAY_SERVICE_NAME: &str = "microservice-gateway";

/// How this node appears in the directory
#[derive(Clone, Debug)]
pub struct AgentRegistration {
    pub service_name: String,
    /// Instance ID; the node identity
    pub id: String,
    pub address: String,
    pub port: u16,
    /// TTL of the health check refreshed by the heartbeat
    pub ttl: Duration,
    /// Consul removes the instance after its check has been critical this long
    pub deregister_after: Duration,
}

impl AgentRegistration {
    pub fn new(id: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            service_name: GATEWAY_SERVICE_NAME.to_string(),
            id: id.into(),
            address: address.into(),
            port,
            ttl: Duration::from_secs(5),
            deregister_after: Duration::from_secs(60),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// ID Consul assigns to the single check of a service
    pub fn check_id(&self) -> String {
        format!("service:{}", self.id)
    }

    /// The check is passed twice per TTL
    pub fn heartbeat_interval(&self) -> Duration {
        (self.ttl / 2).max(Duration::from_millis(100))
    }

    pub fn to_wire(&self) -> AgentServiceRegistration {
        AgentServiceRegistration {
            id: self.id.clone(),
            name: self.service_name.clone(),
            address: self.address.clone(),
            port: self.port,
            check: AgentServiceCheck {
                ttl: consul_duration(self.ttl),
                deregister_critical_service_after: consul_duration(self.deregister_after),
            },
        }
    }
}

fn consul_duration(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

/// DirectoryAgent registers the node and runs its heartbeat
pub struct DirectoryAgent {
    client: ConsulClient,
    registration: AgentRegistration,
}

impl DirectoryAgent {
    pub fn new(client: ConsulClient, registration: AgentRegistration) -> Self {
        Self {
            client,
            registration,
        }
    }

    pub fn registration(&self) -> &AgentRegistration {
        &self.registration
    }

    /// Register the node and pass its check once so it starts healthy
    pub async fn register(&self) -> Result<()> {
        self.client.register_service(&self.registration.to_wire()).await?;
        self.heartbeat().await?;
        info!(
            "Registered {} as {} at {}:{} (ttl {:?})",
            self.registration.service_name,
            self.registration.id,
            self.registration.address,
            self.registration.port,
            self.registration.ttl
        );
        Ok(())
    }

    pub async fn heartbeat(&self) -> Result<()> {
        self.client.pass_ttl(&self.registration.check_id()).await
    }

    /// Pass the TTL check forever. Failures are logged; if they persist the
    /// directory evicts the node.
    pub async fn run_heartbeat(&self) {
        let mut ticker = time::interval(self.registration.heartbeat_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.heartbeat().await {
                Ok(()) => debug!("Directory heartbeat sent for {}", self.registration.id),
                Err(e) => warn!("Directory heartbeat failed: {}", e),
            }
        }
    }

    pub async fn deregister(&self) -> Result<()> {
        self.client.deregister_service(&self.registration.id).await?;
        info!("Deregistered {} from the directory", self.registration.id);
        Ok(())
    }
}
