//! Consul integration: directory resolution and node self-registration
pub mod agent;
pub mod client;
pub mod error;
pub mod resolver;

pub use agent::{AgentRegistration, DirectoryAgent, GATEWAY_SERVICE_NAME};
pub use client::{ConsulClient, ConsulConfig};
pub use error::{ConsulError, Result};
pub use resolver::ConsulResolver;
