//! Endpoint management
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip: String,
    pub port: u16,
    pub ready: bool,
}

impl Endpoint {
    /// A ready endpoint at `ip:port`
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            ready: true,
        }
    }

    /// `host:port` authority used when dialing the endpoint
    pub fn authority(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}
