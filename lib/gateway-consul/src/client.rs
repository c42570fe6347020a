//! HTTP client for the Consul agent and health APIs

use crate::{ConsulError, Result};
use gateway_core::Endpoint;
use reqwest::{Client, Response, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Consul client configuration
#[derive(Clone, Debug)]
pub struct ConsulConfig {
    /// Timeout for connecting and for non-blocking requests
    pub request_timeout: Duration,
    /// How long a blocking health query may wait for a change
    pub watch_wait: Duration,
    /// Delay before retrying a failed health query
    pub retry_backoff: Duration,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            watch_wait: Duration::from_secs(30),
            retry_backoff: Duration::from_secs(1),
        }
    }
}

/// Service registration body for `PUT /v1/agent/service/register`
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentServiceRegistration {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub check: AgentServiceCheck,
}

/// TTL check attached to an agent service registration
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentServiceCheck {
    #[serde(rename = "TTL")]
    pub ttl: String,
    pub deregister_critical_service_after: String,
}

/// One element of a `GET /v1/health/service/{name}` response
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthEntry {
    #[serde(default)]
    pub node: HealthNode,
    pub service: HealthService,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthNode {
    #[serde(default)]
    pub address: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthService {
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub address: String,
    pub port: u16,
}

/// Convert passing health entries into endpoints. A service registered
/// without an address is reachable at its node's address.
pub fn endpoints_from_health(entries: Vec<HealthEntry>) -> Vec<Endpoint> {
    let mut endpoints: Vec<Endpoint> = entries
        .into_iter()
        .map(|entry| {
            let ip = if entry.service.address.is_empty() {
                entry.node.address
            } else {
                entry.service.address
            };
            Endpoint::new(ip, entry.service.port)
        })
        .filter(|endpoint| !endpoint.ip.is_empty())
        .collect();

    endpoints.sort_by(|a, b| (a.ip.as_str(), a.port).cmp(&(b.ip.as_str(), b.port)));
    endpoints.dedup();
    endpoints
}

/// Parse a directory address, defaulting to plain HTTP when no scheme is given
pub fn normalize_address(address: &str) -> Result<Url> {
    let address = address.trim();
    if address.is_empty() {
        return Err(ConsulError::InvalidAddress("address is empty".to_string()));
    }

    let with_scheme = if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };

    let url = Url::parse(&with_scheme)
        .map_err(|e| ConsulError::InvalidAddress(format!("{}: {}", address, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConsulError::InvalidAddress(format!(
            "{}: unsupported scheme {}",
            address,
            url.scheme()
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConsulError::InvalidAddress(format!("{}: missing host", address)));
    }

    Ok(url)
}

/// ConsulClient talks to one Consul agent
#[derive(Clone)]
pub struct ConsulClient {
    http: Client,
    base: Url,
    config: ConsulConfig,
}

impl ConsulClient {
    /// Create a client for the agent at `address`. No request is made.
    pub fn new(address: &str, config: ConsulConfig) -> Result<Self> {
        let base = normalize_address(address)?;
        let http = Client::builder()
            .connect_timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, base, config })
    }

    pub fn address(&self) -> &Url {
        &self.base
    }

    pub fn config(&self) -> &ConsulConfig {
        &self.config
    }

    /// Agent URL for `segments`, each percent-encoded as one path segment
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ConsulError::InvalidAddress(format!("{}: cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Fetch the passing instances of `service`.
    ///
    /// With an `index` the request is a blocking query that returns once the
    /// result changes past that index or the wait time elapses. Returns the
    /// endpoints and the new index.
    pub async fn health_service(
        &self,
        service: &str,
        index: Option<u64>,
    ) -> Result<(Vec<Endpoint>, u64)> {
        let url = self.url(&["v1", "health", "service", service])?;
        let mut request = self.http.get(url).query(&[("passing", "true")]);

        request = match index {
            Some(index) => request
                .query(&[
                    ("index", index.to_string()),
                    ("wait", format!("{}s", self.config.watch_wait.as_secs())),
                ])
                .timeout(self.config.watch_wait + self.config.request_timeout),
            None => request.timeout(self.config.request_timeout),
        };

        let response = check_status(request.send().await?).await?;
        let new_index = response
            .headers()
            .get("X-Consul-Index")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        let entries: Vec<HealthEntry> = response.json().await?;
        debug!(
            "Consul reports {} passing instances of {} at index {}",
            entries.len(),
            service,
            new_index
        );

        Ok((endpoints_from_health(entries), new_index))
    }

    pub async fn register_service(&self, registration: &AgentServiceRegistration) -> Result<()> {
        let response = self
            .http
            .put(self.url(&["v1", "agent", "service", "register"])?)
            .timeout(self.config.request_timeout)
            .json(registration)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    /// Mark a TTL check as passing
    pub async fn pass_ttl(&self, check_id: &str) -> Result<()> {
        let response = self
            .http
            .put(self.url(&["v1", "agent", "check", "pass", check_id])?)
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    pub async fn deregister_service(&self, service_id: &str) -> Result<()> {
        let response = self
            .http
            .put(self.url(&["v1", "agent", "service", "deregister", service_id])?)
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let path = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();
    Err(ConsulError::Status {
        status: status.as_u16(),
        path,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_address() {
        assert_eq!(
            normalize_address("localhost:8500").unwrap().as_str(),
            "http://localhost:8500/"
        );
        assert_eq!(
            normalize_address("https://consul.internal").unwrap().as_str(),
            "https://consul.internal/"
        );
        assert!(normalize_address("").is_err());
        assert!(normalize_address("ftp://consul").is_err());
        assert!(normalize_address("consul:billing").is_err());
    }

    #[test]
    fn test_endpoints_from_health() {
        let body = r#"[
            {"Node": {"Node": "n1", "Address": "10.0.0.1"},
             "Service": {"ID": "orders-1", "Service": "orders", "Address": "", "Port": 9000},
             "Checks": []},
            {"Node": {"Node": "n2", "Address": "10.0.0.2"},
             "Service": {"ID": "orders-2", "Service": "orders", "Address": "172.16.0.9", "Port": 9001},
             "Checks": []},
            {"Node": {"Node": "n1", "Address": "10.0.0.1"},
             "Service": {"ID": "orders-1b", "Service": "orders", "Address": "10.0.0.1", "Port": 9000},
             "Checks": []}
        ]"#;

        let entries: Vec<HealthEntry> = serde_json::from_str(body).unwrap();
        let endpoints = endpoints_from_health(entries);

        assert_eq!(
            endpoints,
            vec![Endpoint::new("10.0.0.1", 9000), Endpoint::new("172.16.0.9", 9001)]
        );
    }

    #[test]
    fn test_registration_wire_format() {
        let registration = AgentServiceRegistration {
            id: "node-a".to_string(),
            name: "microservice-gateway".to_string(),
            address: "127.0.0.1".to_string(),
            port: 12000,
            check: AgentServiceCheck {
                ttl: "5s".to_string(),
                deregister_critical_service_after: "1m".to_string(),
            },
        };

        let value = serde_json::to_value(&registration).unwrap();
        assert_eq!(value["ID"], "node-a");
        assert_eq!(value["Name"], "microservice-gateway");
        assert_eq!(value["Port"], 12000);
        assert_eq!(value["Check"]["TTL"], "5s");
        assert_eq!(value["Check"]["DeregisterCriticalServiceAfter"], "1m");
    }

    #[test]
    fn test_client_creation_makes_no_request() {
        let client = ConsulClient::new("127.0.0.1:1", ConsulConfig::default()).unwrap();
        assert_eq!(
            client.url(&["v1", "agent", "self"]).unwrap().as_str(),
            "http://127.0.0.1:1/v1/agent/self"
        );
    }

    #[test]
    fn test_url_escapes_each_segment() {
        let client = ConsulClient::new("http://consul.internal:8500/", ConsulConfig::default()).unwrap();

        let url = client.url(&["v1", "health", "service", "a?b/c d"]).unwrap();
        assert_eq!(url.path(), "/v1/health/service/a%3Fb%2Fc%20d");
        assert_eq!(url.query(), None);
        assert_eq!(url.path_segments().unwrap().count(), 4);
    }
}
