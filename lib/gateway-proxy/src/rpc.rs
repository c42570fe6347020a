//! Registration RPC: `POST /registry/send` with a JSON `SendRequest`
//!
//! The reply is a JSON `SendResponse` whose `status_code` is mirrored as
//! the HTTP status: 200 on success, 400 with the underlying error when the
//! registration could not be applied or the request is malformed, and 500
//! for an unrecognized action.

use crate::metrics::GatewayMetrics;
use gateway_core::{NodeId, RegisterOutcome, ServiceRegistry};
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const SEND_PATH: &str = "/registry/send";

/// Actions accepted by `send`; names are case-sensitive
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Register,
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Register" => Ok(Action::Register),
            other => Err(format!("unsupported action: {:?}", other)),
        }
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Register => f.write_str("Register"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub action: String,
    pub service_name: String,
    pub directory_address: String,
    /// Node the registration is attributed to; the receiving node when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_node_id: Option<String>,
}

impl SendRequest {
    pub fn register(service_name: impl Into<String>, directory_address: impl Into<String>) -> Self {
        Self {
            action: Action::Register.to_string(),
            service_name: service_name.into(),
            directory_address: directory_address.into(),
            origin_node_id: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SendResponse {
    pub status_code: u16,
    #[serde(default)]
    pub message: String,
}

impl SendResponse {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status_code: status.as_u16(),
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == StatusCode::OK.as_u16()
    }
}

/// Applies registration RPCs to the local registry
pub struct RegistrationService {
    registry: Arc<ServiceRegistry>,
    metrics: GatewayMetrics,
}

impl RegistrationService {
    pub fn new(registry: Arc<ServiceRegistry>, metrics: GatewayMetrics) -> Self {
        Self { registry, metrics }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub async fn send(&self, request: SendRequest) -> SendResponse {
        let response = self.apply(&request).await;
        self.metrics
            .record_registration(&request.action, response.status_code);
        response
    }

    async fn apply(&self, request: &SendRequest) -> SendResponse {
        match request.action.parse::<Action>() {
            Ok(Action::Register) => {}
            Err(reason) => {
                warn!("Rejected registration RPC: {}", reason);
                return SendResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
            }
        }

        let origin = match request.origin_node_id.as_deref() {
            Some(id) if !id.is_empty() => NodeId::from(id),
            _ => self.registry.node_id().clone(),
        };

        match self
            .registry
            .register(&request.service_name, &request.directory_address, &origin)
            .await
        {
            Ok(RegisterOutcome::Registered) => {
                SendResponse::new(StatusCode::OK, format!("registered {}", request.service_name))
            }
            Ok(RegisterOutcome::AlreadyRegistered) => SendResponse::new(
                StatusCode::OK,
                format!("{} already registered", request.service_name),
            ),
            Err(e) => {
                warn!("Failed to register {:?}: {}", request.service_name, e);
                SendResponse::new(StatusCode::BAD_REQUEST, e.to_string())
            }
        }
    }

    /// HTTP binding of `send`
    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Display,
    {
        if req.uri().path() != SEND_PATH {
            return json_response(&SendResponse::new(
                StatusCode::NOT_FOUND,
                format!("no such method: {}", req.uri().path()),
            ));
        }
        if req.method() != Method::POST {
            return json_response(&SendResponse::new(
                StatusCode::METHOD_NOT_ALLOWED,
                "send requires POST",
            ));
        }

        let body = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return json_response(&SendResponse::new(
                    StatusCode::BAD_REQUEST,
                    format!("unreadable request body: {}", e),
                ))
            }
        };

        let request: SendRequest = match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(e) => {
                debug!("Malformed registration RPC: {}", e);
                return json_response(&SendResponse::new(
                    StatusCode::BAD_REQUEST,
                    format!("malformed request: {}", e),
                ));
            }
        };

        info!(
            "Registration RPC {} for {}",
            request.action, request.service_name
        );
        json_response(&self.send(request).await)
    }
}

fn json_response(body: &SendResponse) -> Response<Full<Bytes>> {
    let status =
        StatusCode::from_u16(body.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let encoded = serde_json::to_vec(body).unwrap_or_default();

    let mut response = Response::new(Full::new(Bytes::from(encoded)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Client for a node's registration endpoint
#[derive(Clone, Debug)]
pub struct RegistrationClient {
    http: reqwest::Client,
    url: String,
}

impl RegistrationClient {
    /// `server` is the node's RPC base URL, e.g. `http://127.0.0.1:12000`
    pub fn new(server: &str, timeout: Duration) -> anyhow::Result<Self> {
        let server = server.trim_end_matches('/');
        if !server.starts_with("http://") && !server.starts_with("https://") {
            anyhow::bail!("registration server must be an http(s) URL: {}", server);
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: format!("{}{}", server, SEND_PATH),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn send(&self, request: &SendRequest) -> anyhow::Result<SendResponse> {
        let response = self.http.post(&self.url).json(request).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        match serde_json::from_slice::<SendResponse>(&body) {
            Ok(reply) => Ok(reply),
            Err(_) => Ok(SendResponse {
                status_code: status.as_u16(),
                message: String::from_utf8_lossy(&body).into_owned(),
            }),
        }
    }

    pub async fn register(
        &self,
        service_name: &str,
        directory_address: &str,
    ) -> anyhow::Result<SendResponse> {
        self.send(&SendRequest::register(service_name, directory_address))
            .await
    }
}
