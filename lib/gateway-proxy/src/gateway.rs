//! HTTP gateway: `GET /{service}` invokes the service's backend and returns
//! its reply.

use crate::metrics::{GatewayMetrics, UNKNOWN_SERVICE};
use gateway_core::ServiceRegistry;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub const HEALTH_PATH: &str = "/healthz";
pub const METRICS_PATH: &str = "/metrics";

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Backend method invoked for every gateway request
    pub backend_method: String,
    /// Deadline for one backend call
    pub backend_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            backend_method: "Say".to_string(),
            backend_timeout: Duration::from_secs(10),
        }
    }
}

/// HttpGateway routes requests to registered services
pub struct HttpGateway {
    registry: Arc<ServiceRegistry>,
    config: GatewayConfig,
    metrics: GatewayMetrics,
}

impl HttpGateway {
    pub fn new(registry: Arc<ServiceRegistry>, config: GatewayConfig, metrics: GatewayMetrics) -> Self {
        Self {
            registry,
            config,
            metrics,
        }
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Display,
    {
        let path = req.uri().path().to_string();
        debug!("Gateway request: {} {}", req.method(), path);

        if req.method() == Method::GET && path == HEALTH_PATH {
            return text_response(StatusCode::OK, "OK\n");
        }
        if req.method() == Method::GET && path == METRICS_PATH {
            return self.metrics_response().await;
        }

        if req.method() != Method::GET {
            return text_response(
                StatusCode::METHOD_NOT_ALLOWED,
                format!("Method Not Allowed: {}\n", req.method()),
            );
        }

        let Some(service_name) = service_name_from_path(&path) else {
            self.metrics
                .record_request(UNKNOWN_SERVICE, StatusCode::NOT_FOUND.as_u16());
            return not_found_response("no service named in path");
        };

        let Some(entry) = self.registry.get(service_name).await else {
            info!("Failed to find a service with name {}", service_name);
            self.metrics
                .record_request(UNKNOWN_SERVICE, StatusCode::NOT_FOUND.as_u16());
            return not_found_response(&format!("unknown service {}", service_name));
        };

        let payload = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!("Failed to read request body for {}: {}", service_name, e);
                self.metrics
                    .record_request(service_name, StatusCode::BAD_REQUEST.as_u16());
                return text_response(StatusCode::BAD_REQUEST, "Bad Request: unreadable body\n");
            }
        };

        let started = Instant::now();
        let result = timeout(
            self.config.backend_timeout,
            entry.client.call(&self.config.backend_method, payload),
        )
        .await;
        self.metrics
            .backend_duration_seconds
            .with_label_values(&[service_name])
            .observe(started.elapsed().as_secs_f64());

        match result {
            Ok(Ok(reply)) => {
                self.metrics
                    .record_request(service_name, StatusCode::OK.as_u16());
                ok_response(reply)
            }
            Ok(Err(e)) => {
                warn!("Failed to invoke {} on {}: {}", self.config.backend_method, service_name, e);
                self.metrics
                    .record_request(service_name, StatusCode::INTERNAL_SERVER_ERROR.as_u16());
                internal_error_response(&e.to_string())
            }
            Err(_) => {
                warn!(
                    "Call to {} exceeded {:?}",
                    service_name, self.config.backend_timeout
                );
                self.metrics
                    .record_request(service_name, StatusCode::INTERNAL_SERVER_ERROR.as_u16());
                internal_error_response("backend deadline exceeded")
            }
        }
    }

    async fn metrics_response(&self) -> Response<Full<Bytes>> {
        self.metrics
            .registered_services
            .set(self.registry.service_count().await as i64);

        match self.metrics.gather() {
            Ok(text) => {
                let mut response = text_response(StatusCode::OK, text);
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                response
            }
            Err(e) => internal_error_response(&e.to_string()),
        }
    }
}

/// Service named by a single-segment path: `/billing` names `billing`,
/// `/billing/x` names nothing
pub fn service_name_from_path(path: &str) -> Option<&str> {
    let name = path.strip_prefix('/').unwrap_or(path);
    if name.is_empty() || name.contains('/') {
        return None;
    }
    Some(name)
}

pub(crate) fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

/// Backend replies are passed through as-is
fn ok_response(reply: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(reply));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    response
}

/// Create a 404 Not Found response
pub fn not_found_response(reason: &str) -> Response<Full<Bytes>> {
    text_response(StatusCode::NOT_FOUND, format!("Not Found: {}\n", reason))
}

/// Create a 500 Internal Server Error response
pub fn internal_error_response(reason: &str) -> Response<Full<Bytes>> {
    text_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Internal Server Error: {}\n", reason),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gateway_core::{
        ClientPoolFactory, CoreError, Endpoint, InMemoryBus, NodeId, RpcTransport, SelectionPolicy,
        StaticDirectory,
    };

    /// Echoes the payload back, or fails for payloads starting with "fail"
    struct EchoTransport;

    #[async_trait]
    impl RpcTransport for EchoTransport {
        async fn call(
            &self,
            _endpoint: &Endpoint,
            method: &str,
            payload: Bytes,
        ) -> gateway_core::Result<Bytes> {
            if payload.starts_with(b"fail") {
                return Err(CoreError::Rpc("backend refused".to_string()));
            }
            if payload.starts_with(b"slow") {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(Bytes::from(format!("{}:{}", method, String::from_utf8_lossy(&payload))))
        }
    }

    async fn gateway(timeout: Duration) -> HttpGateway {
        let directory = Arc::new(StaticDirectory::new());
        directory
            .set_endpoints("billing", vec![Endpoint::new("10.0.0.1", 9000)])
            .await;
        let pools = ClientPoolFactory::new(directory, Arc::new(EchoTransport), SelectionPolicy::Random);
        let node = NodeId::from("node-a");
        let registry = Arc::new(ServiceRegistry::new(
            node.clone(),
            pools,
            Arc::new(InMemoryBus::default()),
        ));
        registry
            .register("billing", "127.0.0.1:8500", &node)
            .await
            .unwrap();

        HttpGateway::new(
            registry,
            GatewayConfig {
                backend_method: "Say".to_string(),
                backend_timeout: timeout,
            },
            GatewayMetrics::new().unwrap(),
        )
    }

    fn get(path: &str, body: &'static str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Full::new(Bytes::from_static(body.as_bytes())))
            .unwrap()
    }

    async fn body_text(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_service_name_from_path() {
        assert_eq!(service_name_from_path("/billing"), Some("billing"));
        assert_eq!(service_name_from_path("/billing/invoices"), None);
        assert_eq!(service_name_from_path("/billing/"), None);
        assert_eq!(service_name_from_path("/"), None);
        assert_eq!(service_name_from_path(""), None);
    }

    #[tokio::test]
    async fn test_unknown_service_is_not_found() {
        let gateway = gateway(Duration::from_secs(1)).await;
        let response = gateway.handle(get("/payments", "")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_extra_path_segments_are_not_found() {
        let gateway = gateway(Duration::from_secs(1)).await;
        let response = gateway.handle(get("/billing/extra", "hello")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = gateway.handle(get("/billing", "hello")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_backend_reply_is_passed_through() {
        let gateway = gateway(Duration::from_secs(1)).await;
        let response = gateway.handle(get("/billing", "hello")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "Say:hello");
    }

    #[tokio::test]
    async fn test_backend_failure_is_internal_error() {
        let gateway = gateway(Duration::from_secs(1)).await;
        let response = gateway.handle(get("/billing", "fail")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_backend_deadline_is_internal_error() {
        let gateway = gateway(Duration::from_millis(100)).await;
        let response = gateway.handle(get("/billing", "slow")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(response).await.contains("deadline"));
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let gateway = gateway(Duration::from_secs(1)).await;
        let response = gateway.handle(get(HEALTH_PATH, "")).await;
        assert_eq!(response.status(), StatusCode::OK);

        gateway.handle(get("/billing", "hi")).await;
        let response = gateway.handle(get(METRICS_PATH, "")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let text = body_text(response).await;
        assert!(text.contains("gateway_registered_services 1"));
        assert!(text.contains("service=\"billing\""));
    }

    #[tokio::test]
    async fn test_non_get_is_rejected() {
        let gateway = gateway(Duration::from_secs(1)).await;
        let request = Request::builder()
            .method(Method::DELETE)
            .uri("/billing")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = gateway.handle(request).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
