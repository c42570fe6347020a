//! Backend RPC transport over HTTP/1.1 with connection pooling
//!
//! A call to `method` on an endpoint is a `POST http://{ip}:{port}/{method}`
//! carrying the payload as the body. A 2xx response body is the result.

use async_trait::async_trait;
use gateway_core::{CoreError, Endpoint, RpcTransport};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::tokio::TokioExecutor;
use std::time::Duration;
use tokio::time::timeout as tokio_timeout;
use tracing::{debug, warn};

/// HttpRpcTransport sends backend calls over a shared, pooled hyper client
pub struct HttpRpcTransport {
    client: Client<HttpConnector, Full<Bytes>>,
    timeout: Duration,
}

impl HttpRpcTransport {
    pub fn new(timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(timeout));
        connector.set_keepalive(Some(Duration::from_secs(30)));

        let client = Client::builder(TokioExecutor::new()).build::<_, Full<Bytes>>(connector);

        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// URI addressing `method` on `endpoint`
    pub fn rpc_uri(endpoint: &Endpoint, method: &str) -> gateway_core::Result<Uri> {
        let method = method.trim_start_matches('/');
        if method.is_empty() {
            return Err(CoreError::Rpc("RPC method name is empty".to_string()));
        }

        format!("http://{}/{}", endpoint.authority(), method)
            .parse()
            .map_err(|e| CoreError::Rpc(format!("invalid RPC target: {}", e)))
    }

    async fn exchange(&self, request: Request<Full<Bytes>>) -> gateway_core::Result<Bytes> {
        let target = request.uri().to_string();
        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| CoreError::Rpc(format!("error calling {}: {}", target, e)))?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| CoreError::Rpc(format!("error reading reply from {}: {}", target, e)))?
            .to_bytes();

        debug!("{} replied {} with {} bytes", target, status, body.len());

        if status.is_success() {
            Ok(body)
        } else {
            Err(CoreError::Rpc(format!("{} returned {}", target, status)))
        }
    }
}

#[async_trait]
impl RpcTransport for HttpRpcTransport {
    async fn call(
        &self,
        endpoint: &Endpoint,
        method: &str,
        payload: Bytes,
    ) -> gateway_core::Result<Bytes> {
        let uri = Self::rpc_uri(endpoint, method)?;
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(Full::new(payload))
            .map_err(|e| CoreError::Rpc(e.to_string()))?;

        match tokio_timeout(self.timeout, self.exchange(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "RPC {} on {} timed out after {:?}",
                    method,
                    endpoint.authority(),
                    self.timeout
                );
                Err(CoreError::Rpc(format!(
                    "{} on {} timed out",
                    method,
                    endpoint.authority()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_creation() {
        let transport = HttpRpcTransport::new(Duration::from_secs(10));
        assert_eq!(transport.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_rpc_uri() {
        let endpoint = Endpoint::new("10.0.0.1", 9000);
        let uri = HttpRpcTransport::rpc_uri(&endpoint, "Say").unwrap();
        assert_eq!(uri.to_string(), "http://10.0.0.1:9000/Say");

        let uri = HttpRpcTransport::rpc_uri(&endpoint, "/Say").unwrap();
        assert_eq!(uri.path(), "/Say");

        assert!(HttpRpcTransport::rpc_uri(&endpoint, "").is_err());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_an_rpc_error() {
        let transport = HttpRpcTransport::new(Duration::from_millis(500));
        let endpoint = Endpoint::new("127.0.0.1", 1);
        let result = transport.call(&endpoint, "Say", Bytes::new()).await;
        assert!(matches!(result, Err(CoreError::Rpc(_))));
    }
}
