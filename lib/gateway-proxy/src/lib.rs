//! Network surfaces of a gateway node: the HTTP gateway, the registration
//! RPC server, and the HTTP transport used to call backends.
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod rpc;
pub mod server;
pub mod transport;

pub use error::ServerError;
pub use gateway::{GatewayConfig, HttpGateway};
pub use metrics::GatewayMetrics;
pub use rpc::{Action, RegistrationClient, RegistrationService, SendRequest, SendResponse};
pub use server::{serve_connections, RegistrationServer, ServerState};
pub use transport::HttpRpcTransport;
