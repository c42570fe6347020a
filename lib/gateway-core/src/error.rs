use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid registration: {0}")]
    InvalidRegistration(String),

    #[error("Directory error: {0}")]
    Directory(String),

    #[error("No live endpoints for service: {0}")]
    NoLiveEndpoints(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Event bus error: {0}")]
    Bus(String),

    #[error("Malformed sync message: {0}")]
    MalformedMessage(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
