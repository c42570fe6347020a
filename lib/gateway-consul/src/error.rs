use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConsulError>;

#[derive(Error, Debug)]
pub enum ConsulError {
    #[error("Invalid Consul address: {0}")]
    InvalidAddress(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Consul returned {status} for {path}: {body}")]
    Status {
        status: u16,
        path: String,
        body: String,
    },
}
