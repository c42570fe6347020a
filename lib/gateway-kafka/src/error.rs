use rdkafka::error::KafkaError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, KafkaBusError>;

#[derive(Error, Debug)]
pub enum KafkaBusError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl From<KafkaBusError> for gateway_core::CoreError {
    fn from(err: KafkaBusError) -> Self {
        gateway_core::CoreError::Bus(err.to_string())
    }
}
