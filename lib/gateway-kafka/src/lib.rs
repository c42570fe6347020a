//! Kafka transport for registry sync events
pub mod bus;
pub mod error;

pub use bus::{KafkaBus, KafkaBusConfig};
pub use error::{KafkaBusError, Result};
