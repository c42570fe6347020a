//! Event bus over a Kafka topic partition

use crate::{KafkaBusError, Result};
use async_trait::async_trait;
use gateway_core::bus::SUBSCRIPTION_BUFFER;
use gateway_core::{BusRecord, BusSubscription, EventBus};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Kafka bus configuration
#[derive(Clone, Debug)]
pub struct KafkaBusConfig {
    /// Comma separated `host:port` bootstrap brokers
    pub brokers: String,
    /// Acknowledgement required from the partition's replicas
    pub required_acks: String,
    /// Retries for transient send failures before giving up
    pub send_retries: u32,
    /// Upper bound on how long a publish may take, retries included
    pub message_timeout: Duration,
    /// Partition carrying sync records
    pub partition: i32,
}

impl Default for KafkaBusConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            required_acks: "all".to_string(),
            send_retries: 5,
            message_timeout: Duration::from_secs(30),
            partition: 0,
        }
    }
}

impl KafkaBusConfig {
    pub fn producer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("acks", &self.required_acks)
            .set("retries", self.send_retries.to_string())
            .set(
                "message.timeout.ms",
                self.message_timeout.as_millis().to_string(),
            );
        config
    }

    /// Consumers read one assigned partition and never commit offsets; the
    /// group ID only satisfies the client.
    pub fn consumer_config(&self, group_id: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "latest");
        config
    }
}

/// KafkaBus publishes and consumes registry records on Kafka
pub struct KafkaBus {
    producer: FutureProducer,
    config: KafkaBusConfig,
}

impl KafkaBus {
    /// Create the producer. Fails if the client cannot be constructed.
    pub fn new(config: KafkaBusConfig) -> Result<Self> {
        if config.brokers.trim().is_empty() {
            return Err(KafkaBusError::InvalidConfiguration(
                "no brokers configured".to_string(),
            ));
        }

        let producer: FutureProducer = config.producer_config().create()?;
        info!("Kafka producer created for {}", config.brokers);
        Ok(Self { producer, config })
    }

    fn create_consumer(&self, topic: &str) -> Result<StreamConsumer> {
        let group_id = format!("mesh-gateway-{}", Uuid::new_v4());
        let consumer: StreamConsumer = self.config.consumer_config(&group_id).create()?;

        let mut assignment = TopicPartitionList::new();
        assignment.add_partition_offset(topic, self.config.partition, Offset::End)?;
        consumer.assign(&assignment)?;
        Ok(consumer)
    }
}

#[async_trait]
impl EventBus for KafkaBus {
    async fn publish(&self, record: BusRecord) -> gateway_core::Result<()> {
        let mut message: FutureRecord<'_, str, [u8]> = FutureRecord::to(&record.topic)
            .partition(self.config.partition)
            .payload(record.payload.as_slice());
        if let Some(key) = record.key.as_deref() {
            message = message.key(key);
        }

        match self.producer.send(message, self.config.message_timeout).await {
            Ok((partition, offset)) => {
                debug!(
                    "Published to {}[{}] at offset {}",
                    record.topic, partition, offset
                );
                Ok(())
            }
            Err((e, _)) => Err(KafkaBusError::from(e).into()),
        }
    }

    async fn subscribe(&self, topic: &str) -> gateway_core::Result<BusSubscription> {
        let consumer = self.create_consumer(topic)?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        info!(
            "Consuming {}[{}] from the newest offset",
            topic, self.config.partition
        );

        tokio::spawn(async move {
            loop {
                let delivery = match consumer.recv().await {
                    Ok(message) => Ok(BusRecord {
                        topic: message.topic().to_string(),
                        key: message
                            .key()
                            .map(|key| String::from_utf8_lossy(key).into_owned()),
                        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                    }),
                    Err(e) => {
                        error!("Kafka consume error: {}", e);
                        Err(KafkaBusError::from(e).into())
                    }
                };

                if tx.send(delivery).await.is_err() {
                    debug!("Kafka subscription dropped; stopping consumer");
                    break;
                }
            }
        });

        Ok(rx)
    }
}
