//! Kafka publisher.
//!
//! Records are handed to librdkafka's internal queue and batched there
//! (`linger.ms`). Each delivery report is awaited on a background task so the
//! calling worker only waits when the local queue is full. `close` waits for
//! outstanding reports and then flushes the producer.

use super::Publisher;
use crate::{Error, Result};
use rdkafka::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::task::TaskTracker;

/// Wait between retries while the producer queue is full.
const QUEUE_FULL_BACKOFF: Duration = Duration::from_millis(50);

/// Kafka producer settings.
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Broker host.
    pub address: String,
    pub port: u16,
    pub topic: String,

    /// Batching delay (`linger.ms`).
    pub linger: Duration,

    /// How long a record may wait for delivery before it is reported failed.
    pub message_timeout: Duration,

    /// Upper bound for `close()`.
    pub flush_timeout: Duration,

    /// Additional librdkafka properties.
    pub properties: Vec<(String, String)>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            address: "localhost".to_string(),
            port: 9092,
            topic: "raw-posts".to_string(),
            linger: Duration::from_millis(500),
            message_timeout: Duration::from_secs(30),
            flush_timeout: Duration::from_secs(30),
            properties: Vec::new(),
        }
    }
}

impl KafkaConfig {
    pub fn bootstrap_servers(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Build the librdkafka client configuration.
    pub fn to_rdkafka_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.bootstrap_servers())
            .set("linger.ms", self.linger.as_millis().to_string())
            .set(
                "message.timeout.ms",
                self.message_timeout.as_millis().to_string(),
            )
            // Same key, same partition
            .set("partitioner", "murmur2_random")
            .set("enable.idempotence", "true")
            .set("acks", "all");

        for (key, value) in &self.properties {
            config.set(key, value);
        }
        config
    }
}

/// Asynchronous, batched Kafka producer keyed by account.
pub struct KafkaPublisher {
    producer: FutureProducer,
    config: KafkaConfig,
    deliveries: TaskTracker,
    closed: AtomicBool,
}

impl KafkaPublisher {
    pub fn new(config: KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = config.to_rdkafka_config().create()?;
        tracing::info!(
            brokers = %config.bootstrap_servers(),
            topic = %config.topic,
            linger_ms = config.linger.as_millis() as u64,
            "Kafka producer created"
        );
        Ok(Self {
            producer,
            config,
            deliveries: TaskTracker::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Delivery reports not yet received.
    pub fn in_flight(&self) -> usize {
        self.deliveries.len()
    }
}

impl Publisher for KafkaPublisher {
    async fn publish(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::PublisherClosed);
        }

        let mut record = FutureRecord::to(&self.config.topic).key(key).payload(&value);
        loop {
            match self.producer.send_result(record) {
                Ok(delivery) => {
                    let topic = self.config.topic.clone();
                    self.deliveries.spawn(async move {
                        match delivery.await {
                            Ok(Ok(_)) => {}
                            Ok(Err((e, _message))) => {
                                metrics::counter!("publish_failures_total").increment(1);
                                tracing::error!(topic = %topic, error = %e, "Kafka delivery failed");
                            }
                            Err(_) => {
                                metrics::counter!("publish_failures_total").increment(1);
                                tracing::error!(topic = %topic, "Kafka delivery report dropped");
                            }
                        }
                    });
                    return Ok(());
                }
                Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), returned)) => {
                    record = returned;
                    tracing::debug!("Kafka producer queue full, waiting");
                    tokio::time::sleep(QUEUE_FULL_BACKOFF).await;
                }
                Err((e, _)) => return Err(e.into()),
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::PublisherClosed);
        }

        tracing::info!(pending = self.in_flight(), "Closing Kafka producer");

        // Flush first: delivery reports only arrive once messages leave the queue
        let producer = self.producer.clone();
        let timeout = self.config.flush_timeout;
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| Error::Publish(format!("flush task failed: {e}")))??;

        self.deliveries.close();
        if tokio::time::timeout(timeout, self.deliveries.wait())
            .await
            .is_err()
        {
            return Err(Error::Publish(format!(
                "{} delivery reports outstanding after {timeout:?}",
                self.in_flight()
            )));
        }

        tracing::info!("Kafka producer flushed");
        Ok(())
    }
}
