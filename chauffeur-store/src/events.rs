use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{info, error};

use chauffeur_core::{NotificationPort, NotifyError};
use chauffeur_shared::BookingNotification;

use crate::app_config::KafkaConfig;

/// Publishes booking notifications to Kafka, keyed by the outbound reference
/// so both legs of a round trip land on the same partition.
#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
    topic: String,
}

impl EventProducer {
    pub fn new(config: &KafkaConfig) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self { producer, topic: config.topic.clone() })
    }

    pub async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(topic)
            .key(key)
            .payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                info!("Sent message to {}/{}: partition {} offset {}", topic, key, delivery.partition, delivery.offset);
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send message to {}: {}", topic, e);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl NotificationPort for EventProducer {
    async fn notify(&self, event: &BookingNotification) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(event)?;
        self.publish(&self.topic, event.key(), &payload)
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))
    }
}
