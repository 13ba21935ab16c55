use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{error, info, warn};
use trek_core::notify::NotificationPort;
use trek_shared::models::events::NotificationEvent;

use crate::app_config::KafkaConfig;

#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
}

impl EventProducer {
    pub fn new(brokers: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self { producer })
    }

    pub async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

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

/// Fire-and-forget Kafka delivery of checkout notifications.
pub struct KafkaNotifier {
    producer: EventProducer,
    config: KafkaConfig,
}

impl KafkaNotifier {
    pub fn new(producer: EventProducer, config: KafkaConfig) -> Self {
        Self { producer, config }
    }

    pub fn topic_for(&self, event: &NotificationEvent) -> String {
        self.config.topic(event.topic())
    }
}

impl NotificationPort for KafkaNotifier {
    fn notify(&self, event: NotificationEvent) {
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize {} event: {}", event.topic(), e);
                return;
            }
        };
        let topic = self.topic_for(&event);
        let key = event.key().to_string();

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to publish {} on, dropping event", topic);
            return;
        };
        let producer = self.producer.clone();
        handle.spawn(async move {
            // Failures are logged by publish.
            let _ = producer.publish(&topic, &key, &payload).await;
        });
    }
}
