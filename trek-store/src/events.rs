use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use serde_json::json;
use std::time::Duration;
use tracing::{error, info};

use trek_core::booking::Booking;
use trek_core::notify::{NotificationKind, Notifier};
use trek_core::EngineError;

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

    pub async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &str,
    ) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        match self
            .producer
            .send(record, Timeout::After(Duration::from_secs(0)))
            .await
        {
            Ok(delivery) => {
                let partition = delivery.partition;
                let offset = delivery.offset;
                info!(
                    "Sent message to {}/{}: partition {} offset {}",
                    topic, key, partition, offset
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send message to {}: {}", topic, e);
                Err(e)
            }
        }
    }
}

/// Notifier backed by the event bus; a downstream worker turns these into
/// customer emails.
pub struct KafkaNotifier {
    producer: EventProducer,
    topic: String,
}

impl KafkaNotifier {
    pub fn new(producer: EventProducer, topic: String) -> Self {
        Self { producer, topic }
    }
}

#[async_trait]
impl Notifier for KafkaNotifier {
    async fn notify(
        &self,
        kind: NotificationKind,
        booking: &Booking,
        attachment: Option<&str>,
    ) -> Result<(), EngineError> {
        let payload = json!({
            "event": kind.as_str(),
            "booking_reference": booking.reference,
            "lead_email": booking.lead_email,
            "lead_name": booking.lead_name,
            "total_minor": booking.total_minor,
            "currency": booking.currency,
            "attachment": attachment,
        })
        .to_string();
        self.producer
            .publish(&self.topic, &booking.reference, &payload)
            .await
            .map_err(|e| EngineError::SideEffect(format!("notification publish failed: {}", e)))
    }
}
