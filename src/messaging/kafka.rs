use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    producer::{FutureProducer, FutureRecord},
};

use super::{EventPublisher, Notification};
use crate::metrics::Metrics;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka/Redpanda publisher.
///
/// `publish` only checks the breaker and spawns the send, so a slow or
/// unreachable broker never holds up the engine.
pub struct KafkaPublisher {
    producer: FutureProducer,
    circuit_breaker: CircuitBreaker,
    topic_prefix: String,
}

impl KafkaPublisher {
    pub fn new(brokers: &str, topic_prefix: &str, metrics: Arc<Metrics>) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .context("Failed to create Kafka producer")?;

        let gauge = metrics.circuit_breaker_state.clone();
        let circuit_breaker = CircuitBreaker::new(CircuitBreakerConfig::default())
            .with_listener(move |from, to| {
                gauge.set(to.as_gauge());
                tracing::warn!(from = ?from, to = ?to, "Broker circuit breaker changed state");
            });

        Ok(Self {
            producer,
            circuit_breaker,
            topic_prefix: topic_prefix.to_string(),
        })
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state().await
    }

    pub async fn reset_circuit_breaker(&self) {
        self.circuit_breaker.reset().await;
    }
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish(&self, notification: &Notification) -> Result<()> {
        let topic = notification.topic.qualified(&self.topic_prefix);
        let key = notification.key.clone();
        let payload = serde_json::to_string(notification).context("Failed to encode notification")?;
        let producer = self.producer.clone();
        let circuit_breaker = self.circuit_breaker.clone();

        tokio::spawn(async move {
            let result = circuit_breaker
                .call(async {
                    let record = FutureRecord::to(&topic).key(&key).payload(&payload);
                    producer
                        .send(record, rdkafka::util::Timeout::After(SEND_TIMEOUT))
                        .await
                        .map_err(|(e, _)| anyhow::anyhow!("Kafka send error: {}", e))?;
                    Ok::<(), anyhow::Error>(())
                })
                .await;

            match result {
                Ok(()) => {
                    tracing::debug!(topic = %topic, key = %key, "Published to Kafka");
                }
                Err(CircuitBreakerError::CircuitOpen) => {
                    tracing::warn!(topic = %topic, "Circuit breaker open - notification dropped");
                }
                Err(CircuitBreakerError::OperationFailed(e)) => {
                    tracing::error!(error = %e, topic = %topic, "Failed to publish to Kafka");
                }
            }
        });

        Ok(())
    }
}
