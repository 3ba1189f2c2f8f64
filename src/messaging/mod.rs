// ============================================================================
// Event Publisher - post-commit notification fan-out
// ============================================================================
//
// Components never talk to a live connection registry. They queue
// `Notification`s on the unit of work; after commit the engine hands them to
// the injected `EventPublisher` through the `Notifier`, which swallows and
// counts failures. Delivery is at-least-once/best-effort by contract.
//
// ============================================================================

mod broadcast;
mod kafka;
mod notification;

use std::sync::Arc;

use async_trait::async_trait;

use crate::metrics::Metrics;

pub use broadcast::BroadcastPublisher;
pub use kafka::KafkaPublisher;
pub use notification::{Notification, Topic};

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Hand off one notification. Must not block on the broker.
    async fn publish(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Best-effort dispatcher used by the engine after each commit
#[derive(Clone)]
pub struct Notifier {
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<Metrics>,
}

impl Notifier {
    pub fn new(publisher: Arc<dyn EventPublisher>, metrics: Arc<Metrics>) -> Self {
        Self { publisher, metrics }
    }

    pub async fn dispatch(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            let topic = notification.topic.as_str();
            match self.publisher.publish(&notification).await {
                Ok(()) => {
                    self.metrics.record_publish(topic, true);
                    tracing::debug!(
                        topic = topic,
                        event_id = %notification.event_id,
                        aggregate_id = %notification.aggregate_id,
                        "Notification published"
                    );
                }
                Err(e) => {
                    self.metrics.record_publish(topic, false);
                    tracing::warn!(
                        topic = topic,
                        event_id = %notification.event_id,
                        error = %e,
                        "Notification dropped"
                    );
                }
            }
        }
    }
}
