use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{EventPublisher, Notification};

/// In-process fan-out. Every subscriber sees every notification; slow
/// subscribers lag and lose the oldest entries rather than blocking publish.
#[derive(Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Hand every notification on `feed` to `handler` until the publisher is
    /// dropped. A lagging subscriber skips what it missed and keeps going.
    pub async fn consume(mut feed: broadcast::Receiver<Notification>, mut handler: impl FnMut(Notification)) {
        loop {
            match feed.recv().await {
                Ok(notification) => handler(notification),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped = skipped, "Notification subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish(&self, notification: &Notification) -> anyhow::Result<()> {
        // No subscribers is not an error for a fire-and-forget channel
        let _ = self.sender.send(notification.clone());
        Ok(())
    }
}
