pub mod events;
pub mod handler;

pub use events::NotificationEvent;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Fan-out point for the live notification feed.
///
/// Subscribers receive every event serialized once; a subscriber whose
/// receiver is gone is pruned during the broadcast that discovers it, so a
/// dead connection never blocks or poisons the others.
#[derive(Clone, Default)]
pub struct NotificationHub {
    subscribers: Arc<RwLock<HashMap<Uuid, UnboundedSender<String>>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self) -> (Uuid, UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().await.insert(id, tx);
        debug!(subscriber = %id, "notification subscriber added");
        (id, rx)
    }

    pub async fn unsubscribe(&self, id: Uuid) {
        if self.subscribers.write().await.remove(&id).is_some() {
            debug!(subscriber = %id, "notification subscriber removed");
        }
    }

    /// Deliver `event` to every live subscriber. Returns how many received it.
    pub async fn broadcast(&self, event: &NotificationEvent) -> usize {
        let payload = event.to_payload().to_string();

        let mut subscribers = self.subscribers.write().await;
        subscribers.retain(|_, tx| tx.send(payload.clone()).is_ok());
        let delivered = subscribers.len();
        debug!(event = event.event_type(), delivered, "event broadcast");
        delivered
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}
