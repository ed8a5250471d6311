//! In-process change broadcasting for the local backend.

use std::sync::Mutex;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tracing::{debug, warn};

use enleve_shared::backend::{ChangeEvent, ChangeFilter, ChangeKind, Subscription};

/// Fan-out of row changes to filtered subscribers.
///
/// Subscribers whose [`Subscription`] was dropped are pruned on the next
/// publish. A subscriber that stops draining loses events once its buffer is
/// full; the next event it does receive triggers a reload anyway.
#[derive(Debug, Default)]
pub struct ChangeHub {
    subscribers: Mutex<Vec<(ChangeFilter, Sender<ChangeEvent>)>>,
}

impl ChangeHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        let (tx, sub) = Subscription::channel();
        let mut subscribers = self.lock();
        debug!(table = %filter.table, total = subscribers.len() + 1, "change subscriber added");
        subscribers.push((filter, tx));
        sub
    }

    pub fn publish(&self, table: &str, kind: ChangeKind, new: Option<serde_json::Value>) {
        let event = ChangeEvent {
            table: table.to_string(),
            kind,
            new,
        };

        self.lock().retain(|(filter, tx)| {
            if !filter.matches(&event) {
                return !tx.is_closed();
            }
            match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(table, kind = kind.as_str(), "subscriber lagging, event dropped");
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().iter().filter(|(_, tx)| !tx.is_closed()).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ChangeFilter, Sender<ChangeEvent>)>> {
        // A panic while holding the lock cannot leave the list half-updated.
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn delivers_only_matching_events() {
        let hub = ChangeHub::new();
        let mut waiting = hub.subscribe(
            ChangeFilter::table("atendimento")
                .on(ChangeKind::Insert)
                .where_eq("status", "Em Espera"),
        );
        let mut everything = hub.subscribe(ChangeFilter::table("atendimento"));

        hub.publish("atendimento", ChangeKind::Insert, Some(json!({"status": "Automatizado"})));
        hub.publish("atendimento", ChangeKind::Insert, Some(json!({"status": "Em Espera"})));
        hub.publish("profiles", ChangeKind::Update, Some(json!({"id": "x"})));

        assert_eq!(waiting.drain(), 1);
        assert_eq!(everything.drain(), 2);
    }

    #[tokio::test]
    async fn dropped_subscription_is_pruned() {
        let hub = ChangeHub::new();
        let sub = hub.subscribe(ChangeFilter::table("atendimento"));
        let _kept = hub.subscribe(ChangeFilter::table("profiles"));
        assert_eq!(hub.subscriber_count(), 2);

        drop(sub);
        hub.publish("atendimento", ChangeKind::Update, None);
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn full_buffer_does_not_block_publisher() {
        let hub = ChangeHub::new();
        let mut sub = hub.subscribe(ChangeFilter::table("atendimento"));
        for _ in 0..(enleve_shared::backend::SUBSCRIPTION_BUFFER + 10) {
            hub.publish("atendimento", ChangeKind::Update, None);
        }
        assert_eq!(sub.drain(), enleve_shared::backend::SUBSCRIPTION_BUFFER);
        assert_eq!(hub.subscriber_count(), 1);
    }
}
