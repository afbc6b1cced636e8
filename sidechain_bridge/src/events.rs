use crate::lock;
use serde_json::Value;
use sidechain_protocol::ParameterValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    ParameterChanged { name: String, value: ParameterValue },
    StateChanged(Value),
    ProcessorStateChanged(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
enum Subscriber {
    Callback(Arc<dyn Fn(&ControllerEvent) + Send + Sync>),
    Channel(mpsc::UnboundedSender<ControllerEvent>),
}

/// Synchronous publish/subscribe: `emit` runs every subscriber on the
/// emitting thread before returning.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<(SubscriptionId, Subscriber)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ControllerEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.subscribers).push((id, Subscriber::Callback(Arc::new(callback))));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = lock(&self.subscribers);
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    /// Forwards events into a channel, for UI loops that await changes.
    /// Dropping the receiver ends the subscription.
    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<ControllerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.subscribers).push((id, Subscriber::Channel(tx)));
        rx
    }

    pub fn emit(&self, event: &ControllerEvent) {
        let subscribers: Vec<Subscriber> = {
            let mut guard = lock(&self.subscribers);
            guard.retain(|(_, s)| !matches!(s, Subscriber::Channel(tx) if tx.is_closed()));
            guard.iter().map(|(_, s)| s.clone()).collect()
        };
        for subscriber in subscribers {
            match subscriber {
                Subscriber::Callback(callback) => callback(event),
                Subscriber::Channel(tx) => {
                    let _ = tx.send(event.clone());
                }
            }
        }
    }
}
