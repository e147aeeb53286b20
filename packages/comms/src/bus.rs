//! Message bus abstraction and an in-process implementation.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::Message;

/// Callback invoked for every message addressed to a subscriber
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Pub/sub channel connecting clients and the manager.
///
/// Implementations must deliver REQUEST/RESPONSE envelopes to every handler
/// subscribed under the envelope's `to`.
pub trait MessageBus: Send + Sync + 'static {
    /// Subscribe `handler` to messages addressed to `subscriber_id`.
    ///
    /// The handler stays registered until the returned [`Subscription`] is
    /// dropped or unsubscribed.
    fn receive_messages(&self, subscriber_id: &str, handler: MessageHandler) -> Subscription;

    fn publish(&self, message: Message);
}

/// Registration guard returned by [`MessageBus::receive_messages`]
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(unsubscribe: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

#[derive(Default)]
struct BusInner {
    next_handler_id: AtomicU64,
    subscribers: RwLock<HashMap<String, Vec<(u64, MessageHandler)>>>,
}

impl BusInner {
    fn remove(&self, subscriber_id: &str, handler_id: u64) {
        let mut subscribers = self.subscribers.write();
        if let Some(handlers) = subscribers.get_mut(subscriber_id) {
            handlers.retain(|(id, _)| *id != handler_id);
            if handlers.is_empty() {
                subscribers.remove(subscriber_id);
            }
        }
    }
}

/// In-process bus; handlers run synchronously on the publishing task.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    inner: Arc<BusInner>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live handlers registered under `subscriber_id`
    pub fn handler_count(&self, subscriber_id: &str) -> usize {
        self.inner
            .subscribers
            .read()
            .get(subscriber_id)
            .map(|handlers| handlers.len())
            .unwrap_or(0)
    }
}

impl MessageBus for InMemoryBus {
    fn receive_messages(&self, subscriber_id: &str, handler: MessageHandler) -> Subscription {
        let handler_id = self.inner.next_handler_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .write()
            .entry(subscriber_id.to_string())
            .or_default()
            .push((handler_id, handler));

        let inner: Weak<BusInner> = Arc::downgrade(&self.inner);
        let subscriber_id = subscriber_id.to_string();
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.remove(&subscriber_id, handler_id);
            }
        })
    }

    fn publish(&self, message: Message) {
        // Clone handlers out so none run under the lock
        let handlers: Vec<MessageHandler> = self
            .inner
            .subscribers
            .read()
            .get(&message.to)
            .map(|handlers| handlers.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        if handlers.is_empty() {
            tracing::debug!(to = %message.to, kind = ?message.kind, "no subscriber for message");
            return;
        }

        for handler in handlers {
            handler(message.clone());
        }
    }
}
