//! Connects a [`Manager`] to a [`MessageBus`].
//!
//! Every REQUEST addressed to the manager id is decoded, dispatched on its
//! own task and answered with a RESPONSE carrying the same correlation id.
//! PING is answered with PONG.

use collab_comms::{Message, MessageBus, MessageKind, ResponseBody, Subscription};
use collab_common::CollabRequest;
use collab_document::Step;
use std::sync::Arc;

use crate::manager::{Manager, ManagerError};

pub struct ManagerEndpoint {
    manager_id: String,
    subscription: Subscription,
}

impl ManagerEndpoint {
    /// Subscribe `manager` to the bus under `manager_id`.
    ///
    /// Must be called inside a tokio runtime. The manager stops receiving
    /// requests when the endpoint is dropped.
    pub fn attach<S: Step>(
        manager: Arc<Manager<S>>,
        bus: Arc<dyn MessageBus>,
        manager_id: impl Into<String>,
    ) -> Self {
        let manager_id = manager_id.into();
        let runtime = tokio::runtime::Handle::current();
        let reply_bus = bus.clone();

        let subscription = bus.receive_messages(
            &manager_id,
            Arc::new(move |message: Message| match message.kind {
                MessageKind::Request => {
                    let manager = manager.clone();
                    let bus = reply_bus.clone();
                    runtime.spawn(async move { answer(&manager, bus.as_ref(), &message).await });
                }
                MessageKind::Ping => reply_bus.publish(Message::pong_to(&message)),
                MessageKind::Response | MessageKind::Broadcast | MessageKind::Pong => {
                    tracing::trace!(from = %message.from, kind = ?message.kind, "ignoring message");
                }
            }),
        );

        tracing::info!(manager_id = %manager_id, "manager endpoint attached");
        Self {
            manager_id,
            subscription,
        }
    }

    pub fn manager_id(&self) -> &str {
        &self.manager_id
    }

    /// Stop answering requests
    pub fn detach(self) {
        tracing::info!(manager_id = %self.manager_id, "manager endpoint detached");
        self.subscription.unsubscribe();
    }
}

/// Handle one request and publish its response
async fn answer<S: Step>(manager: &Manager<S>, bus: &dyn MessageBus, message: &Message) {
    let body = respond(manager, message).await;
    match Message::response_to(message, body) {
        Ok(response) => bus.publish(response),
        Err(error) => tracing::error!(id = %message.id, "failed to encode response: {}", error),
    }
}

async fn respond<S: Step>(manager: &Manager<S>, message: &Message) -> ResponseBody {
    let reply = match serde_json::from_value::<CollabRequest<S>>(message.payload.clone()) {
        Ok(request) => manager.dispatch(request).await,
        Err(error) => Err(ManagerError::from(error)),
    };

    match reply.and_then(|reply| serde_json::to_value(reply).map_err(ManagerError::from)) {
        Ok(value) => ResponseBody::Ok(value),
        Err(error) => {
            tracing::warn!(from = %message.from, id = %message.id, "request rejected: {}", error);
            ResponseBody::Error(error.to_string())
        }
    }
}
