//! Request/response correlation over a [`MessageBus`].

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::{Message, MessageBus, MessageHandler, MessageKind, NetworkingError, ResponseBody};

/// Used when the caller does not pick a timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RequestOptions<'a> {
    pub from: &'a str,
    pub to: &'a str,
    pub bus: &'a dyn MessageBus,
    pub request_timeout: Duration,
    /// Aborts the wait and removes the response listener
    pub cancel: Option<&'a CancellationToken>,
}

/// Publish `request` to `to` and wait for the correlated response.
///
/// The response listener is registered before the request is published and is
/// removed on every exit path: response, timeout, abort, or the returned
/// future being dropped.
pub async fn wrap_request<Req, Resp>(
    request: &Req,
    opts: RequestOptions<'_>,
) -> Result<Resp, NetworkingError>
where
    Req: Serialize + ?Sized,
    Resp: DeserializeOwned,
{
    let id = uuid::Uuid::new_v4().to_string();
    let payload = serde_json::to_value(request)?;

    let (tx, rx) = oneshot::channel::<Message>();
    let tx = Mutex::new(Some(tx));
    let expected_from = opts.to.to_string();
    let expected_id = id.clone();
    let handler: MessageHandler = Arc::new(move |message: Message| {
        if message.kind != MessageKind::Response
            || message.id != expected_id
            || message.from != expected_from
        {
            return;
        }
        if let Some(tx) = tx.lock().take() {
            let _ = tx.send(message);
        }
    });

    let _subscription = opts.bus.receive_messages(opts.from, handler);

    tracing::trace!(from = opts.from, to = opts.to, %id, "publishing request");
    opts.bus
        .publish(Message::request(opts.from, opts.to, &id, payload));

    let waited = match opts.cancel {
        Some(cancel) => tokio::select! {
            result = tokio::time::timeout(opts.request_timeout, rx) => result,
            _ = cancel.cancelled() => return Err(NetworkingError::Aborted),
        },
        None => tokio::time::timeout(opts.request_timeout, rx).await,
    };

    let message = match waited {
        Err(_) => {
            tracing::debug!(to = opts.to, %id, "request timed out");
            return Err(NetworkingError::Timeout);
        }
        Ok(Err(_)) => return Err(NetworkingError::Disconnected),
        Ok(Ok(message)) => message,
    };

    match serde_json::from_value::<ResponseBody>(message.payload)? {
        ResponseBody::Ok(value) => Ok(serde_json::from_value(value)?),
        ResponseBody::Error(error) => Err(NetworkingError::Remote(error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryBus, Subscription};
    use serde_json::{json, Value};

    /// Echo server that answers every request with its payload doubled
    fn serve_doubler(bus: &InMemoryBus, id: &str) -> Subscription {
        let reply_bus = bus.clone();
        bus.receive_messages(
            id,
            Arc::new(move |message: Message| {
                if message.kind != MessageKind::Request {
                    return;
                }
                let n = message.payload.as_i64().unwrap_or_default();
                let response =
                    Message::response_to(&message, ResponseBody::Ok(json!(n * 2))).unwrap();
                reply_bus.publish(response);
            }),
        )
    }

    fn options<'a>(bus: &'a InMemoryBus, timeout_ms: u64) -> RequestOptions<'a> {
        RequestOptions {
            from: "client",
            to: "manager",
            bus,
            request_timeout: Duration::from_millis(timeout_ms),
            cancel: None,
        }
    }

    #[tokio::test]
    async fn test_round_trip() {
        let bus = InMemoryBus::new();
        let _server = serve_doubler(&bus, "manager");

        let result: i64 = wrap_request(&21, options(&bus, 1000)).await.unwrap();
        assert_eq!(result, 42);
        assert_eq!(bus.handler_count("client"), 0);
    }

    #[tokio::test]
    async fn test_timeout_removes_listener() {
        let bus = InMemoryBus::new();

        let result: Result<Value, _> = wrap_request(&1, options(&bus, 20)).await;
        assert!(matches!(result, Err(NetworkingError::Timeout)));
        assert_eq!(bus.handler_count("client"), 0);
    }

    #[tokio::test]
    async fn test_abort() {
        let bus = InMemoryBus::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut opts = options(&bus, 5_000);
        opts.cancel = Some(&cancel);

        let result: Result<Value, _> = wrap_request(&1, opts).await;
        assert!(matches!(result, Err(NetworkingError::Aborted)));
        assert_eq!(bus.handler_count("client"), 0);
    }

    #[tokio::test]
    async fn test_ignores_non_matching_messages() {
        let bus = InMemoryBus::new();
        let noisy_bus = bus.clone();
        let _noise = bus.receive_messages(
            "manager",
            Arc::new(move |message: Message| {
                // Wrong kind, wrong id, then the real answer
                noisy_bus.publish(Message::new(
                    MessageKind::Broadcast,
                    "manager",
                    "client",
                    message.id.clone(),
                    json!({"status": "ok", "data": 0}),
                ));
                noisy_bus.publish(Message::new(
                    MessageKind::Response,
                    "manager",
                    "client",
                    "other-id",
                    json!({"status": "ok", "data": 0}),
                ));
                noisy_bus
                    .publish(Message::response_to(&message, ResponseBody::Ok(json!(7))).unwrap());
            }),
        );

        let result: i64 = wrap_request(&1, options(&bus, 1000)).await.unwrap();
        assert_eq!(result, 7);
    }

    #[tokio::test]
    async fn test_remote_error() {
        let bus = InMemoryBus::new();
        let reply_bus = bus.clone();
        let _server = bus.receive_messages(
            "manager",
            Arc::new(move |message: Message| {
                let response = Message::response_to(
                    &message,
                    ResponseBody::Error("Must have user id".to_string()),
                )
                .unwrap();
                reply_bus.publish(response);
            }),
        );

        let result: Result<Value, _> = wrap_request(&1, options(&bus, 1000)).await;
        match result {
            Err(NetworkingError::Remote(error)) => assert_eq!(error, "Must have user id"),
            other => panic!("Expected remote error, got {:?}", other),
        }
    }
}
