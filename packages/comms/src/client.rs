//! # Client Communication
//!
//! Client-side entry point for the three protocol operations. Requests go
//! through [`wrap_request`]; a timeout is reported as
//! [`CollabFail::ManagerUnresponsive`] so callers handle an unresponsive
//! manager as data. Every other networking error is returned unchanged.

use collab_common::{
    CollabFail, CollabReply, CollabRequest, CollabRequestType, CollabResponse, CollabResult,
    GetDocumentRequest, GetDocumentResponse, PullEventsRequest, PullEventsResponse,
    PushEventsRequest, PushEventsResponse,
};
use collab_document::Step;
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::wrap_request::{wrap_request, RequestOptions, DEFAULT_REQUEST_TIMEOUT};
use crate::{Message, MessageBus, MessageKind, NetworkingError, Subscription};

pub struct ClientCommunicationOptions {
    pub client_id: String,
    pub manager_id: String,
    pub bus: Arc<dyn MessageBus>,
    /// Cancelling this aborts in-flight requests and removes the bus listener
    pub signal: CancellationToken,
    pub request_timeout: Option<Duration>,
}

pub struct ClientCommunication<S> {
    client_id: String,
    manager_id: String,
    bus: Arc<dyn MessageBus>,
    signal: CancellationToken,
    request_timeout: Duration,
    listener: Arc<Mutex<Option<Subscription>>>,
    _listener_guard: DropGuard,
    _step: PhantomData<fn() -> S>,
}

impl<S: Step> ClientCommunication<S> {
    /// Must be called inside a tokio runtime.
    pub fn new(opts: ClientCommunicationOptions) -> Self {
        let client_id = opts.client_id.clone();
        let subscription = opts.bus.receive_messages(
            &opts.client_id,
            Arc::new(move |message: Message| match message.kind {
                MessageKind::Broadcast => {
                    tracing::debug!(client = %client_id, from = %message.from, "ignoring broadcast");
                }
                MessageKind::Ping | MessageKind::Pong => {
                    tracing::trace!(client = %client_id, kind = ?message.kind, "liveness message");
                }
                MessageKind::Request | MessageKind::Response => {}
            }),
        );
        let listener = Arc::new(Mutex::new(Some(subscription)));

        // Fires when the caller's signal is cancelled or this value is dropped
        let listener_token = opts.signal.child_token();
        let removal = listener_token.clone();
        let slot = listener.clone();
        tokio::spawn(async move {
            removal.cancelled().await;
            slot.lock().take();
        });

        Self {
            client_id: opts.client_id,
            manager_id: opts.manager_id,
            bus: opts.bus,
            signal: opts.signal,
            request_timeout: opts.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            listener,
            _listener_guard: listener_token.drop_guard(),
            _step: PhantomData,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn manager_id(&self) -> &str {
        &self.manager_id
    }

    /// Whether the broadcast/liveness listener is still registered
    pub fn is_listening(&self) -> bool {
        self.listener.lock().is_some()
    }

    pub async fn get_document(
        &self,
        body: GetDocumentRequest,
    ) -> Result<CollabResult<GetDocumentResponse<S::Doc>>, NetworkingError> {
        match self.send(CollabRequest::GetDocument(body)).await? {
            Ok(CollabResponse::GetDocument(response)) => Ok(Ok(response)),
            Ok(other) => Err(unexpected(CollabRequestType::GetDocument, &other)),
            Err(fail) => Ok(Err(fail)),
        }
    }

    pub async fn pull_events(
        &self,
        body: PullEventsRequest,
    ) -> Result<CollabResult<PullEventsResponse<S>>, NetworkingError> {
        match self.send(CollabRequest::PullEvents(body)).await? {
            Ok(CollabResponse::PullEvents(response)) => Ok(Ok(response)),
            Ok(other) => Err(unexpected(CollabRequestType::PullEvents, &other)),
            Err(fail) => Ok(Err(fail)),
        }
    }

    pub async fn push_events(
        &self,
        body: PushEventsRequest<S>,
    ) -> Result<CollabResult<PushEventsResponse>, NetworkingError> {
        match self.send(CollabRequest::PushEvents(body)).await? {
            Ok(CollabResponse::PushEvents(response)) => Ok(Ok(response)),
            Ok(other) => Err(unexpected(CollabRequestType::PushEvents, &other)),
            Err(fail) => Ok(Err(fail)),
        }
    }

    async fn send(&self, request: CollabRequest<S>) -> Result<CollabReply<S>, NetworkingError> {
        let request_type = request.request_type();
        let result = wrap_request::<_, CollabReply<S>>(
            &request,
            RequestOptions {
                from: &self.client_id,
                to: &self.manager_id,
                bus: self.bus.as_ref(),
                request_timeout: self.request_timeout,
                cancel: Some(&self.signal),
            },
        )
        .await;

        match result {
            Ok(reply) => Ok(reply),
            Err(NetworkingError::Timeout) => {
                tracing::warn!(
                    client = %self.client_id,
                    manager = %self.manager_id,
                    "{} timed out",
                    request_type
                );
                Ok(Err(CollabFail::ManagerUnresponsive))
            }
            Err(error) => Err(error),
        }
    }
}

fn unexpected<S: Step>(expected: CollabRequestType, actual: &CollabResponse<S>) -> NetworkingError {
    NetworkingError::UnexpectedResponse {
        expected,
        actual: actual.request_type(),
    }
}
