//! # Request Handler
//!
//! Implements `get_document`, `push_events` and `pull_events` against a
//! resolved [`Instance`]. Every outcome is returned as a [`CollabReply`];
//! nothing here fails at the request level.

use collab_common::{
    CollabFail, CollabReply, CollabRequest, CollabResponse, CollabResult, GetDocumentRequest,
    GetDocumentResponse, PullEventsRequest, PullEventsResponse, PushEventsRequest,
    PushEventsResponse,
};
use collab_document::Step;
use std::time::Duration;

use crate::instance::Instance;

#[derive(Debug, Clone)]
pub struct CollabRequestHandler {
    /// Server-side cap on how long a pull is held open
    user_wait_timeout: Duration,
}

impl CollabRequestHandler {
    pub fn new(user_wait_timeout: Duration) -> Self {
        Self { user_wait_timeout }
    }

    pub async fn handle<S: Step>(
        &self,
        instance: &Instance<S>,
        request: CollabRequest<S>,
    ) -> CollabReply<S> {
        match request {
            CollabRequest::GetDocument(body) => self
                .get_document(instance, body)
                .map(CollabResponse::GetDocument),
            CollabRequest::PullEvents(body) => self
                .pull_events(instance, body)
                .await
                .map(CollabResponse::PullEvents),
            CollabRequest::PushEvents(body) => self
                .push_events(instance, body)
                .map(CollabResponse::PushEvents),
        }
    }

    pub fn get_document<S: Step>(
        &self,
        instance: &Instance<S>,
        body: GetDocumentRequest,
    ) -> CollabResult<GetDocumentResponse<S::Doc>> {
        instance.register_user(&body.user_id);
        instance.snapshot()
    }

    pub fn push_events<S: Step>(
        &self,
        instance: &Instance<S>,
        body: PushEventsRequest<S>,
    ) -> CollabResult<PushEventsResponse> {
        instance.register_user(&body.user_id);

        let count = body.steps.len();
        let version = instance.add_steps(&body.client_id, body.version, body.steps)?;

        tracing::debug!(
            doc_id = %body.doc_id,
            client_id = %body.client_id,
            base = body.version,
            version,
            "accepted {} steps",
            count
        );
        Ok(PushEventsResponse { version })
    }

    /// Long-poll for steps after `body.version`.
    ///
    /// Returns at once when the instance is already ahead; otherwise waits
    /// for new steps, the wait bound, or the instance being stopped.
    pub async fn pull_events<S: Step>(
        &self,
        instance: &Instance<S>,
        body: PullEventsRequest,
    ) -> CollabResult<PullEventsResponse<S>> {
        instance.register_user(&body.user_id);

        let events = instance.get_events(body.version)?;
        if !events.steps.is_empty() {
            return Ok(events);
        }

        let wait = body
            .wait_timeout_ms
            .map(Duration::from_millis)
            .map_or(self.user_wait_timeout, |requested| {
                requested.min(self.user_wait_timeout)
            });
        instance
            .wait_for_change(&body.user_id, body.version, wait)
            .await;

        if instance.is_stopped() {
            return Err(CollabFail::InstanceStopped);
        }
        instance.get_events(body.version)
    }
}
