//! Request/response types for the three protocol operations.
//!
//! Requests and responses are closed enums tagged by [`CollabRequestType`],
//! serialized as `{ "type": "push_events", "body": { ... } }`.

use collab_document::Step;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::CollabResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollabRequestType {
    GetDocument,
    PullEvents,
    PushEvents,
}

impl CollabRequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollabRequestType::GetDocument => "get_document",
            CollabRequestType::PullEvents => "pull_events",
            CollabRequestType::PushEvents => "push_events",
        }
    }
}

impl fmt::Display for CollabRequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetDocumentRequest {
    pub doc_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetDocumentResponse<D> {
    pub doc: D,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullEventsRequest {
    pub doc_id: String,
    pub user_id: String,
    /// Version the client already has
    pub version: u64,
    /// Upper bound for the long-poll; the server caps it at its own limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullEventsResponse<S> {
    pub version: u64,
    pub steps: Vec<StepRecord<S>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEventsRequest<S> {
    pub doc_id: String,
    pub user_id: String,
    /// Identifies the pushing editor session so it can recognise its own steps
    pub client_id: String,
    /// Version the steps were authored against
    pub version: u64,
    pub steps: Vec<S>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEventsResponse {
    /// Server version after the pushed steps were applied
    pub version: u64,
}

/// A step in server history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord<S> {
    pub step: S,
    /// Document version after this step
    pub version: u64,
    pub client_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
#[serde(bound = "S: Step")]
pub enum CollabRequest<S: Step> {
    GetDocument(GetDocumentRequest),
    PullEvents(PullEventsRequest),
    PushEvents(PushEventsRequest<S>),
}

impl<S: Step> CollabRequest<S> {
    pub fn request_type(&self) -> CollabRequestType {
        match self {
            CollabRequest::GetDocument(_) => CollabRequestType::GetDocument,
            CollabRequest::PullEvents(_) => CollabRequestType::PullEvents,
            CollabRequest::PushEvents(_) => CollabRequestType::PushEvents,
        }
    }

    pub fn doc_id(&self) -> &str {
        match self {
            CollabRequest::GetDocument(body) => &body.doc_id,
            CollabRequest::PullEvents(body) => &body.doc_id,
            CollabRequest::PushEvents(body) => &body.doc_id,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            CollabRequest::GetDocument(body) => &body.user_id,
            CollabRequest::PullEvents(body) => &body.user_id,
            CollabRequest::PushEvents(body) => &body.user_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
#[serde(bound = "S: Step")]
pub enum CollabResponse<S: Step> {
    GetDocument(GetDocumentResponse<S::Doc>),
    PullEvents(PullEventsResponse<S>),
    PushEvents(PushEventsResponse),
}

impl<S: Step> CollabResponse<S> {
    pub fn request_type(&self) -> CollabRequestType {
        match self {
            CollabResponse::GetDocument(_) => CollabRequestType::GetDocument,
            CollabResponse::PullEvents(_) => CollabRequestType::PullEvents,
            CollabResponse::PushEvents(_) => CollabRequestType::PushEvents,
        }
    }
}

/// What the manager answers for a dispatched request
pub type CollabReply<S> = CollabResult<CollabResponse<S>>;
