use collab_common::CollabRequestType;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetworkingError {
    #[error("Request timed out")]
    Timeout,

    #[error("Request was aborted")]
    Aborted,

    #[error("Bus dropped the response listener")]
    Disconnected,

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse {
        expected: CollabRequestType,
        actual: CollabRequestType,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
