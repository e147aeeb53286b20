use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Typed protocol failure
///
/// Returned as data through the request handler and the client
/// communication layer; never raised across the protocol boundary.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollabFail {
    /// Client version is ahead of the server
    #[error("Version is ahead of the server")]
    InvalidVersion,

    /// Incoming steps could not be rebased over concurrent history
    #[error("Steps conflict with concurrent changes, pull first")]
    Conflict,

    /// Requested version predates the retained step history
    #[error("Step history for the requested version is no longer available")]
    HistoryNotAvailable,

    /// Steps could not be applied to the server document
    #[error("Steps could not be applied")]
    ApplyFailed,

    /// Document could not be loaded from storage
    #[error("Document could not be loaded")]
    DocumentUnavailable,

    /// Instance was stopped while the request was in flight
    #[error("Document instance was stopped")]
    InstanceStopped,

    /// Manager has been destroyed
    #[error("Manager has been destroyed")]
    ManagerDestroyed,

    /// Manager did not answer in time
    #[error("Manager is unresponsive")]
    ManagerUnresponsive,
}

impl CollabFail {
    /// Failures a client recovers from by pulling and retrying
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CollabFail::Conflict | CollabFail::InvalidVersion | CollabFail::ManagerUnresponsive
        )
    }
}
