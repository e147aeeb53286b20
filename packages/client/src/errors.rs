use collab_common::CollabFail;
use collab_comms::NetworkingError;
use collab_document::StepError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Networking error: {0}")]
    Networking(#[from] NetworkingError),

    #[error(transparent)]
    Collab(#[from] CollabFail),

    #[error("Local step rejected: {0}")]
    Step(#[from] StepError),

    #[error("Sync session is in a fatal state: {0}")]
    Fatal(String),
}

pub type ClientResult<T> = Result<T, ClientError>;
