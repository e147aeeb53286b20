use crate::error::CollabFail;

/// Result of a protocol operation
pub type CollabResult<T> = Result<T, CollabFail>;
