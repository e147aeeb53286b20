use std::fmt;

/// Sync state of one editor session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollabState {
    /// Nothing in flight
    Ready,
    Pulling,
    Pushing,
    /// The server is known to be ahead of the confirmed version
    Outdated,
    /// Terminal; the session must re-fetch the document
    Fatal { reason: String },
}

impl CollabState {
    pub fn is_ready(&self) -> bool {
        matches!(self, CollabState::Ready)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, CollabState::Fatal { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            CollabState::Ready => "ready",
            CollabState::Pulling => "pulling",
            CollabState::Pushing => "pushing",
            CollabState::Outdated => "outdated",
            CollabState::Fatal { .. } => "fatal",
        }
    }
}

impl fmt::Display for CollabState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollabState::Fatal { reason } => write!(f, "fatal: {}", reason),
            other => f.write_str(other.name()),
        }
    }
}

/// What the session should send next
#[derive(Debug, Clone, PartialEq)]
pub enum SyncIntent<S> {
    Push { version: u64, steps: Vec<S> },
    Pull { version: u64 },
}
