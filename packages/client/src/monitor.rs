//! # Sync Monitor
//!
//! Reconciles the local document with the server without doing any I/O.
//!
//! The monitor keeps three views of the document:
//!
//! - **confirmed**: the server document at `version`
//! - **unconfirmed**: local steps the server has not acknowledged yet
//! - **local**: `confirmed` with `unconfirmed` applied, what the user sees
//!
//! ```text
//!            local edit                     push accepted
//!   Ready ───────────────> Pushing ─────────────────────────> Ready
//!     │                      │ Conflict / InvalidVersion
//!     │ server ahead         v
//!     └──────────> Outdated ──> Pulling ──> Ready (or Pushing)
//!
//!   unrecoverable failure ──> Fatal (terminal)
//! ```
//!
//! Records pulled from the server are replayed onto `confirmed`. A record
//! carrying this session's client id acknowledges the head of `unconfirmed`;
//! any other record is applied and the unconfirmed steps are rebased over it.
//!
//! A push that times out may still have been applied, so the monitor pulls
//! before sending those steps again.

use collab_common::{CollabFail, CollabResult, PullEventsResponse, PushEventsResponse, StepRecord};
use collab_document::{apply_all, Step, StepError};

use crate::state::{CollabState, SyncIntent};

pub struct SyncMonitor<S: Step> {
    client_id: String,
    state: CollabState,
    confirmed: S::Doc,
    version: u64,
    unconfirmed: Vec<S>,
    local: S::Doc,
    server_version: Option<u64>,
    /// Unconfirmed steps sent with the push in flight
    in_flight: usize,
    /// A push timed out and no pull has answered since
    unacknowledged_push: bool,
}

impl<S: Step> SyncMonitor<S> {
    pub fn new(client_id: impl Into<String>, doc: S::Doc, version: u64) -> Self {
        Self {
            client_id: client_id.into(),
            state: CollabState::Ready,
            local: doc.clone(),
            confirmed: doc,
            version,
            unconfirmed: Vec::new(),
            server_version: None,
            in_flight: 0,
            unacknowledged_push: false,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn state(&self) -> &CollabState {
        &self.state
    }

    /// Last version confirmed by the server
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn confirmed_doc(&self) -> &S::Doc {
        &self.confirmed
    }

    pub fn local_doc(&self) -> &S::Doc {
        &self.local
    }

    pub fn unconfirmed(&self) -> &[S] {
        &self.unconfirmed
    }

    pub fn server_version(&self) -> Option<u64> {
        self.server_version
    }

    pub fn is_fatal_state(&self) -> bool {
        self.state.is_fatal()
    }

    pub fn fatal_error(&self) -> Option<&str> {
        match &self.state {
            CollabState::Fatal { reason } => Some(reason),
            _ => None,
        }
    }

    /// Whether the server is known to be ahead of the confirmed version
    pub fn is_outdated_version(&self) -> bool {
        self.server_version
            .map_or(false, |server_version| self.version < server_version)
    }

    /// Apply local edits and queue them for the server.
    ///
    /// Steps that do not apply to the local document are rejected as a whole.
    pub fn on_local_changes(&mut self, steps: Vec<S>) -> Result<(), StepError> {
        apply_all::<S>(&mut self.local, &steps)?;
        self.unconfirmed.extend(steps);
        if self.state.is_ready() && !self.unconfirmed.is_empty() {
            self.state = CollabState::Pushing;
        }
        Ok(())
    }

    /// Record the latest server version seen out of band
    pub fn on_upstream_changes(&mut self, server_version: u64) {
        self.note_server_version(server_version);
        if self.state.is_ready() && self.is_outdated_version() {
            self.state = CollabState::Outdated;
        }
    }

    /// Next request to send, or `None` when there is nothing to do.
    ///
    /// Always `None` once fatal.
    pub fn next_intent(&mut self) -> Option<SyncIntent<S>> {
        match self.state {
            CollabState::Fatal { .. } => None,
            CollabState::Outdated | CollabState::Pulling => {
                self.state = CollabState::Pulling;
                Some(SyncIntent::Pull {
                    version: self.version,
                })
            }
            CollabState::Ready | CollabState::Pushing => {
                if !self.unconfirmed.is_empty() {
                    self.state = CollabState::Pushing;
                    self.in_flight = self.unconfirmed.len();
                    Some(SyncIntent::Push {
                        version: self.version,
                        steps: self.unconfirmed.clone(),
                    })
                } else if self.is_outdated_version() {
                    self.state = CollabState::Pulling;
                    Some(SyncIntent::Pull {
                        version: self.version,
                    })
                } else {
                    self.state = CollabState::Ready;
                    None
                }
            }
        }
    }

    pub fn on_push_result(&mut self, result: CollabResult<PushEventsResponse>) {
        if self.is_fatal_state() {
            return;
        }
        let sent = std::mem::take(&mut self.in_flight);

        match result {
            Ok(response) if sent > 0 && response.version == self.version + sent as u64 => {
                // Accepted as-is at the head of the server history
                let accepted: Vec<S> = self.unconfirmed.drain(..sent).collect();
                if let Err(error) = apply_all::<S>(&mut self.confirmed, &accepted) {
                    self.fail(format!("accepted steps do not apply: {}", error));
                    return;
                }
                self.version = response.version;
                self.note_server_version(response.version);
                self.settle();
            }
            Ok(response) => {
                // Rebased on the server; pull to learn the final form
                self.note_server_version(response.version);
                self.state = CollabState::Pulling;
            }
            Err(CollabFail::Conflict | CollabFail::InvalidVersion) => {
                tracing::debug!(client_id = %self.client_id, "push rejected, pulling first");
                self.state = CollabState::Pulling;
            }
            Err(CollabFail::ManagerUnresponsive) => {
                tracing::debug!(client_id = %self.client_id, "push timed out, pulling first");
                self.unacknowledged_push = true;
                self.state = CollabState::Outdated;
            }
            Err(fail) => self.fail(fail.to_string()),
        }
    }

    pub fn on_pull_result(&mut self, result: CollabResult<PullEventsResponse<S>>) {
        if self.is_fatal_state() {
            return;
        }

        match result {
            Ok(response) => {
                self.receive_records(response.steps);
                if self.is_fatal_state() {
                    return;
                }
                self.unacknowledged_push = false;
                self.note_server_version(response.version);
                self.settle();
            }
            Err(CollabFail::ManagerUnresponsive) => {
                self.state = if self.unacknowledged_push {
                    CollabState::Outdated
                } else {
                    CollabState::Ready
                };
            }
            Err(fail) => self.fail(fail.to_string()),
        }
    }

    /// Replay server records onto the confirmed document
    pub fn receive_records(&mut self, records: Vec<StepRecord<S>>) {
        for record in records {
            if record.version <= self.version {
                continue;
            }
            if record.version != self.version + 1 {
                self.fail(format!(
                    "missing records between {} and {}",
                    self.version, record.version
                ));
                return;
            }

            if let Err(error) = record.step.apply(&mut self.confirmed) {
                self.fail(format!("server step does not apply: {}", error));
                return;
            }

            if record.client_id == self.client_id && !self.unconfirmed.is_empty() {
                self.unconfirmed.remove(0);
            } else {
                self.rebase_unconfirmed(&record.step);
            }
            self.version = record.version;
        }

        let mut local = self.confirmed.clone();
        match apply_all::<S>(&mut local, &self.unconfirmed) {
            Ok(()) => self.local = local,
            Err(error) => self.fail(format!("local steps do not apply: {}", error)),
        }
    }

    /// Move unconfirmed steps past `applied`, dropping the first conflicting
    /// step and everything after it
    fn rebase_unconfirmed(&mut self, applied: &S) {
        let mut over = applied.clone();
        let mut kept = Vec::with_capacity(self.unconfirmed.len());

        for (index, step) in self.unconfirmed.iter().enumerate() {
            match (step.rebase(&over), over.rebase(step)) {
                (Ok(moved), Ok(next_over)) => {
                    kept.push(moved);
                    over = next_over;
                }
                (Err(error), _) | (_, Err(error)) => {
                    tracing::warn!(
                        client_id = %self.client_id,
                        dropped = self.unconfirmed.len() - index,
                        "dropping local steps: {}",
                        error
                    );
                    break;
                }
            }
        }

        self.unconfirmed = kept;
    }

    fn note_server_version(&mut self, version: u64) {
        if self.server_version.map_or(true, |known| known < version) {
            self.server_version = Some(version);
        }
    }

    fn settle(&mut self) {
        self.state = if !self.unconfirmed.is_empty() {
            CollabState::Pushing
        } else if self.is_outdated_version() {
            CollabState::Outdated
        } else {
            CollabState::Ready
        };
    }

    fn fail(&mut self, reason: String) {
        tracing::error!(client_id = %self.client_id, "sync failed: {}", reason);
        self.state = CollabState::Fatal { reason };
        self.in_flight = 0;
    }
}
