//! Async driver for a [`SyncMonitor`] over [`ClientCommunication`].

use collab_common::{
    CollabFail, CollabResult, GetDocumentRequest, PullEventsRequest, PullEventsResponse,
    PushEventsRequest,
};
use collab_comms::{ClientCommunication, ClientCommunicationOptions, MessageBus};
use collab_document::Step;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::errors::{ClientError, ClientResult};
use crate::monitor::SyncMonitor;
use crate::state::{CollabState, SyncIntent};

pub struct CollabClientOptions {
    pub doc_id: String,
    pub user_id: String,
    /// Identifies this editor session in step records
    pub client_id: String,
    pub manager_id: String,
    pub bus: Arc<dyn MessageBus>,
    pub signal: CancellationToken,
    pub request_timeout: Option<Duration>,
    /// Long-poll bound requested by [`CollabClient::poll_upstream`]; the
    /// server caps it at its own limit
    pub pull_wait: Option<Duration>,
}

pub struct CollabClient<S: Step> {
    doc_id: String,
    user_id: String,
    pull_wait: Option<Duration>,
    comms: ClientCommunication<S>,
    monitor: SyncMonitor<S>,
}

impl<S: Step> CollabClient<S> {
    /// Fetch the document and start a session at its current version
    pub async fn connect(opts: CollabClientOptions) -> ClientResult<Self> {
        let comms = ClientCommunication::new(ClientCommunicationOptions {
            client_id: opts.client_id.clone(),
            manager_id: opts.manager_id,
            bus: opts.bus,
            signal: opts.signal,
            request_timeout: opts.request_timeout,
        });

        let response = comms
            .get_document(GetDocumentRequest {
                doc_id: opts.doc_id.clone(),
                user_id: opts.user_id.clone(),
            })
            .await??;

        tracing::debug!(
            doc_id = %opts.doc_id,
            client_id = %opts.client_id,
            version = response.version,
            "connected"
        );

        Ok(Self {
            doc_id: opts.doc_id,
            user_id: opts.user_id,
            pull_wait: opts.pull_wait,
            comms,
            monitor: SyncMonitor::new(opts.client_id, response.doc, response.version),
        })
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    /// Document as the user sees it, including unconfirmed edits
    pub fn doc(&self) -> &S::Doc {
        self.monitor.local_doc()
    }

    pub fn version(&self) -> u64 {
        self.monitor.version()
    }

    pub fn state(&self) -> &CollabState {
        self.monitor.state()
    }

    pub fn monitor(&self) -> &SyncMonitor<S> {
        &self.monitor
    }

    pub fn is_fatal_state(&self) -> bool {
        self.monitor.is_fatal_state()
    }

    pub fn fatal_error(&self) -> Option<&str> {
        self.monitor.fatal_error()
    }

    /// Apply local edits; they are sent on the next [`sync`](Self::sync)
    pub fn apply_local(&mut self, steps: Vec<S>) -> ClientResult<()> {
        self.ensure_alive()?;
        self.monitor.on_local_changes(steps)?;
        Ok(())
    }

    /// Run push/pull rounds until the monitor has nothing left to send.
    ///
    /// Pulls issued here never wait on the server.
    pub async fn sync(&mut self) -> ClientResult<()> {
        while let Some(intent) = self.monitor.next_intent() {
            match intent {
                SyncIntent::Push { version, steps } => {
                    let result = self
                        .comms
                        .push_events(PushEventsRequest {
                            doc_id: self.doc_id.clone(),
                            user_id: self.user_id.clone(),
                            client_id: self.monitor.client_id().to_string(),
                            version,
                            steps,
                        })
                        .await?;
                    let unresponsive = matches!(result, Err(CollabFail::ManagerUnresponsive));
                    self.monitor.on_push_result(result);
                    if unresponsive {
                        return Err(CollabFail::ManagerUnresponsive.into());
                    }
                }
                SyncIntent::Pull { version } => {
                    let result = self.pull(version, Some(0)).await?;
                    let unresponsive = matches!(result, Err(CollabFail::ManagerUnresponsive));
                    self.monitor.on_pull_result(result);
                    if unresponsive {
                        return Err(CollabFail::ManagerUnresponsive.into());
                    }
                }
            }
        }

        self.ensure_alive()
    }

    /// Long-poll for upstream steps, then push anything that became pending.
    ///
    /// Returns whether the confirmed version moved.
    pub async fn poll_upstream(&mut self) -> ClientResult<bool> {
        self.ensure_alive()?;
        let before = self.monitor.version();

        let wait_ms = self
            .pull_wait
            .map(|wait| u64::try_from(wait.as_millis()).unwrap_or(u64::MAX));
        let result = self.pull(before, wait_ms).await?;
        if let Ok(response) = &result {
            self.monitor.on_upstream_changes(response.version);
        }
        let unresponsive = matches!(result, Err(CollabFail::ManagerUnresponsive));
        self.monitor.on_pull_result(result);
        if unresponsive {
            return Err(CollabFail::ManagerUnresponsive.into());
        }

        self.sync().await?;
        Ok(self.monitor.version() > before)
    }

    async fn pull(
        &self,
        version: u64,
        wait_timeout_ms: Option<u64>,
    ) -> ClientResult<CollabResult<PullEventsResponse<S>>> {
        Ok(self
            .comms
            .pull_events(PullEventsRequest {
                doc_id: self.doc_id.clone(),
                user_id: self.user_id.clone(),
                version,
                wait_timeout_ms,
            })
            .await?)
    }

    fn ensure_alive(&self) -> ClientResult<()> {
        match self.monitor.fatal_error() {
            Some(reason) => Err(ClientError::Fatal(reason.to_string())),
            None => Ok(()),
        }
    }
}
