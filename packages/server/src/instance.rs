//! # Session Instance
//!
//! Server-held synchronization state for one document: the snapshot, its
//! version, the retained step history, and the users currently working on it.
//!
//! State lives behind a synchronous lock that is never held across an
//! `.await`, so steps are applied strictly one batch at a time. Pull waiters
//! observe new versions through a `watch` channel and are released on new
//! steps, on their timeout, or when the instance is stopped.

use collab_common::{
    CollabFail, CollabResult, GetDocumentResponse, PullEventsResponse, StepRecord,
};
use collab_document::{apply_all, rebase_steps, Step};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::ManagerConfig;
use crate::disk::{Disk, LatestDoc, StoredDoc};

#[derive(Debug, Clone, Copy)]
struct UserPresence {
    last_seen: Instant,
    /// Pull requests currently held open for this user
    waiting: usize,
}

struct InstanceState<S: Step> {
    doc: S::Doc,
    version: u64,
    history: VecDeque<StepRecord<S>>,
    users: HashMap<String, UserPresence>,
    last_active: Instant,
    save_scheduled: bool,
    stopped: bool,
}

impl<S: Step> InstanceState<S> {
    /// Oldest version a client can still pull or push from
    fn history_start(&self) -> u64 {
        self.version - self.history.len() as u64
    }

    fn touch(&mut self, user_id: &str) {
        let now = Instant::now();
        self.last_active = now;
        self.users
            .entry(user_id.to_string())
            .and_modify(|presence| presence.last_seen = now)
            .or_insert(UserPresence {
                last_seen: now,
                waiting: 0,
            });
    }
}

pub struct Instance<S: Step> {
    doc_id: String,
    state: Mutex<InstanceState<S>>,
    version_tx: watch::Sender<u64>,
    stop: CancellationToken,
    disk: Arc<dyn Disk<S::Doc>>,
    save_debounce: Duration,
    collect_users_timeout: Duration,
    max_step_history: usize,
    this: Weak<Instance<S>>,
}

impl<S: Step> Instance<S> {
    /// Create an instance at version 0 holding `doc`.
    pub fn new(
        doc_id: impl Into<String>,
        doc: S::Doc,
        disk: Arc<dyn Disk<S::Doc>>,
        config: &ManagerConfig,
    ) -> Arc<Self> {
        let (version_tx, _) = watch::channel(0);
        Arc::new_cyclic(|this| Self {
            doc_id: doc_id.into(),
            state: Mutex::new(InstanceState {
                doc,
                version: 0,
                history: VecDeque::new(),
                users: HashMap::new(),
                last_active: Instant::now(),
                save_scheduled: false,
                stopped: false,
            }),
            version_tx,
            stop: CancellationToken::new(),
            disk,
            save_debounce: config.save_debounce(),
            collect_users_timeout: config.collect_users_timeout(),
            max_step_history: config.max_step_history,
            this: this.clone(),
        })
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    pub fn version(&self) -> u64 {
        self.state.lock().version
    }

    pub fn history_start(&self) -> u64 {
        self.state.lock().history_start()
    }

    pub fn last_active(&self) -> Instant {
        self.state.lock().last_active
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Record activity from `user_id`
    pub fn register_user(&self, user_id: &str) {
        self.state.lock().touch(user_id);
    }

    /// Users seen within the collect window or with a pull in flight.
    ///
    /// Users outside the window are forgotten.
    pub fn user_count(&self) -> usize {
        let timeout = self.collect_users_timeout;
        let mut state = self.state.lock();
        state
            .users
            .retain(|_, presence| presence.waiting > 0 || presence.last_seen.elapsed() <= timeout);
        state.users.len()
    }

    /// Current snapshot and version
    pub fn snapshot(&self) -> CollabResult<GetDocumentResponse<S::Doc>> {
        let state = self.state.lock();
        if state.stopped {
            return Err(CollabFail::InstanceStopped);
        }
        Ok(GetDocumentResponse {
            doc: state.doc.clone(),
            version: state.version,
        })
    }

    /// Apply `steps` authored against `base`, rebasing them over any history
    /// recorded since. Returns the version after the steps.
    ///
    /// Either every step is applied or the instance is left untouched.
    pub fn add_steps(&self, client_id: &str, base: u64, steps: Vec<S>) -> CollabResult<u64> {
        let mut state = self.state.lock();
        if state.stopped {
            return Err(CollabFail::InstanceStopped);
        }
        if base > state.version {
            return Err(CollabFail::InvalidVersion);
        }
        let start = state.history_start();
        if base < start {
            return Err(CollabFail::HistoryNotAvailable);
        }

        let steps = if base == state.version {
            steps
        } else {
            let over: Vec<S> = state
                .history
                .iter()
                .skip((base - start) as usize)
                .map(|record| record.step.clone())
                .collect();
            rebase_steps(&steps, &over).map_err(|error| {
                tracing::debug!(doc_id = %self.doc_id, base, "rebase failed: {}", error);
                if error.is_conflict() {
                    CollabFail::Conflict
                } else {
                    CollabFail::ApplyFailed
                }
            })?
        };

        if steps.is_empty() {
            return Ok(state.version);
        }

        apply_all::<S>(&mut state.doc, &steps).map_err(|error| {
            tracing::warn!(doc_id = %self.doc_id, "failed to apply steps: {}", error);
            CollabFail::ApplyFailed
        })?;

        for step in steps {
            state.version += 1;
            let version = state.version;
            state.history.push_back(StepRecord {
                step,
                version,
                client_id: client_id.to_string(),
            });
        }
        while state.history.len() > self.max_step_history {
            state.history.pop_front();
        }

        state.last_active = Instant::now();
        let version = state.version;
        let schedule_save = !state.save_scheduled;
        state.save_scheduled = true;
        drop(state);

        self.version_tx.send_replace(version);
        if schedule_save {
            self.schedule_save();
        }

        Ok(version)
    }

    /// Records after `since`, together with the current version
    pub fn get_events(&self, since: u64) -> CollabResult<PullEventsResponse<S>> {
        let state = self.state.lock();
        if state.stopped {
            return Err(CollabFail::InstanceStopped);
        }
        if since > state.version {
            return Err(CollabFail::InvalidVersion);
        }
        let start = state.history_start();
        if since < start {
            return Err(CollabFail::HistoryNotAvailable);
        }

        Ok(PullEventsResponse {
            version: state.version,
            steps: state
                .history
                .iter()
                .skip((since - start) as usize)
                .cloned()
                .collect(),
        })
    }

    /// Wait until the version passes `since`, `timeout` elapses or the
    /// instance is stopped. `user_id` counts as connected while waiting.
    pub async fn wait_for_change(&self, user_id: &str, since: u64, timeout: Duration) {
        let mut versions = self.version_tx.subscribe();
        let _waiting = WaitingGuard::new(self, user_id);

        let advanced = async {
            loop {
                if *versions.borrow_and_update() > since {
                    return;
                }
                if versions.changed().await.is_err() {
                    return;
                }
            }
        };

        tokio::select! {
            _ = advanced => {}
            _ = tokio::time::sleep(timeout) => {}
            _ = self.stop.cancelled() => {}
        }
    }

    /// Stop the instance and flush its final state.
    ///
    /// Wakes pull waiters and cancels a pending debounced save. Returns
    /// `false` if the instance was already stopped.
    pub async fn stop(&self) -> bool {
        let (doc, version) = {
            let mut state = self.state.lock();
            if state.stopped {
                return false;
            }
            state.stopped = true;
            state.save_scheduled = false;
            (state.doc.clone(), state.version)
        };
        self.stop.cancel();

        tracing::debug!(doc_id = %self.doc_id, version, "stopping instance");
        if let Err(error) = self.disk.flush(&self.doc_id, &doc, version).await {
            tracing::error!(doc_id = %self.doc_id, "failed to flush document: {}", error);
        }
        true
    }

    fn schedule_save(&self) {
        let this = self.this.clone();
        let stop = self.stop.clone();
        let disk = self.disk.clone();
        let doc_id = self.doc_id.clone();
        let debounce = self.save_debounce;

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(debounce) => {}
                _ = stop.cancelled() => return,
            }

            match this.upgrade() {
                Some(instance) => instance.state.lock().save_scheduled = false,
                None => return,
            }

            let get_latest: LatestDoc<S::Doc> = Box::new(move || {
                let instance = this.upgrade()?;
                let state = instance.state.lock();
                // A stopped instance has already flushed its final state
                if state.stopped {
                    return None;
                }
                Some(StoredDoc {
                    doc: state.doc.clone(),
                    version: state.version,
                })
            });

            if let Err(error) = disk.update(&doc_id, get_latest).await {
                tracing::warn!(doc_id = %doc_id, "failed to save document: {}", error);
            }
        });
    }
}

impl<S: Step> std::fmt::Debug for Instance<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Instance")
            .field("doc_id", &self.doc_id)
            .field("version", &state.version)
            .field("users", &state.users.len())
            .field("stopped", &state.stopped)
            .finish()
    }
}

/// Marks a user as waiting for the lifetime of a pull
struct WaitingGuard<'a, S: Step> {
    instance: &'a Instance<S>,
    user_id: String,
}

impl<'a, S: Step> WaitingGuard<'a, S> {
    fn new(instance: &'a Instance<S>, user_id: &str) -> Self {
        let mut state = instance.state.lock();
        state.touch(user_id);
        if let Some(presence) = state.users.get_mut(user_id) {
            presence.waiting += 1;
        }
        Self {
            instance,
            user_id: user_id.to_string(),
        }
    }
}

impl<S: Step> Drop for WaitingGuard<'_, S> {
    fn drop(&mut self) {
        let mut state = self.instance.state.lock();
        state.touch(&self.user_id);
        if let Some(presence) = state.users.get_mut(&self.user_id) {
            presence.waiting = presence.waiting.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemoryDisk;
    use collab_document::{TextDocument, TextStep};

    fn instance_with(
        config: ManagerConfig,
    ) -> (Arc<Instance<TextStep>>, Arc<MemoryDisk<TextDocument>>) {
        let disk = Arc::new(MemoryDisk::<TextDocument>::new());
        let instance =
            Instance::<TextStep>::new("doc1", TextDocument::from("hello"), disk.clone(), &config);
        (instance, disk)
    }

    fn instance() -> Arc<Instance<TextStep>> {
        instance_with(ManagerConfig::default()).0
    }

    #[tokio::test]
    async fn test_add_steps_at_head() {
        let instance = instance();

        let version = instance
            .add_steps("c1", 0, vec![TextStep::insert(5, " world"), TextStep::insert(0, ">")])
            .unwrap();

        assert_eq!(version, 2);
        assert_eq!(instance.snapshot().unwrap().doc.as_str(), ">hello world");

        let events = instance.get_events(0).unwrap();
        assert_eq!(events.version, 2);
        assert_eq!(
            events.steps.iter().map(|r| r.version).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(events.steps.iter().all(|r| r.client_id == "c1"));
    }

    #[tokio::test]
    async fn test_stale_push_is_rebased() {
        let instance = instance();
        instance.add_steps("c1", 0, vec![TextStep::insert(0, "A")]).unwrap();

        let version = instance
            .add_steps("c2", 0, vec![TextStep::insert(5, "!")])
            .unwrap();

        assert_eq!(version, 2);
        assert_eq!(instance.snapshot().unwrap().doc.as_str(), "Ahello!");
    }

    #[tokio::test]
    async fn test_conflicting_push_leaves_state_untouched() {
        let instance = instance();
        instance.add_steps("c1", 0, vec![TextStep::delete(1, "ell")]).unwrap();

        let result = instance.add_steps("c2", 0, vec![TextStep::insert(2, "X")]);

        assert_eq!(result, Err(CollabFail::Conflict));
        assert_eq!(instance.version(), 1);
        assert_eq!(instance.snapshot().unwrap().doc.as_str(), "ho");
    }

    #[tokio::test]
    async fn test_failed_apply_is_all_or_nothing() {
        let instance = instance();

        let result = instance.add_steps(
            "c1",
            0,
            vec![TextStep::insert(0, "ok"), TextStep::delete(40, "x")],
        );

        assert_eq!(result, Err(CollabFail::ApplyFailed));
        assert_eq!(instance.version(), 0);
        assert_eq!(instance.snapshot().unwrap().doc.as_str(), "hello");
    }

    #[tokio::test]
    async fn test_version_checks() {
        let instance = instance();

        assert_eq!(
            instance.add_steps("c1", 3, vec![TextStep::insert(0, "x")]),
            Err(CollabFail::InvalidVersion)
        );
        assert!(matches!(instance.get_events(1), Err(CollabFail::InvalidVersion)));
    }

    #[tokio::test]
    async fn test_history_window() {
        let (instance, _) = instance_with(ManagerConfig {
            max_step_history: 2,
            ..ManagerConfig::default()
        });

        for i in 0..4u64 {
            instance.add_steps("c1", i, vec![TextStep::insert(0, "x")]).unwrap();
        }

        assert_eq!(instance.history_start(), 2);
        assert_eq!(instance.get_events(2).unwrap().steps.len(), 2);
        assert!(matches!(instance.get_events(1), Err(CollabFail::HistoryNotAvailable)));
        assert_eq!(
            instance.add_steps("c2", 1, vec![TextStep::insert(0, "y")]),
            Err(CollabFail::HistoryNotAvailable)
        );
    }

    #[tokio::test]
    async fn test_wait_wakes_on_new_steps() {
        let instance = instance();

        let waiter = {
            let instance = instance.clone();
            tokio::spawn(async move {
                instance.wait_for_change("u1", 0, Duration::from_secs(5)).await;
                instance.version()
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(instance.user_count(), 1);

        instance.add_steps("c1", 0, vec![TextStep::insert(0, "x")]).unwrap();
        assert_eq!(waiter.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let instance = instance();

        let started = Instant::now();
        instance.wait_for_change("u1", 0, Duration::from_millis(20)).await;

        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(instance.version(), 0);
    }

    #[tokio::test]
    async fn test_stop_wakes_waiters_and_flushes_once() {
        let (instance, disk) = instance_with(ManagerConfig::default());

        let waiter = {
            let instance = instance.clone();
            tokio::spawn(async move {
                instance.wait_for_change("u1", 0, Duration::from_secs(5)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(instance.stop().await);
        assert!(!instance.stop().await);
        waiter.await.unwrap();

        assert_eq!(disk.stats("doc1").flushes, 1);
        assert!(matches!(instance.snapshot(), Err(CollabFail::InstanceStopped)));
        assert_eq!(
            instance.add_steps("c1", 0, vec![TextStep::insert(0, "x")]),
            Err(CollabFail::InstanceStopped)
        );
    }

    #[tokio::test]
    async fn test_saves_are_debounced() {
        let (instance, disk) = instance_with(ManagerConfig {
            save_debounce_ms: 30,
            ..ManagerConfig::default()
        });

        for i in 0..3u64 {
            instance.add_steps("c1", i, vec![TextStep::insert(0, "x")]).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(disk.stats("doc1").updates, 1);
        let stored = disk.stored("doc1").unwrap();
        assert_eq!(stored.version, 3);
        assert_eq!(stored.doc.as_str(), "xxxhello");
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_save() {
        let (instance, disk) = instance_with(ManagerConfig {
            save_debounce_ms: 30,
            ..ManagerConfig::default()
        });

        instance.add_steps("c1", 0, vec![TextStep::insert(0, "x")]).unwrap();
        instance.stop().await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(disk.stats("doc1").updates, 0);
        assert_eq!(disk.stats("doc1").flushes, 1);
        assert_eq!(disk.stored("doc1").unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_idle_users_are_forgotten() {
        let (instance, _) = instance_with(ManagerConfig {
            collect_users_timeout_ms: 20,
            ..ManagerConfig::default()
        });

        instance.register_user("u1");
        assert_eq!(instance.user_count(), 1);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(instance.user_count(), 0);
    }
}
