//! # Session Manager
//!
//! Owns every live [`Instance`], creates them on demand and governs how many
//! may exist at once.
//!
//! Registry changes (resolve-or-create, eviction, cleanup, stop) run as tasks
//! on one global [`SerialQueue`], so at most one instance ever exists per
//! document id and storage is only loaded once per instance.
//!
//! ## Eviction
//!
//! When a new instance pushes the registry past `maxInstances`, one other
//! instance is evicted: the least recently active one without connected
//! users, or the least recently active one overall when every instance has
//! users.

use collab_common::{CollabFail, CollabReply, CollabRequest, CollabResult};
use collab_document::{Document, Step};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ManagerConfig;
use crate::disk::Disk;
use crate::handler::CollabRequestHandler;
use crate::instance::Instance;
use crate::queue::SerialQueue;

/// Request-level failures; these never reach an instance
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("Must have user id")]
    InvalidUser,

    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] serde_json::Error),

    #[error(transparent)]
    Collab(#[from] CollabFail),
}

/// Async hook that sees every request before it is handled
pub type RequestInterceptor<S> =
    Arc<dyn Fn(&CollabRequest<S>) -> BoxFuture<'static, ()> + Send + Sync>;

pub struct ManagerOptions<S: Step> {
    pub config: ManagerConfig,
    pub disk: Arc<dyn Disk<S::Doc>>,
    pub intercept_requests: Option<RequestInterceptor<S>>,
}

impl<S: Step> ManagerOptions<S> {
    pub fn new(config: ManagerConfig, disk: Arc<dyn Disk<S::Doc>>) -> Self {
        Self {
            config,
            disk,
            intercept_requests: None,
        }
    }
}

struct ManagerShared<S: Step> {
    config: ManagerConfig,
    disk: Arc<dyn Disk<S::Doc>>,
    queue: SerialQueue,
    instances: Mutex<HashMap<String, Arc<Instance<S>>>>,
    shutdown: CancellationToken,
    constructed: AtomicUsize,
}

impl<S: Step> ManagerShared<S> {
    async fn resolve_instance(
        &self,
        doc_id: &str,
        user_id: &str,
    ) -> CollabResult<Arc<Instance<S>>> {
        self.queue
            .add(|| async move {
                if self.shutdown.is_cancelled() {
                    return Err(CollabFail::ManagerDestroyed);
                }

                let existing = self.instances.lock().get(doc_id).cloned();
                if let Some(instance) = existing {
                    instance.register_user(user_id);
                    return Ok(instance);
                }

                let instance = self.create_instance(doc_id).await?;
                instance.register_user(user_id);

                let victim = {
                    let mut instances = self.instances.lock();
                    instances.insert(doc_id.to_string(), instance.clone());
                    self.pick_victim(&instances, doc_id)
                        .and_then(|victim| instances.remove(&victim))
                };
                if let Some(victim) = victim {
                    tracing::info!(
                        doc_id = %victim.doc_id(),
                        "evicting instance, more than {} open",
                        self.config.max_instances
                    );
                    victim.stop().await;
                }

                Ok(instance)
            })
            .await
    }

    async fn create_instance(&self, doc_id: &str) -> CollabResult<Arc<Instance<S>>> {
        let loaded = self.disk.load(doc_id).await.map_err(|error| {
            tracing::error!(doc_id, "failed to load document: {}", error);
            CollabFail::DocumentUnavailable
        })?;

        let doc = match loaded {
            Some(doc) => doc,
            None => {
                let doc = S::Doc::empty();
                if let Err(error) = self.disk.flush(doc_id, &doc, 0).await {
                    tracing::error!(doc_id, "failed to flush new document: {}", error);
                }
                doc
            }
        };

        self.constructed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(doc_id, "created instance");
        Ok(Instance::new(doc_id, doc, self.disk.clone(), &self.config))
    }

    /// Instance to evict once `created` has been inserted, if over capacity
    fn pick_victim(
        &self,
        instances: &HashMap<String, Arc<Instance<S>>>,
        created: &str,
    ) -> Option<String> {
        if instances.len() <= self.config.max_instances {
            return None;
        }

        let candidates = || {
            instances
                .iter()
                .filter(move |(doc_id, _)| doc_id.as_str() != created)
        };

        candidates()
            .filter(|(_, instance)| instance.user_count() == 0)
            .min_by_key(|(_, instance)| instance.last_active())
            .or_else(|| candidates().min_by_key(|(_, instance)| instance.last_active()))
            .map(|(doc_id, _)| doc_id.clone())
    }

    async fn cleanup(&self) {
        self.queue
            .add(|| async move {
                let idle: Vec<Arc<Instance<S>>> = {
                    let mut instances = self.instances.lock();
                    let idle_ids: Vec<String> = instances
                        .iter()
                        .filter(|(_, instance)| instance.user_count() == 0)
                        .map(|(doc_id, _)| doc_id.clone())
                        .collect();
                    idle_ids
                        .iter()
                        .filter_map(|doc_id| instances.remove(doc_id))
                        .collect()
                };

                for instance in idle {
                    tracing::debug!(doc_id = %instance.doc_id(), "removing idle instance");
                    instance.stop().await;
                }
            })
            .await
    }

    async fn stop_instance(&self, doc_id: &str) -> bool {
        self.queue
            .add(|| async move {
                let removed = self.instances.lock().remove(doc_id);
                match removed {
                    Some(instance) => instance.stop().await,
                    None => false,
                }
            })
            .await
    }
}

pub struct Manager<S: Step> {
    shared: Arc<ManagerShared<S>>,
    handler: CollabRequestHandler,
    intercept: Option<RequestInterceptor<S>>,
    cleanup_task: Option<JoinHandle<()>>,
}

impl<S: Step> Manager<S> {
    /// Create a manager and start its periodic cleanup.
    ///
    /// Must be called inside a tokio runtime when cleanup is enabled.
    pub fn new(opts: ManagerOptions<S>) -> Self {
        let handler = CollabRequestHandler::new(opts.config.user_wait_timeout());
        let cleanup_interval = opts.config.cleanup_interval();

        let shared = Arc::new(ManagerShared {
            config: opts.config,
            disk: opts.disk,
            queue: SerialQueue::new(),
            instances: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            constructed: AtomicUsize::new(0),
        });

        let cleanup_task = cleanup_interval.map(|interval| {
            let weak = Arc::downgrade(&shared);
            let shutdown = shared.shutdown.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                // First tick completes immediately
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    let Some(shared) = weak.upgrade() else {
                        break;
                    };
                    shared.cleanup().await;
                }
            })
        });

        Self {
            shared,
            handler,
            intercept: opts.intercept_requests,
            cleanup_task,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }

    /// Validate, inspect and handle one request.
    ///
    /// A missing user id is a request-level error; everything else comes back
    /// as a [`CollabReply`].
    pub async fn dispatch(
        &self,
        request: CollabRequest<S>,
    ) -> Result<CollabReply<S>, ManagerError> {
        if request.user_id().is_empty() {
            tracing::warn!(
                doc_id = %request.doc_id(),
                "rejecting {} without user id",
                request.request_type()
            );
            return Err(ManagerError::InvalidUser);
        }

        if let Some(intercept) = &self.intercept {
            intercept(&request).await;
        }

        tracing::debug!(
            doc_id = %request.doc_id(),
            user_id = %request.user_id(),
            "handling {}",
            request.request_type()
        );

        let instance = match self
            .shared
            .resolve_instance(request.doc_id(), request.user_id())
            .await
        {
            Ok(instance) => instance,
            Err(fail) => return Ok(Err(fail)),
        };

        let request_type = request.request_type();
        let mut reply = self.handler.handle(&instance, request).await;
        if matches!(reply, Err(CollabFail::InstanceStopped)) && self.is_destroyed() {
            reply = Err(CollabFail::ManagerDestroyed);
        }
        if let Err(fail) = &reply {
            tracing::debug!(doc_id = %instance.doc_id(), "{} failed: {}", request_type, fail);
        }
        Ok(reply)
    }

    /// Get the instance for `doc_id`, creating it if needed
    pub async fn resolve_instance(
        &self,
        doc_id: &str,
        user_id: &str,
    ) -> Result<Arc<Instance<S>>, ManagerError> {
        if user_id.is_empty() {
            return Err(ManagerError::InvalidUser);
        }
        Ok(self.shared.resolve_instance(doc_id, user_id).await?)
    }

    /// Evict every instance without connected users
    pub async fn cleanup(&self) {
        self.shared.cleanup().await;
    }

    /// Stop and remove one instance; `false` if it was not open
    pub async fn stop_instance(&self, doc_id: &str) -> bool {
        self.shared.stop_instance(doc_id).await
    }

    /// Stop every instance and the periodic cleanup.
    ///
    /// Pending pulls are released and later requests fail with
    /// [`CollabFail::ManagerDestroyed`].
    pub async fn destroy(&self) {
        self.shared.shutdown.cancel();
        if let Some(task) = &self.cleanup_task {
            task.abort();
        }

        let shared = &self.shared;
        shared
            .queue
            .add(|| async move {
                let instances: Vec<Arc<Instance<S>>> =
                    shared.instances.lock().drain().map(|(_, i)| i).collect();
                tracing::info!("destroying manager with {} instances", instances.len());
                for instance in instances {
                    instance.stop().await;
                }
            })
            .await;
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    pub fn instance_count(&self) -> usize {
        self.shared.instances.lock().len()
    }

    pub fn has_instance(&self, doc_id: &str) -> bool {
        self.shared.instances.lock().contains_key(doc_id)
    }

    pub fn instance(&self, doc_id: &str) -> Option<Arc<Instance<S>>> {
        self.shared.instances.lock().get(doc_id).cloned()
    }

    /// Instances created over the manager's lifetime
    pub fn constructed_instances(&self) -> usize {
        self.shared.constructed.load(Ordering::Relaxed)
    }
}

impl<S: Step> Drop for Manager<S> {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}
