//! # Disk Collaborator
//!
//! Storage boundary for document snapshots. The manager only ever calls
//! `load` when creating an instance and `flush` on first write and on stop;
//! instances call `update` after their save debounce window.
//!
//! Two implementations are provided:
//! - [`MemoryDisk`]: in-memory, records call counts (tests, simulations)
//! - [`FileDisk`]: one JSON file per document, written one save at a time

use async_trait::async_trait;
use collab_document::Document;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DiskError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A document together with the version it was saved at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDoc<D> {
    pub doc: D,
    pub version: u64,
}

/// Reads the latest state of an instance at save time.
///
/// Returns `None` once the instance is gone.
pub type LatestDoc<D> = Box<dyn Fn() -> Option<StoredDoc<D>> + Send + Sync>;

#[async_trait]
pub trait Disk<D: Document>: Send + Sync + 'static {
    /// Load a document, `None` if storage has never seen it
    async fn load(&self, doc_id: &str) -> Result<Option<D>, DiskError>;

    /// Best-effort incremental save
    async fn update(&self, doc_id: &str, get_latest: LatestDoc<D>) -> Result<(), DiskError>;

    /// Durable save
    async fn flush(&self, doc_id: &str, doc: &D, version: u64) -> Result<(), DiskError>;
}

/// Call counters for one document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskStats {
    pub loads: usize,
    pub updates: usize,
    pub flushes: usize,
}

/// In-memory disk
pub struct MemoryDisk<D> {
    docs: Mutex<HashMap<String, StoredDoc<D>>>,
    stats: Mutex<HashMap<String, DiskStats>>,
}

impl<D: Document> MemoryDisk<D> {
    pub fn new() -> Self {
        Self {
            docs: Mutex::new(HashMap::new()),
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Seed a document
    pub fn with_doc(self, doc_id: &str, doc: D) -> Self {
        self.docs
            .lock()
            .insert(doc_id.to_string(), StoredDoc { doc, version: 0 });
        self
    }

    pub fn stored(&self, doc_id: &str) -> Option<StoredDoc<D>> {
        self.docs.lock().get(doc_id).cloned()
    }

    pub fn stats(&self, doc_id: &str) -> DiskStats {
        self.stats.lock().get(doc_id).copied().unwrap_or_default()
    }

    fn record(&self, doc_id: &str, f: impl FnOnce(&mut DiskStats)) {
        f(self.stats.lock().entry(doc_id.to_string()).or_default());
    }
}

impl<D: Document> Default for MemoryDisk<D> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<D: Document> Disk<D> for MemoryDisk<D> {
    async fn load(&self, doc_id: &str) -> Result<Option<D>, DiskError> {
        self.record(doc_id, |s| s.loads += 1);
        Ok(self.docs.lock().get(doc_id).map(|stored| stored.doc.clone()))
    }

    async fn update(&self, doc_id: &str, get_latest: LatestDoc<D>) -> Result<(), DiskError> {
        self.record(doc_id, |s| s.updates += 1);
        if let Some(latest) = get_latest() {
            self.docs.lock().insert(doc_id.to_string(), latest);
        }
        Ok(())
    }

    async fn flush(&self, doc_id: &str, doc: &D, version: u64) -> Result<(), DiskError> {
        self.record(doc_id, |s| s.flushes += 1);
        self.docs.lock().insert(
            doc_id.to_string(),
            StoredDoc {
                doc: doc.clone(),
                version,
            },
        );
        Ok(())
    }
}

/// On-disk file format
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocFile<D> {
    doc_id: String,
    version: u64,
    saved_at: String,
    doc: D,
}

/// Stores each document as `<root>/<escaped doc id>.json`
///
/// Saves of the same document are serialized, and `update` reads the latest
/// state only once it holds that document's turn.
pub struct FileDisk {
    root: PathBuf,
    writes: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileDisk {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            writes: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File backing `doc_id`; ids are escaped so they cannot leave the root
    pub fn path_for(&self, doc_id: &str) -> PathBuf {
        let mut name = String::with_capacity(doc_id.len() + 5);
        for byte in doc_id.bytes() {
            match byte {
                b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' => name.push(byte as char),
                other => name.push_str(&format!("%{:02X}", other)),
            }
        }
        name.push_str(".json");
        self.root.join(name)
    }

    fn write_lock(&self, doc_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.writes
            .lock()
            .entry(doc_id.to_string())
            .or_default()
            .clone()
    }

    async fn write<D: Document>(&self, doc_id: &str, doc: &D, version: u64) -> Result<(), DiskError> {
        tokio::fs::create_dir_all(&self.root).await?;

        let file = DocFile {
            doc_id: doc_id.to_string(),
            version,
            saved_at: chrono::Utc::now().to_rfc3339(),
            doc,
        };
        let content = serde_json::to_vec_pretty(&file)?;

        // Write then rename so readers never see a partial file
        let path = self.path_for(doc_id);
        let tmp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Read the stored version of a document, if any
    pub async fn stored_version(&self, doc_id: &str) -> Result<Option<u64>, DiskError> {
        Ok(self
            .read::<serde_json::Value>(doc_id)
            .await?
            .map(|file| file.version))
    }

    async fn read<D: serde::de::DeserializeOwned>(
        &self,
        doc_id: &str,
    ) -> Result<Option<DocFile<D>>, DiskError> {
        match tokio::fs::read(self.path_for(doc_id)).await {
            Ok(content) => Ok(Some(serde_json::from_slice(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl<D: Document> Disk<D> for FileDisk {
    async fn load(&self, doc_id: &str) -> Result<Option<D>, DiskError> {
        Ok(self.read::<D>(doc_id).await?.map(|file| file.doc))
    }

    async fn update(&self, doc_id: &str, get_latest: LatestDoc<D>) -> Result<(), DiskError> {
        let lock = self.write_lock(doc_id);
        let _turn = lock.lock().await;
        match get_latest() {
            Some(latest) => self.write(doc_id, &latest.doc, latest.version).await,
            None => Ok(()),
        }
    }

    async fn flush(&self, doc_id: &str, doc: &D, version: u64) -> Result<(), DiskError> {
        let lock = self.write_lock(doc_id);
        let _turn = lock.lock().await;
        self.write(doc_id, doc, version).await
    }
}
