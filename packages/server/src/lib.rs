//! # Collab Server
//!
//! Session side of the sync engine: one [`Instance`] per open document,
//! owned by a [`Manager`] that serializes registry changes through a
//! [`SerialQueue`] and answers `get_document`, `push_events` and
//! `pull_events` through the [`CollabRequestHandler`].

pub mod config;
pub mod disk;
pub mod endpoint;
pub mod handler;
pub mod instance;
pub mod manager;
pub mod queue;

pub use config::{ManagerConfig, DEFAULT_CONFIG_NAME};
pub use disk::{Disk, DiskError, DiskStats, FileDisk, LatestDoc, MemoryDisk, StoredDoc};
pub use endpoint::ManagerEndpoint;
pub use handler::CollabRequestHandler;
pub use instance::Instance;
pub use manager::{Manager, ManagerError, ManagerOptions, RequestInterceptor};
pub use queue::SerialQueue;
