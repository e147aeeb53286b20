//! # Collab Client
//!
//! Client side of the sync engine. [`SyncMonitor`] is the I/O-free state
//! machine that decides when to push and pull; [`CollabClient`] drives it
//! over the message bus.

mod client;
mod errors;
mod monitor;
mod state;

pub use client::{CollabClient, CollabClientOptions};
pub use errors::{ClientError, ClientResult};
pub use monitor::SyncMonitor;
pub use state::{CollabState, SyncIntent};
