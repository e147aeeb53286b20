//! # Collab Comms
//!
//! Messaging layer between sync clients and the manager.
//!
//! ```text
//! ClientCommunication ──wrap_request──> MessageBus ──> manager endpoint
//!         ^                                                  │
//!         └───────────── RESPONSE (same correlation id) ─────┘
//! ```

mod bus;
mod client;
mod errors;
mod message;
mod wrap_request;

pub use bus::{InMemoryBus, MessageBus, MessageHandler, Subscription};
pub use client::{ClientCommunication, ClientCommunicationOptions};
pub use errors::NetworkingError;
pub use message::{Message, MessageKind, ResponseBody};
pub use wrap_request::{wrap_request, RequestOptions, DEFAULT_REQUEST_TIMEOUT};
