//! Protocol types shared by the collab server, client and comms crates.

pub mod error;
pub mod protocol;
pub mod result;

pub use error::*;
pub use protocol::*;
pub use result::*;
