//! # Collab Document
//!
//! Edit-operation model for the sync engine.
//!
//! The server and clients never interpret document content. They only need
//! three things from an edit operation (a [`Step`]):
//!
//! 1. **Apply** it to a document
//! 2. **Invert** it
//! 3. **Rebase** it over a step that was applied concurrently
//!
//! [`TextDocument`] and [`TextStep`] are a plain text implementation used by
//! the CLI simulation and the test suites.

mod errors;
mod rebase;
mod step;
mod text;

pub use errors::StepError;
pub use rebase::{apply_all, rebase_steps};
pub use step::{Document, Step};
pub use text::{TextDocument, TextStep};
