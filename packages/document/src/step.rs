use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

use crate::StepError;

/// A document value the sync engine can hold, persist and ship over the wire.
///
/// The engine never looks inside a document; it only clones it, serializes it
/// and hands it to [`Step::apply`].
pub trait Document: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// The document used when storage has nothing for a doc id
    fn empty() -> Self;
}

/// Trait for edit operations
///
/// Each step type implements this trait to provide:
/// - Apply logic against its document type
/// - Inverse operation for undo
/// - Rebase against a concurrently applied step
pub trait Step: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {
    type Doc: Document;

    /// Apply this step to the document.
    ///
    /// On error the document must be left unchanged.
    fn apply(&self, doc: &mut Self::Doc) -> Result<(), StepError>;

    /// Create the step that undoes this one
    fn invert(&self) -> Self;

    /// Transform this step so it applies after `over`, where both steps were
    /// authored against the same document.
    ///
    /// Implementations must converge: applying `a` then `b.rebase(&a)` yields
    /// the same document as applying `b` then `a.rebase(&b)` whenever both
    /// rebases succeed. Returns [`StepError::Conflict`] when the two intents
    /// cannot both be honoured.
    fn rebase(&self, over: &Self) -> Result<Self, StepError>;
}
