//! Error types for step application and rebasing

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    #[error("Position {pos} is out of bounds for document of length {len}")]
    OutOfBounds { pos: usize, len: usize },

    #[error("Position {pos} plus length {len} overflows")]
    Overflow { pos: usize, len: usize },

    #[error("Deleted text does not match document at position {pos}")]
    Mismatch { pos: usize },

    #[error("Step conflicts with a concurrent step: {0}")]
    Conflict(String),
}

impl StepError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StepError::Conflict(_))
    }
}
