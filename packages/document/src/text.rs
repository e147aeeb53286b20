//! # Plain Text Documents
//!
//! A minimal rebasable document: a string edited by char-indexed inserts and
//! deletes. Deletes carry the text they remove so every step can be inverted
//! without looking at the document.
//!
//! ## Rebase rules
//!
//! - Two inserts at the same position are ordered by their text, so both
//!   application orders produce the same string.
//! - An insert that lands strictly inside a range deleted concurrently is a
//!   conflict (in either direction).
//! - Overlapping deletes remove the union of their ranges.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Document, Step, StepError};

/// Plain text document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextDocument {
    text: String,
}

impl TextDocument {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Length in chars (the unit step positions are expressed in)
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    fn byte_offset(&self, pos: usize) -> Result<usize, StepError> {
        if pos == self.char_len() {
            return Ok(self.text.len());
        }
        self.text
            .char_indices()
            .nth(pos)
            .map(|(offset, _)| offset)
            .ok_or(StepError::OutOfBounds {
                pos,
                len: self.char_len(),
            })
    }
}

impl Document for TextDocument {
    fn empty() -> Self {
        Self::default()
    }
}

impl From<&str> for TextDocument {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl fmt::Display for TextDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Char-indexed text edit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stepType", rename_all = "camelCase")]
pub enum TextStep {
    Insert { pos: usize, text: String },
    Delete { pos: usize, text: String },
}

impl TextStep {
    pub fn insert(pos: usize, text: impl Into<String>) -> Self {
        TextStep::Insert {
            pos,
            text: text.into(),
        }
    }

    pub fn delete(pos: usize, text: impl Into<String>) -> Self {
        TextStep::Delete {
            pos,
            text: text.into(),
        }
    }

    pub fn pos(&self) -> usize {
        match self {
            TextStep::Insert { pos, .. } | TextStep::Delete { pos, .. } => *pos,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            TextStep::Insert { text, .. } | TextStep::Delete { text, .. } => text,
        }
    }

    fn char_len(&self) -> usize {
        self.text().chars().count()
    }

    /// Char position just past this step's text
    fn end(&self) -> Result<usize, StepError> {
        shifted(self.pos(), self.char_len())
    }

    fn with_pos(&self, pos: usize) -> Self {
        match self {
            TextStep::Insert { text, .. } => TextStep::insert(pos, text.clone()),
            TextStep::Delete { text, .. } => TextStep::delete(pos, text.clone()),
        }
    }
}

/// `pos + by`, rejecting positions no document can reach
fn shifted(pos: usize, by: usize) -> Result<usize, StepError> {
    pos.checked_add(by).ok_or(StepError::Overflow { pos, len: by })
}

impl Step for TextStep {
    type Doc = TextDocument;

    fn apply(&self, doc: &mut TextDocument) -> Result<(), StepError> {
        match self {
            TextStep::Insert { pos, text } => {
                let offset = doc.byte_offset(*pos)?;
                doc.text.insert_str(offset, text);
            }
            TextStep::Delete { pos, text } => {
                let start = doc.byte_offset(*pos)?;
                let end = doc.byte_offset(self.end()?)?;
                if &doc.text[start..end] != text {
                    return Err(StepError::Mismatch { pos: *pos });
                }
                doc.text.replace_range(start..end, "");
            }
        }
        Ok(())
    }

    fn invert(&self) -> Self {
        match self {
            TextStep::Insert { pos, text } => TextStep::delete(*pos, text.clone()),
            TextStep::Delete { pos, text } => TextStep::insert(*pos, text.clone()),
        }
    }

    fn rebase(&self, over: &Self) -> Result<Self, StepError> {
        let pos = self.pos();
        let len = self.char_len();
        let end = self.end()?;
        let over_pos = over.pos();
        let over_len = over.char_len();
        let over_end = over.end()?;

        if len == 0 && matches!(self, TextStep::Insert { .. }) {
            return Ok(self.clone());
        }

        match (self, over) {
            (TextStep::Insert { text, .. }, TextStep::Insert { text: over_text, .. }) => {
                if over_pos < pos || (over_pos == pos && over_text <= text) {
                    Ok(self.with_pos(shifted(pos, over_len)?))
                } else {
                    Ok(self.clone())
                }
            }
            (TextStep::Insert { .. }, TextStep::Delete { .. }) => {
                if pos <= over_pos {
                    Ok(self.clone())
                } else if pos >= over_end {
                    Ok(self.with_pos(pos - over_len))
                } else {
                    Err(StepError::Conflict(format!(
                        "insert at {} falls inside deleted range {}..{}",
                        pos, over_pos, over_end
                    )))
                }
            }
            (TextStep::Delete { .. }, TextStep::Insert { .. }) => {
                if over_len == 0 || end <= over_pos {
                    Ok(self.clone())
                } else if over_pos <= pos {
                    Ok(self.with_pos(shifted(pos, over_len)?))
                } else {
                    Err(StepError::Conflict(format!(
                        "deleted range {}..{} contains concurrent insert at {}",
                        pos, end, over_pos
                    )))
                }
            }
            (TextStep::Delete { text, .. }, TextStep::Delete { .. }) => {
                if end <= over_pos {
                    Ok(self.clone())
                } else if over_end <= pos {
                    Ok(self.with_pos(pos - over_len))
                } else {
                    // Overlap: keep only the chars the other delete did not remove
                    let keep_before = over_pos.saturating_sub(pos).min(len);
                    let skip_until = over_end.saturating_sub(pos).min(len);
                    let remaining: String = text
                        .chars()
                        .take(keep_before)
                        .chain(text.chars().skip(skip_until))
                        .collect();
                    Ok(TextStep::delete(pos.min(over_pos), remaining))
                }
            }
        }
    }
}
