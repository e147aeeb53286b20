//! # Sequence Rebase
//!
//! Transforms a run of steps authored against version `v` so it applies on
//! top of another run that was also authored against `v` and has already been
//! applied.
//!
//! ```text
//!   v ──over[0]──over[1]── ... ──> head
//!   │
//!   └─incoming[0]─incoming[1]─ ...
//! ```
//!
//! Each incoming step is moved past every `over` step in order. The `over`
//! steps are in turn moved past that incoming step, so the next incoming step
//! (which was authored after the previous one) is rebased against a history
//! expressed relative to its own base.

use crate::{Step, StepError};

/// Rebase `incoming` so it applies after `over`.
pub fn rebase_steps<S: Step>(incoming: &[S], over: &[S]) -> Result<Vec<S>, StepError> {
    let mut history: Vec<S> = over.to_vec();
    let mut rebased = Vec::with_capacity(incoming.len());

    for step in incoming {
        let mut current = step.clone();
        let mut next_history = Vec::with_capacity(history.len());

        for applied in &history {
            let moved = current.rebase(applied)?;
            next_history.push(applied.rebase(&current)?);
            current = moved;
        }

        history = next_history;
        rebased.push(current);
    }

    Ok(rebased)
}

/// Apply steps in order, leaving the document untouched if any step fails.
pub fn apply_all<S: Step>(doc: &mut S::Doc, steps: &[S]) -> Result<(), StepError> {
    let mut scratch = doc.clone();
    for step in steps {
        step.apply(&mut scratch)?;
    }
    *doc = scratch;
    Ok(())
}
