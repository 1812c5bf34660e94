//! Condition handling: the checkpointable memory of a model.
//!
//! States and logs together form the condition memory. Assigning a condition
//! goes through [`SequenceView::apply`], which coerces the input, trims it to
//! the declared span, remembers the original input for later resets, and for
//! states initialises the old buffer from the new value.

use log::warn;
use ndarray::ArrayD;

use crate::errors::{SequenceError, SequenceResult};
use crate::group::SequenceView;
use crate::value::{FloatValue, ValueInput};

impl SequenceView<'_> {
    /// Assign a condition value and run the full lifecycle.
    pub fn apply(&mut self, input: impl Into<ValueInput>) -> SequenceResult<()> {
        let input = input.into();
        self.set_value(input.clone())?;
        self.trim();
        self.seq.remembered = Some(input);
        if self.seq.kind.has_old_new() {
            self.new2old();
        }
        Ok(())
    }

    /// Clamp the current value to the declared span, warning on each clip.
    pub fn trim(&mut self) {
        let (lower, upper) = self.seq.span;
        if lower.is_none() && upper.is_none() {
            return;
        }
        let name = self.full_name();
        let mut clipped = false;
        for value in self.slot.value.raw_mut().iter_mut() {
            if let Some(lower) = lower {
                if *value < lower {
                    *value = lower;
                    clipped = true;
                }
            }
            if let Some(upper) = upper {
                if *value > upper {
                    *value = upper;
                    clipped = true;
                }
            }
        }
        if clipped {
            warn!("trimmed the value of sequence `{name}` to its declared span");
        }
    }

    /// Re-apply the last remembered assignment.
    pub fn reset(&mut self) -> SequenceResult<()> {
        match self.seq.remembered.clone() {
            Some(input) => self.apply(input),
            None => Ok(()),
        }
    }

    /// Copy the new value into the old buffer; states only.
    pub fn new2old(&mut self) {
        if let Some(old) = self.seq.old.as_mut() {
            old.assign(self.slot.value.raw());
        }
    }

    /// The previous-step value; states only.
    pub fn old(&self) -> SequenceResult<&ArrayD<FloatValue>> {
        self.seq
            .old
            .as_ref()
            .ok_or_else(|| SequenceError::NoOldBuffer(self.full_name()))
    }
}
