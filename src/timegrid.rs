//! The uniform time grid the simulation driver runs on.
//!
//! Time points are plain `f64` values in caller-defined units (days since an
//! epoch, years, ...). The grid is half-open: `start` is the first simulated
//! point, `end` is excluded.

use is_close::is_close;
use serde::{Deserialize, Serialize};

use crate::errors::{SequenceError, SequenceResult};

/// A uniform, half-open simulation period `[start, end)` with step size `step`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timegrid {
    start: f64,
    end: f64,
    step: f64,
}

impl Timegrid {
    /// Create a new time grid.
    ///
    /// Fails if the step size is not positive, the period is empty, or the
    /// period is not a whole number of steps.
    pub fn new(start: f64, end: f64, step: f64) -> SequenceResult<Self> {
        if !(step > 0.0) {
            return Err(SequenceError::InvalidTimegrid(format!(
                "step size must be positive, got {step}"
            )));
        }
        if end <= start {
            return Err(SequenceError::InvalidTimegrid(format!(
                "end ({end}) must lie after start ({start})"
            )));
        }
        let steps = (end - start) / step;
        if !is_close!(steps, steps.round()) {
            return Err(SequenceError::InvalidTimegrid(format!(
                "the period [{start}, {end}) is not a whole number of steps of size {step}"
            )));
        }
        Ok(Self { start, end, step })
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    /// Number of simulation steps.
    pub fn len(&self) -> usize {
        ((self.end - self.start) / self.step).round() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether both grids share the same step size (within float tolerance).
    pub fn step_matches(&self, other: &Timegrid) -> bool {
        is_close!(self.step, other.step)
    }

    /// Signed number of steps from this grid's start to the given time point.
    ///
    /// Negative when the point lies before the grid.
    pub fn offset_of(&self, time: f64) -> i64 {
        ((time - self.start) / self.step).round() as i64
    }

    /// Whether the other grid fully covers this one.
    pub fn covered_by(&self, other: &Timegrid) -> bool {
        let tol = self.step * 1e-6;
        other.start - self.start <= tol && self.end - other.end <= tol
    }
}
