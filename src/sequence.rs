//! Sequence kinds and per-sequence metadata.
//!
//! A sequence is a named, time-varying quantity belonging to a simulation
//! component. Capabilities (time-series I/O, old/new buffering, bounds
//! trimming) differ per kind; they are expressed as predicates on the tagged
//! [`SequenceKind`] variant rather than through run-time downcasting.

use std::str::FromStr;

use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

use crate::errors::{SequenceError, SequenceResult};
use crate::value::{FloatValue, ValueInput};

/// Number of stage slots carried by the integration buffers of sequences
/// flagged for the numeric solver.
pub const SOLVER_STAGES: usize = 10;

/// The kind of a sequence, determining which capabilities it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SequenceKind {
    /// Externally supplied forcing data.
    Input,
    /// Fluxes computed by the model equations.
    Flux,
    /// Model states carrying an old/new double buffer.
    State,
    /// Logged values that are part of the checkpointable memory.
    Log,
    /// Temporary helper quantities, never persisted.
    Aide,
    /// Values received from upstream link connections.
    Inlet,
    /// Values passed to downstream link connections.
    Outlet,
    /// Simulated values exchanged at a network node.
    NodeSim,
    /// Observed values read at a network node.
    NodeObs,
}

impl SequenceKind {
    /// Whether sequences of this kind can hold a time series.
    pub fn has_series(&self) -> bool {
        matches!(
            self,
            SequenceKind::Input
                | SequenceKind::Flux
                | SequenceKind::State
                | SequenceKind::Log
                | SequenceKind::NodeSim
                | SequenceKind::NodeObs
        )
    }

    /// Whether sequences of this kind belong to the checkpointable memory.
    pub fn is_condition(&self) -> bool {
        matches!(self, SequenceKind::State | SequenceKind::Log)
    }

    /// Whether sequences of this kind carry the old/new double buffer.
    pub fn has_old_new(&self) -> bool {
        matches!(self, SequenceKind::State)
    }

    /// Whether external-load failures are downgraded instead of propagated.
    pub fn is_tolerant(&self) -> bool {
        matches!(self, SequenceKind::NodeSim | SequenceKind::NodeObs)
    }

    /// The group name used in file names, checkpoints and error messages.
    pub fn group_name(&self) -> &'static str {
        match self {
            SequenceKind::Input => "inputs",
            SequenceKind::Flux => "fluxes",
            SequenceKind::State => "states",
            SequenceKind::Log => "logs",
            SequenceKind::Aide => "aides",
            SequenceKind::Inlet => "inlets",
            SequenceKind::Outlet => "outlets",
            SequenceKind::NodeSim => "sim",
            SequenceKind::NodeObs => "obs",
        }
    }
}

/// How a multi-dimensional series is reduced when a single representative
/// value per step is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Hand out the raw series.
    #[default]
    None,
    /// Weighted averaging across all non-time axes.
    Mean,
}

impl FromStr for Aggregation {
    type Err = SequenceError;

    fn from_str(mode: &str) -> SequenceResult<Self> {
        match mode {
            "none" => Ok(Aggregation::None),
            "mean" => Ok(Aggregation::Mean),
            other => Err(SequenceError::UnknownAggregationMode(other.to_string())),
        }
    }
}

/// Declaration of a single sequence.
#[derive(Debug, Clone)]
pub struct SequenceDef {
    pub name: String,
    /// 0 = scalar, 1 = per-unit vector, 2 = matrix.
    pub ndim: usize,
    /// Declared value range used by `trim`.
    pub span: (Option<FloatValue>, Option<FloatValue>),
    /// Whether the numeric solver needs integration buffers for this sequence.
    pub numeric: bool,
    /// Fill value used when (re)allocating storage.
    pub initial: FloatValue,
    pub aggregation: Aggregation,
    /// Shape to apply at build time; required later via `set_shape` otherwise.
    pub shape: Option<Vec<usize>>,
}

impl SequenceDef {
    pub fn new(name: impl Into<String>, ndim: usize) -> Self {
        Self {
            name: name.into(),
            ndim,
            span: (None, None),
            numeric: false,
            initial: 0.0,
            aggregation: Aggregation::None,
            shape: None,
        }
    }

    pub fn with_span(mut self, lower: Option<FloatValue>, upper: Option<FloatValue>) -> Self {
        self.span = (lower, upper);
        self
    }

    pub fn numeric(mut self) -> Self {
        self.numeric = true;
        self
    }

    pub fn with_initial(mut self, initial: FloatValue) -> Self {
        self.initial = initial;
        self
    }

    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn with_shape(mut self, shape: Vec<usize>) -> Self {
        self.shape = Some(shape);
        self
    }
}

/// Integration buffers used by the numeric solver.
///
/// `points`, `results` and `integrals` carry one extra leading stage axis;
/// `results_sum` has the plain sequence shape.
#[derive(Debug, Clone)]
pub struct NumericBuffers {
    pub points: ArrayD<FloatValue>,
    pub results: ArrayD<FloatValue>,
    pub integrals: ArrayD<FloatValue>,
    pub results_sum: ArrayD<FloatValue>,
}

impl NumericBuffers {
    pub fn new(shape: &[usize]) -> Self {
        let mut staged = Vec::with_capacity(shape.len() + 1);
        staged.push(SOLVER_STAGES);
        staged.extend_from_slice(shape);
        Self {
            points: ArrayD::zeros(IxDyn(&staged)),
            results: ArrayD::zeros(IxDyn(&staged)),
            integrals: ArrayD::zeros(IxDyn(&staged)),
            results_sum: ArrayD::zeros(IxDyn(shape)),
        }
    }
}

/// Metadata of a single sequence.
///
/// The current value, the series storage and the file handle live in the
/// group's `FastAccess` slot; this struct owns everything that is not touched
/// by the per-step loop.
#[derive(Debug, Clone)]
pub struct Sequence {
    pub(crate) name: String,
    pub(crate) kind: SequenceKind,
    pub(crate) ndim: usize,
    pub(crate) span: (Option<FloatValue>, Option<FloatValue>),
    pub(crate) numeric: bool,
    pub(crate) initial: FloatValue,
    pub(crate) aggregation: Aggregation,
    /// Previous-step value; states only.
    pub(crate) old: Option<ArrayD<FloatValue>>,
    /// Last call-style assignment, remembered for `reset`.
    pub(crate) remembered: Option<ValueInput>,
    pub(crate) buffers: Option<NumericBuffers>,
}

impl Sequence {
    pub(crate) fn from_def(kind: SequenceKind, def: &SequenceDef, shape: &[usize]) -> Self {
        Self {
            name: def.name.clone(),
            kind,
            ndim: def.ndim,
            span: def.span,
            numeric: def.numeric,
            initial: def.initial,
            aggregation: def.aggregation,
            old: kind
                .has_old_new()
                .then(|| ArrayD::from_elem(IxDyn(shape), def.initial)),
            remembered: None,
            buffers: def.numeric.then(|| NumericBuffers::new(shape)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SequenceKind {
        self.kind
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }

    pub fn span(&self) -> (Option<FloatValue>, Option<FloatValue>) {
        self.span
    }

    pub fn is_numeric(&self) -> bool {
        self.numeric
    }

    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }
}
