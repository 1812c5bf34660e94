use thiserror::Error;

fn plural(count: &usize) -> &'static str {
    if *count == 1 {
        ""
    } else {
        "s"
    }
}

/// Error type for invalid sequence operations.
///
/// Setup errors (storage not activated, unknown shape, missing device name)
/// and validation errors are fatal and never retried. Data-quality errors are
/// fatal unless the sequence kind defines tolerant behaviour, in which case
/// the caller downgrades them to warnings.
#[derive(Error, Debug)]
pub enum SequenceError {
    #[error("sequence `{0}` has never been assigned a value")]
    UninitializedValue(String),
    #[error("cannot assign {got} value(s) to the scalar sequence `{name}`")]
    AmbiguousValue { name: String, got: usize },
    #[error("cannot broadcast values of shape {got:?} to sequence `{name}` with shape {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("sequence `{name}` requires a shape of {ndim} dimension(s), got {got:?}")]
    DimensionMismatch {
        name: String,
        ndim: usize,
        got: Vec<usize>,
    },
    #[error("cannot convert the given {found} to values for sequence `{name}`: {reason}")]
    TypeConversion {
        name: String,
        found: &'static str,
        reason: String,
    },
    #[error("the shape of sequence `{0}` has not been set")]
    ShapeNotSet(String),
    #[error("sequence `{0}` has neither RAM nor disk storage activated")]
    StorageNotActive(String),
    #[error("sequence `{0}` does not carry an old/new double buffer")]
    NoOldBuffer(String),
    #[error(
        "the series of sequence `{name}` contains {count} missing value{}",
        plural(.count)
    )]
    IncompleteSeries { name: String, count: usize },
    #[error(
        "the step size of the external data of sequence `{name}` ({external}) \
         differs from the simulation step size ({simulation})"
    )]
    StepSizeMismatch {
        name: String,
        simulation: f64,
        external: f64,
    },
    #[error(
        "the external data of sequence `{name}` covers [{external_start}, {external_end}) \
         but the simulation period is [{start}, {end})"
    )]
    InsufficientCoverage {
        name: String,
        start: f64,
        end: f64,
        external_start: f64,
        external_end: f64,
    },
    #[error("unknown aggregation mode `{0}` (expected `none` or `mean`)")]
    UnknownAggregationMode(String),
    #[error("no sequence named `{name}` in group `{group}`")]
    UnknownSequence { name: String, group: String },
    #[error("this container has no group of kind `{0}`")]
    UnknownGroup(String),
    #[error("a sequence named `{0}` already exists in this group")]
    DuplicateSequence(String),
    #[error(
        "no device name is available to derive a default condition file name; \
         pass an explicit file name instead"
    )]
    DeviceNameUnknown,
    #[error("invalid time grid: {0}")]
    InvalidTimegrid(String),
    #[error(
        "series file `{path}` holds {got} bytes but {expected} were expected \
         from the sequence declaration"
    )]
    CorruptSeriesFile {
        path: String,
        expected: usize,
        got: usize,
    },
    #[error("cannot parse condition file `{path}`: {message}")]
    CheckpointParse { path: String, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience type for `Result<T, SequenceError>`.
pub type SequenceResult<T> = Result<T, SequenceError>;
