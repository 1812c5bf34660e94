pub mod checkpoint;
pub mod condition;
pub mod container;
pub mod fastaccess;
pub mod group;
pub mod manager;
pub mod options;
pub mod sequence;
pub mod series;
pub mod timegrid;
pub mod value;

pub mod errors;

pub use container::{Conditions, SequenceContainer};
pub use errors::{SequenceError, SequenceResult};
pub use group::{SequenceView, SubSequenceGroup};
pub use sequence::{Aggregation, SequenceDef, SequenceKind};
