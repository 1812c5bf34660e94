//! The TOML payload of condition files.
//!
//! A condition file is declarative data: an `[info]` preamble naming the
//! model type and the control file it belongs to, followed by one table per
//! condition group with one key per sequence. Values are plain TOML numbers
//! and (nested) arrays, decoded back through the ordinary setters.

use std::collections::BTreeMap;
use std::path::Path;

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::errors::{SequenceError, SequenceResult};
use crate::value::{FloatValue, ValueInput};

/// One serialised condition value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Scalar(FloatValue),
    Vector(Vec<FloatValue>),
    Matrix(Vec<Vec<FloatValue>>),
}

impl ConditionValue {
    pub fn from_array(array: &ArrayD<FloatValue>) -> Self {
        match array.ndim() {
            0 => ConditionValue::Scalar(array[ndarray::IxDyn(&[])]),
            1 => ConditionValue::Vector(array.iter().copied().collect()),
            _ => {
                let ncols = array.shape()[1];
                let rows = array
                    .iter()
                    .copied()
                    .collect::<Vec<_>>()
                    .chunks(ncols.max(1))
                    .map(<[FloatValue]>::to_vec)
                    .collect();
                ConditionValue::Matrix(rows)
            }
        }
    }

    pub fn to_input(&self) -> ValueInput {
        match self {
            ConditionValue::Scalar(value) => ValueInput::Scalar(*value),
            ConditionValue::Vector(values) => ValueInput::Vector(values.clone()),
            ConditionValue::Matrix(rows) => ValueInput::Matrix(rows.clone()),
        }
    }
}

/// The `[info]` preamble of a condition file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointInfo {
    /// The model type the conditions belong to.
    pub model: String,
    /// The control file the parameter values were taken from.
    pub control: String,
}

/// A complete condition file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub info: CheckpointInfo,
    /// Conditions per group name, per sequence name.
    pub conditions: BTreeMap<String, BTreeMap<String, ConditionValue>>,
}

impl Checkpoint {
    pub fn write(&self, path: &Path) -> SequenceResult<()> {
        let text = toml::to_string(self).map_err(|error| SequenceError::CheckpointParse {
            path: path.display().to_string(),
            message: error.to_string(),
        })?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn read(path: &Path) -> SequenceResult<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|error| SequenceError::CheckpointParse {
            path: path.display().to_string(),
            message: error.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn example() -> Checkpoint {
        let mut states = BTreeMap::new();
        states.insert("sm".to_string(), ConditionValue::Vector(vec![99.3, 96.1]));
        states.insert("ic".to_string(), ConditionValue::Scalar(0.96));
        let mut logs = BTreeMap::new();
        logs.insert(
            "wet".to_string(),
            ConditionValue::Matrix(vec![vec![0.1, 0.2], vec![0.3, 0.4]]),
        );
        let mut conditions = BTreeMap::new();
        conditions.insert("states".to_string(), states);
        conditions.insert("logs".to_string(), logs);
        Checkpoint {
            info: CheckpointInfo {
                model: "lland_v1".to_string(),
                control: "dill.toml".to_string(),
            },
            conditions,
        }
    }

    #[test]
    fn toml_round_trip() {
        let checkpoint = example();
        let text = toml::to_string(&checkpoint).unwrap();
        let parsed: Checkpoint = toml::from_str(&text).unwrap();
        assert_eq!(parsed, checkpoint);
    }

    #[test]
    fn array_conversion_per_dimensionality() {
        let scalar = ArrayD::from_elem(ndarray::IxDyn(&[]), 0.5);
        assert_eq!(
            ConditionValue::from_array(&scalar),
            ConditionValue::Scalar(0.5)
        );
        let vector = array![1.0, 2.0].into_dyn();
        assert_eq!(
            ConditionValue::from_array(&vector),
            ConditionValue::Vector(vec![1.0, 2.0])
        );
        let matrix = array![[1.0, 2.0], [3.0, 4.0]].into_dyn();
        assert_eq!(
            ConditionValue::from_array(&matrix),
            ConditionValue::Matrix(vec![vec![1.0, 2.0], vec![3.0, 4.0]])
        );
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dill.toml");
        let checkpoint = example();
        checkpoint.write(&path).unwrap();
        assert_eq!(Checkpoint::read(&path).unwrap(), checkpoint);
    }

    #[test]
    fn parse_errors_carry_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "info = 3").unwrap();
        let err = Checkpoint::read(&path).unwrap_err();
        match err {
            SequenceError::CheckpointParse { path: p, .. } => {
                assert!(p.ends_with("broken.toml"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
