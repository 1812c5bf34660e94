//! Value storage and shape/type coercion for a single quantity.
//!
//! Every quantity holds `f64` data; scalars are 0-dimensional arrays so the
//! rest of the crate can treat all dimensionalities uniformly.

use ndarray::{Array2, ArrayD, IxDyn};

use crate::errors::{SequenceError, SequenceResult};

/// The float type used for all sequence values.
pub type FloatValue = f64;

/// Marker for values that have not been provided (yet).
pub const MISSING: FloatValue = f64::NAN;

/// Flexible input accepted by value setters before coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueInput {
    Scalar(FloatValue),
    Vector(Vec<FloatValue>),
    Matrix(Vec<Vec<FloatValue>>),
    Array(ArrayD<FloatValue>),
}

impl From<FloatValue> for ValueInput {
    fn from(value: FloatValue) -> Self {
        ValueInput::Scalar(value)
    }
}

impl From<i32> for ValueInput {
    fn from(value: i32) -> Self {
        ValueInput::Scalar(value as FloatValue)
    }
}

impl From<Vec<FloatValue>> for ValueInput {
    fn from(values: Vec<FloatValue>) -> Self {
        ValueInput::Vector(values)
    }
}

impl From<&[FloatValue]> for ValueInput {
    fn from(values: &[FloatValue]) -> Self {
        ValueInput::Vector(values.to_vec())
    }
}

impl From<Vec<Vec<FloatValue>>> for ValueInput {
    fn from(values: Vec<Vec<FloatValue>>) -> Self {
        ValueInput::Matrix(values)
    }
}

impl From<ArrayD<FloatValue>> for ValueInput {
    fn from(values: ArrayD<FloatValue>) -> Self {
        ValueInput::Array(values)
    }
}

impl ValueInput {
    fn describe(&self) -> &'static str {
        match self {
            ValueInput::Scalar(_) => "scalar",
            ValueInput::Vector(_) => "vector",
            ValueInput::Matrix(_) => "matrix",
            ValueInput::Array(_) => "array",
        }
    }

    fn to_array(&self, name: &str) -> SequenceResult<ArrayD<FloatValue>> {
        match self {
            ValueInput::Scalar(v) => Ok(ArrayD::from_elem(IxDyn(&[]), *v)),
            ValueInput::Vector(v) => Ok(ArrayD::from_shape_vec(IxDyn(&[v.len()]), v.clone())
                .expect("vector shape is consistent by construction")),
            ValueInput::Matrix(rows) => {
                let ncols = rows.first().map_or(0, Vec::len);
                if rows.iter().any(|row| row.len() != ncols) {
                    return Err(SequenceError::TypeConversion {
                        name: name.to_string(),
                        found: self.describe(),
                        reason: "rows have differing lengths".to_string(),
                    });
                }
                let flat: Vec<FloatValue> = rows.iter().flatten().copied().collect();
                let matrix = Array2::from_shape_vec((rows.len(), ncols), flat)
                    .expect("matrix shape is consistent after the row check");
                Ok(matrix.into_dyn())
            }
            ValueInput::Array(a) => Ok(a.clone()),
        }
    }
}

/// Coerce flexible input to an array of exactly the given shape.
///
/// Scalar targets accept a bare number or any single-element container;
/// anything else fails with [`SequenceError::AmbiguousValue`]. Array targets
/// broadcast the input to the declared shape where possible and fail with
/// [`SequenceError::ShapeMismatch`] otherwise.
pub fn coerce(
    name: &str,
    input: &ValueInput,
    shape: &[usize],
) -> SequenceResult<ArrayD<FloatValue>> {
    let array = input.to_array(name)?;
    if shape.is_empty() {
        return match array.len() {
            1 => {
                let value = *array.iter().next().expect("single-element array");
                Ok(ArrayD::from_elem(IxDyn(&[]), value))
            }
            got => Err(SequenceError::AmbiguousValue {
                name: name.to_string(),
                got,
            }),
        };
    }
    match array.broadcast(IxDyn(shape)) {
        Some(view) => Ok(view.to_owned()),
        None => Err(SequenceError::ShapeMismatch {
            name: name.to_string(),
            expected: shape.to_vec(),
            got: array.shape().to_vec(),
        }),
    }
}

/// Storage for a single quantity's current value.
#[derive(Debug, Clone)]
pub struct ValueCell {
    data: ArrayD<FloatValue>,
    initialized: bool,
}

impl ValueCell {
    pub fn new(shape: &[usize], fill: FloatValue) -> Self {
        Self {
            data: ArrayD::from_elem(IxDyn(shape), fill),
            initialized: false,
        }
    }

    /// The stored value; fails until the first assignment.
    pub fn get(&self, name: &str) -> SequenceResult<&ArrayD<FloatValue>> {
        if self.initialized {
            Ok(&self.data)
        } else {
            Err(SequenceError::UninitializedValue(name.to_string()))
        }
    }

    pub fn set(&mut self, name: &str, input: &ValueInput) -> SequenceResult<()> {
        self.data = coerce(name, input, self.data.shape())?;
        self.initialized = true;
        Ok(())
    }

    /// The convenience accessor for scalar cells.
    pub fn scalar(&self, name: &str) -> SequenceResult<FloatValue> {
        let data = self.get(name)?;
        Ok(data[IxDyn(&[])])
    }

    /// Direct access for the per-step loop; skips the initialization check.
    pub fn raw(&self) -> &ArrayD<FloatValue> {
        &self.data
    }

    pub fn raw_mut(&mut self) -> &mut ArrayD<FloatValue> {
        self.initialized = true;
        &mut self.data
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Reallocate to a new shape, discarding the stored value.
    pub fn reshape(&mut self, shape: &[usize], fill: FloatValue) {
        self.data = ArrayD::from_elem(IxDyn(shape), fill);
        self.initialized = false;
    }
}
