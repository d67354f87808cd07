//! Tensor values exchanged with the replay service.
//!
//! The writer treats tensors as opaque dense values with a dtype and a shape.
//! [`Tensor`] wraps [`ndarray::ArrayD`] for the supported element types and
//! provides the two operations chunking needs: stacking cells along a new
//! leading batch axis and extracting a single cell back out of a batch.
use crate::error::RelayError;
use anyhow::Result;
use ndarray::{ArrayD, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of a [`Tensor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dtype {
    /// 32 bit signed integer.
    I32,
    /// 64 bit signed integer.
    I64,
    /// 32 bit float.
    F32,
    /// 64 bit float.
    F64,
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dtype::I32 => "int32",
            Dtype::I64 => "int64",
            Dtype::F32 => "float",
            Dtype::F64 => "double",
        };
        write!(f, "{}", name)
    }
}

/// A dense multi dimensional value of one of the supported element types.
#[derive(Clone, Debug, PartialEq)]
pub enum Tensor {
    /// 32 bit signed integer data.
    I32(ArrayD<i32>),
    /// 64 bit signed integer data.
    I64(ArrayD<i64>),
    /// 32 bit float data.
    F32(ArrayD<f32>),
    /// 64 bit float data.
    F64(ArrayD<f64>),
}

impl Tensor {
    /// Element type of the value.
    pub fn dtype(&self) -> Dtype {
        match self {
            Tensor::I32(_) => Dtype::I32,
            Tensor::I64(_) => Dtype::I64,
            Tensor::F32(_) => Dtype::F32,
            Tensor::F64(_) => Dtype::F64,
        }
    }

    /// Shape of the value.
    pub fn shape(&self) -> &[usize] {
        match self {
            Tensor::I32(a) => a.shape(),
            Tensor::I64(a) => a.shape(),
            Tensor::F32(a) => a.shape(),
            Tensor::F64(a) => a.shape(),
        }
    }

    /// Stacks values along a new leading axis.
    ///
    /// All values must share dtype and shape; the result has shape
    /// `[values.len(), ..shape]`.
    pub fn stack(values: &[Tensor]) -> Result<Tensor> {
        fn views<'a, T>(
            values: &'a [Tensor],
            as_array: impl Fn(&'a Tensor) -> Option<&'a ArrayD<T>>,
        ) -> Result<Vec<ndarray::ArrayViewD<'a, T>>> {
            values
                .iter()
                .map(|v| {
                    as_array(v).map(|a| a.view()).ok_or_else(|| {
                        RelayError::InvalidArgument(
                            "cannot stack tensors with different dtypes.".to_string(),
                        )
                        .into()
                    })
                })
                .collect()
        }

        let first = values.first().ok_or_else(|| {
            RelayError::InvalidArgument("cannot stack an empty sequence of tensors.".to_string())
        })?;
        let stacked = match first {
            Tensor::I32(_) => Tensor::I32(ndarray::stack(
                Axis(0),
                &views(values, |v| match v {
                    Tensor::I32(a) => Some(a),
                    _ => None,
                })?,
            )?),
            Tensor::I64(_) => Tensor::I64(ndarray::stack(
                Axis(0),
                &views(values, |v| match v {
                    Tensor::I64(a) => Some(a),
                    _ => None,
                })?,
            )?),
            Tensor::F32(_) => Tensor::F32(ndarray::stack(
                Axis(0),
                &views(values, |v| match v {
                    Tensor::F32(a) => Some(a),
                    _ => None,
                })?,
            )?),
            Tensor::F64(_) => Tensor::F64(ndarray::stack(
                Axis(0),
                &views(values, |v| match v {
                    Tensor::F64(a) => Some(a),
                    _ => None,
                })?,
            )?),
        };
        Ok(stacked)
    }

    /// Extracts the `index`-th sub tensor along the leading axis.
    pub fn row(&self, index: usize) -> Tensor {
        match self {
            Tensor::I32(a) => Tensor::I32(a.index_axis(Axis(0), index).to_owned()),
            Tensor::I64(a) => Tensor::I64(a.index_axis(Axis(0), index).to_owned()),
            Tensor::F32(a) => Tensor::F32(a.index_axis(Axis(0), index).to_owned()),
            Tensor::F64(a) => Tensor::F64(a.index_axis(Axis(0), index).to_owned()),
        }
    }
}

impl From<ArrayD<i32>> for Tensor {
    fn from(a: ArrayD<i32>) -> Self {
        Tensor::I32(a)
    }
}

impl From<ArrayD<i64>> for Tensor {
    fn from(a: ArrayD<i64>) -> Self {
        Tensor::I64(a)
    }
}

impl From<ArrayD<f32>> for Tensor {
    fn from(a: ArrayD<f32>) -> Self {
        Tensor::F32(a)
    }
}

impl From<ArrayD<f64>> for Tensor {
    fn from(a: ArrayD<f64>) -> Self {
        Tensor::F64(a)
    }
}

/// Expected dtype and per cell shape of one column.
///
/// The name is advisory; the writer uses the column index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSpec {
    /// Column name.
    pub name: String,
    /// Element type of every cell in the column.
    pub dtype: Dtype,
    /// Shape of a single cell, without the batch axis.
    pub shape: Vec<usize>,
}

impl TensorSpec {
    /// Builds the spec matched by `value`.
    pub fn of_value(name: impl Into<String>, value: &Tensor) -> Self {
        Self {
            name: name.into(),
            dtype: value.dtype(),
            shape: value.shape().to_vec(),
        }
    }

    /// Checks that `value` conforms to the spec.
    pub fn validate(&self, value: &Tensor) -> Result<()> {
        if value.dtype() != self.dtype {
            return Err(RelayError::InvalidArgument(format!(
                "Tensor of wrong dtype provided for column {}. Got {} but expected {}.",
                self.name,
                value.dtype(),
                self.dtype
            ))
            .into());
        }
        if value.shape() != self.shape.as_slice() {
            return Err(RelayError::InvalidArgument(format!(
                "Tensor of incompatible shape provided for column {}. Got {:?} which is incompatible with {:?}.",
                self.name,
                value.shape(),
                self.shape
            ))
            .into());
        }
        Ok(())
    }
}
