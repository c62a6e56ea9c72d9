//! Runtime-side types used when re-inferring shapes during execution.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::abstract_value::{AbstractKind, AbstractValue};
use crate::error::InferError;
use crate::types::DType;
use crate::value::{TensorData, TensorElems};

/// Output buffer of an executed node, or an explicit input buffer passed to
/// a kernel launch.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceBuffer {
    dtype: DType,
    shape: Vec<i64>,
    /// Contents as visible to the host, or `None` if the buffer has no valid
    /// device address.
    data: Option<TensorElems>,
}

impl DeviceBuffer {
    pub fn new(dtype: DType, shape: Vec<i64>, data: TensorElems) -> DeviceBuffer {
        DeviceBuffer {
            dtype,
            shape,
            data: Some(data),
        }
    }

    /// Create a buffer with no backing memory.
    pub fn invalid(dtype: DType, shape: Vec<i64>) -> DeviceBuffer {
        DeviceBuffer {
            dtype,
            shape,
            data: None,
        }
    }

    pub fn from_tensor(tensor: &TensorData) -> DeviceBuffer {
        DeviceBuffer {
            dtype: tensor.dtype(),
            shape: tensor.shape().iter().map(|&d| d as i64).collect(),
            data: Some(tensor.elems().clone()),
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    pub fn is_valid(&self) -> bool {
        self.data.is_some()
    }

    /// Copy the buffer to the host as a tensor with the given type and
    /// shape.
    ///
    /// The buffer must hold exactly the elements of such a tensor. It is
    /// never reinterpreted as another type.
    pub fn sync(&self, dtype: DType, shape: &[usize]) -> Result<TensorData, InferError> {
        let Some(data) = &self.data else {
            return Err(InferError::runtime(
                "Cannot sync a device buffer which has no device address.",
            ));
        };
        if dtype != self.dtype {
            return Err(InferError::runtime(format!(
                "Cannot sync a device buffer of type {} into a tensor of type {}.",
                self.dtype, dtype
            )));
        }
        TensorData::try_new(dtype, shape.to_vec(), data.clone()).ok_or_else(|| {
            InferError::runtime(format!(
                "Device buffer with {} elements does not match tensor shape {:?}.",
                data.len(),
                shape
            ))
        })
    }
}

/// Materialized values of the value-dependent operands of a node, by operand
/// index. Operands which carry no data (eg. empty sequences) are absent.
pub type DependTensorMap = FxHashMap<usize, Arc<TensorData>>;

/// Shapes and dependency data passed to a kernel before launch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KernelArgs {
    pub inputs: Vec<AbstractValue>,
    pub outputs: Vec<AbstractValue>,
    pub depend_tensors: DependTensorMap,
}

/// Kind of device a kernel runs on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum KernelModKind {
    Cpu,
    Gpu,
}

/// A compiled kernel whose workspace depends on operand shapes.
#[derive(Clone, Debug)]
pub struct KernelMod {
    kind: KernelModKind,
    inputs: Vec<AbstractValue>,
    output_sizes: Vec<usize>,
}

impl KernelMod {
    pub fn new(kind: KernelModKind) -> KernelMod {
        KernelMod {
            kind,
            inputs: Vec::new(),
            output_sizes: Vec::new(),
        }
    }

    pub fn kind(&self) -> KernelModKind {
        self.kind
    }

    /// Operand descriptions the kernel was last resized for.
    pub fn inputs(&self) -> &[AbstractValue] {
        &self.inputs
    }

    /// Output buffer sizes in bytes.
    pub fn output_sizes(&self) -> &[usize] {
        &self.output_sizes
    }

    /// Recompute workspace sizes for new operand shapes.
    ///
    /// Value-dependent inputs are taken from the dependency map. CPU kernels
    /// read the materialized value through the input's abstract value, so it
    /// replaces the input there.
    pub fn resize(&mut self, args: &KernelArgs) -> Result<(), InferError> {
        let mut inputs = args.inputs.clone();
        for (&index, tensor) in &args.depend_tensors {
            let Some(input) = inputs.get_mut(index) else {
                return Err(InferError::runtime(format!(
                    "Dependency tensor for input {} but kernel has {} inputs.",
                    index,
                    args.inputs.len()
                )));
            };
            if self.kind == KernelModKind::Cpu {
                *input = AbstractValue::from_tensor(tensor);
            }
        }

        let output_sizes = args
            .outputs
            .iter()
            .map(output_size)
            .collect::<Result<Vec<_>, _>>()?;

        self.inputs = inputs;
        self.output_sizes = output_sizes;
        Ok(())
    }
}

fn dtype_size(dtype: DType) -> usize {
    match dtype {
        DType::Bool | DType::Int8 | DType::UInt8 => 1,
        DType::Int16 | DType::Float16 => 2,
        DType::Int32 | DType::Float32 => 4,
        DType::Int64 | DType::Float64 => 8,
    }
}

/// Size in bytes of the buffer holding an output.
fn output_size(output: &AbstractValue) -> Result<usize, InferError> {
    match output.kind() {
        AbstractKind::Tensor(t) => t
            .shape
            .num_elements()
            .map(|n| n * dtype_size(t.dtype))
            .ok_or_else(|| {
                InferError::runtime(format!(
                    "Cannot allocate output with unresolved shape {:?}.",
                    t.shape
                ))
            }),
        AbstractKind::Scalar { ty, .. } => Ok(ty.dtype().map(dtype_size).unwrap_or(0)),
        _ => Ok(0),
    }
}
