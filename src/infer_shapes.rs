//! Traits for compiled-in inference and common implementations.
//!
//! Formulas receive the operand abstract values of a call and produce the
//! output abstract value. This module provides the formulas shared by many
//! primitives, such as element-wise unary and binary ops and reductions.

use std::error::Error;
use std::fmt;

use smallvec::SmallVec;

use crate::abstract_value::{AbstractKind, AbstractValue};
use crate::primitive::Primitive;
use crate::types::{DType, Dim, Shape, Type};
use crate::value::{F64, TensorData, TensorElems, Value};

#[derive(Clone, Debug, PartialEq)]
pub enum InferShapesError {
    /// Too many or too few inputs were provided for this primitive.
    IncorrectInputCount,

    /// The input shapes are incompatible.
    ///
    /// Execution will fail if given inputs with these shapes.
    IncompatibleShapes,

    /// An input's rank does not match that expected by the primitive.
    IncorrectRank,

    /// An input or attribute has an invalid value.
    InvalidValue(String),

    /// A constant index is outside the bounds of the indexed value.
    IndexOutOfRange,

    /// An input has a type that the primitive does not support.
    UnsupportedType(Type),

    /// The number of outputs could not be determined.
    UnknownOutputCount,
}

impl fmt::Display for InferShapesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IncorrectInputCount => write!(f, "incorrect number of inputs"),
            Self::IncompatibleShapes => write!(f, "input shapes are incompatible"),
            Self::IncorrectRank => write!(f, "input has incorrect rank"),
            Self::InvalidValue(msg) => write!(f, "invalid value: {}", msg),
            Self::IndexOutOfRange => write!(f, "index out of range"),
            Self::UnsupportedType(ty) => write!(f, "unsupported input type {}", ty),
            Self::UnknownOutputCount => write!(f, "number of outputs is unknown"),
        }
    }
}

impl Error for InferShapesError {}

/// Infer the output of a primitive given its operands.
pub trait InferShapes: Send + Sync {
    /// Infer the type, shape and, where possible, value of the output.
    fn infer_shapes(
        &self,
        prim: &Primitive,
        inputs: &[AbstractValue],
    ) -> Result<AbstractValue, InferShapesError>;

    /// Compute the output from constant inputs.
    ///
    /// This is only called when every input has a known value. Returning
    /// `None` declines, in which case [`infer_shapes`](InferShapes::infer_shapes)
    /// is used instead.
    fn infer_value(&self, _prim: &Primitive, _inputs: &[AbstractValue]) -> Option<AbstractValue> {
        None
    }
}

/// Return the element type and shape of a tensor or numeric scalar input.
pub(crate) fn tensor_like(input: &AbstractValue) -> Result<(DType, Shape), InferShapesError> {
    match input.kind() {
        AbstractKind::Tensor(t) => Ok((t.dtype, t.shape.clone())),
        AbstractKind::Scalar {
            ty: Type::Number(dtype),
            ..
        } => Ok((*dtype, Shape::scalar())),
        _ => Err(InferShapesError::UnsupportedType(input.ty())),
    }
}

/// Broadcast two shapes together following ONNX's
/// [broadcasting rules](https://onnx.ai/onnx/repo-docs/Broadcasting.html).
pub fn broadcast_shapes(a: &Shape, b: &Shape) -> Result<Shape, InferShapesError> {
    let (Some(a_dims), Some(b_dims)) = (a.dims(), b.dims()) else {
        return Ok(Shape::DynamicRank);
    };

    let a_pad = b_dims.len().saturating_sub(a_dims.len());
    let b_pad = a_dims.len().saturating_sub(b_dims.len());

    let a_iter = std::iter::repeat(Dim::Fixed(1)).take(a_pad).chain(a_dims.iter().copied());
    let b_iter = std::iter::repeat(Dim::Fixed(1)).take(b_pad).chain(b_dims.iter().copied());

    let mut out_shape: SmallVec<[Dim; 4]> = SmallVec::with_capacity(a_pad + a_dims.len());
    for (a, b) in a_iter.zip(b_iter) {
        let dim = match (a, b) {
            (a, b) if a == b => a,

            // If either size is 1, it will be broadcast against the other
            // size.
            (Dim::Fixed(1), b) => b,
            (a, Dim::Fixed(1)) => a,

            // If both sizes are fixed and different, we know execution
            // will fail.
            (Dim::Fixed(_), Dim::Fixed(_)) => {
                return Err(InferShapesError::IncompatibleShapes);
            }

            // If one dim is a fixed value other than 1 and the other is
            // dynamic, execution can only succeed if the dynamic dim has the
            // same size as the fixed dim.
            (Dim::Dynamic, Dim::Fixed(b)) => Dim::Fixed(b),
            (Dim::Fixed(a), Dim::Dynamic) => Dim::Fixed(a),

            (Dim::Dynamic, Dim::Dynamic) => Dim::Dynamic,
        };
        out_shape.push(dim);
    }

    Ok(Shape::Ranked(out_shape))
}

/// Shape inference for element-wise unary primitives.
///
/// These take one tensor or numeric scalar and return a value of the same
/// type and shape.
pub struct UnaryOp;

impl InferShapes for UnaryOp {
    fn infer_shapes(
        &self,
        _prim: &Primitive,
        inputs: &[AbstractValue],
    ) -> Result<AbstractValue, InferShapesError> {
        let [input] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        match input.kind() {
            AbstractKind::Tensor(t) => Ok(AbstractValue::tensor(t.dtype, t.shape.clone())),
            AbstractKind::Scalar {
                ty: ty @ Type::Number(_),
                ..
            } => Ok(AbstractValue::scalar_of(ty.clone())),
            _ => Err(InferShapesError::UnsupportedType(input.ty())),
        }
    }
}

/// Element-wise function used to fold binary ops over constants.
#[derive(Copy, Clone)]
pub struct BinaryFold {
    /// Integer version of the op. Returns `None` if the result is undefined
    /// (eg. division by zero).
    pub int: fn(i64, i64) -> Option<i64>,
    pub float: fn(f64, f64) -> f64,
}

/// Shape inference for element-wise binary primitives.
///
/// These take two inputs and return an output whose shape is the result of
/// broadcasting the two input shapes together. If either input is a tensor,
/// the output is a tensor with the tensor input's element type.
pub struct BinaryOp {
    pub fold: Option<BinaryFold>,
}

impl BinaryOp {
    fn fold_elems(&self, a: &TensorElems, b: &TensorElems) -> Option<TensorElems> {
        let fold = self.fold?;
        match (a, b) {
            (TensorElems::Int(a), TensorElems::Int(b)) => a
                .iter()
                .zip(b)
                .map(|(&x, &y)| (fold.int)(x, y))
                .collect::<Option<Vec<_>>>()
                .map(TensorElems::Int),
            (TensorElems::Float(a), TensorElems::Float(b)) => Some(TensorElems::Float(
                a.iter()
                    .zip(b)
                    .map(|(x, y)| F64((fold.float)(x.0, y.0)))
                    .collect(),
            )),
            _ => None,
        }
    }

    fn fold_scalars(&self, a: &Value, b: &Value) -> Option<Value> {
        let fold = self.fold?;
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => (fold.int)(*x, *y).map(Value::Int),
            (Value::Float(x), Value::Float(y)) => Some(Value::float((fold.float)(x.0, y.0))),
            (Value::Int(x), Value::Float(y)) => Some(Value::float((fold.float)(*x as f64, y.0))),
            (Value::Float(x), Value::Int(y)) => Some(Value::float((fold.float)(x.0, *y as f64))),
            _ => None,
        }
    }
}

fn join_scalar_types(a: &Type, b: &Type) -> Type {
    match (a.dtype(), b.dtype()) {
        (Some(x), Some(y)) if x != y && y.is_float() => b.clone(),
        _ => a.clone(),
    }
}

impl InferShapes for BinaryOp {
    fn infer_shapes(
        &self,
        _prim: &Primitive,
        inputs: &[AbstractValue],
    ) -> Result<AbstractValue, InferShapesError> {
        let [a, b] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };

        let (a_dtype, a_shape) = tensor_like(a)?;
        let (b_dtype, b_shape) = tensor_like(b)?;

        let out_dtype = match (a.as_tensor(), b.as_tensor()) {
            (Some(_), Some(_)) if a_dtype != b_dtype => {
                return Err(InferShapesError::UnsupportedType(b.ty()));
            }
            (Some(_), _) => a_dtype,
            (None, Some(_)) => b_dtype,
            (None, None) => {
                return Ok(AbstractValue::scalar_of(join_scalar_types(&a.ty(), &b.ty())));
            }
        };

        let out_shape = broadcast_shapes(&a_shape, &b_shape)?;
        Ok(AbstractValue::tensor(out_dtype, out_shape))
    }

    fn infer_value(&self, _prim: &Primitive, inputs: &[AbstractValue]) -> Option<AbstractValue> {
        let [a, b] = inputs else {
            return None;
        };
        match (a.value(), b.value()) {
            (Value::Tensor(x), Value::Tensor(y)) => {
                if x.shape() != y.shape() || x.dtype() != y.dtype() {
                    return None;
                }
                let elems = self.fold_elems(x.elems(), y.elems())?;
                let data = TensorData::try_new(x.dtype(), x.shape().to_vec(), elems)?;
                Some(AbstractValue::from_value(&Value::tensor(data)))
            }
            (x, y) if a.is_scalar() && b.is_scalar() => {
                self.fold_scalars(&x, &y).map(AbstractValue::scalar)
            }
            _ => None,
        }
    }
}

/// Shape inference for reduction primitives.
///
/// The reduced axes are read from the `axis` attribute, which may be a
/// single int or a tuple of ints. An empty or missing `axis` reduces over
/// all dimensions. The `keep_dims` attribute retains reduced dimensions as
/// size 1.
pub struct ReductionOp;

impl InferShapes for ReductionOp {
    fn infer_shapes(
        &self,
        prim: &Primitive,
        inputs: &[AbstractValue],
    ) -> Result<AbstractValue, InferShapesError> {
        let [data] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        let (dtype, shape) = tensor_like(data)?;
        let keep_dims = prim
            .attr("keep_dims")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let Some(data_dims) = shape.dims() else {
            return Ok(AbstractValue::tensor(dtype, Shape::DynamicRank));
        };
        let ndim = data_dims.len();

        let axes_attr = match prim.attr("axis") {
            None => Vec::new(),
            Some(value) => int_list(&value).ok_or_else(|| {
                InferShapesError::InvalidValue(format!(
                    "axis should be an int or tuple, got {}",
                    value
                ))
            })?,
        };
        let mut axes: SmallVec<[usize; 4]> = if axes_attr.is_empty() {
            (0..ndim).collect()
        } else {
            resolve_axes(ndim, axes_attr.iter())?
        };
        axes.sort();
        axes.dedup();

        let mut out_shape: SmallVec<[Dim; 4]> = SmallVec::with_capacity(ndim);
        for (i, dim) in data_dims.iter().enumerate() {
            if !axes.contains(&i) {
                out_shape.push(*dim);
            } else if keep_dims {
                out_shape.push(Dim::Fixed(1));
            }
        }

        Ok(AbstractValue::tensor(dtype, Shape::Ranked(out_shape)))
    }
}

/// Read a list of ints from an int, a tuple or list of ints, or an integer
/// tensor.
pub(crate) fn int_list(value: &Value) -> Option<Vec<i64>> {
    match value {
        Value::Int(x) => Some(vec![*x]),
        Value::Tuple(elems) | Value::List(elems) => elems.iter().map(|v| v.as_int()).collect(),
        Value::Tensor(t) if t.shape().len() <= 1 => t.to_ints().map(|ints| ints.to_vec()),
        _ => None,
    }
}

/// Resolve an index given as a value in `[-len, len-1]` to a positive index in
/// `[0, len)`, or return None if the index is out of bounds.
pub(crate) fn resolve_index(len: usize, index: i64) -> Option<usize> {
    let len = len.min(i64::MAX as usize) as i64;
    if index < -len || index >= len {
        return None;
    }

    if index >= 0 {
        Some(index as usize)
    } else {
        Some((len + index) as usize)
    }
}

/// Resolve an axis given as a value in `[-ndim, ndim-1]` to the zero-based
/// dimension of a tensor with `ndim` dimensions.
///
/// Negative axis values count backwards from the last dimension.
pub(crate) fn resolve_axis(ndim: usize, axis: i64) -> Result<usize, InferShapesError> {
    resolve_index(ndim, axis).ok_or(InferShapesError::IncorrectRank)
}

/// Resolve a sequence of axes values in `[-ndim, ndim-1]` to zero-based dimension
/// indexes in a tensor with `ndim` dimensions.
pub(crate) fn resolve_axes<'a, I: ExactSizeIterator<Item = &'a i64>>(
    ndim: usize,
    axes: I,
) -> Result<SmallVec<[usize; 4]>, InferShapesError> {
    let mut resolved_axes = SmallVec::with_capacity(axes.len());
    for axis in axes {
        let resolved = resolve_axis(ndim, *axis)?;
        resolved_axes.push(resolved);
    }
    Ok(resolved_axes)
}
