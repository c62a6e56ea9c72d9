//! Primitives which change the shape or element type of a tensor, and
//! primitives which query them.

use smallvec::SmallVec;

use super::{Arity, OpDef};
use crate::abstract_value::{AbstractKind, AbstractSequence, AbstractValue};
use crate::infer_shapes::{
    int_list, resolve_axes, resolve_axis, tensor_like, InferShapes, InferShapesError,
};
use crate::primitive::{names, Primitive};
use crate::types::{DType, Dim, Shape, Type};
use crate::value::{F64, TensorData, TensorElems, Value};

pub(super) static OPS: &[OpDef] = &[
    OpDef::new(names::CAST, Arity::Exact(2), &Cast),
    OpDef::new(names::RESHAPE, Arity::Exact(2), &Reshape)
        .value_depend(&[1])
        .nop(),
    OpDef::new(names::SHAPE, Arity::Exact(1), &ShapeOp),
    OpDef::new("Rank", Arity::Exact(1), &Rank),
    OpDef::new("Size", Arity::Exact(1), &Size),
    OpDef::new("DType", Arity::Exact(1), &DTypeOp),
    OpDef::new(names::EXPAND_DIMS, Arity::Exact(2), &ExpandDims)
        .value_depend(&[1])
        .nop(),
    OpDef::new(names::SQUEEZE, Arity::Exact(1), &Squeeze).nop(),
    OpDef::new(names::FLATTEN, Arity::Exact(1), &Flatten).nop(),
];

/// Cast a tensor or number to the type given by a constant type operand.
pub struct Cast;

fn cast_target(value: &Value) -> Result<DType, InferShapesError> {
    match value {
        Value::Type(ty) => ty
            .dtype()
            .ok_or_else(|| InferShapesError::InvalidValue(format!("cannot cast to {}", ty))),
        other => Err(InferShapesError::InvalidValue(format!(
            "cast target should be a type, but got {}",
            other
        ))),
    }
}

fn cast_scalar(value: &Value, dtype: DType) -> Option<Value> {
    let value = match (value, dtype) {
        (Value::Bool(x), DType::Bool) => Value::Bool(*x),
        (Value::Int(x), DType::Bool) => Value::Bool(*x != 0),
        (Value::Float(x), DType::Bool) => Value::Bool(x.0 != 0.),
        (Value::Bool(x), d) if d.is_int() => Value::Int(*x as i64),
        (Value::Int(x), d) if d.is_int() => Value::Int(*x),
        (Value::Float(x), d) if d.is_int() => Value::Int(x.0 as i64),
        (Value::Bool(x), _) => Value::float(*x as i64 as f64),
        (Value::Int(x), _) => Value::float(*x as f64),
        (Value::Float(x), _) => Value::Float(*x),
        _ => return None,
    };
    Some(value)
}

impl InferShapes for Cast {
    fn infer_shapes(
        &self,
        _prim: &Primitive,
        inputs: &[AbstractValue],
    ) -> Result<AbstractValue, InferShapesError> {
        let [x, dst] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        let dtype = cast_target(&dst.value())?;
        match x.kind() {
            AbstractKind::Tensor(t) => Ok(AbstractValue::tensor(dtype, t.shape.clone())),
            AbstractKind::Scalar {
                ty: Type::Number(_),
                value,
            } => Ok(AbstractValue::new(AbstractKind::Scalar {
                value: cast_scalar(value, dtype).unwrap_or(Value::Any),
                ty: Type::Number(dtype),
            })),
            _ => Err(InferShapesError::UnsupportedType(x.ty())),
        }
    }

    fn infer_value(&self, _prim: &Primitive, inputs: &[AbstractValue]) -> Option<AbstractValue> {
        let [x, dst] = inputs else {
            return None;
        };
        let Value::Tensor(data) = x.value() else {
            return None;
        };
        let dtype = cast_target(&dst.value()).ok()?;
        let cast = cast_data(&data, dtype)?;
        Some(AbstractValue::from_value(&Value::tensor(cast)))
    }
}

/// Reshape a tensor to a shape given by a constant tuple or tensor. One
/// dimension may be -1, in which case it is inferred from the element count.
pub struct Reshape;

impl InferShapes for Reshape {
    fn infer_shapes(
        &self,
        _prim: &Primitive,
        inputs: &[AbstractValue],
    ) -> Result<AbstractValue, InferShapesError> {
        let [data, shape] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        let (dtype, in_shape) = tensor_like(data)?;

        let Some(target) = int_list(&shape.value()) else {
            // The target is not known, but its length may be.
            let out_shape = match shape.kind() {
                AbstractKind::Tuple(seq) | AbstractKind::List(seq) => match seq.len() {
                    Some(_) => Shape::from_dims(seq.elements().iter().map(|e| {
                        match e.value().as_int() {
                            Some(size) if size >= 0 => Dim::Fixed(size as usize),
                            _ => Dim::Dynamic,
                        }
                    })),
                    None => Shape::DynamicRank,
                },
                AbstractKind::Tensor(t) => match t.shape.to_fixed().as_deref() {
                    Some([len]) => Shape::from_dims(std::iter::repeat(Dim::Dynamic).take(*len)),
                    _ => Shape::DynamicRank,
                },
                _ => return Err(InferShapesError::UnsupportedType(shape.ty())),
            };
            return Ok(AbstractValue::tensor(dtype, out_shape));
        };

        let mut infer_index = None;
        let mut dims: SmallVec<[Dim; 4]> = SmallVec::with_capacity(target.len());
        for (i, &size) in target.iter().enumerate() {
            match size {
                -1 if infer_index.is_some() => {
                    return Err(InferShapesError::InvalidValue(
                        "only one dimension can be -1".to_string(),
                    ));
                }
                -1 => {
                    infer_index = Some(i);
                    dims.push(Dim::Dynamic);
                }
                size if size < 0 => {
                    return Err(InferShapesError::InvalidValue(format!(
                        "invalid dimension size {}",
                        size
                    )));
                }
                size => dims.push(Dim::Fixed(size as usize)),
            }
        }

        let known_product: usize = dims.iter().filter_map(|d| d.fixed()).product();
        match (in_shape.num_elements(), infer_index) {
            (Some(count), Some(index)) => {
                if known_product == 0 || count % known_product != 0 {
                    return Err(InferShapesError::IncompatibleShapes);
                }
                dims[index] = Dim::Fixed(count / known_product);
            }
            (Some(count), None) if count != known_product => {
                return Err(InferShapesError::IncompatibleShapes);
            }
            _ => {}
        }

        Ok(AbstractValue::tensor(dtype, Shape::Ranked(dims)))
    }
}

/// Return the shape of a tensor as a tuple of ints.
pub struct ShapeOp;

impl InferShapes for ShapeOp {
    fn infer_shapes(
        &self,
        _prim: &Primitive,
        inputs: &[AbstractValue],
    ) -> Result<AbstractValue, InferShapesError> {
        let [data] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        let (_, shape) = tensor_like(data)?;
        let int = Type::Number(DType::Int64);
        let Some(dims) = shape.dims() else {
            let elem = AbstractValue::scalar_of(int);
            return Ok(AbstractValue::new(AbstractKind::Tuple(
                AbstractSequence::dynamic(Some(elem)),
            )));
        };
        let elems = dims
            .iter()
            .map(|dim| match dim {
                Dim::Fixed(size) => AbstractValue::scalar(Value::Int(*size as i64)),
                Dim::Dynamic => AbstractValue::scalar_of(int.clone()),
            })
            .collect();
        Ok(AbstractValue::tuple(elems))
    }

    fn infer_value(&self, _prim: &Primitive, inputs: &[AbstractValue]) -> Option<AbstractValue> {
        let [data] = inputs else {
            return None;
        };
        let dims = data.shape()?.to_fixed()?;
        Some(AbstractValue::from_value(&Value::tuple(
            dims.into_iter().map(|d| Value::Int(d as i64)),
        )))
    }
}

/// Return the number of dimensions of a tensor.
pub struct Rank;

impl InferShapes for Rank {
    fn infer_shapes(
        &self,
        _prim: &Primitive,
        inputs: &[AbstractValue],
    ) -> Result<AbstractValue, InferShapesError> {
        let [data] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        let (_, shape) = tensor_like(data)?;
        Ok(match shape.rank() {
            Some(rank) => AbstractValue::scalar(Value::Int(rank as i64)),
            None => AbstractValue::scalar_of(Type::Number(DType::Int64)),
        })
    }
}

/// Return the number of elements in a tensor.
pub struct Size;

impl InferShapes for Size {
    fn infer_shapes(
        &self,
        _prim: &Primitive,
        inputs: &[AbstractValue],
    ) -> Result<AbstractValue, InferShapesError> {
        let [data] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        let (_, shape) = tensor_like(data)?;
        Ok(match shape.num_elements() {
            Some(count) => AbstractValue::scalar(Value::Int(count as i64)),
            None => AbstractValue::scalar_of(Type::Number(DType::Int64)),
        })
    }
}

/// Return the element type of a tensor as a type object.
pub struct DTypeOp;

impl InferShapes for DTypeOp {
    fn infer_shapes(
        &self,
        _prim: &Primitive,
        inputs: &[AbstractValue],
    ) -> Result<AbstractValue, InferShapesError> {
        let [data] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        let (dtype, _) = tensor_like(data)?;
        Ok(AbstractValue::new(AbstractKind::Type(Type::Number(dtype))))
    }
}

/// Insert a size-1 dimension at a constant axis.
pub struct ExpandDims;

impl InferShapes for ExpandDims {
    fn infer_shapes(
        &self,
        _prim: &Primitive,
        inputs: &[AbstractValue],
    ) -> Result<AbstractValue, InferShapesError> {
        let [data, axis] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        let (dtype, shape) = tensor_like(data)?;
        let (Some(dims), Some(axis)) = (shape.dims(), axis.value().as_int()) else {
            return Ok(AbstractValue::tensor(dtype, Shape::DynamicRank));
        };

        let axis = resolve_axis(dims.len() + 1, axis)?;
        let mut out_dims: SmallVec<[Dim; 4]> = dims.iter().copied().collect();
        out_dims.insert(axis, Dim::Fixed(1));
        Ok(AbstractValue::tensor(dtype, Shape::Ranked(out_dims)))
    }
}

/// Remove size-1 dimensions. The `axis` attribute selects which; if empty or
/// missing, all size-1 dimensions are removed.
pub struct Squeeze;

impl InferShapes for Squeeze {
    fn infer_shapes(
        &self,
        prim: &Primitive,
        inputs: &[AbstractValue],
    ) -> Result<AbstractValue, InferShapesError> {
        let [data] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        let (dtype, shape) = tensor_like(data)?;
        let Some(dims) = shape.dims() else {
            return Ok(AbstractValue::tensor(dtype, Shape::DynamicRank));
        };

        let axes = match prim.attr("axis") {
            Some(value) => int_list(&value).ok_or_else(|| {
                InferShapesError::InvalidValue(format!(
                    "axis should be an int or tuple, got {}",
                    value
                ))
            })?,
            None => Vec::new(),
        };

        if axes.is_empty() {
            // Which dims are removed depends on the sizes of dynamic dims.
            if dims.contains(&Dim::Dynamic) {
                return Ok(AbstractValue::tensor(dtype, Shape::DynamicRank));
            }
            let out_dims = dims.iter().copied().filter(|d| *d != Dim::Fixed(1));
            return Ok(AbstractValue::tensor(dtype, Shape::from_dims(out_dims)));
        }

        let axes = resolve_axes(dims.len(), axes.iter())?;
        for &axis in &axes {
            if let Dim::Fixed(size) = dims[axis] {
                if size != 1 {
                    return Err(InferShapesError::InvalidValue(format!(
                        "cannot squeeze axis {} of size {}",
                        axis, size
                    )));
                }
            }
        }
        let out_dims = dims
            .iter()
            .enumerate()
            .filter(|(i, _)| !axes.contains(i))
            .map(|(_, d)| *d);
        Ok(AbstractValue::tensor(dtype, Shape::from_dims(out_dims)))
    }
}

/// Flatten a tensor into a matrix whose first dimension is the input's first
/// dimension.
pub struct Flatten;

impl InferShapes for Flatten {
    fn infer_shapes(
        &self,
        _prim: &Primitive,
        inputs: &[AbstractValue],
    ) -> Result<AbstractValue, InferShapesError> {
        let [data] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        let (dtype, shape) = tensor_like(data)?;
        let Some(dims) = shape.dims() else {
            return Ok(AbstractValue::tensor(
                dtype,
                Shape::from_dims([Dim::Dynamic, Dim::Dynamic]),
            ));
        };
        let Some((&first, rest)) = dims.split_first() else {
            return Ok(AbstractValue::tensor(dtype, Shape::fixed(&[1, 1])));
        };
        let inner = rest
            .iter()
            .map(|d| d.fixed())
            .try_fold(1usize, |acc, d| d.map(|d| acc * d))
            .map(Dim::Fixed)
            .unwrap_or(Dim::Dynamic);
        Ok(AbstractValue::tensor(dtype, Shape::from_dims([first, inner])))
    }
}

/// Return the element-wise cast of a constant tensor.
fn cast_data(data: &TensorData, dtype: DType) -> Option<TensorData> {
    let elems = match (data.elems(), dtype) {
        (TensorElems::Int(v), d) if d.is_float() => {
            TensorElems::Float(v.iter().map(|&x| F64(x as f64)).collect())
        }
        (TensorElems::Float(v), d) if d.is_int() => {
            TensorElems::Int(v.iter().map(|x| x.0 as i64).collect())
        }
        (elems, _) => elems.clone(),
    };
    TensorData::try_new(dtype, data.shape().to_vec(), elems)
}

#[cfg(test)]
mod tests {
    use absint_testing::TestCases;

    use super::{Cast, ExpandDims, Flatten, Rank, Reshape, ShapeOp, Squeeze};
    use crate::abstract_value::AbstractValue;
    use crate::infer_shapes::{InferShapes, InferShapesError};
    use crate::primitive::Primitive;
    use crate::types::{DType, Dim, Shape, Type};
    use crate::value::Value;

    fn f32_tensor(shape: Shape) -> AbstractValue {
        AbstractValue::tensor(DType::Float32, shape)
    }

    fn int_tuple(values: &[i64]) -> AbstractValue {
        AbstractValue::from_value(&Value::tuple(values.iter().map(|&x| Value::Int(x))))
    }

    #[test]
    fn test_reshape() {
        #[derive(Debug)]
        struct Case {
            input: Shape,
            target: AbstractValue,
            expected: Result<Shape, InferShapesError>,
        }

        let cases = [
            Case {
                input: Shape::fixed(&[2, 6]),
                target: int_tuple(&[3, 4]),
                expected: Ok(Shape::fixed(&[3, 4])),
            },
            Case {
                input: Shape::fixed(&[2, 6]),
                target: int_tuple(&[-1, 3]),
                expected: Ok(Shape::fixed(&[4, 3])),
            },
            Case {
                input: Shape::from_dims([Dim::Dynamic, Dim::Fixed(6)]),
                target: int_tuple(&[-1, 3]),
                expected: Ok(Shape::from_dims([Dim::Dynamic, Dim::Fixed(3)])),
            },
            Case {
                input: Shape::fixed(&[2, 6]),
                target: int_tuple(&[5, -1]),
                expected: Err(InferShapesError::IncompatibleShapes),
            },
            Case {
                input: Shape::fixed(&[2, 6]),
                target: int_tuple(&[-1, -1]),
                expected: Err(InferShapesError::InvalidValue(
                    "only one dimension can be -1".to_string(),
                )),
            },
            Case {
                input: Shape::fixed(&[2, 6]),
                target: AbstractValue::tensor(DType::Int64, Shape::fixed(&[3])),
                expected: Ok(Shape::from_dims([Dim::Dynamic; 3])),
            },
        ];

        cases.test_each(|case| {
            let prim = Primitive::new("Reshape");
            let inputs = [f32_tensor(case.input.clone()), case.target.clone()];
            let result = Reshape
                .infer_shapes(&prim, &inputs)
                .map(|out| out.shape().unwrap());
            assert_eq!(result, case.expected);
        });
    }

    #[test]
    fn test_shape_op() {
        let prim = Primitive::new("Shape");
        let input = f32_tensor(Shape::from_dims([Dim::Fixed(2), Dim::Dynamic]));
        let out = ShapeOp.infer_shapes(&prim, &[input.clone()]).unwrap();
        let seq = out.as_sequence().unwrap();
        assert_eq!(seq.len(), Some(2));
        assert_eq!(seq.elements()[0].value(), Value::Int(2));
        assert_eq!(seq.elements()[1].value(), Value::Any);
        assert!(ShapeOp.infer_value(&prim, &[input]).is_none());

        let static_input = f32_tensor(Shape::fixed(&[2, 3]));
        let out = ShapeOp.infer_value(&prim, &[static_input]).unwrap();
        assert_eq!(out.value(), Value::tuple([Value::Int(2), Value::Int(3)]));

        let unranked = ShapeOp
            .infer_shapes(&prim, &[f32_tensor(Shape::DynamicRank)])
            .unwrap();
        assert!(unranked.as_sequence().unwrap().is_dynamic_len());
    }

    #[test]
    fn test_rank_and_cast() {
        let prim = Primitive::new("Rank");
        let out = Rank
            .infer_shapes(&prim, &[f32_tensor(Shape::fixed(&[1, 2, 3]))])
            .unwrap();
        assert_eq!(out.value(), Value::Int(3));

        let prim = Primitive::new("Cast");
        let out = Cast
            .infer_shapes(
                &prim,
                &[
                    f32_tensor(Shape::fixed(&[4])),
                    AbstractValue::from_value(&Value::Type(Type::bool())),
                ],
            )
            .unwrap();
        assert_eq!(out, AbstractValue::tensor(DType::Bool, Shape::fixed(&[4])));

        let out = Cast
            .infer_shapes(
                &prim,
                &[
                    AbstractValue::scalar(Value::Int(3)),
                    AbstractValue::from_value(&Value::Type(Type::Number(DType::Float32))),
                ],
            )
            .unwrap();
        assert_eq!(out.value(), Value::float(3.));
        assert_eq!(out.ty(), Type::Number(DType::Float32));
    }

    #[test]
    fn test_expand_squeeze_flatten() {
        #[derive(Debug)]
        struct Case {
            op: &'static str,
            input: Shape,
            axis: Option<Value>,
            expected: Result<Shape, InferShapesError>,
        }

        let cases = [
            Case {
                op: "ExpandDims",
                input: Shape::fixed(&[2, 3]),
                axis: Some(Value::Int(-1)),
                expected: Ok(Shape::fixed(&[2, 3, 1])),
            },
            Case {
                op: "ExpandDims",
                input: Shape::fixed(&[2, 3]),
                axis: Some(Value::Int(0)),
                expected: Ok(Shape::fixed(&[1, 2, 3])),
            },
            Case {
                op: "ExpandDims",
                input: Shape::fixed(&[2, 3]),
                axis: Some(Value::Int(4)),
                expected: Err(InferShapesError::IncorrectRank),
            },
            Case {
                op: "Squeeze",
                input: Shape::fixed(&[1, 3, 1]),
                axis: None,
                expected: Ok(Shape::fixed(&[3])),
            },
            Case {
                op: "Squeeze",
                input: Shape::fixed(&[1, 3, 1]),
                axis: Some(Value::tuple([Value::Int(0)])),
                expected: Ok(Shape::fixed(&[3, 1])),
            },
            Case {
                op: "Squeeze",
                input: Shape::from_dims([Dim::Fixed(1), Dim::Dynamic]),
                axis: None,
                expected: Ok(Shape::DynamicRank),
            },
            Case {
                op: "Squeeze",
                input: Shape::fixed(&[2, 3]),
                axis: Some(Value::Int(0)),
                expected: Err(InferShapesError::InvalidValue(
                    "cannot squeeze axis 0 of size 2".to_string(),
                )),
            },
            Case {
                op: "Flatten",
                input: Shape::fixed(&[2, 3, 4]),
                axis: None,
                expected: Ok(Shape::fixed(&[2, 12])),
            },
            Case {
                op: "Flatten",
                input: Shape::from_dims([Dim::Fixed(2), Dim::Dynamic]),
                axis: None,
                expected: Ok(Shape::from_dims([Dim::Fixed(2), Dim::Dynamic])),
            },
        ];

        cases.test_each(|case| {
            let input = f32_tensor(case.input.clone());
            let result = match case.op {
                "ExpandDims" => {
                    let axis = AbstractValue::from_value(case.axis.as_ref().unwrap());
                    ExpandDims.infer_shapes(&Primitive::new(case.op), &[input, axis])
                }
                "Squeeze" => {
                    let mut prim = Primitive::new(case.op);
                    if let Some(axis) = &case.axis {
                        prim = prim.with_attr("axis", axis.clone());
                    }
                    Squeeze.infer_shapes(&prim, &[input])
                }
                _ => Flatten.infer_shapes(&Primitive::new(case.op), &[input]),
            };
            assert_eq!(result.map(|out| out.shape().unwrap()), case.expected);
        });
    }
}
