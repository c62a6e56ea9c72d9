//! Boundary to the host scripting runtime.
//!
//! Some primitives are inferred by functions written in the host language,
//! and some expressions can only be evaluated by running host code. The
//! engine reaches the host through the [`HostBridge`] trait, converting
//! abstract values to plain `{shape, dtype, value}` records on the way in
//! and back into abstract values on the way out.

use std::fmt;

use crate::abstract_value::{AbstractKind, AbstractTensor, AbstractValue};
use crate::error::{HostError, InferError};
use crate::primitive::Primitive;
use crate::types::{DType, Shape, Type};
use crate::value::Value;

/// Shape of an argument or result in the host encoding.
#[derive(Clone, Debug, PartialEq)]
pub enum HostShape {
    /// Dimensions of a tensor or scalar (empty). See [`Shape::to_host`].
    Dims(Vec<i64>),
    Tuple(Vec<HostShape>),
    List(Vec<HostShape>),
    /// Values without a shape, such as `None` or dicts.
    None,
}

/// An argument passed to host inference.
#[derive(Clone, Debug, PartialEq)]
pub struct HostArg {
    pub shape: HostShape,
    pub dtype: Type,
    /// The argument's value, or [`Value::Any`] if unknown.
    pub value: Value,
}

/// Result of host inference.
#[derive(Clone, Debug, PartialEq)]
pub struct HostInferOutput {
    pub shape: HostShape,
    pub dtype: Type,
    pub value: Option<Value>,
    /// Known values of the output's shape, for tensor outputs.
    pub shape_value: Option<Value>,
}

impl HostInferOutput {
    /// Create an output with a shape and type but no known value.
    pub fn new(shape: HostShape, dtype: Type) -> HostInferOutput {
        HostInferOutput {
            shape,
            dtype,
            value: None,
            shape_value: None,
        }
    }

    pub fn with_value(mut self, value: Value) -> HostInferOutput {
        self.value = Some(value);
        self
    }
}

/// Variables visible to a host script.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScriptScope {
    pub globals: Vec<(Value, Value)>,
    pub locals: Vec<(Value, Value)>,
    /// Graphs exposed to the script as callable symbols.
    pub functions: Vec<(Value, Value)>,
}

/// Operations the engine needs from the host runtime.
///
/// Implementations must be thread safe, since independent compilations may
/// share one host.
pub trait HostBridge: Send + Sync {
    /// Validate the arguments of a host-checked or host-inferred primitive.
    fn check(&self, prim: &Primitive, args: &[HostArg]) -> Result<(), HostError>;

    /// Infer the output of a host-inferred primitive. The host may add
    /// attributes to `prim`.
    fn infer(&self, prim: &Primitive, args: &[HostArg]) -> Result<HostInferOutput, HostError>;

    /// Return true if the host can compute the value of `prim`'s output.
    fn has_infer_value(&self, _prim: &Primitive) -> bool {
        false
    }

    /// Compute the output value of `prim` from constant arguments, or
    /// return `None` if it cannot.
    fn infer_value(
        &self,
        _prim: &Primitive,
        _args: &[HostArg],
    ) -> Result<Option<Value>, HostError> {
        Ok(None)
    }

    /// Construct an instance of `class` with constant arguments. Returns
    /// `None` if the class cannot be instantiated during compilation.
    fn construct_object(&self, class: &Value, args: &[Value]) -> Result<Option<Value>, HostError>;

    /// Run a script and return its result, or `None` if it produced no
    /// value.
    fn execute_script(
        &self,
        script: &str,
        scope: &ScriptScope,
    ) -> Result<Option<Value>, HostError>;

    /// Infer the output of a script node at execution time, given its
    /// operands with materialized values attached.
    fn reinfer(&self, script: &str, args: &[AbstractValue]) -> Result<AbstractValue, HostError>;

    /// Infer the output of `prim` at execution time when one of its
    /// operands holds a value produced by a script node.
    fn reinfer_primitive(
        &self,
        prim: &Primitive,
        args: &[AbstractValue],
    ) -> Result<AbstractValue, HostError>;
}

impl fmt::Debug for dyn HostBridge + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostBridge")
    }
}

/// Convert an abstract value into a host argument.
pub fn to_host_arg(prim_name: &str, value: &AbstractValue) -> Result<HostArg, InferError> {
    let arg = |shape, dtype, value| HostArg {
        shape,
        dtype,
        value,
    };
    match value.kind() {
        AbstractKind::Scalar { value: v, ty } => {
            Ok(arg(HostShape::Dims(Vec::new()), ty.clone(), v.clone()))
        }
        AbstractKind::Tensor(t) => Ok(arg(
            HostShape::Dims(t.shape.to_host()),
            Type::Tensor(Some(t.dtype)),
            t.value.clone(),
        )),
        AbstractKind::Tuple(seq) | AbstractKind::List(seq) if seq.is_dynamic_len() => Ok(arg(
            HostShape::Dims(vec![-1]),
            value.ty(),
            Value::None,
        )),
        AbstractKind::Tuple(seq) | AbstractKind::List(seq) => {
            let elems = seq
                .elements()
                .iter()
                .map(|elem| to_host_arg(prim_name, elem))
                .collect::<Result<Vec<_>, _>>()?;
            let shapes = elems.iter().map(|e| e.shape.clone()).collect();
            let shape = if value.is_tuple() {
                HostShape::Tuple(shapes)
            } else {
                HostShape::List(shapes)
            };
            Ok(arg(shape, value.ty(), value.value()))
        }
        AbstractKind::Dictionary(_)
        | AbstractKind::Function(_)
        | AbstractKind::Type(_)
        | AbstractKind::Class(_)
        | AbstractKind::Slice { .. }
        | AbstractKind::Ellipsis => Ok(arg(HostShape::None, value.ty(), value.value())),
        AbstractKind::None => Ok(arg(HostShape::None, Type::None, Value::None)),
        AbstractKind::Monad(kind) => Ok(arg(
            HostShape::Dims(Vec::new()),
            Type::Monad(*kind),
            Value::Monad(*kind),
        )),
        AbstractKind::KeywordArg { key, .. } => Err(InferError::type_error(format!(
            "For primitive '{}', keyword argument '{}' is not supported.",
            prim_name, key
        ))),
        AbstractKind::Any { .. } => Err(InferError::type_error(format!(
            "For primitive '{}', an input could not be inferred statically. Inputs of host-inferred primitives must be typed.",
            prim_name
        ))),
        _ => Err(InferError::type_error(format!(
            "For primitive '{}', unsupported input {}",
            prim_name, value
        ))),
    }
}

/// Convert the operands of `prim` into host arguments. Trailing monad
/// operands, which only order side effects, are dropped.
pub fn prepare_host_args(
    prim: &Primitive,
    args: &[AbstractValue],
) -> Result<Vec<HostArg>, InferError> {
    let end = args
        .iter()
        .rposition(|arg| !arg.is_monad())
        .map(|pos| pos + 1)
        .unwrap_or(0);
    args[..end]
        .iter()
        .map(|arg| to_host_arg(prim.name(), arg))
        .collect()
}

fn invalid_output(shape: &HostShape, dtype: &Type) -> InferError {
    InferError::internal(format!(
        "Host inference returned an invalid shape or type. shape: {:?}, type: {}",
        shape, dtype
    ))
}

fn output_from_shape(shape: &HostShape, dtype: &Type) -> Result<AbstractValue, InferError> {
    match (shape, dtype) {
        (HostShape::Dims(dims), Type::Tensor(Some(dtype))) => {
            let shape = Shape::from_host(dims)
                .ok_or_else(|| invalid_output(shape, &Type::Tensor(Some(*dtype))))?;
            Ok(AbstractValue::tensor(*dtype, shape))
        }
        (HostShape::Dims(dims), Type::Number(dtype)) if !dims.is_empty() => {
            let shape = Shape::from_host(dims)
                .ok_or_else(|| invalid_output(shape, &Type::Number(*dtype)))?;
            Ok(AbstractValue::tensor(*dtype, shape))
        }
        (HostShape::Dims(dims), ty) if dims.is_empty() && !matches!(ty, Type::Tensor(_)) => {
            match ty {
                Type::Monad(kind) => Ok(AbstractValue::monad(*kind)),
                ty => Ok(AbstractValue::scalar_of(ty.clone())),
            }
        }
        (HostShape::Tuple(shapes), Type::Tuple(Some(types)))
        | (HostShape::List(shapes), Type::List(Some(types)))
            if shapes.len() == types.len() =>
        {
            let elems = shapes
                .iter()
                .zip(types)
                .map(|(shape, ty)| output_from_shape(shape, ty))
                .collect::<Result<Vec<_>, _>>()?;
            if matches!(dtype, Type::Tuple(_)) {
                Ok(AbstractValue::tuple(elems))
            } else {
                Ok(AbstractValue::list(elems))
            }
        }
        (HostShape::None, Type::None) => Ok(AbstractValue::none()),
        (_, Type::Monad(kind)) => Ok(AbstractValue::monad(*kind)),
        _ => Err(invalid_output(shape, dtype)),
    }
}

/// Check the declared output count of a custom primitive against its
/// inferred output.
fn check_output_num(prim: &Primitive, output: &AbstractValue) -> Result<(), InferError> {
    let Some(output_num) = prim.attr("output_num").and_then(|v| v.as_int()) else {
        return Ok(());
    };
    let expected = match output.kind() {
        AbstractKind::Tensor(_) => Some(1),
        AbstractKind::Tuple(seq) => seq.len().map(|len| len as i64),
        _ => None,
    };
    match expected {
        Some(expected) if expected != output_num => Err(InferError::malformed(format!(
            "For custom primitive '{}', the inferred output has {} outputs, but output_num is {}.",
            prim.name(),
            expected,
            output_num
        ))),
        _ => Ok(()),
    }
}

/// Convert the result of host inference into an abstract value.
pub fn host_output_to_abstract(
    prim: &Primitive,
    output: &HostInferOutput,
) -> Result<AbstractValue, InferError> {
    let known_value = output.value.as_ref().filter(|v| !v.is_any() && **v != Value::None);
    let result = match (known_value, &output.dtype) {
        (Some(value), Type::Tensor(_)) => {
            let HostShape::Dims(dims) = &output.shape else {
                return Err(invalid_output(&output.shape, &output.dtype));
            };
            let dtype = output
                .dtype
                .dtype()
                .or_else(|| match value {
                    Value::Tensor(data) => Some(data.dtype()),
                    _ => None,
                })
                .unwrap_or(DType::Float32);
            let shape = Shape::from_host(dims)
                .ok_or_else(|| invalid_output(&output.shape, &output.dtype))?;
            let mut tensor = AbstractTensor::new(dtype, shape);
            tensor.value = value.clone();
            tensor.shape_value = output.shape_value.clone();
            AbstractValue::new(AbstractKind::Tensor(tensor))
        }
        (Some(value), _) => AbstractValue::from_value(value),
        (None, dtype) => output_from_shape(&output.shape, dtype)?,
    };
    if prim.is_custom() {
        check_output_num(prim, &result)?;
    }
    Ok(result)
}
