//! Primitives which route values through a graph: returns, dependencies,
//! state and control flow helpers, and truth testing.

use super::{Arity, Consumption, OpDef};
use crate::abstract_value::{AbstractKind, AbstractValue};
use crate::infer_shapes::{InferShapes, InferShapesError};
use crate::primitive::{names, Primitive};
use crate::types::{MonadKind, Type};
use crate::value::Value;

pub(super) static OPS: &[OpDef] = &[
    OpDef::new(names::RETURN, Arity::Exact(1), &PassThrough)
        .consumes(Consumption::Transparent(&[0])),
    OpDef::new(names::DEPEND, Arity::Exact(2), &PassThrough)
        .consumes(Consumption::Transparent(&[0])),
    OpDef::new(names::IDENTITY, Arity::Exact(1), &PassThrough)
        .consumes(Consumption::Transparent(&[0])),
    OpDef::new(names::LOAD, Arity::Exact(2), &Load),
    OpDef::new(names::UPDATE_STATE, Arity::AtLeast(1), &UpdateState),
    OpDef::new(names::SWITCH, Arity::Exact(3), &Switch),
    OpDef::new(names::ENVIRON_GET, Arity::Exact(3), &EnvironGet),
    OpDef::new(names::ENVIRON_SET, Arity::Exact(3), &PassThrough),
    OpDef::new(names::IS_INSTANCE, Arity::Exact(2), &IsInstance),
    OpDef::new(names::BOOL_OF, Arity::Exact(1), &BoolOf),
    OpDef::new(names::CHECK_LEN, Arity::Exact(1), &CheckLen),
    OpDef::new(names::REAL_BOOL, Arity::Exact(1), &RealBool),
];

/// Returns the first operand unchanged.
pub struct PassThrough;

impl InferShapes for PassThrough {
    fn infer_shapes(
        &self,
        _prim: &Primitive,
        inputs: &[AbstractValue],
    ) -> Result<AbstractValue, InferShapesError> {
        inputs
            .first()
            .cloned()
            .ok_or(InferShapesError::IncorrectInputCount)
    }
}

/// Read the current value of a parameter.
pub struct Load;

impl InferShapes for Load {
    fn infer_shapes(
        &self,
        _prim: &Primitive,
        inputs: &[AbstractValue],
    ) -> Result<AbstractValue, InferShapesError> {
        let [param, _state] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        match param.kind() {
            AbstractKind::Tensor(t) if t.is_ref => {
                let mut tensor = t.clone();
                tensor.is_ref = false;
                Ok(AbstractValue::new(AbstractKind::Tensor(tensor)))
            }
            _ => Ok(param.clone()),
        }
    }
}

pub struct UpdateState;

impl InferShapes for UpdateState {
    fn infer_shapes(
        &self,
        _prim: &Primitive,
        inputs: &[AbstractValue],
    ) -> Result<AbstractValue, InferShapesError> {
        if inputs.is_empty() {
            return Err(InferShapesError::IncorrectInputCount);
        }
        Ok(AbstractValue::monad(MonadKind::Universal))
    }
}

/// Select between two values. If the condition is not constant, the result
/// describes both.
pub struct Switch;

impl InferShapes for Switch {
    fn infer_shapes(
        &self,
        _prim: &Primitive,
        inputs: &[AbstractValue],
    ) -> Result<AbstractValue, InferShapesError> {
        let [cond, if_true, if_false] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        Ok(match cond.value().as_bool() {
            Some(true) => if_true.clone(),
            Some(false) => if_false.clone(),
            None => if_true.join(if_false),
        })
    }
}

/// Read a key from an environment. Environments are not tracked, so the
/// result is the default.
pub struct EnvironGet;

impl InferShapes for EnvironGet {
    fn infer_shapes(
        &self,
        _prim: &Primitive,
        inputs: &[AbstractValue],
    ) -> Result<AbstractValue, InferShapesError> {
        let [_env, _key, default] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        Ok(default.clone())
    }
}

pub struct IsInstance;

impl InferShapes for IsInstance {
    fn infer_shapes(
        &self,
        _prim: &Primitive,
        inputs: &[AbstractValue],
    ) -> Result<AbstractValue, InferShapesError> {
        let [x, model] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        let models: Vec<&Type> = match model.kind() {
            AbstractKind::Type(ty) => vec![ty],
            AbstractKind::Tuple(seq) => seq
                .elements()
                .iter()
                .map(|elem| match elem.kind() {
                    AbstractKind::Type(ty) => Ok(ty),
                    _ => Err(InferShapesError::UnsupportedType(elem.ty())),
                })
                .collect::<Result<_, _>>()?,
            _ => return Err(InferShapesError::UnsupportedType(model.ty())),
        };
        if x.is_any() {
            return Ok(AbstractValue::scalar_of(Type::bool()));
        }
        let x_ty = x.ty();
        let result = models.iter().any(|model| x_ty.is_subtype_of(model));
        Ok(AbstractValue::scalar(Value::Bool(result)))
    }
}

/// Return the truth value of a constant scalar, if it has one.
fn truth_value(value: &Value) -> Option<bool> {
    match value {
        Value::None => Some(false),
        Value::Bool(x) => Some(*x),
        Value::Int(x) => Some(*x != 0),
        Value::Float(x) => Some(x.0 != 0.0),
        Value::Str(s) => Some(!s.is_empty()),
        _ => None,
    }
}

/// Truth value of objects which define `__bool__`: scalars, `None` and
/// single-element tensors.
pub struct BoolOf;

impl InferShapes for BoolOf {
    fn infer_shapes(
        &self,
        _prim: &Primitive,
        inputs: &[AbstractValue],
    ) -> Result<AbstractValue, InferShapesError> {
        let [x] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        let value = match x.kind() {
            AbstractKind::None => Some(false),
            AbstractKind::Scalar { value, .. } => truth_value(value),
            AbstractKind::Tensor(t) => {
                if let Some(numel) = t.shape.num_elements() {
                    if numel != 1 {
                        return Err(InferShapesError::InvalidValue(format!(
                            "the truth value of a tensor with {} elements is ambiguous",
                            numel
                        )));
                    }
                }
                match &t.value {
                    Value::Tensor(data) => data.scalar_at(0).as_ref().and_then(truth_value),
                    _ => None,
                }
            }
            _ => return Err(InferShapesError::UnsupportedType(x.ty())),
        };
        Ok(match value {
            Some(value) => AbstractValue::scalar(Value::Bool(value)),
            None => AbstractValue::scalar_of(Type::bool()),
        })
    }
}

/// Truth value of objects which define `__len__`.
pub struct CheckLen;

impl InferShapes for CheckLen {
    fn infer_shapes(
        &self,
        _prim: &Primitive,
        inputs: &[AbstractValue],
    ) -> Result<AbstractValue, InferShapesError> {
        let [x] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        let len = match x.kind() {
            AbstractKind::Tuple(seq) | AbstractKind::List(seq) => seq.len(),
            AbstractKind::Dictionary(entries) => Some(entries.len()),
            _ => return Err(InferShapesError::UnsupportedType(x.ty())),
        };
        Ok(match len {
            Some(len) => AbstractValue::scalar(Value::Bool(len != 0)),
            None => AbstractValue::scalar_of(Type::bool()),
        })
    }
}

/// Truth value of objects which define neither `__bool__` nor `__len__`,
/// which is always true.
pub struct RealBool;

impl InferShapes for RealBool {
    fn infer_shapes(
        &self,
        _prim: &Primitive,
        inputs: &[AbstractValue],
    ) -> Result<AbstractValue, InferShapesError> {
        let [_x] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        Ok(AbstractValue::scalar(Value::Bool(true)))
    }
}
