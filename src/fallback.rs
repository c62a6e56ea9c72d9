//! Host-script escape hatches.
//!
//! `PyExecute(script, keys, values)` runs a script with locals given as a
//! tuple of names and a tuple of values. `PyInterpret(script, globals,
//! locals)` takes dicts instead. Neither can be typed statically, so the
//! output is taken from an annotation or from type information attached to
//! the node when it was created, and is `Any` otherwise.

use std::sync::Arc;

use crate::abstract_value::{AbstractKind, AbstractSequence, AbstractValue, EvalResult};
use crate::engine::{ArgConfig, Engine, NodeConfig};
use crate::error::InferError;
use crate::evaluator::check_arity;
use crate::graph::NodeId;
use crate::host::ScriptScope;
use crate::ops::Arity;
use crate::primitive::{names, Primitive};
use crate::types::{DType, Shape, Type};
use crate::value::Value;

/// Add a `PyExecute` call running `script` with the given locals, in the
/// graph of `origin`.
pub(crate) fn add_script_call(
    engine: &mut Engine,
    origin: NodeId,
    script: &str,
    locals: &[(&str, NodeId)],
) -> Result<NodeId, InferError> {
    tracing::debug!(
        script,
        node = %engine.graph().describe(origin),
        "synthesizing host script"
    );

    let graph = engine.graph_mut();
    let make_tuple = graph.add_value(Value::Primitive(Arc::new(Primitive::new(names::MAKE_TUPLE))));
    let mut tuple_inputs = vec![make_tuple];
    tuple_inputs.extend(locals.iter().map(|(_, node)| *node));
    let values = graph.add_call_from(origin, tuple_inputs)?;

    let keys = graph.add_value(Value::tuple(locals.iter().map(|(key, _)| Value::str(key))));
    let script = graph.add_value(Value::str(script));
    let callee = graph.add_value(Value::Primitive(Arc::new(Primitive::new(names::PY_EXECUTE))));
    graph.add_call_from(origin, vec![callee, script, keys, values])
}

/// Build an abstract value describing values of type `ty`.
fn abstract_of_type(ty: &Type, shape: Option<&Shape>) -> AbstractValue {
    match ty {
        Type::Number(dtype) => match shape {
            Some(shape) if shape.rank() == Some(0) => AbstractValue::scalar_of(ty.clone()),
            Some(shape) => AbstractValue::tensor(*dtype, shape.clone()),
            None => AbstractValue::scalar_of(ty.clone()),
        },
        Type::Tensor(Some(dtype)) => {
            AbstractValue::tensor(*dtype, shape.cloned().unwrap_or(Shape::DynamicRank))
        }
        Type::String => AbstractValue::scalar_of(Type::String),
        Type::Tuple(Some(elems)) => {
            AbstractValue::tuple(elems.iter().map(|ty| abstract_of_type(ty, None)).collect())
        }
        Type::List(Some(elems)) => {
            AbstractValue::list(elems.iter().map(|ty| abstract_of_type(ty, None)).collect())
        }
        Type::Tuple(None) => {
            AbstractValue::new(AbstractKind::Tuple(AbstractSequence::dynamic(None)))
        }
        Type::List(None) => AbstractValue::new(AbstractKind::List(AbstractSequence::dynamic(None))),
        Type::None => AbstractValue::none(),
        Type::Negligible => AbstractValue::negligible(),
        _ => AbstractValue::any(),
    }
}

/// Return the element type shared by every tensor in `locals`, if there is
/// exactly one.
fn common_tensor_dtype(locals: &[AbstractValue]) -> Option<DType> {
    let mut dtypes = locals.iter().filter_map(|value| value.as_tensor().map(|t| t.dtype));
    let first = dtypes.next()?;
    dtypes.all(|dtype| dtype == first).then_some(first)
}

/// Output of a script node which is not executed during compilation.
///
/// In order of precedence this is a tensor of the annotated type, the type
/// and shape recorded on the node when it was created, or `Any`.
fn script_output(engine: &Engine, out: NodeConfig, locals: &[AbstractValue]) -> AbstractValue {
    let call = engine.graph().call(out.node);

    if let Some(annotation) = call.and_then(|call| call.annotation()) {
        return match annotation.dtype() {
            Some(dtype) => AbstractValue::tensor(dtype, Shape::DynamicRank),
            None => abstract_of_type(annotation, None),
        };
    }

    if let Some(call) = call {
        match call.real_type() {
            Some(Type::Negligible) => return AbstractValue::negligible(),
            Some(Type::List(elems)) => {
                if let Some(list @ Value::List(_)) = call.host_list() {
                    return AbstractValue::from_value_in(list, out.context);
                }
                return abstract_of_type(&Type::List(elems.clone()), None);
            }
            Some(ty) => return abstract_of_type(ty, call.real_shape()),
            None => {}
        }
    }

    if engine.config().force_any {
        return AbstractValue::any();
    }
    AbstractValue::any_with_dtype(common_tensor_dtype(locals))
}

/// Mark every element of the script operands used, since a script can
/// read any of them.
fn consume_operands(engine: &mut Engine, values: &[AbstractValue]) {
    if !engine.config().element_usage_tracking {
        return;
    }
    for value in values {
        engine.usage_mut().mark_all_used(value);
    }
}

pub(crate) fn eval_py_execute(
    engine: &mut Engine,
    args: &[ArgConfig],
    out: NodeConfig,
) -> Result<EvalResult, InferError> {
    check_arity(names::PY_EXECUTE, Arity::AtLeast(3), args.len())?;
    let values = engine.eval_args(args)?;

    if values[0].value().as_str().is_none() {
        return Err(InferError::internal(format!(
            "For primitive '{}', the script should be a constant string, but got {}.",
            names::PY_EXECUTE,
            values[0]
        )));
    }
    let (Some(keys), Some(locals)) = (values[1].as_sequence(), values[2].as_sequence()) else {
        return Err(InferError::internal(format!(
            "For primitive '{}', keys and values should be tuples, but got {} and {}.",
            names::PY_EXECUTE,
            values[1],
            values[2]
        )));
    };
    if keys.len() != locals.len() {
        return Err(InferError::internal(format!(
            "For primitive '{}', the number of keys and values should be equal.",
            names::PY_EXECUTE
        )));
    }
    let locals = locals.elements().to_vec();

    consume_operands(engine, &values[1..]);
    Ok(EvalResult::new(script_output(engine, out, &locals)))
}

/// Return the entries of a dict operand of `PyInterpret`.
fn dict_entries<'a>(
    value: &'a AbstractValue,
    what: &str,
) -> Result<&'a [(Value, AbstractValue)], InferError> {
    match value.kind() {
        AbstractKind::Dictionary(entries) => Ok(entries),
        _ => Err(InferError::internal(format!(
            "For primitive '{}', the {} should be a dict, but got {}.",
            names::PY_INTERPRET,
            what,
            value
        ))),
    }
}

pub(crate) fn eval_py_interpret(
    engine: &mut Engine,
    args: &[ArgConfig],
    out: NodeConfig,
) -> Result<EvalResult, InferError> {
    check_arity(names::PY_INTERPRET, Arity::AtLeast(3), args.len())?;
    let values = engine.eval_args(args)?;

    let script = values[0].value();
    let Some(script) = script.as_str() else {
        return Err(InferError::internal(format!(
            "For primitive '{}', the script should be a constant string, but got {}.",
            names::PY_INTERPRET,
            values[0]
        )));
    };
    let globals = dict_entries(&values[1], "globals")?;
    let locals = dict_entries(&values[2], "locals")?;
    consume_operands(engine, &values[1..]);

    let local_values: Vec<AbstractValue> = locals.iter().map(|(_, v)| v.clone()).collect();
    if local_values.iter().any(|v| v.is_variable()) {
        tracing::debug!(
            script,
            "script locals are not constant, deferring to runtime"
        );
        return Ok(EvalResult::new(script_output(engine, out, &local_values)));
    }

    let mut scope = ScriptScope::default();
    for (key, value) in globals {
        match value.value() {
            graph @ Value::Graph(_) => scope.functions.push((key.clone(), graph)),
            _ if value.as_function().is_some() => {}
            other => scope.globals.push((key.clone(), other)),
        }
    }
    for (key, value) in locals {
        if value.as_function().is_none() {
            scope.locals.push((key.clone(), value.value()));
        }
    }

    let host = engine.require_host("execute a script")?;
    let result = host
        .execute_script(script, &scope)
        .map_err(InferError::host)?;
    let value = match result {
        Some(value) => AbstractValue::from_value_in(&value, out.context),
        None => AbstractValue::none(),
    };
    Ok(EvalResult::new(value))
}

#[cfg(test)]
mod tests {
    use super::{abstract_of_type, common_tensor_dtype};
    use crate::abstract_value::AbstractValue;
    use crate::types::{DType, Shape, Type};
    use crate::value::Value;

    #[test]
    fn test_abstract_of_type() {
        assert_eq!(
            abstract_of_type(&Type::bool(), Some(&Shape::DynamicRank)),
            AbstractValue::tensor(DType::Bool, Shape::DynamicRank)
        );
        assert_eq!(
            abstract_of_type(&Type::Number(DType::Int64), Some(&Shape::scalar())),
            AbstractValue::scalar_of(Type::Number(DType::Int64))
        );
        assert_eq!(
            abstract_of_type(&Type::Tuple(Some(vec![Type::String])), None),
            AbstractValue::tuple(vec![AbstractValue::scalar_of(Type::String)])
        );
        assert!(abstract_of_type(&Type::Dict, None).is_any());
    }

    #[test]
    fn test_common_tensor_dtype() {
        let f32_tensor = AbstractValue::tensor(DType::Float32, Shape::fixed(&[2]));
        let i32_tensor = AbstractValue::tensor(DType::Int32, Shape::fixed(&[2]));
        let scalar = AbstractValue::scalar(Value::Int(1));

        assert_eq!(
            common_tensor_dtype(&[f32_tensor.clone(), scalar.clone(), f32_tensor.clone()]),
            Some(DType::Float32)
        );
        assert_eq!(common_tensor_dtype(&[f32_tensor, i32_tensor]), None);
        assert_eq!(common_tensor_dtype(&[scalar]), None);
    }
}
