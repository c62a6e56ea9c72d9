//! Evaluator for creating class instances during compilation.

use super::{check_arity, problem_result};
use crate::abstract_value::{AbstractValue, EvalResult};
use crate::engine::{ArgConfig, Engine, NodeConfig};
use crate::error::InferError;
use crate::ops::Arity;
use crate::primitive::names;
use crate::value::Value;

/// Create an instance of a class with constant constructor arguments, via
/// the host runtime.
pub(super) fn eval_create_instance(
    engine: &mut Engine,
    args: &[ArgConfig],
    out: NodeConfig,
) -> Result<EvalResult, InferError> {
    check_arity(names::CREATE_INSTANCE, Arity::AtLeast(1), args.len())?;
    let values = engine.eval_args(args)?;
    if let Some(problem) = problem_result(&values, out) {
        return Ok(EvalResult::new(problem));
    }

    let class = values[0].value();
    let class_name = match &class {
        Value::Class(class) => class.name().to_string(),
        Value::Type(ty) => ty.to_string(),
        other => {
            return Err(InferError::type_error(format!(
                "For primitive '{}', the first input should be a class, but got {}.",
                names::CREATE_INSTANCE,
                other
            )));
        }
    };

    let mut params = Vec::with_capacity(values.len() - 1);
    for (i, arg) in values[1..].iter().enumerate() {
        if arg.is_variable() {
            return Err(InferError::type_error(format!(
                "The {}th initializing input to create instance for {} should be a constant, but got: {}",
                i, class_name, arg
            )));
        }
        params.push(arg.value());
    }

    let host = engine.require_host(&format!("create an instance of {}", class_name))?;
    let obj = host
        .construct_object(&class, &params)
        .map_err(InferError::host)?
        .ok_or_else(|| {
            InferError::type_error(format!(
                "Failed to create an instance of {} during compilation.",
                class_name
            ))
        })?;

    if engine.config().check_side_effect {
        if let Value::Primitive(prim) = &obj {
            let effects = prim.effects();
            if effects.memory || effects.io {
                tracing::debug!(prim = prim.name(), "created primitive has side effects");
                engine.graph_mut().mark_side_effect(out.node);
            }
        }
    }

    Ok(EvalResult::new(AbstractValue::from_value_in(&obj, out.context)))
}
