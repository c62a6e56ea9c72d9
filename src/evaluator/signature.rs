//! Evaluators for signature wrappers, graph unpacking and mixed-precision
//! casts. These rewrite the call and forward evaluation.

use std::sync::Arc;

use super::{check_arity, evaluates_undetermined, problem_result};
use crate::abstract_value::{AbstractFunction, AbstractKind, AbstractValue, EvalResult};
use crate::engine::{ArgConfig, Engine, NodeConfig};
use crate::error::InferError;
use crate::graph::NodeId;
use crate::ops::Arity;
use crate::primitive::{names, PrimKind, Primitive};
use crate::value::Value;

/// Call the function wrapped by a signature primitive directly.
pub(super) fn eval_do_signature(
    engine: &mut Engine,
    prim: &Arc<Primitive>,
    args: &[ArgConfig],
    out: NodeConfig,
) -> Result<EvalResult, InferError> {
    let PrimKind::DoSignature(func) = prim.kind() else {
        return Err(InferError::internal(format!(
            "Primitive '{}' is not a signature wrapper",
            prim.name()
        )));
    };

    // Operands bound by a partial application have no input on this node.
    if args.iter().all(|arg| matches!(arg, ArgConfig::Node(_))) {
        let expected = engine.graph().inputs(out.node).len().saturating_sub(1);
        if args.len() != expected {
            return Err(InferError::malformed(format!(
                "For '{}', the number of inputs should be {}, but got {}.",
                prim.name(),
                expected,
                args.len()
            )));
        }
    }

    let values = engine.eval_args(args)?;
    let wrapped_name = match func {
        Value::Primitive(wrapped) => Some(wrapped.name().to_string()),
        _ => None,
    };
    if wrapped_name.as_deref() == Some(names::IS_INSTANCE)
        && engine.config().element_usage_tracking
    {
        for value in &values {
            engine.usage_mut().mark_all_used(value);
        }
    }
    if let Some(problem) = problem_result(&values, out) {
        return Ok(EvalResult::new(problem));
    }
    let skips_check = wrapped_name.as_deref().is_some_and(evaluates_undetermined);
    if !skips_check && values.iter().any(|v| v.contains_undetermined()) {
        tracing::debug!(
            prim = prim.name(),
            "operand is undetermined, skipping inference"
        );
        return Ok(EvalResult::new(AbstractValue::undetermined()));
    }

    let callee = engine.graph_mut().add_value(func.clone());
    let mut inputs = vec![callee];
    inputs.extend(engine.arg_nodes(args, out.context));
    let new_node = engine.graph_mut().add_call_from(out.node, inputs)?;
    engine.forward(out, new_node)
}

/// Count the positional arguments an operand is unpacked into.
fn unpacked_len(value: &AbstractValue) -> Result<usize, InferError> {
    match value.kind() {
        AbstractKind::Tuple(seq) | AbstractKind::List(seq) => seq.len().ok_or_else(|| {
            InferError::type_error("Cannot unpack a sequence of dynamic length.")
        }),
        AbstractKind::Dictionary(entries) => Ok(entries.len()),
        _ => Ok(1),
    }
}

/// Validate that a graph can be called with tuple and dict operands spread
/// into its parameters, and produce the graph.
pub(super) fn eval_unpack_graph(
    engine: &mut Engine,
    prim: &Arc<Primitive>,
    args: &[ArgConfig],
    out: NodeConfig,
) -> Result<EvalResult, InferError> {
    let &PrimKind::UnpackGraph {
        with_sens,
        need_unpack_args,
    } = prim.kind()
    else {
        return Err(InferError::internal(format!(
            "Primitive '{}' does not unpack graphs",
            prim.name()
        )));
    };
    check_arity(prim.name(), Arity::AtLeast(1), args.len())?;

    let values = engine.eval_args(args)?;
    if let Some(problem) = problem_result(&values, out) {
        return Ok(EvalResult::new(problem));
    }
    let graph = match values[0].as_function() {
        Some(AbstractFunction::Graph { graph, .. }) => *graph,
        _ => {
            return Err(InferError::type_error(format!(
                "For '{}', the first input should be a graph function, but got {}.",
                prim.name(),
                values[0]
            )));
        }
    };

    let mut rest = &values[1..];
    let mut count = 0;
    if with_sens {
        let Some((_sens, inputs)) = rest.split_last() else {
            return Err(InferError::value_error(
                "Grad with sens, but the sens is not provided.",
            ));
        };
        rest = inputs;
        count += 1;
    }
    if need_unpack_args {
        for value in rest {
            count += unpacked_len(value)?;
        }
    } else {
        count += rest.len();
    }

    let func_graph = engine
        .graph()
        .graph(graph)
        .ok_or_else(|| InferError::internal(format!("Invalid graph {}", graph)))?;
    let num_params = func_graph.parameters().len();
    if count != num_params {
        return Err(InferError::type_error(format!(
            "The function '{}' takes {} positional arguments, but {} were given.",
            func_graph.name(),
            num_params,
            count
        )));
    }
    Ok(EvalResult::new(values[0].clone()))
}

fn add_prim_call(
    engine: &mut Engine,
    origin: NodeId,
    name: &str,
    args: &[NodeId],
) -> Result<NodeId, InferError> {
    let prim = Arc::new(Primitive::new(name));
    let callee = engine.graph_mut().add_value(Value::Primitive(prim));
    let mut inputs = vec![callee];
    inputs.extend_from_slice(args);
    engine.graph_mut().add_call_from(origin, inputs)
}

/// Build nodes which cast every floating-point tensor in `value`, the
/// output of `node`, to the type produced by `dst`.
fn build_cast(
    engine: &mut Engine,
    origin: NodeId,
    node: NodeId,
    value: &AbstractValue,
    dst: NodeId,
) -> Result<NodeId, InferError> {
    match value.kind() {
        AbstractKind::Tensor(t) if t.dtype.is_float() => {
            add_prim_call(engine, origin, names::CAST, &[node, dst])
        }
        AbstractKind::Tuple(seq) if !seq.is_dynamic_len() => {
            let mut elems = Vec::with_capacity(seq.elements().len());
            for (i, elem) in seq.elements().iter().enumerate() {
                let index = engine.graph_mut().add_value(Value::Int(i as i64));
                let item = add_prim_call(engine, origin, names::TUPLE_GETITEM, &[node, index])?;
                elems.push(build_cast(engine, origin, item, elem, dst)?);
            }
            add_prim_call(engine, origin, names::MAKE_TUPLE, &elems)
        }
        AbstractKind::Dictionary(entries) => {
            let mut values = Vec::with_capacity(entries.len());
            for (key, elem) in entries {
                let key_node = engine.graph_mut().add_value(key.clone());
                let item = add_prim_call(engine, origin, names::DICT_GETITEM, &[node, key_node])?;
                values.push(build_cast(engine, origin, item, elem, dst)?);
            }
            let keys = Value::tuple(entries.iter().map(|(key, _)| key.clone()));
            let keys_node = engine.graph_mut().add_value(keys);
            let values_node = add_prim_call(engine, origin, names::MAKE_TUPLE, &values)?;
            add_prim_call(engine, origin, names::MAKE_DICT, &[keys_node, values_node])
        }
        AbstractKind::KeywordArg { key, value } => {
            let key_node = engine.graph_mut().add_value(Value::Str(key.clone()));
            let item = add_prim_call(
                engine,
                origin,
                names::EXTRACT_KEYWORD_ARG,
                &[key_node, node],
            )?;
            let cast = build_cast(engine, origin, item, value, dst)?;
            add_prim_call(engine, origin, names::MAKE_KEYWORD_ARG, &[key_node, cast])
        }
        _ => Ok(node),
    }
}

/// Cast the floating-point tensors of a nested structure to a given type.
///
/// Operands are the destination type and the value to cast.
pub(super) fn eval_mixed_precision_cast(
    engine: &mut Engine,
    args: &[ArgConfig],
    out: NodeConfig,
) -> Result<EvalResult, InferError> {
    if args.len() < 2 {
        return Err(InferError::malformed(format!(
            "For 'MixedPrecisionCast', the number of inputs should be greater than 2, but got {}.",
            args.len() + 1
        )));
    }
    let value = engine.eval_arg(&args[1])?;
    let dst = engine.arg_node(&args[0], out.context);
    let source = engine.arg_node(&args[1], out.context);
    let new_node = build_cast(engine, out.node, source, &value, dst)?;
    engine.forward(out, new_node)
}
