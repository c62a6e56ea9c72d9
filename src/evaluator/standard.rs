//! Evaluation of primitives with a compiled formula or host inference, and
//! of sequence construction.

use std::sync::Arc;

use super::{check_arity, dispatch_table, problem_result, undetermined_result, Evaluator};
use crate::abstract_value::{AbstractKind, AbstractSequence, AbstractValue, EvalResult};
use crate::cache::GlobalEvalCache;
use crate::engine::{ArgConfig, Engine, ExecutionMode, NodeConfig};
use crate::error::InferError;
use crate::host::{host_output_to_abstract, prepare_host_args, HostBridge};
use crate::ops::{Consumption, OpDef, UniformOp};
use crate::primitive::Primitive;

/// Record how a primitive uses its sequence operands, if element usage is
/// being tracked.
fn consume(engine: &mut Engine, prim_name: &str, consumption: Consumption, args: &[AbstractValue]) {
    if engine.config().element_usage_tracking {
        engine.usage_mut().consume(prim_name, consumption, args);
    }
}

/// Run the compiled formula of `op`.
///
/// Value inference is tried first when every operand is a constant.
fn infer_builtin(
    op: &OpDef,
    prim: &Primitive,
    args: &[AbstractValue],
) -> Result<EvalResult, InferError> {
    check_arity(prim.name(), op.arity, args.len())?;
    let (result, added) = prim.record_added_attrs(|| {
        if args.iter().all(|arg| !arg.is_variable()) {
            if let Some(value) = op.formula.infer_value(prim, args) {
                return Ok(value);
            }
        }
        op.formula.infer_shapes(prim, args)
    });
    let value = result.map_err(|err| InferError::formula(prim.name(), err))?;
    Ok(EvalResult::with_attrs(value, added))
}

/// Attach the value computed by the host to `value`, if the host can
/// compute values for `prim` and every operand is a constant.
fn host_infer_value(
    host: &dyn HostBridge,
    prim: &Primitive,
    args: &[AbstractValue],
    value: AbstractValue,
) -> Result<AbstractValue, InferError> {
    if !host.has_infer_value(prim) || args.iter().any(|arg| arg.is_variable()) {
        return Ok(value);
    }
    let host_args = prepare_host_args(prim, args)?;
    match host.infer_value(prim, &host_args).map_err(InferError::host)? {
        Some(known) if value.is_scalar() || value.as_tensor().is_some() => {
            Ok(value.with_value(known))
        }
        Some(known) => Ok(AbstractValue::from_value(&known)),
        None => Ok(value),
    }
}

/// Check and infer `prim` using the host runtime.
fn infer_with_host(
    host: &dyn HostBridge,
    prim: &Primitive,
    args: &[AbstractValue],
) -> Result<EvalResult, InferError> {
    let host_args = prepare_host_args(prim, args)?;
    let (result, added) = prim.record_added_attrs(|| -> Result<AbstractValue, InferError> {
        host.check(prim, &host_args).map_err(InferError::host)?;
        let output = host.infer(prim, &host_args).map_err(InferError::host)?;
        let value = host_output_to_abstract(prim, &output)?;
        host_infer_value(host, prim, args, value)
    });
    Ok(EvalResult::with_attrs(result?, added))
}

pub(super) fn eval_standard(
    engine: &mut Engine,
    op: &'static OpDef,
    prim: &Arc<Primitive>,
    args: &[ArgConfig],
    out: NodeConfig,
) -> Result<EvalResult, InferError> {
    let values = engine.eval_args(args)?;
    check_arity(prim.name(), op.arity, values.len())?;
    consume(engine, prim.name(), op.consumption, &values);

    if let Some(problem) = problem_result(&values, out) {
        return Ok(EvalResult::new(problem));
    }
    if let Some(undetermined) = undetermined_result(prim.name(), &values) {
        return Ok(EvalResult::new(undetermined));
    }
    if let Some(cached) = engine.local_cache(prim.id()).get(&values) {
        prim.set_attrs(cached.added_attrs());
        return Ok(cached);
    }

    let result = infer_builtin(op, prim, &values)?;
    engine.local_cache(prim.id()).insert(values, result.clone());
    Ok(result)
}

pub(super) fn eval_uniform(
    engine: &mut Engine,
    op: &'static UniformOp,
    args: &[ArgConfig],
    out: NodeConfig,
) -> Result<EvalResult, InferError> {
    let values = engine.eval_args(args)?;
    if let Some(problem) = problem_result(&values, out) {
        return Ok(EvalResult::new(problem));
    }
    Ok(EvalResult::new(op.infer(&values)?))
}

pub(super) fn eval_host_infer(
    engine: &mut Engine,
    prim: &Arc<Primitive>,
    args: &[ArgConfig],
    out: NodeConfig,
) -> Result<EvalResult, InferError> {
    let values = engine.eval_args(args)?;
    consume(engine, prim.name(), Consumption::Full, &values);

    if let Some(problem) = problem_result(&values, out) {
        return Ok(EvalResult::new(problem));
    }
    if let Some(undetermined) = undetermined_result(prim.name(), &values) {
        return Ok(EvalResult::new(undetermined));
    }

    let reuse = !prim
        .attr("forbid_reuse")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let use_global = reuse && engine.mode() == ExecutionMode::Graph;

    if reuse {
        if let Some(cached) = engine.local_cache(prim.id()).get(&values) {
            prim.set_attrs(cached.added_attrs());
            return Ok(cached);
        }
    }
    let attrs = prim.attrs();
    if use_global {
        if let Some(cached) = GlobalEvalCache::global().get(prim, &attrs, &values) {
            prim.set_attrs(cached.added_attrs());
            engine.local_cache(prim.id()).insert(values, cached.clone());
            return Ok(cached);
        }
    }

    let host = engine.require_host(&format!("infer primitive '{}'", prim.name()))?;
    let result = infer_with_host(host.as_ref(), prim, &values)?;

    if use_global {
        GlobalEvalCache::global().insert(prim, attrs, values.clone(), result.clone());
    }
    if reuse {
        engine.local_cache(prim.id()).insert(values, result.clone());
    }
    Ok(result)
}

pub(super) fn eval_host_check(
    engine: &mut Engine,
    op: Option<&'static OpDef>,
    prim: &Arc<Primitive>,
    args: &[ArgConfig],
    out: NodeConfig,
) -> Result<EvalResult, InferError> {
    let Some(op) = op else {
        return Err(InferError::internal(format!(
            "Primitive '{}' is checked by the host but has no compiled inference",
            prim.name()
        )));
    };

    let values = engine.eval_args(args)?;
    check_arity(prim.name(), op.arity, values.len())?;
    consume(engine, prim.name(), op.consumption, &values);

    if let Some(problem) = problem_result(&values, out) {
        return Ok(EvalResult::new(problem));
    }
    if let Some(undetermined) = undetermined_result(prim.name(), &values) {
        return Ok(EvalResult::new(undetermined));
    }
    if let Some(cached) = engine.local_cache(prim.id()).get(&values) {
        prim.set_attrs(cached.added_attrs());
        return Ok(cached);
    }

    let result = match engine.host().cloned() {
        Some(host) => {
            let host_args = prepare_host_args(prim, &values)?;
            host.check(prim, &host_args).map_err(InferError::host)?;
            let result = infer_builtin(op, prim, &values)?;
            let value = host_infer_value(host.as_ref(), prim, &values, result.value().clone())?;
            EvalResult::with_attrs(value, result.added_attrs().clone())
        }
        None => infer_builtin(op, prim, &values)?,
    };
    engine.local_cache(prim.id()).insert(values, result.clone());
    Ok(result)
}

pub(super) fn eval_make_sequence(
    engine: &mut Engine,
    list: bool,
    args: &[ArgConfig],
    out: NodeConfig,
) -> Result<EvalResult, InferError> {
    let values = engine.eval_args(args)?;
    if engine.config().element_usage_tracking {
        engine.usage_mut().seed(out.node, values.len());
    }

    let seq = AbstractSequence::new(values).with_origin(out.node);
    let value = if list {
        let host_list = engine
            .graph()
            .call(out.node)
            .and_then(|call| call.host_list())
            .cloned();
        AbstractValue::new(AbstractKind::List(seq.with_host_list(host_list)))
    } else {
        AbstractValue::new(AbstractKind::Tuple(seq))
    };
    Ok(EvalResult::new(value))
}

/// Infer the output of `prim` given its operands, outside of graph
/// evaluation.
///
/// This supports primitives with a compiled formula or host inference. It
/// is used when re-inferring operators at execution time, where no caches
/// or element-usage tracking apply.
pub fn infer_primitive(
    prim: &Primitive,
    args: &[AbstractValue],
    host: Option<&dyn HostBridge>,
) -> Result<AbstractValue, InferError> {
    let evaluator = dispatch_table().evaluator_for(prim)?;
    match evaluator {
        Evaluator::Standard(op) => Ok(infer_builtin(op, prim, args)?.value().clone()),
        Evaluator::Uniform(op) => op.infer(args),
        Evaluator::HostInfer => {
            let host = host.ok_or_else(|| {
                InferError::internal(format!(
                    "No host bridge is installed to infer primitive '{}'",
                    prim.name()
                ))
            })?;
            Ok(infer_with_host(host, prim, args)?.value().clone())
        }
        Evaluator::HostCheck(Some(op)) => {
            let result = infer_builtin(op, prim, args)?.value().clone();
            match host {
                Some(host) => {
                    let host_args = prepare_host_args(prim, args)?;
                    host.check(prim, &host_args).map_err(InferError::host)?;
                    host_infer_value(host, prim, args, result)
                }
                None => {
                    tracing::warn!(prim = prim.name(), "no host bridge, skipping host check");
                    Ok(result)
                }
            }
        }
        _ => Err(InferError::internal(format!(
            "Primitive '{}' cannot be inferred outside of graph evaluation",
            prim.name()
        ))),
    }
}
