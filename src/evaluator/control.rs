//! Evaluators for partial application, `raise`, branch conditions and
//! `with` statements.

use std::sync::Arc;

use super::{check_arity, problem_result};
use crate::abstract_value::{AbstractFunction, AbstractKind, AbstractValue, EvalResult};
use crate::engine::{ArgConfig, Engine, NodeConfig};
use crate::error::{ExceptionKind, InferError};
use crate::fallback::add_script_call;
use crate::getter::builtins::truth_primitive;
use crate::ops::Arity;
use crate::primitive::{names, PrimKind, Primitive};
use crate::types::{DType, Shape, Type};
use crate::value::{ClassKind, Value};

pub(super) fn eval_partial(
    engine: &mut Engine,
    prim: &Arc<Primitive>,
    args: &[ArgConfig],
    out: NodeConfig,
) -> Result<EvalResult, InferError> {
    check_arity(names::PARTIAL, Arity::AtLeast(1), args.len())?;
    let (func_arg, bound_args) = (&args[0], &args[1..]);
    let func = engine.eval_arg(func_arg)?;

    let func = match func.kind() {
        AbstractKind::Problem { payload, .. } => {
            return Ok(EvalResult::new(AbstractValue::problem(payload, out.node)));
        }
        AbstractKind::Function(func) => func.clone(),
        _ => {
            return Err(InferError::type_error(format!(
                "For primitive '{}', the first input should be a function, but got {}.",
                names::PARTIAL,
                func
            )));
        }
    };

    // A partial of a signature wrapper is rewritten so the bound function
    // goes through signature resolution when called.
    if let AbstractFunction::Primitive(wrapped) = &func {
        if let PrimKind::DoSignature(_) = wrapped.kind() {
            let callee = engine.graph_mut().add_value(Value::Primitive(prim.clone()));
            let target = engine
                .graph_mut()
                .add_value(Value::Signature(Arc::new(Value::Primitive(wrapped.clone()))));
            let mut inputs = vec![callee, target];
            inputs.extend(engine.arg_nodes(bound_args, out.context));
            let new_node = engine.graph_mut().add_call_from(out.node, inputs)?;
            return engine.forward(out, new_node);
        }
    }

    let bound = engine.eval_args(bound_args)?;
    Ok(EvalResult::new(AbstractValue::function(
        AbstractFunction::Partial {
            func: Arc::new(func),
            args: bound,
            node: out.node,
        },
    )))
}

/// Return true if `out` is inside a branch whose condition, or the
/// condition of any enclosing branch, is only known at runtime.
fn in_variable_branch(engine: &mut Engine, out: NodeConfig) -> Result<bool, InferError> {
    let mut graph = engine.graph().graph_of(out.node);
    while let Some(id) = graph {
        let Some(func_graph) = engine.graph().graph(id) else {
            break;
        };
        let (cond, parent) = (func_graph.branch_condition(), func_graph.parent());
        if let Some(cond) = cond {
            let value = engine.eval(NodeConfig::new(cond, out.context))?;
            if value.value().is_variable() {
                return Ok(true);
            }
        }
        graph = parent;
    }
    Ok(false)
}

fn exception_kind(value: &Value) -> Option<ExceptionKind> {
    match value {
        Value::Str(name) | Value::Symbol(name) => ExceptionKind::from_name(name),
        Value::Class(class) => ExceptionKind::from_name(class.name()),
        _ => None,
    }
}

/// Render one part of an exception message. Strings are used as-is,
/// symbols are quoted and sequences are parenthesized.
fn render_piece(value: &Value) -> String {
    match value {
        Value::Str(s) => s.to_string(),
        Value::Symbol(s) => format!("'{}'", s),
        Value::Tuple(elems) | Value::List(elems) => render_group(elems),
        other => other.py_str(),
    }
}

fn render_group(pieces: &[Value]) -> String {
    let parts: Vec<String> = pieces.iter().map(render_piece).collect();
    format!("({})", parts.join(", "))
}

fn exception_message(pieces: &[Value]) -> String {
    match pieces {
        [] => String::new(),
        [single] => render_piece(single),
        many => render_group(many),
    }
}

pub(super) fn eval_raise(
    engine: &mut Engine,
    args: &[ArgConfig],
    out: NodeConfig,
) -> Result<EvalResult, InferError> {
    let values = engine.eval_args(args)?;
    if engine.config().element_usage_tracking {
        for value in &values {
            engine.usage_mut().mark_all_used(value);
        }
    }
    if let Some(problem) = problem_result(&values, out) {
        return Ok(EvalResult::new(problem));
    }
    let Some((exc_type, pieces)) = values.split_first() else {
        return Err(InferError::internal("No active exception to re-raise."));
    };

    if values.iter().any(|v| v.is_variable()) || in_variable_branch(engine, out)? {
        tracing::debug!(
            node = %engine.graph().describe(out.node),
            "deferring raise to runtime"
        );
        engine.graph_mut().mark_side_effect(out.node);
        return Ok(EvalResult::new(AbstractValue::negligible()));
    }

    let exc_value = exc_type.value();
    let kind = exception_kind(&exc_value).ok_or_else(|| {
        InferError::type_error(format!("Unsupported exception type: {}.", exc_value))
    })?;
    let pieces: Vec<Value> = pieces.iter().map(|piece| piece.value()).collect();
    Err(InferError::user(kind, exception_message(&pieces)))
}

/// Convert a branch condition to a boolean.
///
/// Operands are the condition and a constant flag which is true for loop
/// conditions.
pub(super) fn eval_cond(
    engine: &mut Engine,
    args: &[ArgConfig],
    out: NodeConfig,
) -> Result<EvalResult, InferError> {
    check_arity(names::COND, Arity::Range(1, 2), args.len())?;
    let cond = engine.eval_arg(&args[0])?;
    let is_loop = match args.get(1) {
        Some(flag) => engine.eval_arg(flag)?.value().as_bool().unwrap_or(false),
        None => false,
    };
    if let AbstractKind::Problem { payload, .. } = cond.kind() {
        return Ok(EvalResult::new(AbstractValue::problem(payload, out.node)));
    }
    let cond_node = engine.arg_node(&args[0], out.context);

    let new_node = if cond.is_any() {
        let node = add_script_call(
            engine,
            out.node,
            "bool(__input__)",
            &[("__input__", cond_node)],
        )?;
        engine
            .graph_mut()
            .set_real_type_shape(node, Type::bool(), Some(Shape::DynamicRank));
        node
    } else if is_loop && cond.as_tensor().is_some() {
        let dtype = engine.graph_mut().add_value(Value::Type(Type::Tensor(Some(DType::Bool))));
        let cast = Arc::new(Primitive::new(names::CAST));
        let callee = engine.graph_mut().add_value(Value::Primitive(cast));
        engine
            .graph_mut()
            .add_call_from(out.node, vec![callee, cond_node, dtype])?
    } else {
        let prim = Arc::new(Primitive::new(truth_primitive(cond.ty().kind())));
        let callee = engine.graph_mut().add_value(Value::Primitive(prim));
        engine
            .graph_mut()
            .add_call_from(out.node, vec![callee, cond_node])?
    };
    engine.forward(out, new_node)
}

/// Call `__enter__` or `__exit__` on a jit class instance.
pub(super) fn eval_with(
    engine: &mut Engine,
    exit: bool,
    args: &[ArgConfig],
    out: NodeConfig,
) -> Result<EvalResult, InferError> {
    let (prim_name, method_name) = if exit {
        (names::WITH_EXIT, "__exit__")
    } else {
        (names::WITH_ENTER, "__enter__")
    };
    check_arity(prim_name, Arity::Exact(1), args.len())?;

    let obj = engine.eval_arg(&args[0])?;
    let class = match obj.value() {
        Value::Instance(class) if class.kind() == ClassKind::JitClass => class,
        other => {
            return Err(InferError::type_error(format!(
                "Only support jit_class instance, but got {}.",
                other
            )));
        }
    };
    let method = class.member(method_name).cloned().ok_or_else(|| {
        InferError::attribute_error(format!(
            "{} has no {} function, please check the code.",
            class.name(),
            method_name
        ))
    })?;
    let Value::Graph(_) = method else {
        return Err(InferError::type_error(format!(
            "{}.{} should be a function, but got {}.",
            class.name(),
            method_name,
            method
        )));
    };

    let callee = engine.graph_mut().add_value(method);
    let obj_node = engine.arg_node(&args[0], out.context);
    let mut inputs = vec![callee, obj_node];
    if exit {
        for _ in 0..3 {
            inputs.push(engine.graph_mut().add_value(Value::None));
        }
    }
    let new_node = engine.graph_mut().add_call_from(out.node, inputs)?;
    engine.forward(out, new_node)
}
