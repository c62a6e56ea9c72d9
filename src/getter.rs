//! Attribute access, symbol resolution and attribute assignment.
//!
//! `getattr(obj, name)` is resolved statically in this order:
//!
//! 1. Members of user-defined objects: instances created by
//!    `create_instance`, graphs bound to a cell or jit class, and attributes
//!    of primitives.
//! 2. Builtin attributes and methods of the operand's type.
//! 3. Symbols of a namespace operand.
//! 4. In lax mode, a host script which performs the access at runtime.
//!
//! If none of these apply, a default operand is used if present, otherwise
//! the access fails with an AttributeError.

use std::sync::Arc;

use crate::abstract_value::{AbstractFunction, AbstractKind, AbstractValue, EvalResult};
use crate::engine::{ArgConfig, Engine, NodeConfig};
use crate::error::InferError;
use crate::evaluator::check_arity;
use crate::fallback::add_script_call;
use crate::graph::NodeId;
use crate::ops::Arity;
use crate::primitive::{names, Primitive};
use crate::value::{ClassKind, ClassObject, Namespace, Value};

pub mod builtins;

use builtins::Builtin;

/// Return the attribute or symbol name given by an operand.
fn attr_name(prim_name: &str, value: &AbstractValue) -> Result<String, InferError> {
    match value.value() {
        Value::Str(name) | Value::Symbol(name) => Ok(name.to_string()),
        other => Err(InferError::type_error(format!(
            "For primitive '{}', the attribute name should be a constant string, but got {}.",
            prim_name, other
        ))),
    }
}

fn add_prim_call(
    engine: &mut Engine,
    origin: NodeId,
    prim: &str,
    args: &[NodeId],
) -> Result<NodeId, InferError> {
    let callee = engine
        .graph_mut()
        .add_value(Value::Primitive(Arc::new(Primitive::new(prim))));
    let mut inputs = vec![callee];
    inputs.extend_from_slice(args);
    engine.graph_mut().add_call_from(origin, inputs)
}

/// Return the class whose members an object exposes, if it is a
/// user-defined object.
fn member_class(engine: &Engine, obj: &AbstractValue) -> Option<Arc<ClassObject>> {
    let class_of = |value: &Value| match value {
        Value::Class(class) | Value::Instance(class) => Some(class.clone()),
        _ => None,
    };
    match obj.kind() {
        AbstractKind::Function(AbstractFunction::Partial { func, args, .. }) => {
            let prim = func.as_primitive()?;
            if prim.name() != names::CREATE_INSTANCE {
                return None;
            }
            class_of(&args.first()?.value())
        }
        AbstractKind::Function(AbstractFunction::Graph { graph, object, .. }) => {
            let object = object
                .clone()
                .or_else(|| engine.graph().graph(*graph)?.object().cloned())?;
            class_of(&object).filter(|class| {
                matches!(class.kind(), ClassKind::Cell | ClassKind::JitClass)
            })
        }
        AbstractKind::Class(value) => class_of(value),
        _ => None,
    }
}

/// Resolve `name` in `ns`, forwarding `out` to a node holding the symbol's
/// value. Methods of instances are bound to the instance.
fn resolve_in_namespace(
    engine: &mut Engine,
    ns: &Namespace,
    name: &str,
    owner: Option<NodeId>,
    out: NodeConfig,
) -> Result<Option<EvalResult>, InferError> {
    let Some(value) = ns.resolve(name).cloned() else {
        return Ok(None);
    };
    let is_method = matches!(value, Value::Graph(_));
    let value_node = engine.graph_mut().add_value(value);
    let target = match owner {
        Some(owner) if is_method => {
            add_prim_call(engine, out.node, names::PARTIAL, &[value_node, owner])?
        }
        _ => value_node,
    };
    engine.forward(out, target).map(Some)
}

/// Synthesize a host script which reads the attribute at runtime.
fn interpret_getattr(
    engine: &mut Engine,
    args: &[ArgConfig],
    name: &str,
    out: NodeConfig,
) -> Result<Option<EvalResult>, InferError> {
    let source = engine
        .graph()
        .debug_info(out.node)
        .and_then(|debug| debug.source.clone());
    let Some(source) = source else {
        tracing::warn!(
            node = %engine.graph().describe(out.node),
            attr = name,
            "attribute access has no source location, cannot fall back to the host"
        );
        return Ok(None);
    };

    let nodes = engine.arg_nodes(args, out.context);
    let node = if source.trim_start().starts_with("getattr(") {
        let keys = [
            "__internal_getattr_owner__",
            "__internal_getattr_name__",
            "__internal_getattr_default__",
        ];
        let locals: Vec<(&str, NodeId)> = keys.iter().copied().zip(nodes).collect();
        let params: Vec<&str> = locals.iter().map(|(key, _)| *key).collect();
        let script = format!("getattr({})", params.join(", "));
        add_script_call(engine, out.node, &script, &locals)?
    } else {
        let script = format!("__internal_getattr_owner__.{}", name);
        add_script_call(
            engine,
            out.node,
            &script,
            &[("__internal_getattr_owner__", nodes[0])],
        )?
    };
    engine.forward(out, node).map(Some)
}

/// Resolve attribute `name` of `obj`, the value of operand `args[0]`.
fn static_getter(
    engine: &mut Engine,
    args: &[ArgConfig],
    obj: &AbstractValue,
    name: &str,
    default: Option<&ArgConfig>,
    out: NodeConfig,
) -> Result<EvalResult, InferError> {
    if let AbstractKind::Function(AbstractFunction::Primitive(prim)) = obj.kind() {
        if let Some(value) = prim.attr(name) {
            return Ok(EvalResult::new(AbstractValue::from_value_in(&value, out.context)));
        }
    }
    if let Some(class) = member_class(engine, obj) {
        let owner = matches!(obj.value(), Value::Instance(_))
            .then(|| engine.arg_node(&args[0], out.context));
        let members = class.member_namespace();
        if let Some(result) = resolve_in_namespace(engine, &members, name, owner, out)? {
            return Ok(result);
        }
    }

    if let Some(builtin) = builtins::lookup(obj.ty().kind(), name) {
        let owner = engine.arg_node(&args[0], out.context);
        let node = match builtin {
            Builtin::Attr(prim) => add_prim_call(engine, out.node, prim, &[owner])?,
            Builtin::Method(prim) => {
                let prim_node = engine
                    .graph_mut()
                    .add_value(Value::Primitive(Arc::new(Primitive::new(prim))));
                add_prim_call(engine, out.node, names::PARTIAL, &[prim_node, owner])?
            }
        };
        return engine.forward(out, node);
    }

    if let Value::Namespace(ns) = obj.value() {
        if let Some(result) = resolve_in_namespace(engine, &ns, name, None, out)? {
            return Ok(result);
        }
    }

    if engine.config().allow_runtime_fallback() {
        if let Some(result) = interpret_getattr(engine, args, name, out)? {
            return Ok(result);
        }
    }

    if let Some(default) = default {
        let node = engine.arg_node(default, out.context);
        return engine.forward(out, node);
    }

    match obj.value() {
        Value::Namespace(ns) => Err(InferError::attribute_error(format!(
            "Namespace '{}' has no attribute '{}'.",
            ns.name(),
            name
        ))),
        Value::Class(class) | Value::Instance(class) => Err(InferError::attribute_error(format!(
            "'{}' object has no attribute '{}'.",
            class.name(),
            name
        ))),
        _ => Err(InferError::attribute_error(format!(
            "'{}' object has no attribute '{}'.",
            obj.ty(),
            name
        ))),
    }
}

pub(crate) fn eval_getattr(
    engine: &mut Engine,
    args: &[ArgConfig],
    out: NodeConfig,
) -> Result<EvalResult, InferError> {
    check_arity(names::GETATTR, Arity::Range(2, 3), args.len())?;
    let obj = engine.eval_arg(&args[0])?;
    if let AbstractKind::Problem { payload, .. } = obj.kind() {
        return Ok(EvalResult::new(AbstractValue::problem(payload, out.node)));
    }
    let name = attr_name(names::GETATTR, &engine.eval_arg(&args[1])?)?;
    static_getter(engine, args, &obj, &name, args.get(2), out)
}

/// Resolve a symbol in a namespace or class.
pub(crate) fn eval_resolve(
    engine: &mut Engine,
    args: &[ArgConfig],
    out: NodeConfig,
) -> Result<EvalResult, InferError> {
    check_arity(names::RESOLVE, Arity::Exact(2), args.len())?;
    let ns = engine.eval_arg(&args[0])?;
    if let AbstractKind::Problem { payload, .. } = ns.kind() {
        return Ok(EvalResult::new(AbstractValue::problem(payload, out.node)));
    }
    let name = attr_name(names::RESOLVE, &engine.eval_arg(&args[1])?)?;
    static_getter(engine, args, &ns, &name, None, out)
}

/// Assign an attribute of an object, via a host script.
///
/// Operands are the owner, the attribute name, the new value and an
/// optional monad.
pub(crate) fn eval_setattr(
    engine: &mut Engine,
    args: &[ArgConfig],
    out: NodeConfig,
) -> Result<EvalResult, InferError> {
    check_arity(names::SETATTR, Arity::Range(3, 4), args.len())?;
    let owner = engine.eval_arg(&args[0])?;
    let name = attr_name(names::SETATTR, &engine.eval_arg(&args[1])?)?;
    if owner.as_tensor().is_some_and(|t| t.is_ref) {
        return Err(InferError::value_error(format!(
            "Can not set attribute '{}' of a parameter.",
            name
        )));
    }

    let owner_node = engine.arg_node(&args[0], out.context);
    let name_node = engine.arg_node(&args[1], out.context);
    let value_node = engine.arg_node(&args[2], out.context);
    let script = format!(
        "__fallback_setattr__(__internal_setattr_owner__, {}, __internal_setattr_value__)",
        name
    );
    let node = add_script_call(
        engine,
        out.node,
        &script,
        &[
            ("__internal_setattr_owner__", owner_node),
            (&name, name_node),
            ("__internal_setattr_value__", value_node),
        ],
    )?;
    engine.graph_mut().mark_side_effect(node);
    engine.forward(out, node)
}
