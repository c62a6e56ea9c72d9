use std::sync::Arc;

use absint_testing::TestCases;

use super::{dispatch_table, evaluates_undetermined, reset_dispatch_table, signature, Evaluator};
use crate::abstract_value::{AbstractFunction, AbstractKind, AbstractValue};
use crate::engine::{ArgConfig, ContextId, Engine, NodeConfig};
use crate::env::{InferConfig, SyntaxLevel};
use crate::error::{ExceptionKind, InferErrorKind};
use crate::graph::{DebugInfo, GraphId, GraphStore, NodeId};
use crate::host::{HostInferOutput, HostShape, ScriptScope};
use crate::primitive::{names, Primitive};
use crate::test_util::{f32_tensor, prim_call, CallCounts, CannedHost};
use crate::types::{DType, Shape, Type};
use crate::value::{ClassKind, ClassObject, Namespace, NamespaceKind, TensorData, Value};

fn f32_constant(shape: &[usize]) -> Value {
    Value::tensor(TensorData::zeros(DType::Float32, shape.to_vec()))
}

fn with_source(g: &mut GraphStore, node: NodeId, source: &str) {
    g.set_debug_info(
        node,
        DebugInfo {
            name: None,
            source: Some(source.to_string()),
        },
    );
}

/// Evaluate `node` in the outermost context, returning the node evaluation
/// was forwarded to along with the result.
fn infer_forwarded(engine: &mut Engine, node: NodeId) -> (AbstractValue, Option<NodeId>) {
    let value = engine.infer(node).unwrap();
    let target = engine
        .forwarded_to(NodeConfig::new(node, ContextId::TOP))
        .map(|conf| conf.node);
    (value, target)
}

#[test]
fn test_dispatch_table() {
    let table = dispatch_table();

    let evaluator = table.evaluator_for(&Primitive::new(names::GETATTR)).unwrap();
    assert!(matches!(evaluator, Evaluator::GetAttr));
    let evaluator = table.evaluator_for(&Primitive::new("Add")).unwrap();
    assert!(matches!(evaluator, Evaluator::Standard(op) if op.name == "Add"));
    let evaluator = table.evaluator_for(&Primitive::new("ScalarAdd")).unwrap();
    assert!(matches!(evaluator, Evaluator::Uniform(_)));
    let evaluator = table.evaluator_for(&Primitive::host("CustomOp")).unwrap();
    assert!(matches!(evaluator, Evaluator::HostInfer));

    let err = table
        .evaluator_for(&Primitive::new("NoSuchOp"))
        .err()
        .unwrap();
    assert_eq!(err.kind(), InferErrorKind::Internal);
}

#[test]
fn test_reset_dispatch_table() {
    let before = dispatch_table();
    assert!(Arc::ptr_eq(&before, &dispatch_table()));

    reset_dispatch_table();
    let after = dispatch_table();
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(before.len(), after.len());
}

fn host_op_graph(prim: &Arc<Primitive>) -> (GraphStore, GraphId) {
    let mut g = GraphStore::new();
    let main = g.add_graph("main");
    let x = g.add_parameter(main);
    let call = g.add_primitive_call(main, prim.clone(), &[x]);
    g.set_return(main, call);
    (g, main)
}

fn run_host_op(prim: &Arc<Primitive>, host: &Arc<CannedHost>) -> AbstractValue {
    let (g, main) = host_op_graph(prim);
    let mut engine = Engine::new(g, InferConfig::default()).with_host(host.clone());
    engine.run(main, vec![f32_tensor(&[2])]).unwrap()
}

#[test]
fn test_host_infer_uses_global_cache() {
    let output = HostInferOutput::new(HostShape::Dims(vec![2]), Type::Tensor(Some(DType::Float32)));
    let host = Arc::new(CannedHost::new().with_infer_output(output));
    let prim = Arc::new(Primitive::host("CustomOp"));

    let first = run_host_op(&prim, &host);
    assert_eq!(first, f32_tensor(&[2]));
    assert_eq!(CallCounts::get(&host.calls.infer), 1);

    // A new engine with the same primitive and operands reuses the result.
    let second = run_host_op(&prim, &host);
    assert_eq!(second, first);
    assert_eq!(CallCounts::get(&host.calls.infer), 1);

    // Changing an attribute misses the cache.
    prim.set_attr("axis", Value::Int(0));
    run_host_op(&prim, &host);
    assert_eq!(CallCounts::get(&host.calls.infer), 2);
}

#[test]
fn test_host_infer_forbid_reuse() {
    let output = HostInferOutput::new(HostShape::Dims(vec![2]), Type::Tensor(Some(DType::Float32)));
    let host = Arc::new(CannedHost::new().with_infer_output(output));
    let prim = Arc::new(Primitive::host("RandomOp").with_attr("forbid_reuse", Value::Bool(true)));

    run_host_op(&prim, &host);
    run_host_op(&prim, &host);
    assert_eq!(CallCounts::get(&host.calls.infer), 2);
}

#[test]
fn test_host_infer_without_host() {
    let prim = Arc::new(Primitive::host("CustomOp"));
    let (g, main) = host_op_graph(&prim);
    let mut engine = Engine::new(g, InferConfig::default());
    let err = engine.run(main, vec![f32_tensor(&[2])]).err().unwrap();
    assert_eq!(err.kind(), InferErrorKind::Internal);
}

#[test]
fn test_undetermined_operands() {
    let mut g = GraphStore::new();
    let main = g.add_graph("main");
    let x = g.add_parameter(main);
    let neg = prim_call(&mut g, main, "Neg", &[x]);
    let tuple = prim_call(&mut g, main, names::MAKE_TUPLE, &[x]);
    let out = prim_call(&mut g, main, names::MAKE_TUPLE, &[neg, tuple]);
    g.set_return(main, out);

    let mut engine = Engine::new(g, InferConfig::default());
    let result = engine.run(main, vec![AbstractValue::undetermined()]).unwrap();

    let undetermined = AbstractValue::undetermined();
    let elems = result.as_sequence().unwrap().elements();
    assert_eq!(elems[0], undetermined);
    assert_eq!(elems[1].as_sequence().unwrap().elements(), &[undetermined]);

    assert!(evaluates_undetermined(names::MAKE_TUPLE));
    assert!(evaluates_undetermined("ScalarAdd"));
    assert!(!evaluates_undetermined("Neg"));
}

#[test]
fn test_problem_operands_propagate() {
    let mut g = GraphStore::new();
    let main = g.add_graph("main");
    let x = g.add_parameter(main);
    let neg = prim_call(&mut g, main, "Neg", &[x]);
    g.set_return(main, neg);

    let problem = AbstractValue::problem("dead branch", x);
    let mut engine = Engine::new(g, InferConfig::default());
    let result = engine.run(main, vec![problem]).unwrap();
    match result.kind() {
        AbstractKind::Problem { payload, .. } => assert_eq!(payload.as_ref(), "dead branch"),
        other => panic!("expected a problem, got {:?}", other),
    }

    engine.attach_abstracts();
    let neg_value = engine.graph().abstract_value(neg).unwrap();
    assert!(matches!(
        neg_value.kind(),
        AbstractKind::Problem { node, .. } if *node == neg
    ));
}

#[test]
fn test_element_usage() {
    let mut g = GraphStore::new();
    let main = g.add_graph("main");
    let a = g.add_value(Value::Int(1));
    let b = g.add_value(Value::Int(2));
    let c = g.add_value(Value::Int(3));
    let tuple = prim_call(&mut g, main, names::MAKE_TUPLE, &[a, b, c]);
    let index = g.add_value(Value::Int(-2));
    let item = prim_call(&mut g, main, names::TUPLE_GETITEM, &[tuple, index]);

    let pair = prim_call(&mut g, main, names::MAKE_TUPLE, &[a, b]);
    let flag = g.add_value(Value::Bool(true));
    let none = g.add_value(Value::None);
    let switch = prim_call(&mut g, main, names::SWITCH, &[flag, pair, none]);

    let out = prim_call(&mut g, main, names::MAKE_TUPLE, &[item, switch]);
    g.set_return(main, out);

    let mut engine = Engine::new(g, InferConfig::default());
    let result = engine.run(main, vec![]).unwrap();
    assert_eq!(
        result.value(),
        Value::tuple([Value::Int(2), Value::tuple([Value::Int(1), Value::Int(2)])])
    );

    let usage = engine.usage();
    let used: Vec<usize> = usage.flags(tuple).unwrap().iter().collect();
    assert_eq!(used, [1]);
    assert!(usage.flags(pair).unwrap().all_set());
    assert_eq!(usage.flags(out).unwrap().count(), 0);
}

#[test]
fn test_element_usage_disabled() {
    let mut g = GraphStore::new();
    let main = g.add_graph("main");
    let a = g.add_value(Value::Int(1));
    let tuple = prim_call(&mut g, main, names::MAKE_TUPLE, &[a]);
    g.set_return(main, tuple);

    let config = InferConfig {
        element_usage_tracking: false,
        ..Default::default()
    };
    let mut engine = Engine::new(g, config);
    engine.run(main, vec![]).unwrap();
    assert!(engine.usage().flags(tuple).is_none());
}

#[test]
fn test_cond() {
    #[derive(Debug)]
    struct Case {
        cond: Value,
        is_loop: bool,
        forwarded_to: &'static str,
        expected: AbstractValue,
    }

    let cases = [
        Case {
            cond: Value::Any,
            is_loop: false,
            forwarded_to: names::PY_EXECUTE,
            expected: AbstractValue::tensor(DType::Bool, Shape::DynamicRank),
        },
        Case {
            cond: Value::Bool(true),
            is_loop: false,
            forwarded_to: names::BOOL_OF,
            expected: AbstractValue::scalar(Value::Bool(true)),
        },
        Case {
            cond: Value::tuple([]),
            is_loop: false,
            forwarded_to: names::CHECK_LEN,
            expected: AbstractValue::scalar(Value::Bool(false)),
        },
    ];

    cases.test_each(|case| {
        let mut g = GraphStore::new();
        let main = g.add_graph("main");
        let cond = g.add_value(case.cond.clone());
        let flag = g.add_value(Value::Bool(case.is_loop));
        let node = prim_call(&mut g, main, names::COND, &[cond, flag]);

        let mut engine = Engine::new(g, InferConfig::default());
        let (value, target) = infer_forwarded(&mut engine, node);
        assert_eq!(value, case.expected);
        let target = target.unwrap();
        assert!(engine.graph().is_call_to(target, case.forwarded_to));
    });
}

#[test]
fn test_loop_cond_casts_tensor() {
    let mut g = GraphStore::new();
    let main = g.add_graph("main");
    let cond = g.add_value(f32_constant(&[1]));
    let flag = g.add_value(Value::Bool(true));
    let node = prim_call(&mut g, main, names::COND, &[cond, flag]);

    let mut engine = Engine::new(g, InferConfig::default());
    let (value, target) = infer_forwarded(&mut engine, node);

    let tensor = value.as_tensor().unwrap();
    assert_eq!(tensor.dtype, DType::Bool);
    assert_eq!(tensor.shape, Shape::fixed(&[1]));
    assert!(engine.graph().is_call_to(target.unwrap(), names::CAST));
}

struct GetAttrGraph {
    g: GraphStore,
    node: NodeId,
}

fn getattr_graph(obj: Value, name: &str, default: Option<Value>, source: &str) -> GetAttrGraph {
    let mut g = GraphStore::new();
    let main = g.add_graph("main");
    let obj = g.add_value(obj);
    let name = g.add_value(Value::str(name));
    let mut args = vec![obj, name];
    if let Some(default) = default {
        args.push(g.add_value(default));
    }
    let node = prim_call(&mut g, main, names::GETATTR, &args);
    with_source(&mut g, node, source);
    GetAttrGraph { g, node }
}

#[test]
fn test_getattr_builtin_attr() {
    let GetAttrGraph { g, node } = getattr_graph(f32_constant(&[2, 3]), "shape", None, "x.shape");
    let mut engine = Engine::new(g, InferConfig::default());

    let (value, target) = infer_forwarded(&mut engine, node);
    assert_eq!(value.value(), Value::tuple([Value::Int(2), Value::Int(3)]));
    assert!(engine.graph().is_call_to(target.unwrap(), names::SHAPE));
}

#[test]
fn test_getattr_builtin_method() {
    let GetAttrGraph { g, node } = getattr_graph(f32_constant(&[4]), "reshape", None, "x.reshape");
    let mut engine = Engine::new(g, InferConfig::default());

    let (value, target) = infer_forwarded(&mut engine, node);
    let Some(AbstractFunction::Partial { func, args, .. }) = value.as_function()
    else {
        panic!("expected a partial application, got {}", value);
    };
    assert_eq!(func.as_primitive().unwrap().name(), names::RESHAPE);
    assert_eq!(args.len(), 1);
    assert!(engine.graph().is_call_to(target.unwrap(), names::PARTIAL));
}

#[test]
fn test_getattr_namespace_symbol() {
    // Namespaces never expose builtin attributes, even for names that tensors
    // have.
    let ns = Namespace::new(NamespaceKind::Module, "np").with_symbol("shape", Value::Int(5));
    let ns = Value::Namespace(Arc::new(ns));
    let GetAttrGraph { g, node } = getattr_graph(ns, "shape", None, "np.shape");
    let mut engine = Engine::new(g, InferConfig::default());

    let value = engine.infer(node).unwrap();
    assert_eq!(value, AbstractValue::scalar(Value::Int(5)));
}

#[test]
fn test_getattr_missing_namespace_symbol() {
    let ns = Namespace::new(NamespaceKind::Module, "np");
    let ns = Value::Namespace(Arc::new(ns));
    let GetAttrGraph { g, node } = getattr_graph(ns, "foo", None, "np.foo");
    let config = InferConfig {
        syntax_level: SyntaxLevel::Strict,
        ..Default::default()
    };
    let mut engine = Engine::new(g, config);

    let err = engine.infer(node).err().unwrap();
    assert_eq!(
        err.kind(),
        InferErrorKind::User(ExceptionKind::AttributeError)
    );
    assert_eq!(err.message(), "Namespace 'np' has no attribute 'foo'.");
}

#[test]
fn test_getattr_instance_member() {
    let class =
        ClassObject::new("Config", ClassKind::JitClass).with_member("scale", Value::float(0.5));
    let obj = Value::Instance(Arc::new(class));
    let GetAttrGraph { g, node } = getattr_graph(obj, "scale", None, "self.config.scale");
    let mut engine = Engine::new(g, InferConfig::default());

    let value = engine.infer(node).unwrap();
    assert_eq!(value, AbstractValue::scalar(Value::float(0.5)));
}

#[test]
fn test_getattr_primitive_attr() {
    let prim = Primitive::new("Transpose")
        .with_attr("perm", Value::tuple([Value::Int(1), Value::Int(0)]));
    let GetAttrGraph { g, node } =
        getattr_graph(Value::Primitive(Arc::new(prim)), "perm", None, "op.perm");
    let mut engine = Engine::new(g, InferConfig::default());

    let value = engine.infer(node).unwrap();
    assert_eq!(value.value(), Value::tuple([Value::Int(1), Value::Int(0)]));
}

#[test]
fn test_getattr_falls_back_to_host_script() {
    let GetAttrGraph { g, node } = getattr_graph(f32_constant(&[4]), "foo", None, "x.foo");
    let mut engine = Engine::new(g, InferConfig::default());

    let (value, target) = infer_forwarded(&mut engine, node);
    assert_eq!(value, AbstractValue::any_with_dtype(Some(DType::Float32)));

    let target = target.unwrap();
    assert!(engine.graph().is_call_to(target, names::PY_EXECUTE));
    let script = engine.graph().inputs(target)[1];
    assert_eq!(
        engine.graph().value(script),
        Some(&Value::str("__internal_getattr_owner__.foo"))
    );
}

#[test]
fn test_getattr_without_fallback() {
    #[derive(Debug)]
    struct Case {
        default: Option<Value>,
        expected: Option<AbstractValue>,
    }

    let cases = [
        Case {
            default: None,
            expected: None,
        },
        Case {
            default: Some(Value::Int(1)),
            expected: Some(AbstractValue::scalar(Value::Int(1))),
        },
    ];

    cases.test_each(|case| {
        let default = case.default.clone();
        let GetAttrGraph { g, node } =
            getattr_graph(f32_constant(&[4]), "foo", default, "getattr(x, 'foo')");
        let config = InferConfig {
            syntax_level: SyntaxLevel::Strict,
            ..Default::default()
        };
        let mut engine = Engine::new(g, config);

        match &case.expected {
            Some(expected) => assert_eq!(&engine.infer(node).unwrap(), expected),
            None => {
                let err = engine.infer(node).err().unwrap();
                assert_eq!(
        err.kind(),
        InferErrorKind::User(ExceptionKind::AttributeError)
    );
            }
        }
    });
}

#[test]
fn test_setattr_synthesizes_script() {
    let mut g = GraphStore::new();
    let main = g.add_graph("main");
    let owner = g.add_value(Value::Instance(Arc::new(ClassObject::new("Net", ClassKind::Cell))));
    let name = g.add_value(Value::str("count"));
    let value = g.add_value(Value::Int(3));
    let node = prim_call(&mut g, main, names::SETATTR, &[owner, name, value]);

    let mut engine = Engine::new(g, InferConfig::default());
    let (_, target) = infer_forwarded(&mut engine, node);
    let target = target.unwrap();
    assert!(engine.graph().is_call_to(target, names::PY_EXECUTE));
    assert!(engine.graph().call(target).unwrap().has_side_effect());
}

#[test]
fn test_raise_constant() {
    let mut g = GraphStore::new();
    let main = g.add_graph("main");
    let kind = g.add_value(Value::str("ValueError"));
    let message = g.add_value(Value::str("fixed message"));
    let raise = prim_call(&mut g, main, names::RAISE, &[kind, message]);
    g.set_return(main, raise);

    let mut engine = Engine::new(g, InferConfig::default());
    let err = engine.run(main, vec![]).err().unwrap();
    assert_eq!(err.kind(), InferErrorKind::User(ExceptionKind::ValueError));
    assert_eq!(err.message(), "fixed message");
}

#[test]
fn test_raise_variable_is_deferred() {
    let mut g = GraphStore::new();
    let main = g.add_graph("main");
    let x = g.add_parameter(main);
    let kind = g.add_value(Value::str("ValueError"));
    let raise = prim_call(&mut g, main, names::RAISE, &[kind, x]);
    g.set_return(main, raise);

    let mut engine = Engine::new(g, InferConfig::default());
    let result = engine.run(main, vec![AbstractValue::scalar_of(Type::String)]).unwrap();
    assert_eq!(result, AbstractValue::negligible());
    assert!(engine.graph().call(raise).unwrap().has_side_effect());
    assert!(engine.graph().graph(main).unwrap().has_side_effect());
}

fn create_instance_graph(arg: Value) -> (GraphStore, NodeId) {
    let mut g = GraphStore::new();
    let main = g.add_graph("main");
    let class = g.add_value(Value::Class(Arc::new(ClassObject::new("Net", ClassKind::Plain))));
    let arg = g.add_value(arg);
    let node = prim_call(&mut g, main, names::CREATE_INSTANCE, &[class, arg]);
    (g, node)
}

#[test]
fn test_create_instance_requires_constants() {
    let (g, node) = create_instance_graph(Value::Any);
    let host = Arc::new(CannedHost::new());
    let mut engine = Engine::new(g, InferConfig::default()).with_host(host.clone());

    let err = engine.infer(node).err().unwrap();
    assert_eq!(err.kind(), InferErrorKind::User(ExceptionKind::TypeError));
    assert!(err
        .message()
        .starts_with("The 0th initializing input to create instance for Net should be a constant"));
    assert_eq!(CallCounts::get(&host.calls.construct), 0);
}

#[test]
fn test_create_instance() {
    let instance = Value::Instance(Arc::new(ClassObject::new("Net", ClassKind::Plain)));
    let (g, node) = create_instance_graph(Value::Int(3));
    let host = Arc::new(CannedHost::new().with_object(instance.clone()));
    let mut engine = Engine::new(g, InferConfig::default()).with_host(host.clone());

    let value = engine.infer(node).unwrap();
    assert_eq!(value, AbstractValue::from_value(&instance));
    assert_eq!(CallCounts::get(&host.calls.construct), 1);
}

#[test]
fn test_create_instance_rejected_by_host() {
    let (g, node) = create_instance_graph(Value::Int(3));
    let mut engine = Engine::new(g, InferConfig::default()).with_host(Arc::new(CannedHost::new()));

    let err = engine.infer(node).err().unwrap();
    assert_eq!(err.kind(), InferErrorKind::User(ExceptionKind::TypeError));
    assert_eq!(
        err.message(),
        "Failed to create an instance of Net during compilation."
    );
}

#[test]
fn test_with_enter_calls_method() {
    let mut g = GraphStore::new();
    let enter = g.add_graph("enter");
    let this = g.add_parameter(enter);
    g.set_return(enter, this);

    let main = g.add_graph("main");
    let class = ClassObject::new("Timer", ClassKind::JitClass)
        .with_member("__enter__", Value::Graph(enter));
    let obj = g.add_value(Value::Instance(Arc::new(class)));
    let node = prim_call(&mut g, main, names::WITH_ENTER, &[obj]);

    let mut engine = Engine::new(g, InferConfig::default());
    let value = engine.infer(node).unwrap();
    assert!(matches!(value.kind(), AbstractKind::Class(Value::Instance(_))));
}

#[test]
fn test_with_exit_requires_jit_class() {
    let mut g = GraphStore::new();
    let main = g.add_graph("main");
    let obj = g.add_value(Value::Instance(Arc::new(ClassObject::new("File", ClassKind::Plain))));
    let node = prim_call(&mut g, main, names::WITH_EXIT, &[obj]);

    let mut engine = Engine::new(g, InferConfig::default());
    let err = engine.infer(node).err().unwrap();
    assert_eq!(err.kind(), InferErrorKind::User(ExceptionKind::TypeError));
}

#[test]
fn test_partial_binds_arguments() {
    let mut g = GraphStore::new();
    let main = g.add_graph("main");
    let x = g.add_parameter(main);
    let y = g.add_parameter(main);
    let add = g.add_value(Value::Primitive(Arc::new(Primitive::new("Add"))));
    let partial = prim_call(&mut g, main, names::PARTIAL, &[add, x]);
    let call = g.add_call(main, &[partial, y]);
    g.set_return(main, call);

    let mut engine = Engine::new(g, InferConfig::default());
    let result = engine
        .run(main, vec![f32_tensor(&[3, 1]), f32_tensor(&[2])])
        .unwrap();
    assert_eq!(result, f32_tensor(&[3, 2]));
}

struct ScriptGraph {
    g: GraphStore,
    node: NodeId,
    values: NodeId,
}

/// Graph with a `PyExecute` call whose single local is a float tensor.
fn py_execute_graph() -> ScriptGraph {
    let mut g = GraphStore::new();
    let main = g.add_graph("main");
    let script = g.add_value(Value::str("x + 1"));
    let keys = g.add_value(Value::tuple([Value::str("x")]));
    let x = g.add_value(f32_constant(&[2]));
    let values = prim_call(&mut g, main, names::MAKE_TUPLE, &[x]);
    let node = prim_call(&mut g, main, names::PY_EXECUTE, &[script, keys, values]);
    ScriptGraph { g, node, values }
}

#[test]
fn test_py_execute_output() {
    #[derive(Debug)]
    struct Case {
        annotation: Option<Type>,
        real_type: Option<(Type, Option<Shape>)>,
        force_any: bool,
        expected: AbstractValue,
    }

    let cases = [
        Case {
            annotation: None,
            real_type: None,
            force_any: false,
            expected: AbstractValue::any_with_dtype(Some(DType::Float32)),
        },
        Case {
            annotation: None,
            real_type: None,
            force_any: true,
            expected: AbstractValue::any(),
        },
        Case {
            annotation: None,
            real_type: Some((Type::Number(DType::Int64), Some(Shape::scalar()))),
            force_any: true,
            expected: AbstractValue::scalar_of(Type::Number(DType::Int64)),
        },
        Case {
            annotation: None,
            real_type: Some((Type::Tensor(Some(DType::Int32)), Some(Shape::fixed(&[3])))),
            force_any: false,
            expected: AbstractValue::tensor(DType::Int32, Shape::fixed(&[3])),
        },
        // Annotations take precedence over recorded types.
        Case {
            annotation: Some(Type::Tensor(Some(DType::Float16))),
            real_type: Some((Type::Number(DType::Int64), Some(Shape::scalar()))),
            force_any: false,
            expected: AbstractValue::tensor(DType::Float16, Shape::DynamicRank),
        },
        Case {
            annotation: Some(Type::String),
            real_type: None,
            force_any: false,
            expected: AbstractValue::scalar_of(Type::String),
        },
    ];

    cases.test_each(|case| {
        let ScriptGraph { mut g, node, .. } = py_execute_graph();
        if let Some(annotation) = &case.annotation {
            g.set_annotation(node, annotation.clone());
        }
        if let Some((ty, shape)) = &case.real_type {
            g.set_real_type_shape(node, ty.clone(), shape.clone());
        }
        let config = InferConfig {
            force_any: case.force_any,
            ..Default::default()
        };
        let mut engine = Engine::new(g, config);
        assert_eq!(engine.infer(node).unwrap(), case.expected);
    });
}

#[test]
fn test_py_execute_host_list() {
    let ScriptGraph { mut g, node, .. } = py_execute_graph();
    let list = Value::list([Value::Int(1), Value::Int(2)]);
    g.set_real_type_shape(node, Type::List(None), None);
    g.set_host_list(node, list.clone());

    let mut engine = Engine::new(g, InferConfig::default());
    let value = engine.infer(node).unwrap();
    assert_eq!(value, AbstractValue::from_value(&list));
}

#[test]
fn test_py_execute_uses_all_locals() {
    let ScriptGraph { g, node, values } = py_execute_graph();
    let mut engine = Engine::new(g, InferConfig::default());
    engine.infer(node).unwrap();
    assert!(engine.usage().flags(values).unwrap().all_set());
}

#[test]
fn test_py_execute_malformed() {
    let mut g = GraphStore::new();
    let main = g.add_graph("main");
    let script = g.add_value(Value::str("x + y"));
    let keys = g.add_value(Value::tuple([Value::str("x"), Value::str("y")]));
    let x = g.add_value(Value::Int(1));
    let values = prim_call(&mut g, main, names::MAKE_TUPLE, &[x]);
    let node = prim_call(&mut g, main, names::PY_EXECUTE, &[script, keys, values]);

    let mut engine = Engine::new(g, InferConfig::default());
    let err = engine.infer(node).err().unwrap();
    assert_eq!(err.kind(), InferErrorKind::Internal);
}

/// Add a `PyInterpret` call whose locals hold `y = local`. Returns the call
/// and the helper graph exposed to the script.
fn py_interpret_graph(g: &mut GraphStore, local: Value) -> (NodeId, GraphId) {
    let main = g.add_graph("main");
    let helper = g.add_graph("helper");
    let script = g.add_value(Value::str("helper(g + y)"));
    let globals = g.add_value(Value::Dict(
        vec![
            (Value::str("g"), Value::Int(1)),
            (Value::str("helper"), Value::Graph(helper)),
        ]
        .into(),
    ));
    let locals = g.add_value(Value::Dict(vec![(Value::str("y"), local)].into()));
    let node = prim_call(g, main, names::PY_INTERPRET, &[script, globals, locals]);
    (node, helper)
}

#[test]
fn test_py_interpret_constant_scope() {
    let mut g = GraphStore::new();
    let (node, helper) = py_interpret_graph(&mut g, Value::Int(2));
    let host = Arc::new(CannedHost::new().with_script_result(Value::Int(3)));
    let mut engine = Engine::new(g, InferConfig::default()).with_host(host.clone());

    let value = engine.infer(node).unwrap();
    assert_eq!(value, AbstractValue::scalar(Value::Int(3)));

    assert_eq!(host.last_script.lock().as_deref(), Some("helper(g + y)"));
    let expected_scope = ScriptScope {
        globals: vec![(Value::str("g"), Value::Int(1))],
        locals: vec![(Value::str("y"), Value::Int(2))],
        functions: vec![(Value::str("helper"), Value::Graph(helper))],
    };
    assert_eq!(host.last_scope.lock().as_ref(), Some(&expected_scope));
}

#[test]
fn test_py_interpret_variable_locals() {
    let mut g = GraphStore::new();
    let (node, _) = py_interpret_graph(&mut g, Value::Any);
    let host = Arc::new(CannedHost::new().with_script_result(Value::Int(3)));
    let mut engine = Engine::new(g, InferConfig::default()).with_host(host.clone());

    let value = engine.infer(node).unwrap();
    assert!(value.is_any());
    assert_eq!(CallCounts::get(&host.calls.execute), 0);
}

#[test]
fn test_py_interpret_without_host() {
    let mut g = GraphStore::new();
    let (node, _) = py_interpret_graph(&mut g, Value::Int(2));
    let mut engine = Engine::new(g, InferConfig::default());

    let err = engine.infer(node).err().unwrap();
    assert_eq!(err.kind(), InferErrorKind::Internal);
}

fn signature_prim(wrapped: &str) -> Arc<Primitive> {
    let func = Value::Primitive(Arc::new(Primitive::new(wrapped)));
    Arc::new(Primitive::do_signature(&format!("S-{}", wrapped), func))
}

#[test]
fn test_do_signature_calls_wrapped() {
    let mut g = GraphStore::new();
    let main = g.add_graph("main");
    let x = g.add_value(Value::Int(2));
    let y = g.add_value(Value::Int(3));
    let node = g.add_primitive_call(main, signature_prim("ScalarAdd"), &[x, y]);

    let mut engine = Engine::new(g, InferConfig::default());
    let (value, target) = infer_forwarded(&mut engine, node);
    assert_eq!(value.value(), Value::Int(5));
    assert!(engine.graph().is_call_to(target.unwrap(), "ScalarAdd"));
}

#[test]
fn test_do_signature_input_count() {
    let mut g = GraphStore::new();
    let main = g.add_graph("main");
    let x = g.add_value(Value::Int(2));
    let y = g.add_value(Value::Int(3));
    let prim = signature_prim("ScalarAdd");
    let node = g.add_primitive_call(main, prim.clone(), &[x, y]);

    let mut engine = Engine::new(g, InferConfig::default());
    let args = [ArgConfig::Node(NodeConfig::new(x, ContextId::TOP))];
    let err = signature::eval_do_signature(
        &mut engine,
        &prim,
        &args,
        NodeConfig::new(node, ContextId::TOP),
    )
    .err()
    .unwrap();
    assert_eq!(err.kind(), InferErrorKind::Malformed);
    assert_eq!(
        err.message(),
        "For 'S-ScalarAdd', the number of inputs should be 2, but got 1."
    );
}

#[test]
fn test_do_signature_undetermined() {
    #[derive(Debug)]
    struct Case {
        wrapped: &'static str,
        undetermined: bool,
    }

    let cases = [
        Case {
            wrapped: "Add",
            undetermined: true,
        },
        Case {
            wrapped: names::MAKE_TUPLE,
            undetermined: false,
        },
    ];

    cases.test_each(|case| {
        let mut g = GraphStore::new();
        let main = g.add_graph("main");
        let x = g.add_parameter(main);
        let y = g.add_parameter(main);
        let node = g.add_primitive_call(main, signature_prim(case.wrapped), &[x, y]);
        g.set_return(main, node);

        let mut engine = Engine::new(g, InferConfig::default());
        let result = engine
            .run(main, vec![AbstractValue::undetermined(), f32_tensor(&[2])])
            .unwrap();
        let is_undetermined = matches!(result.kind(), AbstractKind::Undetermined { .. });
        assert_eq!(is_undetermined, case.undetermined);
        if !case.undetermined {
            assert!(result.is_tuple());
        }
    });
}

#[test]
fn test_do_signature_isinstance_uses_all_elements() {
    let mut g = GraphStore::new();
    let main = g.add_graph("main");
    let a = g.add_value(Value::Int(1));
    let b = g.add_value(Value::Int(2));
    let tuple = prim_call(&mut g, main, names::MAKE_TUPLE, &[a, b]);
    let model = g.add_value(Value::Type(Type::Tuple(None)));
    let node = g.add_primitive_call(main, signature_prim(names::IS_INSTANCE), &[tuple, model]);

    let mut engine = Engine::new(g, InferConfig::default());
    let value = engine.infer(node).unwrap();
    assert_eq!(value.value(), Value::Bool(true));
    assert!(engine.usage().flags(tuple).unwrap().all_set());
}

#[test]
fn test_unpack_graph() {
    #[derive(Debug)]
    struct Case {
        with_sens: bool,
        need_unpack_args: bool,
        args: Vec<Value>,
        error: Option<(ExceptionKind, &'static str)>,
    }

    let pair = Value::tuple([Value::Int(1), Value::Int(2)]);
    let cases = [
        Case {
            with_sens: false,
            need_unpack_args: false,
            args: vec![Value::Int(1), Value::Int(2)],
            error: None,
        },
        Case {
            with_sens: false,
            need_unpack_args: true,
            args: vec![pair],
            error: None,
        },
        Case {
            with_sens: true,
            need_unpack_args: false,
            args: vec![Value::Int(1), Value::Int(9)],
            error: None,
        },
        Case {
            with_sens: true,
            need_unpack_args: false,
            args: vec![],
            error: Some((
                ExceptionKind::ValueError,
                "Grad with sens, but the sens is not provided.",
            )),
        },
        Case {
            with_sens: false,
            need_unpack_args: false,
            args: vec![Value::Int(1)],
            error: Some((
                ExceptionKind::TypeError,
                "The function 'f' takes 2 positional arguments, but 1 were given.",
            )),
        },
    ];

    cases.test_each(|case| {
        let mut g = GraphStore::new();
        let f = g.add_graph("f");
        let p0 = g.add_parameter(f);
        g.add_parameter(f);
        g.set_return(f, p0);

        let main = g.add_graph("main");
        let mut args = vec![g.add_value(Value::Graph(f))];
        for arg in &case.args {
            args.push(g.add_value(arg.clone()));
        }
        let prim = Primitive::unpack_graph(case.with_sens, case.need_unpack_args);
        let node = g.add_primitive_call(main, Arc::new(prim), &args);

        let mut engine = Engine::new(g, InferConfig::default());
        match (engine.infer(node), case.error) {
            (Ok(value), None) => {
                assert!(matches!(
                    value.as_function(),
                    Some(AbstractFunction::Graph { graph, .. }) if *graph == f
                ));
            }
            (Err(err), Some((kind, message))) => {
                assert_eq!(err.kind(), InferErrorKind::User(kind));
                assert_eq!(err.message(), message);
            }
            (result, expected) => panic!("got {:?}, expected {:?}", result.err(), expected),
        }
    });
}

#[test]
fn test_mixed_precision_cast() {
    let mut g = GraphStore::new();
    let main = g.add_graph("main");
    let x = g.add_parameter(main);
    let y = g.add_parameter(main);
    let pair = prim_call(&mut g, main, names::MAKE_TUPLE, &[x, y]);
    let keys = g.add_value(Value::tuple([Value::str("a")]));
    let values = prim_call(&mut g, main, names::MAKE_TUPLE, &[x]);
    let dict = prim_call(&mut g, main, names::MAKE_DICT, &[keys, values]);
    let key = g.add_value(Value::str("w"));
    let kwarg = prim_call(&mut g, main, names::MAKE_KEYWORD_ARG, &[key, x]);
    let all = prim_call(&mut g, main, names::MAKE_TUPLE, &[pair, dict, kwarg]);
    let dst = g.add_value(Value::Type(Type::Tensor(Some(DType::Float16))));
    let prim = Arc::new(Primitive::mixed_precision_cast());
    let cast = g.add_primitive_call(main, prim, &[dst, all]);
    g.set_return(main, cast);

    let int_tensor = AbstractValue::tensor(DType::Int64, Shape::fixed(&[3]));
    let mut engine = Engine::new(g, InferConfig::default());
    let result = engine
        .run(main, vec![f32_tensor(&[2]), int_tensor.clone()])
        .unwrap();

    let half = AbstractValue::tensor(DType::Float16, Shape::fixed(&[2]));
    let expected = AbstractValue::tuple(vec![
        AbstractValue::tuple(vec![half.clone(), int_tensor]),
        AbstractValue::new(AbstractKind::Dictionary(vec![(Value::str("a"), half.clone())])),
        AbstractValue::keyword_arg("w", half),
    ]);
    assert_eq!(result, expected);
}

#[test]
fn test_mixed_precision_cast_input_count() {
    let mut g = GraphStore::new();
    let main = g.add_graph("main");
    let dst = g.add_value(Value::Type(Type::Tensor(Some(DType::Float16))));
    let node = g.add_primitive_call(main, Arc::new(Primitive::mixed_precision_cast()), &[dst]);

    let mut engine = Engine::new(g, InferConfig::default());
    let err = engine.infer(node).err().unwrap();
    assert_eq!(err.kind(), InferErrorKind::Malformed);
}

#[test]
fn test_partial_of_signature() {
    let mut g = GraphStore::new();
    let main = g.add_graph("main");
    let func = g.add_value(Value::Primitive(signature_prim("ScalarAdd")));
    let x = g.add_value(Value::Int(2));
    let partial = prim_call(&mut g, main, names::PARTIAL, &[func, x]);
    let y = g.add_value(Value::Int(3));
    let call = g.add_call(main, &[partial, y]);

    let mut engine = Engine::new(g, InferConfig::default());
    let (value, target) = infer_forwarded(&mut engine, partial);
    assert!(matches!(
        value.as_function(),
        Some(AbstractFunction::Partial { func, .. })
            if matches!(func.as_ref(), AbstractFunction::Signature(_))
    ));
    let target = target.unwrap();
    assert!(engine.graph().is_call_to(target, names::PARTIAL));
    assert!(matches!(
        engine.graph().value(engine.graph().inputs(target)[1]),
        Some(Value::Signature(_))
    ));

    let result = engine.infer(call).unwrap();
    assert_eq!(result.value(), Value::Int(5));
}

/// Graph computing `prim(x)` for a constant `x`.
fn constant_op_graph(prim: Primitive, x: Value) -> (GraphStore, NodeId) {
    let mut g = GraphStore::new();
    let main = g.add_graph("main");
    let x = g.add_value(x);
    let node = g.add_primitive_call(main, Arc::new(prim), &[x]);
    (g, node)
}

#[test]
fn test_host_check() {
    let (g, node) = constant_op_graph(Primitive::host_check("Neg"), f32_constant(&[2]));
    let host = Arc::new(CannedHost::new());
    let mut engine = Engine::new(g, InferConfig::default()).with_host(host.clone());

    let value = engine.infer(node).unwrap();
    let shape = value.as_tensor().map(|t| t.shape.clone());
    assert_eq!(shape, Some(Shape::fixed(&[2])));
    assert_eq!(CallCounts::get(&host.calls.check), 1);
    assert_eq!(CallCounts::get(&host.calls.infer), 0);
}

#[test]
fn test_host_check_rejects() {
    let (g, node) = constant_op_graph(Primitive::host_check("Neg"), f32_constant(&[2]));
    let host = Arc::new(CannedHost::new().with_check_error("Neg does not accept this input"));
    let mut engine = Engine::new(g, InferConfig::default()).with_host(host);

    let err = engine.infer(node).err().unwrap();
    assert_eq!(err.kind(), InferErrorKind::Host);
}

#[test]
fn test_host_check_without_host() {
    let (g, node) = constant_op_graph(Primitive::host_check("Neg"), f32_constant(&[2]));
    let mut engine = Engine::new(g, InferConfig::default());
    let value = engine.infer(node).unwrap();
    let shape = value.as_tensor().map(|t| t.shape.clone());
    assert_eq!(shape, Some(Shape::fixed(&[2])));
}

#[test]
fn test_host_infer_value() {
    #[derive(Debug)]
    struct Case {
        arg: AbstractValue,
        expected: AbstractValue,
    }

    let cases = [
        Case {
            arg: AbstractValue::scalar(Value::Int(3)),
            expected: AbstractValue::scalar(Value::Int(7)),
        },
        Case {
            arg: AbstractValue::scalar_of(Type::Number(DType::Int64)),
            expected: AbstractValue::scalar_of(Type::Number(DType::Int64)),
        },
    ];

    cases.test_each(|case| {
        let output = HostInferOutput::new(HostShape::Dims(vec![]), Type::Number(DType::Int64));
        let host = Arc::new(
            CannedHost::new()
                .with_infer_output(output)
                .with_infer_value(Value::Int(7)),
        );
        let prim = Arc::new(Primitive::host("Fold"));
        let (g, main) = host_op_graph(&prim);
        let mut engine = Engine::new(g, InferConfig::default()).with_host(host);
        let result = engine.run(main, vec![case.arg.clone()]).unwrap();
        assert_eq!(result, case.expected);
    });
}

#[test]
fn test_raise_in_variable_branch() {
    #[derive(Debug)]
    struct Case {
        cond: AbstractValue,
        deferred: bool,
    }

    let cases = [
        Case {
            cond: AbstractValue::scalar_of(Type::bool()),
            deferred: true,
        },
        Case {
            cond: AbstractValue::scalar(Value::Bool(true)),
            deferred: false,
        },
    ];

    cases.test_each(|case| {
        let mut g = GraphStore::new();
        let main = g.add_graph("main");
        let cond = g.add_parameter(main);
        let branch = g.add_child_graph("true_branch", main, Some(cond));
        let kind = g.add_value(Value::str("ValueError"));
        let message = g.add_value(Value::str("bad input"));
        let raise = prim_call(&mut g, branch, names::RAISE, &[kind, message]);
        g.set_return(branch, raise);
        let branch_fn = g.add_value(Value::Graph(branch));
        let call = g.add_call(main, &[branch_fn]);
        g.set_return(main, call);

        let mut engine = Engine::new(g, InferConfig::default());
        let result = engine.run(main, vec![case.cond.clone()]);
        if case.deferred {
            assert_eq!(result.unwrap(), AbstractValue::negligible());
            assert!(engine.graph().call(raise).unwrap().has_side_effect());
        } else {
            let err = result.err().unwrap();
            assert_eq!(err.kind(), InferErrorKind::User(ExceptionKind::ValueError));
            assert_eq!(err.message(), "bad input");
        }
    });
}

#[test]
fn test_create_instance_side_effects() {
    #[derive(Debug)]
    struct Case {
        effect_attr: Option<&'static str>,
        check_side_effect: bool,
        marked: bool,
    }

    let cases = [
        Case {
            effect_attr: Some("side_effect_io"),
            check_side_effect: true,
            marked: true,
        },
        Case {
            effect_attr: Some("side_effect_mem"),
            check_side_effect: true,
            marked: true,
        },
        Case {
            effect_attr: None,
            check_side_effect: true,
            marked: false,
        },
        Case {
            effect_attr: Some("side_effect_io"),
            check_side_effect: false,
            marked: false,
        },
    ];

    cases.test_each(|case| {
        let mut prim = Primitive::new("Print");
        if let Some(attr) = case.effect_attr {
            prim = prim.with_attr(attr, Value::Bool(true));
        }
        let (g, node) = create_instance_graph(Value::Int(3));
        let host = Arc::new(CannedHost::new().with_object(Value::Primitive(Arc::new(prim))));
        let config = InferConfig {
            check_side_effect: case.check_side_effect,
            ..Default::default()
        };
        let mut engine = Engine::new(g, config).with_host(host);

        engine.infer(node).unwrap();
        let marked = engine.graph().call(node).unwrap().has_side_effect();
        assert_eq!(marked, case.marked);
    });
}
