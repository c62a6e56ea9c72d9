//! Evaluators for primitive calls.
//!
//! Every primitive is evaluated by one variant of [`Evaluator`], chosen via
//! the process-wide [`DispatchTable`]. Most primitives use a compiled
//! formula ([`Evaluator::Standard`]) or the host runtime
//! ([`Evaluator::HostInfer`]). The rest produce a graph rewrite rather than
//! a value: they add nodes to the graph and forward evaluation to them.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::abstract_value::{AbstractKind, AbstractValue, EvalResult};
use crate::engine::{ArgConfig, Engine, NodeConfig};
use crate::error::InferError;
use crate::ops::{Arity, OpDef, OpRegistry, UniformOp};
use crate::primitive::{names, PrimKind, Primitive};

mod control;
mod instance;
mod signature;
mod standard;

#[cfg(test)]
mod tests;

pub use standard::infer_primitive;

/// Strategy used to evaluate calls to a primitive.
#[derive(Copy, Clone, Debug)]
pub enum Evaluator {
    /// Compiled formula.
    Standard(&'static OpDef),
    /// Scalar-only primitive.
    Uniform(&'static UniformOp),
    /// Inference performed by the host runtime.
    HostInfer,
    /// Compiled formula, after the host has checked the operands.
    HostCheck(Option<&'static OpDef>),
    MakeTuple,
    MakeList,
    Partial,
    GetAttr,
    SetAttr,
    Resolve,
    CreateInstance,
    Raise,
    WithEnter,
    WithExit,
    Cond,
    PyExecute,
    PyInterpret,
    DoSignature,
    UnpackGraph,
    MixedPrecisionCast,
}

impl Evaluator {
    /// Evaluate a call to `prim` with operands `args`, producing the result
    /// of node `out`.
    pub fn run(
        self,
        engine: &mut Engine,
        prim: &Arc<Primitive>,
        args: Vec<ArgConfig>,
        out: NodeConfig,
    ) -> Result<EvalResult, InferError> {
        match self {
            Evaluator::Standard(op) => standard::eval_standard(engine, op, prim, &args, out),
            Evaluator::Uniform(op) => standard::eval_uniform(engine, op, &args, out),
            Evaluator::HostInfer => standard::eval_host_infer(engine, prim, &args, out),
            Evaluator::HostCheck(op) => standard::eval_host_check(engine, op, prim, &args, out),
            Evaluator::MakeTuple => standard::eval_make_sequence(engine, false, &args, out),
            Evaluator::MakeList => standard::eval_make_sequence(engine, true, &args, out),
            Evaluator::Partial => control::eval_partial(engine, prim, &args, out),
            Evaluator::Raise => control::eval_raise(engine, &args, out),
            Evaluator::Cond => control::eval_cond(engine, &args, out),
            Evaluator::WithEnter => control::eval_with(engine, false, &args, out),
            Evaluator::WithExit => control::eval_with(engine, true, &args, out),
            Evaluator::CreateInstance => instance::eval_create_instance(engine, &args, out),
            Evaluator::GetAttr => crate::getter::eval_getattr(engine, &args, out),
            Evaluator::SetAttr => crate::getter::eval_setattr(engine, &args, out),
            Evaluator::Resolve => crate::getter::eval_resolve(engine, &args, out),
            Evaluator::PyExecute => crate::fallback::eval_py_execute(engine, &args, out),
            Evaluator::PyInterpret => crate::fallback::eval_py_interpret(engine, &args, out),
            Evaluator::DoSignature => signature::eval_do_signature(engine, prim, &args, out),
            Evaluator::UnpackGraph => signature::eval_unpack_graph(engine, prim, &args, out),
            Evaluator::MixedPrecisionCast => {
                signature::eval_mixed_precision_cast(engine, &args, out)
            }
        }
    }
}

/// Map from primitive names to evaluators.
pub struct DispatchTable {
    evaluators: FxHashMap<&'static str, Evaluator>,
    ops: OpRegistry,
}

impl DispatchTable {
    fn build() -> DispatchTable {
        let ops = OpRegistry::with_builtin_ops();
        let mut evaluators = FxHashMap::default();

        for op in ops.iter() {
            evaluators.insert(op.name, Evaluator::Standard(op));
        }
        for op in OpRegistry::uniform_ops() {
            evaluators.insert(op.name, Evaluator::Uniform(op));
        }
        for (name, evaluator) in [
            (names::MAKE_TUPLE, Evaluator::MakeTuple),
            (names::MAKE_LIST, Evaluator::MakeList),
            (names::PARTIAL, Evaluator::Partial),
            (names::GETATTR, Evaluator::GetAttr),
            (names::SETATTR, Evaluator::SetAttr),
            (names::RESOLVE, Evaluator::Resolve),
            (names::CREATE_INSTANCE, Evaluator::CreateInstance),
            (names::RAISE, Evaluator::Raise),
            (names::WITH_ENTER, Evaluator::WithEnter),
            (names::WITH_EXIT, Evaluator::WithExit),
            (names::COND, Evaluator::Cond),
            (names::PY_EXECUTE, Evaluator::PyExecute),
            (names::PY_INTERPRET, Evaluator::PyInterpret),
        ] {
            evaluators.insert(name, evaluator);
        }

        DispatchTable { evaluators, ops }
    }

    /// Return the evaluator for calls to `prim`.
    pub fn evaluator_for(&self, prim: &Primitive) -> Result<Evaluator, InferError> {
        match prim.kind() {
            PrimKind::HostInfer => Ok(Evaluator::HostInfer),
            PrimKind::HostCheck => Ok(Evaluator::HostCheck(self.ops.get(prim.name()))),
            PrimKind::DoSignature(_) => Ok(Evaluator::DoSignature),
            PrimKind::UnpackGraph { .. } => Ok(Evaluator::UnpackGraph),
            PrimKind::MixedPrecisionCast => Ok(Evaluator::MixedPrecisionCast),
            PrimKind::Builtin => self.evaluators.get(prim.name()).copied().ok_or_else(|| {
                InferError::internal(format!(
                    "No evaluator registered for primitive '{}'",
                    prim.name()
                ))
            }),
        }
    }

    /// Registry of compiled formulas.
    pub fn ops(&self) -> &OpRegistry {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.evaluators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evaluators.is_empty()
    }
}

static DISPATCH_TABLE: RwLock<Option<Arc<DispatchTable>>> = parking_lot::const_rwlock(None);

/// Return the process-wide dispatch table, building it on first use.
pub fn dispatch_table() -> Arc<DispatchTable> {
    if let Some(table) = DISPATCH_TABLE.read().as_ref() {
        return table.clone();
    }

    let mut slot = DISPATCH_TABLE.write();
    if let Some(table) = slot.as_ref() {
        return table.clone();
    }
    let table = Arc::new(DispatchTable::build());
    *slot = Some(table.clone());
    table
}

/// Drop the process-wide dispatch table. The next call to
/// [`dispatch_table`] rebuilds it.
pub fn reset_dispatch_table() {
    *DISPATCH_TABLE.write() = None;
}

/// Primitives which are evaluated even when an operand is undetermined,
/// because they only build or route values.
const UNDETERMINED_STRUCTURAL: &[&str] = &[
    names::PARTIAL,
    names::MAKE_TUPLE,
    names::MAKE_LIST,
    names::MAKE_DICT,
    names::MAKE_KEYWORD_ARG,
    names::SWITCH,
    names::DEPEND,
    names::UPDATE_STATE,
    names::LOAD,
    names::RETURN,
    names::IDENTITY,
    names::ENVIRON_GET,
    names::ENVIRON_SET,
];

/// Return true if `name` is evaluated normally when operands are
/// undetermined.
pub fn evaluates_undetermined(name: &str) -> bool {
    UNDETERMINED_STRUCTURAL.contains(&name)
        || OpRegistry::uniform_ops().iter().any(|op| op.name == name)
}

/// Return the undetermined result for `name` if it should not be
/// evaluated with operands `args`.
fn undetermined_result(name: &str, args: &[AbstractValue]) -> Option<AbstractValue> {
    if evaluates_undetermined(name) || !args.iter().any(|arg| arg.contains_undetermined()) {
        return None;
    }
    tracing::debug!(prim = name, "operand is undetermined, skipping inference");
    Some(AbstractValue::undetermined())
}

/// Return a problem for node `out` if any operand is a problem.
fn problem_result(args: &[AbstractValue], out: NodeConfig) -> Option<AbstractValue> {
    args.iter().find_map(|arg| match arg.kind() {
        AbstractKind::Problem { payload, .. } => Some(AbstractValue::problem(payload, out.node)),
        _ => None,
    })
}

pub(crate) fn check_arity(name: &str, arity: Arity, count: usize) -> Result<(), InferError> {
    if arity.accepts(count) {
        return Ok(());
    }
    Err(InferError::malformed(format!(
        "For primitive '{}', the number of inputs should be {}, but got {}.",
        name, arity, count
    )))
}
