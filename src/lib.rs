//! absint infers abstract values for the nodes of a dataflow graph.
//!
//! An abstract value describes the set of values a node may produce at
//! runtime: its type, its shape if it is a tensor, and its exact value if
//! that is known during compilation. Inference is driven by an [`Engine`],
//! which evaluates each call node by dispatching on its callee.
//!
//! # Evaluators
//!
//! Primitives are mapped to an [`Evaluator`] by a process-wide
//! [`DispatchTable`], which is built on first use. Most primitives use a
//! standard evaluator which combines a shape formula from the
//! [`OpRegistry`](ops::OpRegistry) with constant folding. Primitives whose
//! output depends on their arguments in other ways (attribute access,
//! conditionals, object construction, tuple building, exceptions and
//! context managers) have dedicated evaluators.
//!
//! # The host
//!
//! Some information is only available from the host language in which the
//! compiled program was written, such as attributes of host objects or the
//! result of arbitrary scripts. The engine reaches the host through the
//! [`HostBridge`] trait. If no host is configured, operations which need one
//! fail with an internal error. Errors reported by the host itself have kind
//! [`InferErrorKind::Host`].
//!
//! # Dynamic shapes
//!
//! When an output shape depends on operand values which are only known at
//! runtime, the [`dynamic_shape`] module re-runs inference for individual
//! nodes once the operand data is available on the device.
//!
//! # Configuration
//!
//! Engine options are held in an [`InferConfig`]. Use
//! [`InferConfig::from_env`] to read them from `ABSINT_*` environment
//! variables.

mod cache;
mod env;
mod error;
mod evaluator;
mod fallback;
mod getter;
mod infer_shapes;
mod usage;

pub mod abstract_value;
pub mod dynamic_shape;
pub mod engine;
pub mod graph;
pub mod host;
pub mod ops;
pub mod primitive;
pub mod types;
pub mod value;

#[cfg(test)]
mod test_util;

pub use abstract_value::{AbstractKind, AbstractValue, EvalResult};
pub use cache::{EvaluatorCache, GlobalEvalCache};
pub use dynamic_shape::{
    infer_op, infer_op_eager, infer_shape, infer_shape_eager, reinfer_batch, resize_kernel,
    set_op_args, DeviceBuffer, KernelArgs, KernelMod, KernelModKind, RuntimeOptions,
};
pub use engine::{ContextId, Engine, ExecutionMode, NodeConfig};
pub use env::{InferConfig, ParseSyntaxLevelError, SyntaxLevel};
pub use error::{ExceptionKind, HostError, InferError, InferErrorKind};
pub use evaluator::{
    dispatch_table, evaluates_undetermined, reset_dispatch_table, DispatchTable, Evaluator,
};
pub use graph::{GraphId, GraphStore, NodeId};
pub use host::{HostBridge, ScriptScope};
pub use usage::{ElementUsage, UsageFlags};
