//! Shape re-inference at execution time.
//!
//! Some nodes have output shapes which depend on the values of their
//! operands (eg. the target shape of a `Reshape`). When those values are
//! only known at runtime, the executor re-infers the node just before
//! launching its kernel. Value-dependent operands are synced from device
//! buffers into host tensors, re-attached to the operands' abstract values
//! and passed through the same inference path used at compile time.
//!
//! Re-inference reads the graph without modifying it. The results are
//! applied once inference of a node has finished, which allows independent
//! nodes to be re-inferred in parallel (see [`reinfer_batch`]).

use std::sync::Arc;

use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::abstract_value::{AbstractKind, AbstractValue};
use crate::error::InferError;
use crate::evaluator::{dispatch_table, infer_primitive, DispatchTable};
use crate::graph::{GraphId, GraphStore, NodeId};
use crate::host::HostBridge;
use crate::primitive::{names, Primitive};
use crate::types::{DType, Shape};
use crate::value::{TensorData, TensorElems, Value, F64};

mod runtime;


pub use runtime::{DependTensorMap, DeviceBuffer, KernelArgs, KernelMod, KernelModKind};

/// Options for re-inference.
#[derive(Copy, Clone, Debug)]
pub struct RuntimeOptions<'a> {
    /// Host used for primitives inferred by the host and for script nodes.
    /// If absent, script nodes keep their compile-time values.
    pub host: Option<&'a dyn HostBridge>,

    /// True if the executor skips calls to no-op primitives (eg. `Reshape`
    /// of a contiguous buffer). Their shapes are then recomputed when a user
    /// is re-inferred.
    pub skip_nop_nodes: bool,
}

impl Default for RuntimeOptions<'_> {
    fn default() -> Self {
        RuntimeOptions {
            host: None,
            skip_nop_nodes: true,
        }
    }
}

/// Outcome of re-inferring one node.
struct Reinferred {
    value: AbstractValue,
    depend_tensors: DependTensorMap,
    /// New values of skipped no-op nodes which feed the node.
    refreshed: Vec<(NodeId, AbstractValue)>,
}

struct Reinferrer<'a> {
    graph: &'a GraphStore,
    options: RuntimeOptions<'a>,
    table: Arc<DispatchTable>,
    /// Values computed during this re-inference, which take precedence over
    /// the values attached to the graph.
    overrides: FxHashMap<NodeId, AbstractValue>,
    refreshed: Vec<(NodeId, AbstractValue)>,
}

impl<'a> Reinferrer<'a> {
    fn new(graph: &'a GraphStore, options: RuntimeOptions<'a>) -> Self {
        Reinferrer {
            graph,
            options,
            table: dispatch_table(),
            overrides: FxHashMap::default(),
            refreshed: Vec::new(),
        }
    }

    fn abstract_of(&self, node: NodeId) -> Result<AbstractValue, InferError> {
        if let Some(value) = self.overrides.get(&node) {
            return Ok(value.clone());
        }
        if let Some(value) = self.graph.abstract_value(node) {
            return Ok(value.clone());
        }
        if let Some(value) = self.graph.value(node) {
            return Ok(AbstractValue::from_value(value));
        }
        Err(InferError::runtime(format!(
            "Node {} has not been inferred.",
            self.graph.describe(node)
        )))
    }

    /// Resolve `TupleGetItem(x, i)` with a constant index to `(x, i)`. Other
    /// nodes produce their output 0.
    fn real_input(&self, node: NodeId) -> (NodeId, usize) {
        if self.graph.is_call_to(node, names::TUPLE_GETITEM) {
            if let [_, source, index] = self.graph.inputs(node) {
                let index = self
                    .graph
                    .value(*index)
                    .and_then(|v| v.as_int())
                    .and_then(|i| usize::try_from(i).ok());
                if let Some(index) = index {
                    return (*source, index);
                }
            }
        }
        (node, 0)
    }

    fn is_skipped_nop(&self, node: NodeId) -> bool {
        self.options.skip_nop_nodes
            && self
                .graph
                .callee_primitive(node)
                .is_some_and(|prim| self.table.ops().is_nop(prim.name()))
    }

    /// Re-infer the chain of skipped no-op nodes which produces `operand`,
    /// innermost first.
    fn refresh_nop_chain(&mut self, operand: NodeId) -> Result<(), InferError> {
        let mut chain = Vec::new();
        let mut current = self.real_input(operand).0;
        while self.is_skipped_nop(current)
            && !self.overrides.contains_key(&current)
            && !chain.contains(&current)
        {
            chain.push(current);
            let Some(&input) = self.graph.call(current).and_then(|call| call.args().first())
            else {
                break;
            };
            current = self.real_input(input).0;
        }

        while let Some(node) = chain.pop() {
            tracing::trace!(node = %self.graph.describe(node), "re-inferring skipped node");
            let (value, _) = self.infer_node(node, &[], &[])?;
            self.overrides.insert(node, value.clone());
            self.refreshed.push((node, value));
        }
        Ok(())
    }

    /// Produce the host tensor holding the value of operand `index` of
    /// `node`, or `None` if the operand carries no data.
    fn materialize(
        &self,
        node: NodeId,
        index: usize,
        operand: NodeId,
        value: &AbstractValue,
        buffers: &[DeviceBuffer],
    ) -> Result<Option<Arc<TensorData>>, InferError> {
        if value.as_sequence().is_some_and(|seq| seq.is_empty()) {
            return Ok(None);
        }
        let (dtype, shape) = host_layout(value)?;

        if let Some(buffer) = buffers.get(index).filter(|buf| buf.is_valid()) {
            return sync_buffer(buffer, dtype, shape).map(Some);
        }
        if !buffers.is_empty() {
            tracing::warn!(
                node = %self.graph.describe(node),
                input = index,
                "no valid explicit buffer for value-dependent input"
            );
        }
        if let Some(tensor) = known_tensor(value, dtype, shape.as_deref()) {
            return Ok(Some(Arc::new(tensor)));
        }
        let (producer, output) = self.real_input(operand);
        match self.graph.output_buffer(producer, output) {
            Some(buffer) => sync_buffer(buffer, dtype, shape).map(Some),
            None => Err(InferError::runtime(format!(
                "No device buffer holds value-dependent input {} of {}.",
                index,
                self.graph.describe(node)
            ))),
        }
    }

    /// Re-infer a call node.
    ///
    /// `buffers` are explicit device buffers for the operands. `eager_inputs`
    /// are the operand tensors of a single-operator launch, which replace
    /// the compile-time descriptions of tensor operands.
    fn infer_node(
        &mut self,
        node: NodeId,
        buffers: &[DeviceBuffer],
        eager_inputs: &[Arc<TensorData>],
    ) -> Result<(AbstractValue, DependTensorMap), InferError> {
        let Some(call) = self.graph.call(node) else {
            return Err(InferError::runtime(format!(
                "Cannot re-infer {}, which is not a call.",
                self.graph.describe(node)
            )));
        };
        let callee = call.inputs().first().and_then(|&c| self.graph.value(c)).cloned();
        let operands = call.args().to_vec();
        let value_depend = match &callee {
            Some(Value::Primitive(prim)) => self.table.ops().value_depend_args(prim),
            _ => Vec::new(),
        };

        let mut args = Vec::with_capacity(operands.len());
        let mut depend_tensors = DependTensorMap::default();
        let mut has_script_data = false;
        for (index, &operand) in operands.iter().enumerate() {
            self.refresh_nop_chain(operand)?;
            let mut value = self.abstract_of(operand)?;
            if let Some(tensor) = eager_inputs.get(index) {
                if value.as_tensor().is_some() {
                    value = AbstractValue::tensor(tensor.dtype(), Shape::fixed(tensor.shape()));
                }
            }
            if !value_depend.contains(&index) {
                args.push(value);
                continue;
            }

            let Some(data) = self.materialize(node, index, operand, &value, buffers)? else {
                args.push(value);
                continue;
            };
            let (producer, _) = self.real_input(operand);
            let from_script = self.graph.is_call_to(producer, names::PY_EXECUTE);
            has_script_data |= from_script;
            let keep_abstract = producer != operand || from_script;
            args.push(with_materialized(&value, &data, keep_abstract)?);
            depend_tensors.insert(index, data);
        }

        let value = match callee {
            Some(Value::Primitive(prim)) if prim.name() == names::PY_EXECUTE => {
                self.reinfer_script(node, &args)?
            }
            Some(Value::Primitive(prim)) if has_script_data => {
                self.reinfer_with_script_data(node, &prim, &args)?
            }
            Some(Value::Primitive(prim)) => infer_primitive(&prim, &args, self.options.host)?,
            Some(Value::Graph(graph)) => self.infer_graph(graph, args)?,
            _ => {
                return Err(InferError::runtime(format!(
                    "Cannot re-infer {}, which does not call a primitive or graph.",
                    self.graph.describe(node)
                )));
            }
        };
        Ok((value, depend_tensors))
    }

    /// Re-infer a host script node. Without a host the compile-time value
    /// is kept.
    fn reinfer_script(
        &self,
        node: NodeId,
        args: &[AbstractValue],
    ) -> Result<AbstractValue, InferError> {
        let Some(host) = self.options.host else {
            tracing::warn!(
                node = %self.graph.describe(node),
                "no host bridge to re-infer script node, keeping its inferred value"
            );
            return Ok(self
                .graph
                .abstract_value(node)
                .cloned()
                .unwrap_or_else(AbstractValue::any));
        };
        let script = args.first().map(|arg| arg.value());
        let Some(script) = script.as_ref().and_then(|s| s.as_str()) else {
            return Err(InferError::runtime(format!(
                "Script of {} is not a constant string.",
                self.graph.describe(node)
            )));
        };
        host.reinfer(script, &args[1..]).map_err(InferError::host)
    }

    /// Re-infer a primitive with an operand whose value was produced by a
    /// script node. The host infers it, since the value may only be
    /// meaningful to the host. Without a host the compiled formulas are used.
    fn reinfer_with_script_data(
        &self,
        node: NodeId,
        prim: &Primitive,
        args: &[AbstractValue],
    ) -> Result<AbstractValue, InferError> {
        let Some(host) = self.options.host else {
            tracing::warn!(
                node = %self.graph.describe(node),
                "no host bridge to re-infer node with script data, using compiled inference"
            );
            return infer_primitive(prim, args, None);
        };
        host.reinfer_primitive(prim, args).map_err(InferError::host)
    }

    /// Re-infer every call in the body of `graph` with parameters bound to
    /// `args`, and return the value of its result.
    fn infer_graph(
        &mut self,
        graph: GraphId,
        args: Vec<AbstractValue>,
    ) -> Result<AbstractValue, InferError> {
        let func = self
            .graph
            .graph(graph)
            .ok_or_else(|| InferError::runtime(format!("Invalid graph {}", graph)))?;
        if func.parameters().len() != args.len() {
            return Err(InferError::runtime(format!(
                "Graph '{}' takes {} arguments, but {} were given.",
                func.name(),
                func.parameters().len(),
                args.len()
            )));
        }
        let Some(ret) = func.return_node() else {
            return Err(InferError::runtime(format!(
                "Graph '{}' has no return node.",
                func.name()
            )));
        };
        for (&param, arg) in func.parameters().iter().zip(args) {
            self.overrides.insert(param, arg);
        }

        for node in self.graph.topo_order(graph) {
            let owned = self.graph.call(node).is_some_and(|call| call.graph() == graph);
            if !owned {
                continue;
            }
            let (value, _) = self.infer_node(node, &[], &[])?;
            self.overrides.insert(node, value);
        }
        self.abstract_of(ret)
    }
}

/// Element type and shape of the host tensor which holds the value of
/// `value`. The shape is `None` if it is only known from the buffer.
fn host_layout(value: &AbstractValue) -> Result<(DType, Option<Vec<usize>>), InferError> {
    match value.kind() {
        AbstractKind::Tensor(t) => Ok((t.dtype, t.shape.to_fixed())),
        AbstractKind::Scalar { ty, .. } => match ty.dtype() {
            Some(dtype) => Ok((dtype, Some(Vec::new()))),
            None => Err(InferError::runtime(format!(
                "Cannot materialize a scalar of type {}.",
                ty
            ))),
        },
        AbstractKind::Tuple(seq) | AbstractKind::List(seq) => {
            let Some(len) = seq.len() else {
                return Err(InferError::runtime(
                    "Cannot materialize a sequence of dynamic length.",
                ));
            };
            let mut dtype = None;
            for elem in seq.elements() {
                let elem_dtype = match elem.kind() {
                    AbstractKind::Scalar { ty, .. } => ty.dtype(),
                    _ => None,
                };
                let Some(elem_dtype) = elem_dtype else {
                    return Err(InferError::runtime(format!(
                        "Cannot materialize sequence {} with non-scalar element {}.",
                        value, elem
                    )));
                };
                match dtype {
                    Some(dtype) if dtype != elem_dtype => {
                        return Err(InferError::runtime(format!(
                            "Sequence {} has elements of types {} and {}.",
                            value, dtype, elem_dtype
                        )));
                    }
                    _ => dtype = Some(elem_dtype),
                }
            }
            let dtype = dtype.unwrap_or(DType::Int64);
            Ok((dtype, Some(vec![len])))
        }
        _ => Err(InferError::runtime(format!(
            "Cannot materialize value {}.",
            value
        ))),
    }
}

fn sync_buffer(
    buffer: &DeviceBuffer,
    dtype: DType,
    shape: Option<Vec<usize>>,
) -> Result<Arc<TensorData>, InferError> {
    let shape = match shape {
        Some(shape) => shape,
        None => buffer
            .shape()
            .iter()
            .map(|&d| usize::try_from(d))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| {
                InferError::runtime(format!(
                    "Device buffer has unresolved shape {:?}.",
                    buffer.shape()
                ))
            })?,
    };
    buffer.sync(dtype, &shape).map(Arc::new)
}

/// Build a tensor from the statically known value of `value`, if it has
/// one.
fn known_tensor(
    value: &AbstractValue,
    dtype: DType,
    shape: Option<&[usize]>,
) -> Option<TensorData> {
    let known = value.value();
    if let Value::Tensor(tensor) = &known {
        return Some(tensor.as_ref().clone());
    }
    let scalars: Vec<Value> = match &known {
        Value::Tuple(elems) | Value::List(elems) => elems.to_vec(),
        Value::Bool(_) | Value::Int(_) | Value::Float(_) => vec![known.clone()],
        _ => return None,
    };
    let elems = if dtype == DType::Bool {
        TensorElems::Bool(scalars.iter().map(|v| v.as_bool()).collect::<Option<_>>()?)
    } else if dtype.is_float() {
        TensorElems::Float(
            scalars
                .iter()
                .map(|v| match v {
                    Value::Float(x) => Some(*x),
                    other => other.as_int().map(|x| F64(x as f64)),
                })
                .collect::<Option<_>>()?,
        )
    } else {
        TensorElems::Int(scalars.iter().map(|v| v.as_int()).collect::<Option<_>>()?)
    };
    TensorData::try_new(dtype, shape?.to_vec(), elems)
}

/// Derive the operand passed to inference from its original abstract value
/// and its materialized contents. The kind of the operand never changes.
fn with_materialized(
    original: &AbstractValue,
    data: &Arc<TensorData>,
    keep_abstract: bool,
) -> Result<AbstractValue, InferError> {
    match original.kind() {
        AbstractKind::Scalar { .. } => {
            let first = match data.dtype() {
                DType::Int32 | DType::Int64 => data.to_ints().and_then(|ints| ints.first()),
                _ => None,
            };
            let Some(&first) = first else {
                return Err(InferError::runtime(format!(
                    "Cannot read a scalar of {} from a {} tensor.",
                    original,
                    data.dtype()
                )));
            };
            Ok(original.with_value(Value::Int(first)))
        }
        AbstractKind::Tuple(seq) | AbstractKind::List(seq) => {
            let elems = seq
                .elements()
                .iter()
                .enumerate()
                .map(|(i, elem)| {
                    data.scalar_at(i).map(|v| elem.with_value(v)).ok_or_else(|| {
                        InferError::runtime(format!(
                            "Materialized tensor has {} elements, but {} needs {}.",
                            data.len(),
                            original,
                            seq.elements().len()
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(if original.is_tuple() {
                AbstractValue::tuple(elems)
            } else {
                AbstractValue::list(elems)
            })
        }
        AbstractKind::Tensor(_) if keep_abstract => {
            Ok(original.with_value(Value::Tensor(data.clone())))
        }
        AbstractKind::Tensor(_) => Ok(AbstractValue::from_tensor(data)),
        _ => Err(InferError::runtime(format!(
            "Cannot attach a materialized value to {}.",
            original
        ))),
    }
}

fn reinfer(
    graph: &GraphStore,
    node: NodeId,
    buffers: &[DeviceBuffer],
    eager_inputs: &[Arc<TensorData>],
    options: RuntimeOptions<'_>,
) -> Result<Reinferred, InferError> {
    let mut reinferrer = Reinferrer::new(graph, options);
    let (value, depend_tensors) = reinferrer
        .infer_node(node, buffers, eager_inputs)
        .map_err(|err| {
            err.at_node(|| {
                let source = graph.debug_info(node).and_then(|d| d.source.clone());
                (graph.describe(node), source)
            })
        })?;
    tracing::debug!(node = %graph.describe(node), value = %value, "re-inferred node");
    Ok(Reinferred {
        value,
        depend_tensors,
        refreshed: reinferrer.refreshed,
    })
}

fn apply(graph: &mut GraphStore, node: NodeId, reinferred: Reinferred) -> DependTensorMap {
    for (refreshed, value) in reinferred.refreshed {
        graph.set_abstract_value(refreshed, value);
    }
    graph.set_abstract_value(node, reinferred.value);
    reinferred.depend_tensors
}

/// Re-infer the output of `node` from the runtime values of its operands
/// and attach the result to the node.
///
/// `buffers` are optional explicit operand buffers, by operand index.
/// Value-dependent operands without an explicit buffer are read from the
/// output buffer of the node that produced them.
pub fn infer_shape(
    graph: &mut GraphStore,
    node: NodeId,
    buffers: &[DeviceBuffer],
    options: RuntimeOptions<'_>,
) -> Result<DependTensorMap, InferError> {
    let reinferred = reinfer(graph, node, buffers, &[], options)?;
    Ok(apply(graph, node, reinferred))
}

/// Variant of [`infer_shape`] for single-operator execution, where the
/// operand tensors are given directly.
pub fn infer_shape_eager(
    graph: &mut GraphStore,
    node: NodeId,
    inputs: &[Arc<TensorData>],
    options: RuntimeOptions<'_>,
) -> Result<DependTensorMap, InferError> {
    let buffers: Vec<DeviceBuffer> = inputs.iter().map(|t| DeviceBuffer::from_tensor(t)).collect();
    let reinferred = reinfer(graph, node, &buffers, inputs, options)?;
    Ok(apply(graph, node, reinferred))
}

/// Build the kernel arguments of `node` from the values attached to the
/// graph.
fn kernel_args(
    graph: &GraphStore,
    node: NodeId,
    depend_tensors: DependTensorMap,
) -> Result<KernelArgs, InferError> {
    let operands = graph.call(node).map(|call| call.args()).unwrap_or_default();
    let inputs = operands
        .iter()
        .map(|&operand| {
            graph
                .abstract_value(operand)
                .cloned()
                .or_else(|| graph.value(operand).map(AbstractValue::from_value))
                .ok_or_else(|| {
                    InferError::runtime(format!(
                        "Node {} has not been inferred.",
                        graph.describe(operand)
                    ))
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let output = graph.abstract_value(node).cloned().ok_or_else(|| {
        InferError::runtime(format!("Node {} has not been inferred.", graph.describe(node)))
    })?;
    let outputs = match output.kind() {
        AbstractKind::Tuple(seq) if !seq.is_dynamic_len() => seq.elements().to_vec(),
        _ => vec![output],
    };
    Ok(KernelArgs {
        inputs,
        outputs,
        depend_tensors,
    })
}

/// Attach kernel arguments to a node. The node's abstract value becomes the
/// kernel's output, or a tuple of outputs.
pub fn set_op_args(graph: &mut GraphStore, node: NodeId, args: KernelArgs) {
    let output = match args.outputs.as_slice() {
        [single] => single.clone(),
        outputs => AbstractValue::tuple(outputs.to_vec()),
    };
    graph.set_abstract_value(node, output);
    graph.set_kernel_args(node, args);
}

/// Re-infer `node` and attach the kernel arguments needed to launch it.
///
/// Kernels should be resized with the returned arguments, since the new
/// shapes may invalidate their workspace.
pub fn infer_op(
    graph: &mut GraphStore,
    node: NodeId,
    buffers: &[DeviceBuffer],
    options: RuntimeOptions<'_>,
) -> Result<KernelArgs, InferError> {
    let depend_tensors = infer_shape(graph, node, buffers, options)?;
    let args = kernel_args(graph, node, depend_tensors)?;
    set_op_args(graph, node, args.clone());
    Ok(args)
}

/// Variant of [`infer_op`] for single-operator execution.
pub fn infer_op_eager(
    graph: &mut GraphStore,
    node: NodeId,
    inputs: &[Arc<TensorData>],
    options: RuntimeOptions<'_>,
) -> Result<KernelArgs, InferError> {
    let depend_tensors = infer_shape_eager(graph, node, inputs, options)?;
    let args = kernel_args(graph, node, depend_tensors)?;
    set_op_args(graph, node, args.clone());
    Ok(args)
}

/// Resize a kernel for the arguments produced by [`infer_op`].
pub fn resize_kernel(kernel: &mut KernelMod, args: &KernelArgs) -> Result<(), InferError> {
    kernel.resize(args)
}

/// Re-infer several nodes in parallel.
///
/// No node in `nodes` may depend on another, since each is inferred from the
/// values attached to the graph before the batch started. Results are
/// attached once every node has been inferred.
pub fn reinfer_batch(
    graph: &mut GraphStore,
    nodes: &[NodeId],
    options: RuntimeOptions<'_>,
) -> Result<Vec<DependTensorMap>, InferError> {
    let shared: &GraphStore = graph;
    let results = nodes
        .par_iter()
        .map(|&node| reinfer(shared, node, &[], &[], options))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(nodes
        .iter()
        .zip(results)
        .map(|(&node, reinferred)| apply(graph, node, reinferred))
        .collect())
}
