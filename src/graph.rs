//! The IR that abstract evaluation runs over.
//!
//! A [`GraphStore`] owns every node and function graph of a compilation.
//! Evaluators read it and may append new nodes (eg. when rewriting an
//! attribute access into a call), but never remove nodes.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::abstract_value::AbstractValue;
use crate::dynamic_shape::{DeviceBuffer, KernelArgs};
use crate::error::InferError;
use crate::primitive::{names, Primitive};
use crate::types::{Shape, Type};
use crate::value::Value;

mod node;
mod node_id;
mod noop_hash;

pub use node::{CallNode, DebugInfo, FuncGraph, Node, ParameterNode, ValueNode};
pub use node_id::{GraphId, NodeId};
pub(crate) use noop_hash::{NoopHashMap, NoopHashSet};

#[derive(Clone, Debug)]
struct NodeEntry {
    node: Node,
    debug: DebugInfo,
    abstract_value: Option<AbstractValue>,
}

/// Storage for the nodes and function graphs of a compilation unit.
#[derive(Clone, Debug, Default)]
pub struct GraphStore {
    nodes: Vec<NodeEntry>,
    graphs: Vec<FuncGraph>,
    output_buffers: FxHashMap<(NodeId, usize), DeviceBuffer>,
}

impl GraphStore {
    pub fn new() -> GraphStore {
        GraphStore::default()
    }

    /// Return the number of nodes in the store.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn add_node(&mut self, node: Node, debug: DebugInfo) -> NodeId {
        let id = NodeId::from_u32(self.nodes.len() as u32)
            .unwrap_or_else(|| panic!("graph store exceeded {} nodes", u32::MAX));
        self.nodes.push(NodeEntry {
            node,
            debug,
            abstract_value: None,
        });
        id
    }

    /// Add an empty function graph.
    pub fn add_graph(&mut self, name: &str) -> GraphId {
        let id = GraphId::from_index(self.graphs.len());
        self.graphs.push(FuncGraph {
            name: name.to_string(),
            parameters: Vec::new(),
            return_node: None,
            parent: None,
            branch_condition: None,
            side_effect: false,
            object: None,
        });
        id
    }

    /// Add a graph which is lexically nested in `parent`, such as the body
    /// of a branch whose condition is `condition`.
    pub fn add_child_graph(
        &mut self,
        name: &str,
        parent: GraphId,
        condition: Option<NodeId>,
    ) -> GraphId {
        let id = self.add_graph(name);
        if let Some(graph) = self.graphs.last_mut() {
            graph.parent = Some(parent);
            graph.branch_condition = condition;
        }
        id
    }

    /// Add a parameter to `graph`.
    pub fn add_parameter(&mut self, graph: GraphId) -> NodeId {
        let index = self
            .graph(graph)
            .map(|g| g.parameters.len())
            .unwrap_or_default();
        let id = self.add_node(
            Node::Parameter(ParameterNode { graph, index }),
            DebugInfo::default(),
        );
        if let Some(g) = self.graphs.get_mut(graph.as_usize()) {
            g.parameters.push(id);
        }
        id
    }

    /// Add a constant.
    pub fn add_value(&mut self, value: Value) -> NodeId {
        self.add_node(Node::Value(ValueNode { value }), DebugInfo::default())
    }

    /// Add a call node. `inputs[0]` is the callee.
    pub fn add_call(&mut self, graph: GraphId, inputs: &[NodeId]) -> NodeId {
        self.add_call_with_debug(graph, inputs.to_vec(), DebugInfo::default())
    }

    pub fn add_call_with_debug(
        &mut self,
        graph: GraphId,
        inputs: Vec<NodeId>,
        debug: DebugInfo,
    ) -> NodeId {
        self.add_node(Node::Call(CallNode::new(graph, inputs)), debug)
    }

    /// Add a call to `prim` with arguments `args`.
    pub fn add_primitive_call(
        &mut self,
        graph: GraphId,
        prim: Arc<Primitive>,
        args: &[NodeId],
    ) -> NodeId {
        let callee = self.add_value(Value::Primitive(prim));
        let mut inputs = Vec::with_capacity(args.len() + 1);
        inputs.push(callee);
        inputs.extend_from_slice(args);
        self.add_call_with_debug(graph, inputs, DebugInfo::default())
    }

    /// Add a call node that replaces `origin`, in the same graph and with the
    /// same debug information.
    pub(crate) fn add_call_from(
        &mut self,
        origin: NodeId,
        inputs: Vec<NodeId>,
    ) -> Result<NodeId, InferError> {
        let graph = self.graph_of(origin).ok_or_else(|| {
            InferError::internal(format!("Node {} does not belong to a graph", origin))
        })?;
        let debug = self.debug_info(origin).cloned().unwrap_or_default();
        Ok(self.add_call_with_debug(graph, inputs, debug))
    }

    /// Make `value` the result of `graph`, via a `Return` node.
    pub fn set_return(&mut self, graph: GraphId, value: NodeId) -> NodeId {
        let ret = self.add_primitive_call(graph, Arc::new(Primitive::new(names::RETURN)), &[value]);
        if let Some(g) = self.graphs.get_mut(graph.as_usize()) {
            g.return_node = Some(ret);
        }
        ret
    }

    /// Associate a host object (cell or class instance) with a method graph.
    pub fn set_graph_object(&mut self, graph: GraphId, object: Value) {
        if let Some(g) = self.graphs.get_mut(graph.as_usize()) {
            g.object = Some(object);
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.as_usize()).map(|entry| &entry.node)
    }

    pub fn call(&self, id: NodeId) -> Option<&CallNode> {
        self.node(id).and_then(|node| node.as_call())
    }

    fn call_mut(&mut self, id: NodeId) -> Option<&mut CallNode> {
        match self.nodes.get_mut(id.as_usize()).map(|entry| &mut entry.node) {
            Some(Node::Call(call)) => Some(call),
            _ => None,
        }
    }

    /// Return the inputs of a call node, or an empty slice for other nodes.
    pub fn inputs(&self, id: NodeId) -> &[NodeId] {
        self.call(id).map(|call| call.inputs()).unwrap_or_default()
    }

    /// Return the value of a constant node.
    pub fn value(&self, id: NodeId) -> Option<&Value> {
        self.node(id).and_then(|node| node.as_value())
    }

    pub fn graph(&self, id: GraphId) -> Option<&FuncGraph> {
        self.graphs.get(id.as_usize())
    }

    pub fn graph_of(&self, id: NodeId) -> Option<GraphId> {
        self.node(id).and_then(|node| node.graph())
    }

    /// Return the primitive called by a call node, if its callee is a
    /// constant primitive.
    pub fn callee_primitive(&self, id: NodeId) -> Option<&Arc<Primitive>> {
        let callee = *self.inputs(id).first()?;
        match self.value(callee) {
            Some(Value::Primitive(prim)) => Some(prim),
            _ => None,
        }
    }

    /// Return true if `id` calls the primitive named `name`.
    pub fn is_call_to(&self, id: NodeId, name: &str) -> bool {
        self.callee_primitive(id)
            .is_some_and(|prim| prim.name() == name)
    }

    pub fn debug_info(&self, id: NodeId) -> Option<&DebugInfo> {
        self.nodes.get(id.as_usize()).map(|entry| &entry.debug)
    }

    pub fn set_debug_info(&mut self, id: NodeId, debug: DebugInfo) {
        if let Some(entry) = self.nodes.get_mut(id.as_usize()) {
            entry.debug = debug;
        }
    }

    /// Return the abstract value attached to a node by decoration.
    pub fn abstract_value(&self, id: NodeId) -> Option<&AbstractValue> {
        self.nodes
            .get(id.as_usize())
            .and_then(|entry| entry.abstract_value.as_ref())
    }

    pub fn set_abstract_value(&mut self, id: NodeId, value: AbstractValue) {
        if let Some(entry) = self.nodes.get_mut(id.as_usize()) {
            entry.abstract_value = Some(value);
        }
    }

    pub fn set_annotation(&mut self, id: NodeId, ty: Type) {
        if let Some(call) = self.call_mut(id) {
            call.annotation = Some(ty);
        }
    }

    /// Record the expected output type and shape of a host-script node.
    pub fn set_real_type_shape(&mut self, id: NodeId, ty: Type, shape: Option<Shape>) {
        if let Some(call) = self.call_mut(id) {
            call.real_type = Some(ty);
            call.real_shape = shape;
        }
    }

    pub fn set_host_list(&mut self, id: NodeId, list: Value) {
        if let Some(call) = self.call_mut(id) {
            call.host_list = Some(list);
        }
    }

    pub(crate) fn set_kernel_args(&mut self, id: NodeId, args: KernelArgs) {
        if let Some(call) = self.call_mut(id) {
            call.kernel_args = Some(args);
        }
    }

    /// Mark a call node, and the graph that owns it, as having side effects.
    pub fn mark_side_effect(&mut self, id: NodeId) {
        let Some(call) = self.call_mut(id) else {
            return;
        };
        call.side_effect = true;
        let graph = call.graph;
        if let Some(g) = self.graphs.get_mut(graph.as_usize()) {
            g.side_effect = true;
        }
    }

    /// Return the node that produces a given output of a runtime operator.
    pub fn output_buffer(&self, id: NodeId, index: usize) -> Option<&DeviceBuffer> {
        self.output_buffers.get(&(id, index))
    }

    pub fn set_output_buffer(&mut self, id: NodeId, index: usize, buffer: DeviceBuffer) {
        self.output_buffers.insert((id, index), buffer);
    }

    /// Return the nodes which use `id` as an input.
    pub fn users(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, entry)| {
                entry
                    .node
                    .as_call()
                    .is_some_and(|call| call.inputs.contains(&id))
            })
            .filter_map(|(i, _)| NodeId::from_u32(i as u32))
            .collect()
    }

    /// Return the nodes reachable from the return node of `graph`, ordered
    /// so that every node comes after its inputs.
    pub fn topo_order(&self, graph: GraphId) -> Vec<NodeId> {
        let Some(root) = self.graph(graph).and_then(|g| g.return_node) else {
            return Vec::new();
        };

        let mut order = Vec::new();
        let mut visited = NoopHashSet::default();
        // Stack of (node, inputs_pushed).
        let mut stack = vec![(root, false)];
        while let Some((id, inputs_pushed)) = stack.pop() {
            if inputs_pushed {
                order.push(id);
                continue;
            }
            if !visited.insert(id) {
                continue;
            }
            stack.push((id, true));
            for &input in self.inputs(id).iter().rev() {
                if !visited.contains(&input) {
                    stack.push((input, false));
                }
            }
        }
        order
    }

    /// Return a one-line description of a node for diagnostics, eg.
    /// `%5 = Add(%3, %4)`.
    pub fn describe(&self, id: NodeId) -> String {
        match self.node(id) {
            Some(Node::Call(call)) => {
                let callee = match call.inputs.first() {
                    Some(&callee) => match self.value(callee) {
                        Some(Value::Primitive(prim)) => prim.name().to_string(),
                        Some(value) => value.to_string(),
                        None => callee.to_string(),
                    },
                    None => "<empty>".to_string(),
                };
                let args: Vec<String> = call.args().iter().map(|a| a.to_string()).collect();
                format!("{} = {}({})", id, callee, args.join(", "))
            }
            Some(Node::Value(node)) => format!("{} = Value({})", id, node.value),
            Some(Node::Parameter(param)) => {
                format!("{} = Parameter({}, {})", id, param.graph, param.index)
            }
            None => format!("{} = <invalid>", id),
        }
    }
}
