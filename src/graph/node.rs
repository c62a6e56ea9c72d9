use super::{GraphId, NodeId};
use crate::dynamic_shape::KernelArgs;
use crate::types::{Shape, Type};
use crate::value::Value;

/// Source information used in error messages and by host-script fallbacks.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DebugInfo {
    /// Debug name of the node.
    pub name: Option<String>,

    /// Source expression the node was created from, eg. `x.shape`.
    pub source: Option<String>,
}

impl DebugInfo {
    pub fn with_source(source: &str) -> DebugInfo {
        DebugInfo {
            name: None,
            source: Some(source.to_string()),
        }
    }
}

#[derive(Clone, Debug)]
pub enum Node {
    /// Application of the function produced by input 0 to the remaining
    /// inputs.
    Call(CallNode),
    /// A compile-time constant.
    Value(ValueNode),
    /// A formal parameter of a function graph.
    Parameter(ParameterNode),
}

impl Node {
    pub fn as_call(&self) -> Option<&CallNode> {
        match self {
            Node::Call(call) => Some(call),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Node::Value(node) => Some(&node.value),
            _ => None,
        }
    }

    /// Return the graph which owns this node. Constants are not owned by any
    /// graph.
    pub fn graph(&self) -> Option<GraphId> {
        match self {
            Node::Call(call) => Some(call.graph),
            Node::Value(_) => None,
            Node::Parameter(param) => Some(param.graph),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CallNode {
    pub(super) inputs: Vec<NodeId>,
    pub(super) graph: GraphId,
    pub(super) side_effect: bool,
    pub(super) annotation: Option<Type>,
    pub(super) real_type: Option<Type>,
    pub(super) real_shape: Option<Shape>,
    pub(super) host_list: Option<Value>,
    pub(super) kernel_args: Option<KernelArgs>,
}

impl CallNode {
    pub(super) fn new(graph: GraphId, inputs: Vec<NodeId>) -> CallNode {
        CallNode {
            inputs,
            graph,
            side_effect: false,
            annotation: None,
            real_type: None,
            real_shape: None,
            host_list: None,
            kernel_args: None,
        }
    }

    /// All inputs, including the callee at index 0.
    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    /// Inputs excluding the callee.
    pub fn args(&self) -> &[NodeId] {
        self.inputs.get(1..).unwrap_or_default()
    }

    pub fn graph(&self) -> GraphId {
        self.graph
    }

    pub fn has_side_effect(&self) -> bool {
        self.side_effect
    }

    /// Type declared by a type annotation on the source expression.
    pub fn annotation(&self) -> Option<&Type> {
        self.annotation.as_ref()
    }

    /// Expected output type of a host-script node, if known.
    pub fn real_type(&self) -> Option<&Type> {
        self.real_type.as_ref()
    }

    /// Expected output shape of a host-script node, if known.
    pub fn real_shape(&self) -> Option<&Shape> {
        self.real_shape.as_ref()
    }

    /// Host list object which backs the list this node produces.
    pub fn host_list(&self) -> Option<&Value> {
        self.host_list.as_ref()
    }

    pub fn kernel_args(&self) -> Option<&KernelArgs> {
        self.kernel_args.as_ref()
    }
}

#[derive(Clone, Debug)]
pub struct ValueNode {
    pub(super) value: Value,
}

#[derive(Clone, Debug)]
pub struct ParameterNode {
    pub(super) graph: GraphId,
    pub(super) index: usize,
}

impl ParameterNode {
    pub fn graph(&self) -> GraphId {
        self.graph
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

/// A function graph: parameters, a return node and the information needed to
/// reason about side effects and branch conditions.
#[derive(Clone, Debug)]
pub struct FuncGraph {
    pub(super) name: String,
    pub(super) parameters: Vec<NodeId>,
    pub(super) return_node: Option<NodeId>,
    pub(super) parent: Option<GraphId>,
    pub(super) branch_condition: Option<NodeId>,
    pub(super) side_effect: bool,
    pub(super) object: Option<Value>,
}

impl FuncGraph {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[NodeId] {
        &self.parameters
    }

    pub fn return_node(&self) -> Option<NodeId> {
        self.return_node
    }

    /// The lexically enclosing graph.
    pub fn parent(&self) -> Option<GraphId> {
        self.parent
    }

    /// Condition node of the branch which this graph is the body of.
    pub fn branch_condition(&self) -> Option<NodeId> {
        self.branch_condition
    }

    pub fn has_side_effect(&self) -> bool {
        self.side_effect
    }

    /// Host object (cell or class instance) this graph is a method of.
    pub fn object(&self) -> Option<&Value> {
        self.object.as_ref()
    }
}
