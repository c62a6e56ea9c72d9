//! The evaluation driver.
//!
//! An [`Engine`] evaluates nodes of a [`GraphStore`] to abstract values. A
//! node is evaluated in a context, which binds the parameters of the graph
//! that owns it. Evaluating a call node evaluates its callee and, depending
//! on the kind of function, either runs a primitive's evaluator or
//! evaluates the return node of the called graph in a new context.
//!
//! Evaluators may rewrite a call by adding new nodes to the graph and
//! forwarding evaluation to them. The original node then takes the result
//! of the node it was forwarded to.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::abstract_value::{AbstractFunction, AbstractKind, AbstractValue, EvalResult};
use crate::cache::EvaluatorCache;
use crate::env::InferConfig;
use crate::error::InferError;
use crate::evaluator::dispatch_table;
use crate::graph::{GraphId, GraphStore, Node, NodeId, NoopHashMap};
use crate::host::HostBridge;
use crate::primitive::PrimId;
use crate::usage::ElementUsage;
use crate::value::Value;

/// ID of an evaluation context.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u32);

impl ContextId {
    /// The outermost context, which binds no parameters.
    pub const TOP: ContextId = ContextId(0);

    fn from_index(index: usize) -> ContextId {
        ContextId(index as u32)
    }

    fn as_usize(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug)]
struct Context {
    graph: Option<GraphId>,
    parent: ContextId,
    args: Vec<AbstractValue>,
}

/// A node evaluated in a particular context.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeConfig {
    pub node: NodeId,
    pub context: ContextId,
}

impl NodeConfig {
    pub fn new(node: NodeId, context: ContextId) -> NodeConfig {
        NodeConfig { node, context }
    }
}

/// An operand of a function application.
///
/// Operands are usually nodes of the call being evaluated. Arguments bound
/// by a partial application have no node of their own and are passed as
/// virtual operands.
#[derive(Clone, Debug)]
pub enum ArgConfig {
    Node(NodeConfig),
    Virtual(AbstractValue),
}

/// Whether the engine is compiling a whole graph or inferring single
/// operators for eager execution.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    #[default]
    Graph,
    /// Disables the global evaluator cache, since inferred attributes cannot
    /// be written back to primitives in this mode.
    Eager,
}

/// Abstract evaluation engine for one compilation.
pub struct Engine {
    graph: GraphStore,
    config: InferConfig,
    mode: ExecutionMode,
    host: Option<Arc<dyn HostBridge>>,
    usage: ElementUsage,
    local_caches: FxHashMap<PrimId, EvaluatorCache>,

    contexts: Vec<Context>,
    context_ids: FxHashMap<(GraphId, ContextId, Vec<AbstractValue>), ContextId>,

    results: FxHashMap<NodeConfig, EvalResult>,
    forwarded: FxHashMap<NodeConfig, NodeConfig>,
    in_progress: FxHashSet<NodeConfig>,
    depth: usize,
}

impl Engine {
    pub fn new(graph: GraphStore, config: InferConfig) -> Engine {
        Engine {
            graph,
            config,
            mode: ExecutionMode::Graph,
            host: None,
            usage: ElementUsage::new(),
            local_caches: FxHashMap::default(),
            contexts: vec![Context {
                graph: None,
                parent: ContextId::TOP,
                args: Vec::new(),
            }],
            context_ids: FxHashMap::default(),
            results: FxHashMap::default(),
            forwarded: FxHashMap::default(),
            in_progress: FxHashSet::default(),
            depth: 0,
        }
    }

    /// Install the bridge to the host runtime.
    pub fn with_host(mut self, host: Arc<dyn HostBridge>) -> Engine {
        self.host = Some(host);
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Engine {
        self.mode = mode;
        self
    }

    pub fn graph(&self) -> &GraphStore {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut GraphStore {
        &mut self.graph
    }

    /// Consume the engine and return the graph, including nodes added
    /// during evaluation.
    pub fn into_graph(self) -> GraphStore {
        self.graph
    }

    pub fn config(&self) -> &InferConfig {
        &self.config
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn host(&self) -> Option<&Arc<dyn HostBridge>> {
        self.host.as_ref()
    }

    /// Return the host bridge, or an error naming `purpose` if none is
    /// installed.
    pub(crate) fn require_host(&self, purpose: &str) -> Result<Arc<dyn HostBridge>, InferError> {
        self.host.clone().ok_or_else(|| {
            InferError::internal(format!("No host bridge is installed to {}", purpose))
        })
    }

    /// Element-usage flags recorded during evaluation.
    pub fn usage(&self) -> &ElementUsage {
        &self.usage
    }

    pub(crate) fn usage_mut(&mut self) -> &mut ElementUsage {
        &mut self.usage
    }

    pub(crate) fn local_cache(&mut self, prim: PrimId) -> &mut EvaluatorCache {
        self.local_caches.entry(prim).or_default()
    }

    /// Evaluate `graph` with the given arguments and return the abstract
    /// value of its result.
    pub fn run(
        &mut self,
        graph: GraphId,
        args: Vec<AbstractValue>,
    ) -> Result<AbstractValue, InferError> {
        let context = self.graph_context(graph, ContextId::TOP, args)?;
        let ret = self.return_node(graph)?;
        let result = self.eval(NodeConfig::new(ret, context))?;
        Ok(result.value().clone())
    }

    /// Evaluate a node in the outermost context.
    pub fn infer(&mut self, node: NodeId) -> Result<AbstractValue, InferError> {
        let result = self.eval(NodeConfig::new(node, ContextId::TOP))?;
        Ok(result.value().clone())
    }

    /// Return the result of a node evaluated earlier.
    pub fn result(&self, conf: NodeConfig) -> Option<&EvalResult> {
        self.results.get(&conf)
    }

    /// Return the node that evaluation of `conf` was forwarded to.
    pub fn forwarded_to(&self, conf: NodeConfig) -> Option<NodeConfig> {
        self.forwarded.get(&conf).copied()
    }

    /// Evaluate a node, or return its result if it has been evaluated
    /// already.
    pub fn eval(&mut self, conf: NodeConfig) -> Result<EvalResult, InferError> {
        if let Some(result) = self.results.get(&conf) {
            return Ok(result.clone());
        }
        if let Some(&target) = self.forwarded.get(&conf) {
            return self.eval(target);
        }
        if self.depth >= self.config.max_eval_depth {
            return Err(InferError::internal(format!(
                "Exceeded the maximum evaluation depth of {}",
                self.config.max_eval_depth
            ))
            .at_node(|| self.node_context(conf.node)));
        }
        if !self.in_progress.insert(conf) {
            return Err(InferError::internal(format!(
                "Cyclic evaluation of node {}",
                self.graph.describe(conf.node)
            ))
            .at_node(|| self.node_context(conf.node)));
        }

        self.depth += 1;
        let result = self.eval_node(conf);
        self.depth -= 1;
        self.in_progress.remove(&conf);

        let result = result.map_err(|err| err.at_node(|| self.node_context(conf.node)))?;
        self.results.insert(conf, result.clone());
        Ok(result)
    }

    fn node_context(&self, node: NodeId) -> (String, Option<String>) {
        let source = self
            .graph
            .debug_info(node)
            .and_then(|debug| debug.source.clone());
        (self.graph.describe(node), source)
    }

    fn eval_node(&mut self, conf: NodeConfig) -> Result<EvalResult, InferError> {
        let node = self
            .graph
            .node(conf.node)
            .cloned()
            .ok_or_else(|| InferError::internal(format!("Invalid node {}", conf.node)))?;
        match node {
            Node::Value(_) => {
                let value = self.graph.value(conf.node).cloned().unwrap_or(Value::Any);
                Ok(EvalResult::new(AbstractValue::from_value_in(&value, conf.context)))
            }
            Node::Parameter(param) => {
                let value = self.lookup_parameter(conf.context, param.graph(), param.index())?;
                Ok(EvalResult::new(value))
            }
            Node::Call(call) => {
                let Some((&callee, args)) = call.inputs().split_first() else {
                    return Err(InferError::malformed(format!(
                        "Call node {} has no callee",
                        conf.node
                    )));
                };
                let func = self.eval(NodeConfig::new(callee, conf.context))?;
                let args = args
                    .iter()
                    .map(|&arg| ArgConfig::Node(NodeConfig::new(arg, conf.context)))
                    .collect();
                self.apply(func.value(), args, conf)
            }
        }
    }

    fn lookup_parameter(
        &self,
        mut context: ContextId,
        graph: GraphId,
        index: usize,
    ) -> Result<AbstractValue, InferError> {
        loop {
            let ctx = &self.contexts[context.as_usize()];
            if ctx.graph == Some(graph) {
                return ctx.args.get(index).cloned().ok_or_else(|| {
                    InferError::internal(format!(
                        "Parameter {} of graph {} is out of range",
                        index, graph
                    ))
                });
            }
            if context == ContextId::TOP {
                return Err(InferError::internal(format!(
                    "Parameter {} of graph {} is not bound in this context",
                    index, graph
                )));
            }
            context = ctx.parent;
        }
    }

    fn graph_context(
        &mut self,
        graph: GraphId,
        parent: ContextId,
        args: Vec<AbstractValue>,
    ) -> Result<ContextId, InferError> {
        let func_graph = self
            .graph
            .graph(graph)
            .ok_or_else(|| InferError::internal(format!("Invalid graph {}", graph)))?;
        let num_params = func_graph.parameters().len();
        if args.len() != num_params {
            return Err(InferError::type_error(format!(
                "The function '{}' takes {} positional arguments, but {} were given.",
                func_graph.name(),
                num_params,
                args.len()
            )));
        }

        let key = (graph, parent, args);
        if let Some(&id) = self.context_ids.get(&key) {
            return Ok(id);
        }
        let id = ContextId::from_index(self.contexts.len());
        self.contexts.push(Context {
            graph: Some(graph),
            parent,
            args: key.2.clone(),
        });
        self.context_ids.insert(key, id);
        Ok(id)
    }

    fn return_node(&self, graph: GraphId) -> Result<NodeId, InferError> {
        self.graph
            .graph(graph)
            .and_then(|g| g.return_node())
            .ok_or_else(|| InferError::internal(format!("Graph {} has no return node", graph)))
    }

    /// Apply a function value to operands, producing the result of the call
    /// node `out`.
    pub(crate) fn apply(
        &mut self,
        func: &AbstractValue,
        args: Vec<ArgConfig>,
        out: NodeConfig,
    ) -> Result<EvalResult, InferError> {
        match func.kind() {
            AbstractKind::Function(func) => self.apply_function(func, args, out),
            AbstractKind::Problem { payload, .. } => {
                Ok(EvalResult::new(AbstractValue::problem(payload, out.node)))
            }
            AbstractKind::Undetermined { .. } | AbstractKind::Any { .. } => {
                Ok(EvalResult::new(func.clone()))
            }
            _ => Err(InferError::type_error(format!("{} is not callable.", func))),
        }
    }

    fn apply_function(
        &mut self,
        func: &AbstractFunction,
        args: Vec<ArgConfig>,
        out: NodeConfig,
    ) -> Result<EvalResult, InferError> {
        match func {
            AbstractFunction::Primitive(prim) => {
                let evaluator = dispatch_table().evaluator_for(prim)?;
                evaluator.run(self, prim, args, out)
            }
            AbstractFunction::Graph { graph, context, .. } => {
                let values = self.eval_args(&args)?;
                let callee_context = self.graph_context(*graph, *context, values)?;
                let ret = self.return_node(*graph)?;
                let result = self.eval(NodeConfig::new(ret, callee_context))?;
                Ok(EvalResult::new(result.value().clone()))
            }
            AbstractFunction::Partial { func, args: bound, .. } => {
                let all_args = bound
                    .iter()
                    .cloned()
                    .map(ArgConfig::Virtual)
                    .chain(args)
                    .collect();
                self.apply_function(func, all_args, out)
            }
            AbstractFunction::Signature(func) => self.apply_function(func, args, out),
        }
    }

    /// Evaluate an operand.
    pub(crate) fn eval_arg(&mut self, arg: &ArgConfig) -> Result<AbstractValue, InferError> {
        match arg {
            ArgConfig::Node(conf) => Ok(self.eval(*conf)?.value().clone()),
            ArgConfig::Virtual(value) => Ok(value.clone()),
        }
    }

    pub(crate) fn eval_args(
        &mut self,
        args: &[ArgConfig],
    ) -> Result<Vec<AbstractValue>, InferError> {
        args.iter().map(|arg| self.eval_arg(arg)).collect()
    }

    /// Return a node for an operand, so it can be used as an input of a
    /// synthesized node evaluated in `context`.
    ///
    /// Virtual operands get a new placeholder node whose result in `context`
    /// is pinned to the operand's value.
    pub(crate) fn arg_node(&mut self, arg: &ArgConfig, context: ContextId) -> NodeId {
        match arg {
            ArgConfig::Node(conf) => conf.node,
            ArgConfig::Virtual(value) => {
                let node = if value.is_variable() {
                    self.graph.add_value(Value::Any)
                } else {
                    self.graph.add_value(value.value())
                };
                self.results.insert(
                    NodeConfig::new(node, context),
                    EvalResult::new(value.clone()),
                );
                node
            }
        }
    }

    pub(crate) fn arg_nodes(&mut self, args: &[ArgConfig], context: ContextId) -> Vec<NodeId> {
        args.iter().map(|arg| self.arg_node(arg, context)).collect()
    }

    /// Continue evaluation of `from` at the node `to`, in the same context.
    pub(crate) fn forward(
        &mut self,
        from: NodeConfig,
        to: NodeId,
    ) -> Result<EvalResult, InferError> {
        tracing::debug!(
            from = %self.graph.describe(from.node),
            to = %self.graph.describe(to),
            "forwarding evaluation"
        );
        let target = NodeConfig::new(to, from.context);
        self.forwarded.insert(from, target);
        self.eval(target)
    }

    /// Write the abstract values inferred for each node back onto the graph.
    ///
    /// A node evaluated in several contexts gets the join of its results.
    pub fn attach_abstracts(&mut self) {
        let mut joined: NoopHashMap<NodeId, AbstractValue> = NoopHashMap::default();
        let mut confs: Vec<_> = self.results.iter().collect();
        confs.sort_by_key(|(conf, _)| (conf.node, conf.context));
        for (conf, result) in confs {
            let value = result.value();
            joined
                .entry(conf.node)
                .and_modify(|existing| *existing = existing.join(value))
                .or_insert_with(|| value.clone());
        }
        for (node, value) in joined {
            self.graph.set_abstract_value(node, value);
        }
    }

    /// Discard results and local caches, keeping the graph and usage flags.
    pub fn clear_results(&mut self) {
        self.results.clear();
        self.forwarded.clear();
        self.local_caches.clear();
    }
}
