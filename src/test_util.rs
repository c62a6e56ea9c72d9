//! Helpers shared by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::abstract_value::AbstractValue;
use crate::error::HostError;
use crate::graph::{GraphId, GraphStore, NodeId};
use crate::host::{HostArg, HostBridge, HostInferOutput, ScriptScope};
use crate::primitive::Primitive;
use crate::types::{DType, Shape};
use crate::value::Value;

pub fn f32_tensor(shape: &[usize]) -> AbstractValue {
    AbstractValue::tensor(DType::Float32, Shape::fixed(shape))
}

/// Add a call to a builtin primitive named `name`.
pub fn prim_call(g: &mut GraphStore, graph: GraphId, name: &str, args: &[NodeId]) -> NodeId {
    g.add_primitive_call(graph, Arc::new(Primitive::new(name)), args)
}

/// Number of calls made to each [`HostBridge`] method of a [`CannedHost`].
#[derive(Default)]
pub struct CallCounts {
    pub check: AtomicUsize,
    pub infer: AtomicUsize,
    pub construct: AtomicUsize,
    pub execute: AtomicUsize,
    pub reinfer: AtomicUsize,
}

impl CallCounts {
    pub fn get(count: &AtomicUsize) -> usize {
        count.load(Ordering::SeqCst)
    }
}

/// Host bridge which returns fixed responses and records how it was called.
#[derive(Default)]
pub struct CannedHost {
    infer_output: Option<HostInferOutput>,
    value: Option<Value>,
    object: Option<Value>,
    script_result: Option<Value>,
    reinfer_result: Option<AbstractValue>,
    check_error: Option<String>,

    pub calls: CallCounts,
    pub last_script: Mutex<Option<String>>,
    pub last_scope: Mutex<Option<ScriptScope>>,
    pub last_reinfer_args: Mutex<Vec<AbstractValue>>,
}

impl CannedHost {
    pub fn new() -> CannedHost {
        CannedHost::default()
    }

    pub fn with_infer_output(mut self, output: HostInferOutput) -> Self {
        self.infer_output = Some(output);
        self
    }

    /// Make the host compute `value` for every primitive.
    pub fn with_infer_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_object(mut self, object: Value) -> Self {
        self.object = Some(object);
        self
    }

    pub fn with_script_result(mut self, result: Value) -> Self {
        self.script_result = Some(result);
        self
    }

    pub fn with_reinfer_result(mut self, result: AbstractValue) -> Self {
        self.reinfer_result = Some(result);
        self
    }

    pub fn with_check_error(mut self, message: &str) -> Self {
        self.check_error = Some(message.to_string());
        self
    }

    fn count(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

impl HostBridge for CannedHost {
    fn check(&self, _prim: &Primitive, _args: &[HostArg]) -> Result<(), HostError> {
        Self::count(&self.calls.check);
        match &self.check_error {
            Some(message) => Err(message.clone().into()),
            None => Ok(()),
        }
    }

    fn infer(&self, prim: &Primitive, _args: &[HostArg]) -> Result<HostInferOutput, HostError> {
        Self::count(&self.calls.infer);
        self.infer_output
            .clone()
            .ok_or_else(|| format!("no canned output for {}", prim.name()).into())
    }

    fn has_infer_value(&self, _prim: &Primitive) -> bool {
        self.value.is_some()
    }

    fn infer_value(
        &self,
        _prim: &Primitive,
        _args: &[HostArg],
    ) -> Result<Option<Value>, HostError> {
        Ok(self.value.clone())
    }

    fn construct_object(
        &self,
        _class: &Value,
        _args: &[Value],
    ) -> Result<Option<Value>, HostError> {
        Self::count(&self.calls.construct);
        Ok(self.object.clone())
    }

    fn execute_script(
        &self,
        script: &str,
        scope: &ScriptScope,
    ) -> Result<Option<Value>, HostError> {
        Self::count(&self.calls.execute);
        *self.last_script.lock() = Some(script.to_string());
        *self.last_scope.lock() = Some(scope.clone());
        Ok(self.script_result.clone())
    }

    fn reinfer(&self, script: &str, args: &[AbstractValue]) -> Result<AbstractValue, HostError> {
        Self::count(&self.calls.reinfer);
        *self.last_script.lock() = Some(script.to_string());
        *self.last_reinfer_args.lock() = args.to_vec();
        self.reinfer_result
            .clone()
            .ok_or_else(|| format!("no canned result for script {}", script).into())
    }

    fn reinfer_primitive(
        &self,
        prim: &Primitive,
        args: &[AbstractValue],
    ) -> Result<AbstractValue, HostError> {
        Self::count(&self.calls.reinfer);
        *self.last_reinfer_args.lock() = args.to_vec();
        self.reinfer_result
            .clone()
            .ok_or_else(|| format!("no canned result for {}", prim.name()).into())
    }
}
