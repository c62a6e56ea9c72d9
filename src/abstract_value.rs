//! Abstract values: compile-time descriptions of what a node may produce at
//! runtime.
//!
//! Abstract values are immutable and shared via `Arc`. Operations which
//! "update" a value, such as attaching a known tensor value, return a new
//! abstract value and leave the original untouched. This makes it safe to
//! hand out cached results to multiple callers.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::engine::ContextId;
use crate::graph::{GraphId, NodeId};
use crate::primitive::{AttrMap, Primitive};
use crate::types::{DType, MonadKind, Shape, SparseKind, Type};
use crate::value::{TensorData, Value};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AbstractTensor {
    pub dtype: DType,
    pub shape: Shape,
    /// Statically known contents, or [`Value::Any`].
    pub value: Value,
    /// Known values of the tensor's shape, when the shape itself is dynamic
    /// but was computed from constants.
    pub shape_value: Option<Value>,
    /// True if this is a parameter (a reference to a mutable tensor).
    pub is_ref: bool,
}

impl AbstractTensor {
    pub fn new(dtype: DType, shape: Shape) -> AbstractTensor {
        AbstractTensor {
            dtype,
            shape,
            value: Value::Any,
            shape_value: None,
            is_ref: false,
        }
    }
}

/// Elements of an abstract tuple or list.
///
/// Only the elements and the dynamic-length flag take part in equality and
/// hashing. The defining node and backing host list are bookkeeping for
/// element-usage tracking.
#[derive(Clone, Debug)]
pub struct AbstractSequence {
    elements: Vec<AbstractValue>,
    dynamic_len: bool,
    origin: Option<NodeId>,
    host_list: Option<Value>,
}

impl AbstractSequence {
    pub fn new(elements: Vec<AbstractValue>) -> AbstractSequence {
        AbstractSequence {
            elements,
            dynamic_len: false,
            origin: None,
            host_list: None,
        }
    }

    /// Create a sequence whose length is not known statically. `element`
    /// describes every element.
    pub fn dynamic(element: Option<AbstractValue>) -> AbstractSequence {
        AbstractSequence {
            elements: element.into_iter().collect(),
            dynamic_len: true,
            origin: None,
            host_list: None,
        }
    }

    pub fn with_origin(mut self, node: NodeId) -> AbstractSequence {
        self.origin = Some(node);
        self
    }

    pub fn with_host_list(mut self, list: Option<Value>) -> AbstractSequence {
        self.host_list = list;
        self
    }

    /// Return the elements of a fixed-length sequence. For dynamic-length
    /// sequences this is the element template, if any.
    pub fn elements(&self) -> &[AbstractValue] {
        &self.elements
    }

    /// Return the number of elements, or `None` if the length is dynamic.
    pub fn len(&self) -> Option<usize> {
        (!self.dynamic_len).then_some(self.elements.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    pub fn is_dynamic_len(&self) -> bool {
        self.dynamic_len
    }

    /// Node which created this sequence, used for element-usage tracking.
    pub fn origin(&self) -> Option<NodeId> {
        self.origin
    }

    pub fn host_list(&self) -> Option<&Value> {
        self.host_list.as_ref()
    }

    fn element_types(&self) -> Option<Vec<Type>> {
        if self.dynamic_len {
            return None;
        }
        Some(self.elements.iter().map(|e| e.ty()).collect())
    }
}

impl PartialEq for AbstractSequence {
    fn eq(&self, other: &Self) -> bool {
        self.dynamic_len == other.dynamic_len && self.elements == other.elements
    }
}

impl Eq for AbstractSequence {}

impl Hash for AbstractSequence {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.dynamic_len.hash(state);
        self.elements.hash(state);
    }
}

/// A callable abstract value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AbstractFunction {
    Primitive(Arc<Primitive>),
    /// A function graph, closed over the context it was created in.
    Graph {
        graph: GraphId,
        context: ContextId,
        /// Cell or class instance the graph is a method of.
        object: Option<Value>,
    },
    /// `func` with some leading arguments already bound.
    Partial {
        func: Arc<AbstractFunction>,
        args: Vec<AbstractValue>,
        node: NodeId,
    },
    /// A function called through signature resolution.
    Signature(Arc<AbstractFunction>),
}

impl AbstractFunction {
    pub fn as_primitive(&self) -> Option<&Arc<Primitive>> {
        match self {
            AbstractFunction::Primitive(prim) => Some(prim),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AbstractKind {
    Scalar { value: Value, ty: Type },
    Tensor(AbstractTensor),
    Tuple(AbstractSequence),
    List(AbstractSequence),
    Dictionary(Vec<(Value, AbstractValue)>),
    Function(AbstractFunction),
    KeywordArg { key: Arc<str>, value: AbstractValue },
    Slice {
        start: AbstractValue,
        stop: AbstractValue,
        step: AbstractValue,
    },
    Sparse {
        kind: SparseKind,
        dtype: DType,
        dense_shape: Shape,
    },
    /// A builtin type object, eg. `int`.
    Type(Type),
    /// A class type or instance.
    Class(Value),
    /// Placeholder for a value that has not been determined yet, eg. the
    /// result of a call which is still being evaluated.
    Undetermined { broadened: bool },
    Monad(MonadKind),
    None,
    Ellipsis,
    /// A value that can only be known at runtime. `supposed_dtype` is a hint
    /// for the tensor element type, if the value is expected to be a tensor.
    Any { supposed_dtype: Option<DType> },
    /// Result of an operation whose value does not matter, such as a
    /// deferred `raise`.
    Negligible,
    /// An error value. Any operation consuming it produces another problem
    /// value instead of failing immediately.
    Problem { payload: Arc<str>, node: NodeId },
}

/// A shared, immutable abstract value.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AbstractValue(Arc<AbstractKind>);

impl AbstractValue {
    pub fn new(kind: AbstractKind) -> AbstractValue {
        AbstractValue(Arc::new(kind))
    }

    pub fn kind(&self) -> &AbstractKind {
        &self.0
    }

    /// Create a scalar whose type is derived from `value`.
    pub fn scalar(value: Value) -> AbstractValue {
        let ty = value.ty();
        Self::new(AbstractKind::Scalar { value, ty })
    }

    /// Create a scalar of type `ty` with an unknown value.
    pub fn scalar_of(ty: Type) -> AbstractValue {
        Self::new(AbstractKind::Scalar {
            value: Value::Any,
            ty,
        })
    }

    pub fn tensor(dtype: DType, shape: Shape) -> AbstractValue {
        Self::new(AbstractKind::Tensor(AbstractTensor::new(dtype, shape)))
    }

    /// Create a tensor abstract value with known contents.
    pub fn from_tensor(data: &Arc<TensorData>) -> AbstractValue {
        Self::new(AbstractKind::Tensor(AbstractTensor {
            dtype: data.dtype(),
            shape: Shape::fixed(data.shape()),
            value: Value::Tensor(data.clone()),
            shape_value: None,
            is_ref: false,
        }))
    }

    pub fn tuple(elements: Vec<AbstractValue>) -> AbstractValue {
        Self::new(AbstractKind::Tuple(AbstractSequence::new(elements)))
    }

    pub fn list(elements: Vec<AbstractValue>) -> AbstractValue {
        Self::new(AbstractKind::List(AbstractSequence::new(elements)))
    }

    pub fn function(func: AbstractFunction) -> AbstractValue {
        Self::new(AbstractKind::Function(func))
    }

    pub fn primitive(prim: Arc<Primitive>) -> AbstractValue {
        Self::function(AbstractFunction::Primitive(prim))
    }

    pub fn keyword_arg(key: &str, value: AbstractValue) -> AbstractValue {
        Self::new(AbstractKind::KeywordArg {
            key: key.into(),
            value,
        })
    }

    pub fn any() -> AbstractValue {
        Self::new(AbstractKind::Any {
            supposed_dtype: None,
        })
    }

    pub fn any_with_dtype(dtype: Option<DType>) -> AbstractValue {
        Self::new(AbstractKind::Any {
            supposed_dtype: dtype,
        })
    }

    /// A broadened undetermined value, which short-circuits inference of
    /// its consumers.
    pub fn undetermined() -> AbstractValue {
        Self::new(AbstractKind::Undetermined { broadened: true })
    }

    pub fn none() -> AbstractValue {
        Self::new(AbstractKind::None)
    }

    pub fn negligible() -> AbstractValue {
        Self::new(AbstractKind::Negligible)
    }

    pub fn monad(kind: MonadKind) -> AbstractValue {
        Self::new(AbstractKind::Monad(kind))
    }

    pub fn problem(payload: &str, node: NodeId) -> AbstractValue {
        Self::new(AbstractKind::Problem {
            payload: payload.into(),
            node,
        })
    }

    /// Convert a constant to an abstract value. Function graphs are closed
    /// over `context`.
    pub fn from_value_in(value: &Value, context: ContextId) -> AbstractValue {
        let kind = match value {
            Value::Any => AbstractKind::Any {
                supposed_dtype: None,
            },
            Value::None => AbstractKind::None,
            Value::Ellipsis => AbstractKind::Ellipsis,
            Value::Tuple(elems) => AbstractKind::Tuple(AbstractSequence::new(
                elems
                    .iter()
                    .map(|v| Self::from_value_in(v, context))
                    .collect(),
            )),
            Value::List(elems) => AbstractKind::List(
                AbstractSequence::new(
                    elems
                        .iter()
                        .map(|v| Self::from_value_in(v, context))
                        .collect(),
                )
                .with_host_list(Some(value.clone())),
            ),
            Value::Dict(entries) => AbstractKind::Dictionary(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from_value_in(v, context)))
                    .collect(),
            ),
            Value::Tensor(data) => return Self::from_tensor(data),
            Value::Type(ty) => AbstractKind::Type(ty.clone()),
            Value::Class(_) | Value::Instance(_) => AbstractKind::Class(value.clone()),
            Value::Primitive(prim) => {
                AbstractKind::Function(AbstractFunction::Primitive(prim.clone()))
            }
            Value::Graph(graph) => AbstractKind::Function(AbstractFunction::Graph {
                graph: *graph,
                context,
                object: None,
            }),
            Value::Signature(func) => {
                match Self::from_value_in(func, context).kind() {
                    AbstractKind::Function(f) => {
                        AbstractKind::Function(AbstractFunction::Signature(Arc::new(f.clone())))
                    }
                    _ => AbstractKind::Any {
                        supposed_dtype: None,
                    },
                }
            }
            Value::Monad(kind) => AbstractKind::Monad(*kind),
            Value::TypeNull
            | Value::Bool(_)
            | Value::Int(_)
            | Value::Float(_)
            | Value::Str(_)
            | Value::Symbol(_)
            | Value::Namespace(_) => AbstractKind::Scalar {
                value: value.clone(),
                ty: value.ty(),
            },
        };
        Self::new(kind)
    }

    pub fn from_value(value: &Value) -> AbstractValue {
        Self::from_value_in(value, ContextId::TOP)
    }

    /// Static type of the value.
    pub fn ty(&self) -> Type {
        match self.kind() {
            AbstractKind::Scalar { ty, .. } => ty.clone(),
            AbstractKind::Tensor(t) => Type::Tensor(Some(t.dtype)),
            AbstractKind::Tuple(seq) => Type::Tuple(seq.element_types()),
            AbstractKind::List(seq) => Type::List(seq.element_types()),
            AbstractKind::Dictionary(_) => Type::Dict,
            AbstractKind::Function(_) => Type::Function,
            AbstractKind::KeywordArg { .. } => Type::Keyword,
            AbstractKind::Slice { .. } => Type::Slice,
            AbstractKind::Sparse { kind, dtype, .. } => Type::Sparse(*kind, Some(*dtype)),
            AbstractKind::Type(_) => Type::TypeType,
            AbstractKind::Class(_) => Type::Class,
            AbstractKind::Undetermined { .. } => Type::Undetermined,
            AbstractKind::Monad(kind) => Type::Monad(*kind),
            AbstractKind::None => Type::None,
            AbstractKind::Ellipsis => Type::Ellipsis,
            AbstractKind::Any { .. } => Type::Any,
            AbstractKind::Negligible => Type::Negligible,
            AbstractKind::Problem { .. } => Type::Problem,
        }
    }

    /// Shape of tensor-like values. Scalars have an empty shape; values
    /// without a meaningful shape return `None`.
    pub fn shape(&self) -> Option<Shape> {
        match self.kind() {
            AbstractKind::Tensor(t) => Some(t.shape.clone()),
            AbstractKind::Sparse { dense_shape, .. } => Some(dense_shape.clone()),
            AbstractKind::Scalar { .. } => Some(Shape::scalar()),
            AbstractKind::Any { .. } => Some(Shape::DynamicRank),
            _ => None,
        }
    }

    /// The statically known value, or [`Value::Any`] if unknown.
    pub fn value(&self) -> Value {
        match self.kind() {
            AbstractKind::Scalar { value, .. } => value.clone(),
            AbstractKind::Tensor(t) => t.value.clone(),
            AbstractKind::Tuple(seq) | AbstractKind::List(seq) => {
                if seq.dynamic_len {
                    return Value::Any;
                }
                let elems: Vec<Value> = seq.elements.iter().map(|e| e.value()).collect();
                if elems.iter().any(|v| v.is_any()) {
                    return Value::Any;
                }
                match self.kind() {
                    AbstractKind::Tuple(_) => Value::tuple(elems),
                    _ => Value::list(elems),
                }
            }
            AbstractKind::Dictionary(entries) => {
                let mut values = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    let value = value.value();
                    if value.is_any() {
                        return Value::Any;
                    }
                    values.push((key.clone(), value));
                }
                Value::Dict(values.into())
            }
            AbstractKind::Function(AbstractFunction::Primitive(prim)) => {
                Value::Primitive(prim.clone())
            }
            AbstractKind::Function(AbstractFunction::Graph { graph, .. }) => Value::Graph(*graph),
            AbstractKind::Type(ty) => Value::Type(ty.clone()),
            AbstractKind::Class(value) => value.clone(),
            AbstractKind::Monad(kind) => Value::Monad(*kind),
            AbstractKind::None => Value::None,
            AbstractKind::Ellipsis => Value::Ellipsis,
            _ => Value::Any,
        }
    }

    /// Return a copy of this value with the known value replaced. Only
    /// scalars and tensors carry values; other kinds are returned as-is.
    pub fn with_value(&self, value: Value) -> AbstractValue {
        match self.kind() {
            AbstractKind::Scalar { ty, .. } => Self::new(AbstractKind::Scalar {
                value,
                ty: ty.clone(),
            }),
            AbstractKind::Tensor(t) => {
                let mut tensor = t.clone();
                tensor.value = value;
                Self::new(AbstractKind::Tensor(tensor))
            }
            _ => self.clone(),
        }
    }

    /// Return a copy of a tuple or list with its defining node set.
    pub fn with_origin(&self, node: NodeId) -> AbstractValue {
        match self.kind() {
            AbstractKind::Tuple(seq) => {
                Self::new(AbstractKind::Tuple(seq.clone().with_origin(node)))
            }
            AbstractKind::List(seq) => Self::new(AbstractKind::List(seq.clone().with_origin(node))),
            _ => self.clone(),
        }
    }

    /// Return a value that describes both `self` and `other`, as needed when
    /// either may be produced at runtime (eg. by the branches of a switch).
    ///
    /// Known values are dropped unless both sides agree. Values of
    /// unrelated kinds join to `Any`.
    pub fn join(&self, other: &AbstractValue) -> AbstractValue {
        if self == other {
            return self.clone();
        }
        let join_elements =
            |a: &AbstractSequence, b: &AbstractSequence| -> Option<Vec<AbstractValue>> {
                if a.dynamic_len || b.dynamic_len || a.elements.len() != b.elements.len() {
                    return None;
                }
                Some(
                    a.elements
                        .iter()
                        .zip(&b.elements)
                        .map(|(x, y)| x.join(y))
                        .collect(),
                )
            };
        match (self.kind(), other.kind()) {
            (AbstractKind::Negligible, _) => other.clone(),
            (_, AbstractKind::Negligible) => self.clone(),
            (AbstractKind::Scalar { ty: a, .. }, AbstractKind::Scalar { ty: b, .. }) if a == b => {
                Self::scalar_of(a.clone())
            }
            (AbstractKind::Tensor(a), AbstractKind::Tensor(b)) if a.dtype == b.dtype => {
                Self::tensor(a.dtype, a.shape.join(&b.shape))
            }
            (AbstractKind::Tuple(a), AbstractKind::Tuple(b)) => match join_elements(a, b) {
                Some(elements) => Self::tuple(elements),
                None => Self::any(),
            },
            (AbstractKind::List(a), AbstractKind::List(b)) => match join_elements(a, b) {
                Some(elements) => Self::list(elements),
                None => Self::any(),
            },
            _ => Self::any(),
        }
    }

    pub fn as_tensor(&self) -> Option<&AbstractTensor> {
        match self.kind() {
            AbstractKind::Tensor(t) => Some(t),
            _ => None,
        }
    }

    /// Return the sequence contents of a tuple or list.
    pub fn as_sequence(&self) -> Option<&AbstractSequence> {
        match self.kind() {
            AbstractKind::Tuple(seq) | AbstractKind::List(seq) => Some(seq),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&AbstractFunction> {
        match self.kind() {
            AbstractKind::Function(func) => Some(func),
            _ => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self.kind(), AbstractKind::Scalar { .. })
    }

    pub fn is_any(&self) -> bool {
        matches!(self.kind(), AbstractKind::Any { .. })
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self.kind(), AbstractKind::Tuple(_))
    }

    pub fn is_list(&self) -> bool {
        matches!(self.kind(), AbstractKind::List(_))
    }

    pub fn is_problem(&self) -> bool {
        matches!(self.kind(), AbstractKind::Problem { .. })
    }

    pub fn is_monad(&self) -> bool {
        matches!(self.kind(), AbstractKind::Monad(_))
    }

    /// Return true if this value, or any nested sequence element or keyword
    /// value, is a broadened undetermined value.
    pub fn contains_undetermined(&self) -> bool {
        match self.kind() {
            AbstractKind::Undetermined { broadened } => *broadened,
            AbstractKind::Tuple(seq) | AbstractKind::List(seq) => {
                seq.elements.iter().any(|e| e.contains_undetermined())
            }
            AbstractKind::KeywordArg { value, .. } => value.contains_undetermined(),
            _ => false,
        }
    }

    /// Return true if the value of this node can only be known at runtime.
    ///
    /// Type objects, classes and functions are never variable. Sequences are
    /// variable if any element is.
    pub fn is_variable(&self) -> bool {
        match self.kind() {
            AbstractKind::Scalar { value, .. } => value.is_any(),
            AbstractKind::Tensor(t) => t.value.is_any(),
            AbstractKind::Tuple(seq) | AbstractKind::List(seq) => {
                seq.dynamic_len || seq.elements.iter().any(|e| e.is_variable())
            }
            AbstractKind::Dictionary(entries) => entries.iter().any(|(_, v)| v.is_variable()),
            AbstractKind::KeywordArg { value, .. } => value.is_variable(),
            AbstractKind::Any { .. } | AbstractKind::Undetermined { .. } => true,
            _ => false,
        }
    }
}

impl fmt::Debug for AbstractValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

fn write_elements(f: &mut fmt::Formatter<'_>, elems: &[AbstractValue]) -> fmt::Result {
    for (i, elem) in elems.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", elem)?;
    }
    Ok(())
}

impl fmt::Display for AbstractValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            AbstractKind::Scalar { value, ty } => {
                write!(f, "AbstractScalar(Type: {}, Value: {})", ty, value)
            }
            AbstractKind::Tensor(t) => write!(
                f,
                "AbstractTensor(shape: {:?}, element: {}, value: {})",
                t.shape, t.dtype, t.value
            ),
            AbstractKind::Tuple(seq) | AbstractKind::List(seq) => {
                let name = if self.is_tuple() { "AbstractTuple" } else { "AbstractList" };
                if seq.dynamic_len {
                    return write!(f, "{}(dynamic len)", name);
                }
                write!(f, "{}{{", name)?;
                write_elements(f, &seq.elements)?;
                write!(f, "}}")
            }
            AbstractKind::Dictionary(entries) => {
                write!(f, "AbstractDictionary{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "}}")
            }
            AbstractKind::Function(func) => match func {
                AbstractFunction::Primitive(prim) => write!(f, "PrimitiveClosure({})", prim.name()),
                AbstractFunction::Graph { graph, .. } => write!(f, "FuncGraphClosure({})", graph),
                AbstractFunction::Partial { args, .. } => {
                    write!(f, "PartialClosure(")?;
                    write_elements(f, args)?;
                    write!(f, ")")
                }
                AbstractFunction::Signature(_) => write!(f, "SignatureClosure"),
            },
            AbstractKind::KeywordArg { key, value } => {
                write!(f, "AbstractKeywordArg({}: {})", key, value)
            }
            AbstractKind::Slice { start, stop, step } => {
                write!(f, "AbstractSlice({}, {}, {})", start, stop, step)
            }
            AbstractKind::Sparse {
                kind,
                dtype,
                dense_shape,
            } => write!(f, "Abstract{:?}Tensor({}, {:?})", kind, dtype, dense_shape),
            AbstractKind::Type(ty) => write!(f, "AbstractType({})", ty),
            AbstractKind::Class(value) => write!(f, "AbstractClass({})", value),
            AbstractKind::Undetermined { .. } => write!(f, "AbstractUndetermined"),
            AbstractKind::Monad(kind) => write!(f, "AbstractMonad({:?})", kind),
            AbstractKind::None => write!(f, "AbstractNone"),
            AbstractKind::Ellipsis => write!(f, "AbstractEllipsis"),
            AbstractKind::Any {
                supposed_dtype: Some(dtype),
            } => write!(f, "AbstractAny(supposed: {})", dtype),
            AbstractKind::Any { .. } => write!(f, "AbstractAny"),
            AbstractKind::Negligible => write!(f, "AbstractNegligible"),
            AbstractKind::Problem { payload, node } => {
                write!(f, "AbstractProblem({}, {})", payload, node)
            }
        }
    }
}

/// Result of evaluating a node: the abstract value plus any attributes the
/// inference added to the primitive.
#[derive(Clone, Debug, PartialEq)]
pub struct EvalResult {
    value: AbstractValue,
    added_attrs: Arc<AttrMap>,
}

impl EvalResult {
    pub fn new(value: AbstractValue) -> EvalResult {
        EvalResult {
            value,
            added_attrs: Arc::default(),
        }
    }

    pub fn with_attrs(value: AbstractValue, added_attrs: AttrMap) -> EvalResult {
        EvalResult {
            value,
            added_attrs: Arc::new(added_attrs),
        }
    }

    pub fn value(&self) -> &AbstractValue {
        &self.value
    }

    pub fn added_attrs(&self) -> &AttrMap {
        &self.added_attrs
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use absint_testing::TestCases;

    use super::{AbstractKind, AbstractSequence, AbstractValue};
    use crate::graph::NodeId;
    use crate::types::{DType, Shape, Type};
    use crate::value::{TensorData, Value};

    fn int(x: i64) -> AbstractValue {
        AbstractValue::scalar(Value::Int(x))
    }

    #[test]
    fn test_projections() {
        #[derive(Debug)]
        struct Case {
            value: AbstractValue,
            ty: Type,
            shape: Option<Shape>,
            known: Value,
        }

        let cases = [
            Case {
                value: int(3),
                ty: Type::Number(DType::Int64),
                shape: Some(Shape::scalar()),
                known: Value::Int(3),
            },
            Case {
                value: AbstractValue::tensor(DType::Float32, Shape::fixed(&[2, 3])),
                ty: Type::Tensor(Some(DType::Float32)),
                shape: Some(Shape::fixed(&[2, 3])),
                known: Value::Any,
            },
            Case {
                value: AbstractValue::tuple(vec![int(1), int(2)]),
                ty: Type::Tuple(Some(vec![Type::Number(DType::Int64); 2])),
                shape: None,
                known: Value::tuple([Value::Int(1), Value::Int(2)]),
            },
            Case {
                value: AbstractValue::tuple(vec![int(1), AbstractValue::any()]),
                ty: Type::Tuple(Some(vec![Type::Number(DType::Int64), Type::Any])),
                shape: None,
                known: Value::Any,
            },
            Case {
                value: AbstractValue::any(),
                ty: Type::Any,
                shape: Some(Shape::DynamicRank),
                known: Value::Any,
            },
        ];

        cases.test_each(|case| {
            assert_eq!(case.value.ty(), case.ty);
            assert_eq!(case.value.shape(), case.shape);
            assert_eq!(case.value.value(), case.known);
        });
    }

    #[test]
    fn test_with_value_does_not_mutate_original() {
        let original = AbstractValue::tensor(DType::Int64, Shape::fixed(&[2]));
        let data = Arc::new(TensorData::from_ints(DType::Int64, vec![2], vec![4, 5]).unwrap());
        let updated = original.with_value(Value::Tensor(data.clone()));

        assert_eq!(original.value(), Value::Any);
        assert_eq!(updated.value(), Value::Tensor(data.clone()));
        assert_eq!(updated, AbstractValue::from_tensor(&data));
    }

    #[test]
    fn test_sequence_equality_ignores_origin() {
        let node = NodeId::from_u32(4).unwrap();
        let a = AbstractValue::tuple(vec![int(1)]);
        let b = a.with_origin(node);
        assert_eq!(a, b);
        assert_eq!(b.as_sequence().and_then(|s| s.origin()), Some(node));
    }

    #[test]
    fn test_dynamic_len_sequence_has_no_len() {
        let seq = AbstractSequence::dynamic(Some(int(0)));
        assert_eq!(seq.len(), None);
        assert!(!seq.is_empty());
        let value = AbstractValue::new(AbstractKind::List(seq));
        assert_eq!(value.value(), Value::Any);
        assert!(value.is_variable());
    }

    #[test]
    fn test_contains_undetermined() {
        let nested = AbstractValue::tuple(vec![
            int(1),
            AbstractValue::list(vec![AbstractValue::undetermined()]),
        ]);
        assert!(nested.contains_undetermined());
        assert!(!AbstractValue::tuple(vec![int(1)]).contains_undetermined());
        let unbroadened = AbstractValue::new(AbstractKind::Undetermined { broadened: false });
        assert!(!unbroadened.contains_undetermined());
    }

    #[test]
    fn test_join() {
        #[derive(Debug)]
        struct Case {
            a: AbstractValue,
            b: AbstractValue,
            expected: AbstractValue,
        }

        let cases = [
            Case {
                a: int(1),
                b: int(1),
                expected: int(1),
            },
            Case {
                a: int(1),
                b: int(2),
                expected: AbstractValue::scalar_of(Type::Number(DType::Int64)),
            },
            Case {
                a: AbstractValue::tensor(DType::Float32, Shape::fixed(&[2, 3])),
                b: AbstractValue::tensor(DType::Float32, Shape::fixed(&[4, 3])),
                expected: AbstractValue::tensor(
                    DType::Float32,
                    Shape::from_dims([crate::types::Dim::Dynamic, crate::types::Dim::Fixed(3)]),
                ),
            },
            Case {
                a: AbstractValue::negligible(),
                b: int(5),
                expected: int(5),
            },
            Case {
                a: AbstractValue::tuple(vec![int(1), int(2)]),
                b: AbstractValue::tuple(vec![int(1)]),
                expected: AbstractValue::any(),
            },
            Case {
                a: int(1),
                b: AbstractValue::scalar(Value::str("a")),
                expected: AbstractValue::any(),
            },
        ];

        cases.test_each(|case| assert_eq!(case.a.join(&case.b), case.expected));
    }

    #[test]
    fn test_from_value() {
        let value = Value::tuple([Value::Int(1), Value::str("a")]);
        let abs = AbstractValue::from_value(&value);
        assert!(abs.is_tuple());
        assert_eq!(abs.value(), value);
        assert!(!abs.is_variable());
    }
}
