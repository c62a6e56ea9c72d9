//! Concrete values that are known at compile time.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::graph::GraphId;
use crate::primitive::Primitive;
use crate::types::{DType, MonadKind, Type};

/// A float which compares and hashes by bit pattern, so values containing it
/// can be used as cache keys.
#[derive(Copy, Clone, Debug)]
pub struct F64(pub f64);

impl PartialEq for F64 {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for F64 {}

impl Hash for F64 {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state)
    }
}

/// Element storage of a [`TensorData`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TensorElems {
    Bool(Vec<bool>),
    Int(Vec<i64>),
    Float(Vec<F64>),
}

impl TensorElems {
    pub fn len(&self) -> usize {
        match self {
            TensorElems::Bool(v) => v.len(),
            TensorElems::Int(v) => v.len(),
            TensorElems::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return zero-filled storage of the category that holds `dtype`.
    fn zeros(dtype: DType, len: usize) -> TensorElems {
        if dtype == DType::Bool {
            TensorElems::Bool(vec![false; len])
        } else if dtype.is_float() {
            TensorElems::Float(vec![F64(0.); len])
        } else {
            TensorElems::Int(vec![0; len])
        }
    }

    fn holds(&self, dtype: DType) -> bool {
        match self {
            TensorElems::Bool(_) => dtype == DType::Bool,
            TensorElems::Int(_) => dtype.is_int(),
            TensorElems::Float(_) => dtype.is_float(),
        }
    }
}

/// Tensor contents known at compile time, or materialized from a runtime
/// buffer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TensorData {
    dtype: DType,
    shape: Vec<usize>,
    elems: TensorElems,
}

impl TensorData {
    /// Create a tensor, or return `None` if the element count does not match
    /// the shape or the storage cannot hold `dtype`.
    pub fn try_new(dtype: DType, shape: Vec<usize>, elems: TensorElems) -> Option<TensorData> {
        let len: usize = shape.iter().product();
        if len != elems.len() || !elems.holds(dtype) {
            return None;
        }
        Some(TensorData {
            dtype,
            shape,
            elems,
        })
    }

    /// Create a zero-filled tensor.
    pub fn zeros(dtype: DType, shape: Vec<usize>) -> TensorData {
        let len = shape.iter().product();
        TensorData {
            dtype,
            elems: TensorElems::zeros(dtype, len),
            shape,
        }
    }

    pub fn from_ints(dtype: DType, shape: Vec<usize>, data: Vec<i64>) -> Option<TensorData> {
        Self::try_new(dtype, shape, TensorElems::Int(data))
    }

    pub fn from_floats(dtype: DType, shape: Vec<usize>, data: &[f64]) -> Option<TensorData> {
        Self::try_new(
            dtype,
            shape,
            TensorElems::Float(data.iter().map(|&x| F64(x)).collect()),
        )
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn elems(&self) -> &TensorElems {
        &self.elems
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    /// Return the elements as integers, if this is an integer tensor.
    pub fn to_ints(&self) -> Option<&[i64]> {
        match &self.elems {
            TensorElems::Int(data) => Some(data),
            _ => None,
        }
    }

    /// Return the element at `index` as a scalar value.
    pub fn scalar_at(&self, index: usize) -> Option<Value> {
        match &self.elems {
            TensorElems::Bool(v) => v.get(index).map(|&x| Value::Bool(x)),
            TensorElems::Int(v) => v.get(index).map(|&x| Value::Int(x)),
            TensorElems::Float(v) => v.get(index).map(|&x| Value::Float(x)),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
    /// Symbols of a module.
    Module,
    /// Members of a class or class instance.
    ClassMember,
    /// Builtin operations namespace.
    Common,
}

/// A set of named values which attribute accesses and symbol references
/// resolve against.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Namespace {
    kind: NamespaceKind,
    name: Arc<str>,
    symbols: Vec<(Arc<str>, Value)>,
}

impl Namespace {
    pub fn new(kind: NamespaceKind, name: &str) -> Namespace {
        Namespace {
            kind,
            name: name.into(),
            symbols: Vec::new(),
        }
    }

    pub fn with_symbol(mut self, name: &str, value: Value) -> Namespace {
        self.symbols.push((name.into(), value));
        self
    }

    pub fn kind(&self) -> NamespaceKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resolve(&self, symbol: &str) -> Option<&Value> {
        self.symbols
            .iter()
            .find(|(name, _)| name.as_ref() == symbol)
            .map(|(_, value)| value)
    }
}

/// What kind of host class a [`ClassObject`] describes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ClassKind {
    /// A network cell.
    Cell,
    /// A user class that has opted in to compilation.
    JitClass,
    /// Any other class. Only constructible if the host allows it.
    Plain,
}

/// A class type, or an instance of one, with the members visible to compiled
/// code.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClassObject {
    name: Arc<str>,
    kind: ClassKind,
    members: Vec<(Arc<str>, Value)>,
}

impl ClassObject {
    pub fn new(name: &str, kind: ClassKind) -> ClassObject {
        ClassObject {
            name: name.into(),
            kind,
            members: Vec::new(),
        }
    }

    pub fn with_member(mut self, name: &str, value: Value) -> ClassObject {
        self.members.push((name.into(), value));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ClassKind {
        self.kind
    }

    pub fn member(&self, name: &str) -> Option<&Value> {
        self.members
            .iter()
            .find(|(member, _)| member.as_ref() == name)
            .map(|(_, value)| value)
    }

    /// Return a namespace containing the class members.
    pub fn member_namespace(&self) -> Namespace {
        Namespace {
            kind: NamespaceKind::ClassMember,
            name: self.name.clone(),
            symbols: self.members.clone(),
        }
    }
}

/// A compile-time constant, or [`Value::Any`] if the value is unknown.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Value {
    /// The value is not known statically.
    Any,
    None,
    Ellipsis,
    /// Result of resolving a symbol which does not exist.
    TypeNull,
    Bool(bool),
    Int(i64),
    Float(F64),
    Str(Arc<str>),
    Tuple(Arc<[Value]>),
    List(Arc<[Value]>),
    Dict(Arc<[(Value, Value)]>),
    Tensor(Arc<TensorData>),
    /// A type object.
    Type(Type),
    Symbol(Arc<str>),
    Namespace(Arc<Namespace>),
    /// A class type.
    Class(Arc<ClassObject>),
    /// An instance of a class.
    Instance(Arc<ClassObject>),
    Primitive(Arc<Primitive>),
    Graph(GraphId),
    /// A function whose calls go through signature resolution.
    Signature(Arc<Value>),
    Monad(MonadKind),
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Str(s.into())
    }

    pub fn float(x: f64) -> Value {
        Value::Float(F64(x))
    }

    pub fn tuple(elems: impl IntoIterator<Item = Value>) -> Value {
        Value::Tuple(elems.into_iter().collect())
    }

    pub fn list(elems: impl IntoIterator<Item = Value>) -> Value {
        Value::List(elems.into_iter().collect())
    }

    pub fn tensor(data: TensorData) -> Value {
        Value::Tensor(Arc::new(data))
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Value::Any)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(x) => Some(*x),
            Value::Bool(x) => Some(*x as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(x) => Some(*x),
            _ => None,
        }
    }

    /// Return the elements of a tuple or list value.
    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Tuple(elems) | Value::List(elems) => Some(elems),
            _ => None,
        }
    }

    /// Static type of this value.
    pub fn ty(&self) -> Type {
        match self {
            Value::Any => Type::Any,
            Value::None => Type::None,
            Value::Ellipsis => Type::Ellipsis,
            Value::TypeNull => Type::External,
            Value::Bool(_) => Type::Number(DType::Bool),
            Value::Int(_) => Type::Number(DType::Int64),
            Value::Float(_) => Type::Number(DType::Float64),
            Value::Str(_) => Type::String,
            Value::Tuple(elems) => Type::Tuple(Some(elems.iter().map(|v| v.ty()).collect())),
            Value::List(elems) => Type::List(Some(elems.iter().map(|v| v.ty()).collect())),
            Value::Dict(_) => Type::Dict,
            Value::Tensor(t) => Type::Tensor(Some(t.dtype())),
            Value::Type(_) => Type::TypeType,
            Value::Symbol(_) | Value::Namespace(_) => Type::External,
            Value::Class(_) | Value::Instance(_) => Type::Class,
            Value::Primitive(_) | Value::Graph(_) | Value::Signature(_) => Type::Function,
            Value::Monad(kind) => Type::Monad(*kind),
        }
    }

    /// Format the value the way `str()` would in the host language.
    pub fn py_str(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            _ => self.to_string(),
        }
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, elems: &[Value], open: &str, close: &str) -> fmt::Result {
    write!(f, "{}", open)?;
    for (i, elem) in elems.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", elem)?;
    }
    if open == "(" && elems.len() == 1 {
        write!(f, ",")?;
    }
    write!(f, "{}", close)
}

/// Formats values the way `repr()` would in the host language.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Any => write!(f, "ValueAny"),
            Value::None => write!(f, "None"),
            Value::Ellipsis => write!(f, "Ellipsis"),
            Value::TypeNull => write!(f, "TypeNull"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(x) => write!(f, "{}", x),
            Value::Float(x) => write!(f, "{:?}", x.0),
            Value::Str(s) => write!(f, "'{}'", s),
            Value::Tuple(elems) => write_seq(f, elems, "(", ")"),
            Value::List(elems) => write_seq(f, elems, "[", "]"),
            Value::Dict(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "}}")
            }
            Value::Tensor(t) => write!(f, "Tensor(shape={:?}, dtype={})", t.shape(), t.dtype()),
            Value::Type(ty) => write!(f, "{}", ty),
            Value::Symbol(s) => write!(f, "{}", s),
            Value::Namespace(ns) => write!(f, "Namespace:{}", ns.name()),
            Value::Class(c) => write!(f, "<class '{}'>", c.name()),
            Value::Instance(c) => write!(f, "<{} object>", c.name()),
            Value::Primitive(p) => write!(f, "Prim:{}", p.name()),
            Value::Graph(g) => write!(f, "FuncGraph({})", g),
            Value::Signature(func) => write!(f, "signature({})", func),
            Value::Monad(MonadKind::Universal) => write!(f, "UMonad"),
            Value::Monad(MonadKind::Io) => write!(f, "IOMonad"),
        }
    }
}
