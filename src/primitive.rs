//! Primitive operations and their mutable attribute maps.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use crate::value::Value;

/// Attribute map of a primitive. Ordered so snapshots can be compared and
/// hashed deterministically.
pub type AttrMap = BTreeMap<String, Value>;

/// Names of primitives that the engine treats specially.
pub mod names {
    pub const RETURN: &str = "Return";
    pub const DEPEND: &str = "Depend";
    pub const IDENTITY: &str = "identity";
    pub const LOAD: &str = "Load";
    pub const UPDATE_STATE: &str = "UpdateState";
    pub const SWITCH: &str = "Switch";
    pub const ENVIRON_GET: &str = "EnvironGet";
    pub const ENVIRON_SET: &str = "EnvironSet";
    pub const MAKE_TUPLE: &str = "MakeTuple";
    pub const MAKE_LIST: &str = "MakeList";
    pub const MAKE_DICT: &str = "MakeDict";
    pub const DICT_GETITEM: &str = "DictGetItem";
    pub const MAKE_KEYWORD_ARG: &str = "MakeKeywordArg";
    pub const EXTRACT_KEYWORD_ARG: &str = "ExtractKeywordArg";
    pub const TUPLE_GETITEM: &str = "TupleGetItem";
    pub const LIST_GETITEM: &str = "ListGetItem";
    pub const LIST_APPEND: &str = "ListAppend";
    pub const LEN: &str = "Len";
    pub const IS_INSTANCE: &str = "IsInstance";
    pub const CAST: &str = "Cast";
    pub const SHAPE: &str = "Shape";
    pub const RESHAPE: &str = "Reshape";
    pub const EXPAND_DIMS: &str = "ExpandDims";
    pub const SQUEEZE: &str = "Squeeze";
    pub const FLATTEN: &str = "Flatten";
    pub const BOOL_OF: &str = "bool_";
    pub const CHECK_LEN: &str = "check_len";
    pub const REAL_BOOL: &str = "real_bool";

    pub const GETATTR: &str = "getattr";
    pub const SETATTR: &str = "setattr";
    pub const RESOLVE: &str = "resolve";
    pub const CREATE_INSTANCE: &str = "create_instance";
    pub const PARTIAL: &str = "Partial";
    pub const PY_INTERPRET: &str = "PyInterpret";
    pub const PY_EXECUTE: &str = "PyExecute";
    pub const RAISE: &str = "raise";
    pub const WITH_ENTER: &str = "with_enter";
    pub const WITH_EXIT: &str = "with_exit";
    pub const COND: &str = "cond";
}

/// Unique identity of a primitive instance.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrimId(u64);

static NEXT_PRIM_ID: AtomicU64 = AtomicU64::new(0);

/// How inference for a primitive is performed.
#[derive(Clone, Debug, PartialEq)]
pub enum PrimKind {
    /// Inferred by a compiled formula, or by one of the engine's special
    /// evaluators.
    Builtin,
    /// Inferred entirely by the host runtime.
    HostInfer,
    /// Inferred by a compiled formula after the host runtime has validated
    /// the arguments. The host may also provide value inference.
    HostCheck,
    /// Calls the wrapped function after resolving its call signature.
    DoSignature(Value),
    /// Produces a graph whose tuple/dict arguments are spread into
    /// positional and keyword arguments.
    UnpackGraph { with_sens: bool, need_unpack_args: bool },
    /// Casts floating-point tensors in a nested structure to a given type.
    MixedPrecisionCast,
}

/// Side effects declared by a primitive.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct EffectInfo {
    pub memory: bool,
    pub io: bool,
}

/// A primitive operation.
///
/// Attributes can change during inference (eg. a host infer function may
/// add attributes), so they are stored behind a lock.
pub struct Primitive {
    id: PrimId,
    name: String,
    kind: PrimKind,
    custom: bool,
    attrs: RwLock<AttrMap>,
}

impl Primitive {
    fn with_kind(name: &str, kind: PrimKind) -> Primitive {
        Primitive {
            id: PrimId(NEXT_PRIM_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.to_string(),
            kind,
            custom: false,
            attrs: RwLock::new(AttrMap::new()),
        }
    }

    /// Create a primitive whose inference is compiled in.
    pub fn new(name: &str) -> Primitive {
        Self::with_kind(name, PrimKind::Builtin)
    }

    /// Create a primitive inferred by the host runtime.
    pub fn host(name: &str) -> Primitive {
        Self::with_kind(name, PrimKind::HostInfer)
    }

    /// Create a primitive with a compiled formula and a host-side check.
    pub fn host_check(name: &str) -> Primitive {
        Self::with_kind(name, PrimKind::HostCheck)
    }

    /// Create a primitive which calls `func` after signature resolution.
    pub fn do_signature(name: &str, func: Value) -> Primitive {
        Self::with_kind(name, PrimKind::DoSignature(func))
    }

    pub fn unpack_graph(with_sens: bool, need_unpack_args: bool) -> Primitive {
        Self::with_kind(
            "UnpackGraph",
            PrimKind::UnpackGraph {
                with_sens,
                need_unpack_args,
            },
        )
    }

    pub fn mixed_precision_cast() -> Primitive {
        Self::with_kind("MixedPrecisionCast", PrimKind::MixedPrecisionCast)
    }

    /// Mark this as a user-defined custom operator, whose declared
    /// `output_num` attribute is checked against inferred outputs.
    pub fn with_custom_output(mut self) -> Primitive {
        self.custom = true;
        self
    }

    pub fn with_attr(self, name: &str, value: Value) -> Primitive {
        self.set_attr(name, value);
        self
    }

    pub fn id(&self) -> PrimId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &PrimKind {
        &self.kind
    }

    pub fn is_custom(&self) -> bool {
        self.custom
    }

    pub fn attr(&self, name: &str) -> Option<Value> {
        self.read_attrs(|attrs| attrs.get(name).cloned())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.read_attrs(|attrs| attrs.contains_key(name))
    }

    /// Return a snapshot of the current attributes.
    pub fn attrs(&self) -> AttrMap {
        self.read_attrs(|attrs| attrs.clone())
    }

    pub fn set_attr(&self, name: &str, value: Value) {
        self.attrs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value);
    }

    /// Set all attributes in `attrs`, replacing existing values.
    pub fn set_attrs(&self, attrs: &AttrMap) {
        if attrs.is_empty() {
            return;
        }
        let mut current = self.attrs.write().unwrap_or_else(PoisonError::into_inner);
        for (name, value) in attrs {
            current.insert(name.clone(), value.clone());
        }
    }

    /// Run `f` and return its result along with the attributes it added or
    /// changed on this primitive.
    pub fn record_added_attrs<R>(&self, f: impl FnOnce() -> R) -> (R, AttrMap) {
        let before = self.attrs();
        let result = f();
        let added = self.read_attrs(|after| {
            after
                .iter()
                .filter(|(name, value)| before.get(*name) != Some(*value))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect()
        });
        (result, added)
    }

    /// Side effects declared via the `side_effect_mem` and `side_effect_io`
    /// attributes.
    pub fn effects(&self) -> EffectInfo {
        let flag = |name| self.attr(name).and_then(|v| v.as_bool()).unwrap_or(false);
        EffectInfo {
            memory: flag("side_effect_mem"),
            io: flag("side_effect_io"),
        }
    }

    fn read_attrs<R>(&self, f: impl FnOnce(&AttrMap) -> R) -> R {
        f(&self.attrs.read().unwrap_or_else(PoisonError::into_inner))
    }
}

impl PartialEq for Primitive {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Primitive {}

impl Hash for Primitive {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl fmt::Debug for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Primitive({}#{})", self.name, self.id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::{AttrMap, Primitive};
    use crate::value::Value;

    #[test]
    fn test_record_added_attrs() {
        let prim = Primitive::new("Conv").with_attr("pad", Value::Int(0));
        let ((), added) = prim.record_added_attrs(|| {
            prim.set_attr("pad", Value::Int(0));
            prim.set_attr("stride", Value::Int(2));
        });

        let mut expected = AttrMap::new();
        expected.insert("stride".to_string(), Value::Int(2));
        assert_eq!(added, expected);

        let ((), changed) = prim.record_added_attrs(|| prim.set_attr("pad", Value::Int(1)));
        assert_eq!(changed.get("pad"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_identity_and_effects() {
        let a = Primitive::new("Print").with_attr("side_effect_io", Value::Bool(true));
        let b = Primitive::new("Print");
        assert_ne!(a, b);
        assert!(a.effects().io);
        assert!(!a.effects().memory);
        assert!(!b.effects().io);
    }
}
