//! Attributes and methods of builtin types.

use crate::primitive::names;
use crate::types::TypeKind;

/// How a builtin attribute is produced.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Builtin {
    /// A property, computed by calling the primitive on the owner.
    Attr(&'static str),
    /// A method, which binds the owner as the primitive's first operand.
    Method(&'static str),
}

const TENSOR: &[(&str, Builtin)] = &[
    ("shape", Builtin::Attr(names::SHAPE)),
    ("ndim", Builtin::Attr("Rank")),
    ("size", Builtin::Attr("Size")),
    ("dtype", Builtin::Attr("DType")),
    ("reshape", Builtin::Method(names::RESHAPE)),
    ("expand_dims", Builtin::Method(names::EXPAND_DIMS)),
    ("squeeze", Builtin::Method(names::SQUEEZE)),
    ("flatten", Builtin::Method(names::FLATTEN)),
    ("astype", Builtin::Method(names::CAST)),
    ("abs", Builtin::Method("Abs")),
    ("exp", Builtin::Method("Exp")),
    ("sqrt", Builtin::Method("Sqrt")),
    ("__len__", Builtin::Method(names::LEN)),
    ("__bool__", Builtin::Method(names::BOOL_OF)),
];

const TUPLE: &[(&str, Builtin)] = &[
    ("__len__", Builtin::Method(names::LEN)),
    ("__getitem__", Builtin::Method(names::TUPLE_GETITEM)),
];

const LIST: &[(&str, Builtin)] = &[
    ("__len__", Builtin::Method(names::LEN)),
    ("__getitem__", Builtin::Method(names::LIST_GETITEM)),
    ("append", Builtin::Method(names::LIST_APPEND)),
];

const DICT: &[(&str, Builtin)] = &[
    ("__len__", Builtin::Method(names::LEN)),
    ("__getitem__", Builtin::Method(names::DICT_GETITEM)),
];

const STRING: &[(&str, Builtin)] = &[
    ("__len__", Builtin::Method(names::LEN)),
    ("__bool__", Builtin::Method(names::BOOL_OF)),
];

const SCALAR: &[(&str, Builtin)] = &[("__bool__", Builtin::Method(names::BOOL_OF))];

fn table(kind: TypeKind) -> &'static [(&'static str, Builtin)] {
    match kind {
        TypeKind::Tensor => TENSOR,
        TypeKind::Tuple => TUPLE,
        TypeKind::List => LIST,
        TypeKind::Dict => DICT,
        TypeKind::String => STRING,
        TypeKind::Bool | TypeKind::Int | TypeKind::Float | TypeKind::None => SCALAR,
        _ => &[],
    }
}

/// Look up attribute `name` of values of type `kind`.
pub fn lookup(kind: TypeKind, name: &str) -> Option<Builtin> {
    table(kind)
        .iter()
        .find(|(attr, _)| *attr == name)
        .map(|(_, builtin)| *builtin)
}

/// Return the primitive which computes the truth value of values of type
/// `kind`. Types with `__bool__` use it, types with only `__len__` are true
/// when non-empty, and other values are always true.
pub fn truth_primitive(kind: TypeKind) -> &'static str {
    if lookup(kind, "__bool__").is_some() {
        names::BOOL_OF
    } else if lookup(kind, "__len__").is_some() {
        names::CHECK_LEN
    } else {
        names::REAL_BOOL
    }
}
