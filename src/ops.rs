//! Primitives with compiled-in inference.
//!
//! Each primitive is described by an [`OpDef`] which declares its arity, how
//! it consumes tuple and list operands, which operands its output depends on
//! by value, and the formula used to infer its output. The definitions are
//! collected in an [`OpRegistry`].

use std::fmt;

use rustc_hash::FxHashMap;

mod layout;
mod scalar;
mod sequence;
mod structural;

pub use crate::infer_shapes::{InferShapes, InferShapesError};
pub use scalar::{ScalarClass, UniformOp};

use crate::infer_shapes::{BinaryFold, BinaryOp, ReductionOp, UnaryOp};
use crate::primitive::Primitive;

/// Number of operands a primitive accepts.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    /// Inclusive range.
    Range(usize, usize),
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
            Arity::Range(min, max) => (min..=max).contains(&count),
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{}", n),
            Arity::AtLeast(n) => write!(f, "at least {}", n),
            Arity::Range(min, max) => write!(f, "{} to {}", min, max),
        }
    }
}

/// How a primitive uses the elements of tuple and list operands.
///
/// Primitives which are not registered, or registered with
/// [`Consumption::Full`], use every element of every sequence operand.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Consumption {
    Full,
    /// Operand 0 is a sequence of which only the element addressed by the
    /// constant index at operand `index_arg` is used. Other sequence
    /// operands are fully used.
    Element { index_arg: usize },
    /// The listed operands are passed through without using their elements.
    /// An empty list means all operands.
    Transparent(&'static [usize]),
}

impl Consumption {
    /// Return true if operand `index` is passed through without using its
    /// elements.
    pub fn passes(self, index: usize) -> bool {
        match self {
            Consumption::Full => false,
            Consumption::Element { .. } => index == 0,
            Consumption::Transparent(indices) => indices.is_empty() || indices.contains(&index),
        }
    }
}

/// Definition of a primitive with compiled-in inference.
pub struct OpDef {
    pub name: &'static str,
    pub arity: Arity,
    pub consumption: Consumption,

    /// Operands whose values, not just their shapes, determine the output
    /// type and shape.
    pub value_depend: &'static [usize],

    /// True if the primitive only changes metadata of its input, so its
    /// execution can be skipped at runtime.
    pub nop: bool,

    pub formula: &'static dyn InferShapes,
}

impl OpDef {
    pub const fn new(name: &'static str, arity: Arity, formula: &'static dyn InferShapes) -> OpDef {
        OpDef {
            name,
            arity,
            consumption: Consumption::Full,
            value_depend: &[],
            nop: false,
            formula,
        }
    }

    pub const fn consumes(mut self, consumption: Consumption) -> OpDef {
        self.consumption = consumption;
        self
    }

    pub const fn value_depend(mut self, indices: &'static [usize]) -> OpDef {
        self.value_depend = indices;
        self
    }

    pub const fn nop(mut self) -> OpDef {
        self.nop = true;
        self
    }
}

impl fmt::Debug for OpDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpDef")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("consumption", &self.consumption)
            .field("value_depend", &self.value_depend)
            .field("nop", &self.nop)
            .finish()
    }
}

static ADD: BinaryOp = BinaryOp {
    fold: Some(BinaryFold {
        int: i64::checked_add,
        float: |x, y| x + y,
    }),
};
static SUB: BinaryOp = BinaryOp {
    fold: Some(BinaryFold {
        int: i64::checked_sub,
        float: |x, y| x - y,
    }),
};
static MUL: BinaryOp = BinaryOp {
    fold: Some(BinaryFold {
        int: i64::checked_mul,
        float: |x, y| x * y,
    }),
};
static DIV: BinaryOp = BinaryOp {
    fold: Some(BinaryFold {
        int: i64::checked_div,
        float: |x, y| x / y,
    }),
};
static MAXIMUM: BinaryOp = BinaryOp {
    fold: Some(BinaryFold {
        int: |x, y| Some(x.max(y)),
        float: f64::max,
    }),
};
static MINIMUM: BinaryOp = BinaryOp {
    fold: Some(BinaryFold {
        int: |x, y| Some(x.min(y)),
        float: f64::min,
    }),
};

static ELEMENTWISE_OPS: &[OpDef] = &[
    OpDef::new("Neg", Arity::Exact(1), &UnaryOp),
    OpDef::new("Abs", Arity::Exact(1), &UnaryOp),
    OpDef::new("Relu", Arity::Exact(1), &UnaryOp),
    OpDef::new("Exp", Arity::Exact(1), &UnaryOp),
    OpDef::new("Sqrt", Arity::Exact(1), &UnaryOp),
    OpDef::new("Add", Arity::Exact(2), &ADD),
    OpDef::new("Sub", Arity::Exact(2), &SUB),
    OpDef::new("Mul", Arity::Exact(2), &MUL),
    OpDef::new("Div", Arity::Exact(2), &DIV),
    OpDef::new("Maximum", Arity::Exact(2), &MAXIMUM),
    OpDef::new("Minimum", Arity::Exact(2), &MINIMUM),
    OpDef::new("ReduceSum", Arity::Exact(1), &ReductionOp),
];

/// Registry of primitives with compiled-in inference, keyed by name.
#[derive(Default)]
pub struct OpRegistry {
    ops: FxHashMap<&'static str, &'static OpDef>,
}

impl OpRegistry {
    /// Create a new empty registry.
    pub fn new() -> OpRegistry {
        OpRegistry::default()
    }

    /// Create a registry with all built-in primitives registered.
    pub fn with_builtin_ops() -> OpRegistry {
        let mut reg = OpRegistry::new();
        for ops in [
            ELEMENTWISE_OPS,
            layout::OPS,
            sequence::OPS,
            structural::OPS,
        ] {
            for op in ops {
                reg.register(op);
            }
        }
        reg
    }

    /// Register a primitive, replacing any existing definition with the same
    /// name.
    pub fn register(&mut self, op: &'static OpDef) {
        self.ops.insert(op.name, op);
    }

    pub fn get(&self, name: &str) -> Option<&'static OpDef> {
        self.ops.get(name).copied()
    }

    /// Return an iterator over the registered definitions.
    pub fn iter(&self) -> impl Iterator<Item = &'static OpDef> + '_ {
        self.ops.values().copied()
    }

    /// Return the operands whose values determine the output of `prim`.
    ///
    /// Host-inferred primitives declare these via a `value_depend` attribute
    /// holding a tuple of operand indices.
    pub fn value_depend_args(&self, prim: &Primitive) -> Vec<usize> {
        if let Some(op) = self.get(prim.name()) {
            return op.value_depend.to_vec();
        }
        prim.attr("value_depend")
            .and_then(|value| crate::infer_shapes::int_list(&value))
            .map(|indices| {
                indices
                    .into_iter()
                    .filter_map(|i| usize::try_from(i).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Return true if calls to `name` are skipped at runtime.
    pub fn is_nop(&self, name: &str) -> bool {
        self.get(name).is_some_and(|op| op.nop)
    }

    /// Return the scalar primitives evaluated by the uniform evaluator.
    pub fn uniform_ops() -> &'static [UniformOp] {
        scalar::UNIFORM_OPS
    }
}
