//! Scalar primitives handled by the uniform evaluator.
//!
//! These take a fixed number of scalar operands of one class, join the
//! operand types to get the output type (unless the primitive declares its
//! own, eg. bool for comparisons) and fold the result when every operand is
//! a constant.

use std::cmp::Ordering;

use crate::abstract_value::{AbstractKind, AbstractValue};
use crate::error::InferError;
use crate::types::{DType, Type};
use crate::value::Value;

/// The kind of scalar a uniform primitive accepts.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScalarClass {
    /// Bool, int or float.
    Number,
    /// Bool or int.
    Int,
    Bool,
    String,
}

impl ScalarClass {
    fn accepts(self, ty: &Type) -> bool {
        match (self, ty) {
            (ScalarClass::Number, Type::Number(_)) => true,
            (ScalarClass::Int, Type::Number(dtype)) => !dtype.is_float(),
            (ScalarClass::Bool, Type::Number(DType::Bool)) => true,
            (ScalarClass::String, Type::String) => true,
            _ => false,
        }
    }

    fn name(self) -> &'static str {
        match self {
            ScalarClass::Number => "number",
            ScalarClass::Int => "int",
            ScalarClass::Bool => "bool",
            ScalarClass::String => "string",
        }
    }
}

/// A scalar primitive evaluated by the uniform evaluator.
pub struct UniformOp {
    pub name: &'static str,
    pub arity: usize,
    pub operand: ScalarClass,
    /// Output element type, if it is not the join of the operand types.
    pub output: Option<DType>,
    /// Compute the result from constant operands, or return `None` if it is
    /// undefined.
    pub fold: fn(&[Value]) -> Option<Value>,
}

impl std::fmt::Debug for UniformOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UniformOp({})", self.name)
    }
}

impl UniformOp {
    /// Infer the output of this primitive given its operands.
    pub fn infer(&self, args: &[AbstractValue]) -> Result<AbstractValue, InferError> {
        if args.len() != self.arity {
            return Err(InferError::malformed(format!(
                "For primitive '{}', the number of inputs should be {}, but got {}.",
                self.name,
                self.arity,
                args.len()
            )));
        }

        let mut types = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let AbstractKind::Scalar { ty, .. } = arg.kind() else {
                return Err(InferError::type_error(format!(
                    "For primitive '{}', input {} should be a {} scalar, but got {}.",
                    self.name,
                    i,
                    self.operand.name(),
                    arg
                )));
            };
            if !self.operand.accepts(ty) {
                return Err(InferError::type_error(format!(
                    "For primitive '{}', input {} should be a {} scalar, but got {}.",
                    self.name,
                    i,
                    self.operand.name(),
                    ty
                )));
            }
            types.push(ty.clone());
        }

        let out_type = match self.output {
            Some(dtype) => Type::Number(dtype),
            None => join_types(&types),
        };

        let values: Vec<Value> = args.iter().map(|arg| arg.value()).collect();
        let value = if values.iter().any(|v| v.is_any()) {
            Value::Any
        } else {
            (self.fold)(&values).unwrap_or(Value::Any)
        };
        Ok(AbstractValue::new(AbstractKind::Scalar {
            value,
            ty: out_type,
        }))
    }
}

/// Join scalar types the way arithmetic promotes them: float wins over int,
/// and int wins over bool.
fn join_types(types: &[Type]) -> Type {
    let rank = |ty: &Type| match ty.dtype() {
        Some(dtype) if dtype.is_float() => 2,
        Some(DType::Bool) => 0,
        Some(_) => 1,
        None => 0,
    };
    types
        .iter()
        .fold(None::<&Type>, |acc, ty| match acc {
            Some(acc) if rank(acc) >= rank(ty) => Some(acc),
            _ => Some(ty),
        })
        .cloned()
        .unwrap_or(Type::Any)
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn from_value(value: &Value) -> Option<Num> {
        match value {
            Value::Bool(x) => Some(Num::Int(*x as i64)),
            Value::Int(x) => Some(Num::Int(*x)),
            Value::Float(x) => Some(Num::Float(x.0)),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(x) => x as f64,
            Num::Float(x) => x,
        }
    }
}

fn nums<const N: usize>(values: &[Value]) -> Option<[Num; N]> {
    let nums: Vec<Num> = values.iter().map(Num::from_value).collect::<Option<_>>()?;
    nums.try_into().ok()
}

fn arith(
    values: &[Value],
    int: fn(i64, i64) -> Option<i64>,
    float: fn(f64, f64) -> f64,
) -> Option<Value> {
    match nums::<2>(values)? {
        [Num::Int(x), Num::Int(y)] => int(x, y).map(Value::Int),
        [x, y] => Some(Value::float(float(x.as_f64(), y.as_f64()))),
    }
}

fn compare(values: &[Value], pred: fn(Ordering) -> bool) -> Option<Value> {
    let ordering = match values {
        [Value::Str(a), Value::Str(b)] => a.cmp(b),
        _ => match nums::<2>(values)? {
            [Num::Int(x), Num::Int(y)] => x.cmp(&y),
            [x, y] => x.as_f64().partial_cmp(&y.as_f64())?,
        },
    };
    Some(Value::Bool(pred(ordering)))
}

fn ints(values: &[Value]) -> Option<[i64; 2]> {
    match nums::<2>(values)? {
        [Num::Int(x), Num::Int(y)] => Some([x, y]),
        _ => None,
    }
}

fn bools(values: &[Value]) -> Option<[bool; 2]> {
    match values {
        [a, b] => Some([a.as_bool()?, b.as_bool()?]),
        _ => None,
    }
}

fn strs(values: &[Value]) -> Option<[&str; 2]> {
    match values {
        [a, b] => Some([a.as_str()?, b.as_str()?]),
        _ => None,
    }
}

fn floor_div(x: i64, y: i64) -> Option<i64> {
    let q = x.checked_div(y)?;
    if (x % y != 0) && ((x < 0) != (y < 0)) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

fn py_mod(x: i64, y: i64) -> Option<i64> {
    let r = x.checked_rem(y)?;
    if r != 0 && ((r < 0) != (y < 0)) {
        Some(r + y)
    } else {
        Some(r)
    }
}

fn pow(values: &[Value]) -> Option<Value> {
    match nums::<2>(values)? {
        [Num::Int(x), Num::Int(y)] if y >= 0 => {
            let exp = u32::try_from(y).ok()?;
            x.checked_pow(exp).map(Value::Int)
        }
        [x, y] => Some(Value::float(x.as_f64().powf(y.as_f64()))),
    }
}

fn div(values: &[Value]) -> Option<Value> {
    let [x, y] = nums::<2>(values)?;
    let y = y.as_f64();
    if y == 0. {
        return None;
    }
    Some(Value::float(x.as_f64() / y))
}

fn unary_num(
    values: &[Value],
    int: fn(i64) -> Option<i64>,
    float: fn(f64) -> f64,
) -> Option<Value> {
    match nums::<1>(values)? {
        [Num::Int(x)] => int(x).map(Value::Int),
        [Num::Float(x)] => Some(Value::float(float(x))),
    }
}

fn log(values: &[Value]) -> Option<Value> {
    let [x] = nums::<1>(values)?;
    let x = x.as_f64();
    (x > 0.).then(|| Value::float(x.ln()))
}

fn shift_left(values: &[Value]) -> Option<Value> {
    let [x, y] = ints(values)?;
    let shift = u32::try_from(y).ok()?;
    x.checked_shl(shift).map(Value::Int)
}

fn shift_right(values: &[Value]) -> Option<Value> {
    let [x, y] = ints(values)?;
    let shift = u32::try_from(y).ok()?;
    x.checked_shr(shift).map(Value::Int)
}

pub(crate) static UNIFORM_OPS: &[UniformOp] = &[
    UniformOp {
        name: "ScalarAdd",
        arity: 2,
        operand: ScalarClass::Number,
        output: None,
        fold: |v| arith(v, i64::checked_add, |x, y| x + y),
    },
    UniformOp {
        name: "ScalarSub",
        arity: 2,
        operand: ScalarClass::Number,
        output: None,
        fold: |v| arith(v, i64::checked_sub, |x, y| x - y),
    },
    UniformOp {
        name: "ScalarMul",
        arity: 2,
        operand: ScalarClass::Number,
        output: None,
        fold: |v| arith(v, i64::checked_mul, |x, y| x * y),
    },
    UniformOp {
        name: "ScalarDiv",
        arity: 2,
        operand: ScalarClass::Number,
        output: Some(DType::Float64),
        fold: div,
    },
    UniformOp {
        name: "ScalarFloorDiv",
        arity: 2,
        operand: ScalarClass::Number,
        output: None,
        fold: |v| arith(v, floor_div, |x, y| (x / y).floor()),
    },
    UniformOp {
        name: "ScalarMod",
        arity: 2,
        operand: ScalarClass::Number,
        output: None,
        fold: |v| arith(v, py_mod, |x, y| x - y * (x / y).floor()),
    },
    UniformOp {
        name: "ScalarPow",
        arity: 2,
        operand: ScalarClass::Number,
        output: None,
        fold: pow,
    },
    UniformOp {
        name: "ScalarUadd",
        arity: 1,
        operand: ScalarClass::Number,
        output: None,
        fold: |v| unary_num(v, Some, |x| x),
    },
    UniformOp {
        name: "ScalarUsub",
        arity: 1,
        operand: ScalarClass::Number,
        output: None,
        fold: |v| unary_num(v, i64::checked_neg, |x| -x),
    },
    UniformOp {
        name: "ScalarLog",
        arity: 1,
        operand: ScalarClass::Number,
        output: Some(DType::Float64),
        fold: log,
    },
    UniformOp {
        name: "ScalarLt",
        arity: 2,
        operand: ScalarClass::Number,
        output: Some(DType::Bool),
        fold: |v| compare(v, Ordering::is_lt),
    },
    UniformOp {
        name: "ScalarGt",
        arity: 2,
        operand: ScalarClass::Number,
        output: Some(DType::Bool),
        fold: |v| compare(v, Ordering::is_gt),
    },
    UniformOp {
        name: "ScalarLe",
        arity: 2,
        operand: ScalarClass::Number,
        output: Some(DType::Bool),
        fold: |v| compare(v, Ordering::is_le),
    },
    UniformOp {
        name: "ScalarGe",
        arity: 2,
        operand: ScalarClass::Number,
        output: Some(DType::Bool),
        fold: |v| compare(v, Ordering::is_ge),
    },
    UniformOp {
        name: "ScalarEq",
        arity: 2,
        operand: ScalarClass::Number,
        output: Some(DType::Bool),
        fold: |v| compare(v, Ordering::is_eq),
    },
    UniformOp {
        name: "ScalarNe",
        arity: 2,
        operand: ScalarClass::Number,
        output: Some(DType::Bool),
        fold: |v| compare(v, Ordering::is_ne),
    },
    UniformOp {
        name: "BitAnd",
        arity: 2,
        operand: ScalarClass::Int,
        output: None,
        fold: |v| ints(v).map(|[x, y]| Value::Int(x & y)),
    },
    UniformOp {
        name: "BitOr",
        arity: 2,
        operand: ScalarClass::Int,
        output: None,
        fold: |v| ints(v).map(|[x, y]| Value::Int(x | y)),
    },
    UniformOp {
        name: "BitXor",
        arity: 2,
        operand: ScalarClass::Int,
        output: None,
        fold: |v| ints(v).map(|[x, y]| Value::Int(x ^ y)),
    },
    UniformOp {
        name: "BitLeftShift",
        arity: 2,
        operand: ScalarClass::Int,
        output: None,
        fold: shift_left,
    },
    UniformOp {
        name: "BitRightShift",
        arity: 2,
        operand: ScalarClass::Int,
        output: None,
        fold: shift_right,
    },
    UniformOp {
        name: "BoolNot",
        arity: 1,
        operand: ScalarClass::Bool,
        output: Some(DType::Bool),
        fold: |v| v.first().and_then(|x| x.as_bool()).map(|x| Value::Bool(!x)),
    },
    UniformOp {
        name: "BoolAnd",
        arity: 2,
        operand: ScalarClass::Bool,
        output: Some(DType::Bool),
        fold: |v| bools(v).map(|[x, y]| Value::Bool(x && y)),
    },
    UniformOp {
        name: "BoolOr",
        arity: 2,
        operand: ScalarClass::Bool,
        output: Some(DType::Bool),
        fold: |v| bools(v).map(|[x, y]| Value::Bool(x || y)),
    },
    UniformOp {
        name: "BoolEq",
        arity: 2,
        operand: ScalarClass::Bool,
        output: Some(DType::Bool),
        fold: |v| bools(v).map(|[x, y]| Value::Bool(x == y)),
    },
    UniformOp {
        name: "StringConcat",
        arity: 2,
        operand: ScalarClass::String,
        output: None,
        fold: |v| strs(v).map(|[x, y]| Value::str(&format!("{}{}", x, y))),
    },
    UniformOp {
        name: "StringEq",
        arity: 2,
        operand: ScalarClass::String,
        output: Some(DType::Bool),
        fold: |v| compare(v, Ordering::is_eq),
    },
    UniformOp {
        name: "StringLt",
        arity: 2,
        operand: ScalarClass::String,
        output: Some(DType::Bool),
        fold: |v| compare(v, Ordering::is_lt),
    },
    UniformOp {
        name: "StringGt",
        arity: 2,
        operand: ScalarClass::String,
        output: Some(DType::Bool),
        fold: |v| compare(v, Ordering::is_gt),
    },
    UniformOp {
        name: "StringLe",
        arity: 2,
        operand: ScalarClass::String,
        output: Some(DType::Bool),
        fold: |v| compare(v, Ordering::is_le),
    },
    UniformOp {
        name: "StringGe",
        arity: 2,
        operand: ScalarClass::String,
        output: Some(DType::Bool),
        fold: |v| compare(v, Ordering::is_ge),
    },
    UniformOp {
        name: "StringNot",
        arity: 1,
        operand: ScalarClass::String,
        output: Some(DType::Bool),
        fold: |v| v.first().and_then(|x| x.as_str()).map(|x| Value::Bool(x.is_empty())),
    },
    UniformOp {
        name: "StringIn",
        arity: 2,
        operand: ScalarClass::String,
        output: Some(DType::Bool),
        fold: |v| strs(v).map(|[x, y]| Value::Bool(y.contains(x))),
    },
];
