//! Static types, element types and shapes of abstract values.

use std::fmt;

use smallvec::SmallVec;

/// Host encoding of a dimension whose size is unknown.
pub const DYNAMIC_DIM: i64 = -1;

/// Host encoding (as the only dimension) of a shape whose rank is unknown.
pub const DYNAMIC_RANK: i64 = -2;

/// Element type of tensors and numeric scalars.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    Float16,
    Float32,
    Float64,
}

impl DType {
    pub fn is_float(self) -> bool {
        matches!(self, DType::Float16 | DType::Float32 | DType::Float64)
    }

    pub fn is_int(self) -> bool {
        matches!(
            self,
            DType::Int8 | DType::Int16 | DType::Int32 | DType::Int64 | DType::UInt8
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "Bool",
            DType::Int8 => "Int8",
            DType::Int16 => "Int16",
            DType::Int32 => "Int32",
            DType::Int64 => "Int64",
            DType::UInt8 => "UInt8",
            DType::Float16 => "Float16",
            DType::Float32 => "Float32",
            DType::Float64 => "Float64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MonadKind {
    /// Orders memory side effects.
    Universal,
    /// Orders IO side effects.
    Io,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SparseKind {
    Row,
    Coo,
    Csr,
}

/// Static type of an abstract value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Number(DType),
    String,
    /// Tensor with an element type, or a generic tensor type if `None`.
    Tensor(Option<DType>),
    /// Tuple with known element types, or a generic tuple type if `None`.
    Tuple(Option<Vec<Type>>),
    List(Option<Vec<Type>>),
    Dict,
    Function,
    Keyword,
    Slice,
    Sparse(SparseKind, Option<DType>),
    /// The type of type objects.
    TypeType,
    Class,
    /// Opaque values such as namespaces and symbols.
    External,
    Undetermined,
    Monad(MonadKind),
    None,
    Ellipsis,
    Any,
    Negligible,
    Problem,
}

/// Coarse classification of types, used to look up builtin methods and
/// attributes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Bool,
    Int,
    Float,
    String,
    Tensor,
    Tuple,
    List,
    Dict,
    None,
    Slice,
    Function,
    Other,
}

impl Type {
    pub fn kind(&self) -> TypeKind {
        match self {
            Type::Number(DType::Bool) => TypeKind::Bool,
            Type::Number(dtype) if dtype.is_float() => TypeKind::Float,
            Type::Number(_) => TypeKind::Int,
            Type::String => TypeKind::String,
            Type::Tensor(_) => TypeKind::Tensor,
            Type::Tuple(_) => TypeKind::Tuple,
            Type::List(_) => TypeKind::List,
            Type::Dict => TypeKind::Dict,
            Type::None => TypeKind::None,
            Type::Slice => TypeKind::Slice,
            Type::Function => TypeKind::Function,
            _ => TypeKind::Other,
        }
    }

    pub fn bool() -> Type {
        Type::Number(DType::Bool)
    }

    /// Return the element type of a tensor or number type.
    pub fn dtype(&self) -> Option<DType> {
        match self {
            Type::Number(dtype) => Some(*dtype),
            Type::Tensor(dtype) => *dtype,
            Type::Sparse(_, dtype) => *dtype,
            _ => None,
        }
    }

    /// Return true if `self` is a subtype of `model`.
    ///
    /// Generic tuple, list and tensor models match any instance of that
    /// container. `Any` matches everything.
    pub fn is_subtype_of(&self, model: &Type) -> bool {
        match (self, model) {
            (_, Type::Any) => true,
            (Type::Tuple(elems), Type::Tuple(model_elems))
            | (Type::List(elems), Type::List(model_elems)) => match (elems, model_elems) {
                (_, None) => true,
                (Some(elems), Some(model_elems)) => {
                    elems.len() == model_elems.len()
                        && elems
                            .iter()
                            .zip(model_elems)
                            .all(|(elem, model)| elem.is_subtype_of(model))
                }
                (None, Some(_)) => false,
            },
            (Type::Tensor(dtype), Type::Tensor(model_dtype)) => match (dtype, model_dtype) {
                (_, None) => true,
                (Some(dtype), Some(model)) => dtype == model,
                (None, Some(_)) => false,
            },
            (x, model) => x == model,
        }
    }
}

fn write_type_list(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    elems: &Option<Vec<Type>>,
) -> fmt::Result {
    write!(f, "{}", name)?;
    if let Some(elems) = elems {
        write!(f, "[")?;
        for (i, elem) in elems.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", elem)?;
        }
        write!(f, "]")?;
    }
    Ok(())
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Number(dtype) => write!(f, "{}", dtype),
            Type::String => write!(f, "String"),
            Type::Tensor(Some(dtype)) => write!(f, "Tensor[{}]", dtype),
            Type::Tensor(None) => write!(f, "Tensor"),
            Type::Tuple(elems) => write_type_list(f, "Tuple", elems),
            Type::List(elems) => write_type_list(f, "List", elems),
            Type::Dict => write!(f, "Dict"),
            Type::Function => write!(f, "Function"),
            Type::Keyword => write!(f, "Keyword"),
            Type::Slice => write!(f, "Slice"),
            Type::Sparse(kind, _) => write!(f, "{:?}Tensor", kind),
            Type::TypeType => write!(f, "TypeType"),
            Type::Class => write!(f, "Class"),
            Type::External => write!(f, "External"),
            Type::Undetermined => write!(f, "Undetermined"),
            Type::Monad(MonadKind::Universal) => write!(f, "UMonad"),
            Type::Monad(MonadKind::Io) => write!(f, "IOMonad"),
            Type::None => write!(f, "NoneType"),
            Type::Ellipsis => write!(f, "Ellipsis"),
            Type::Any => write!(f, "Any"),
            Type::Negligible => write!(f, "Negligible"),
            Type::Problem => write!(f, "Problem"),
        }
    }
}

/// Size of one dimension in a shape.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub enum Dim {
    Fixed(usize),
    Dynamic,
}

impl Dim {
    pub fn fixed(self) -> Option<usize> {
        match self {
            Dim::Fixed(size) => Some(size),
            Dim::Dynamic => None,
        }
    }
}

impl fmt::Debug for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Fixed(size) => write!(f, "{}", size),
            Dim::Dynamic => write!(f, "?"),
        }
    }
}

impl From<usize> for Dim {
    fn from(size: usize) -> Dim {
        Dim::Fixed(size)
    }
}

/// Shape of a tensor-like abstract value.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Shape {
    Ranked(SmallVec<[Dim; 4]>),
    /// Shape whose rank is not known.
    DynamicRank,
}

impl Shape {
    /// Return the shape of a scalar (rank 0).
    pub fn scalar() -> Shape {
        Shape::Ranked(SmallVec::new())
    }

    pub fn fixed(dims: &[usize]) -> Shape {
        Shape::Ranked(dims.iter().map(|&d| Dim::Fixed(d)).collect())
    }

    pub fn from_dims(dims: impl IntoIterator<Item = Dim>) -> Shape {
        Shape::Ranked(dims.into_iter().collect())
    }

    pub fn dynamic_rank() -> Shape {
        Shape::DynamicRank
    }

    pub fn dims(&self) -> Option<&[Dim]> {
        match self {
            Shape::Ranked(dims) => Some(dims),
            Shape::DynamicRank => None,
        }
    }

    pub fn rank(&self) -> Option<usize> {
        self.dims().map(|dims| dims.len())
    }

    /// Return true if all dimension sizes are known.
    pub fn is_static(&self) -> bool {
        self.to_fixed().is_some()
    }

    pub fn to_fixed(&self) -> Option<Vec<usize>> {
        self.dims()?.iter().map(|d| d.fixed()).collect()
    }

    pub fn num_elements(&self) -> Option<usize> {
        self.to_fixed().map(|dims| dims.iter().product())
    }

    /// Return a shape compatible with both `self` and `other`. Dimensions
    /// that differ become dynamic and shapes of different rank give a
    /// dynamic rank.
    pub fn join(&self, other: &Shape) -> Shape {
        match (self.dims(), other.dims()) {
            (Some(a), Some(b)) if a.len() == b.len() => Shape::Ranked(
                a.iter()
                    .zip(b)
                    .map(|(x, y)| if x == y { *x } else { Dim::Dynamic })
                    .collect(),
            ),
            _ => Shape::DynamicRank,
        }
    }

    /// Encode the shape for the host runtime. Unknown dims are
    /// [`DYNAMIC_DIM`] and an unknown rank is `[DYNAMIC_RANK]`.
    pub fn to_host(&self) -> Vec<i64> {
        match self {
            Shape::Ranked(dims) => dims
                .iter()
                .map(|d| match d {
                    Dim::Fixed(size) => *size as i64,
                    Dim::Dynamic => DYNAMIC_DIM,
                })
                .collect(),
            Shape::DynamicRank => vec![DYNAMIC_RANK],
        }
    }

    /// Decode a shape in the host encoding, or return `None` if it contains
    /// invalid negative sizes.
    pub fn from_host(dims: &[i64]) -> Option<Shape> {
        if dims == [DYNAMIC_RANK] {
            return Some(Shape::DynamicRank);
        }
        dims.iter()
            .map(|&d| match d {
                DYNAMIC_DIM => Some(Dim::Dynamic),
                d if d >= 0 => Some(Dim::Fixed(d as usize)),
                _ => None,
            })
            .collect::<Option<SmallVec<[Dim; 4]>>>()
            .map(Shape::Ranked)
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Ranked(dims) => f.debug_list().entries(dims.iter()).finish(),
            Shape::DynamicRank => write!(f, "[..]"),
        }
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Shape {
        Shape::fixed(dims)
    }
}
