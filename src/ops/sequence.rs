//! Primitives over tuples, lists, dicts and keyword arguments.

use super::{Arity, Consumption, OpDef};
use crate::abstract_value::{AbstractKind, AbstractSequence, AbstractValue};
use crate::infer_shapes::{resolve_index, InferShapes, InferShapesError};
use crate::primitive::{names, Primitive};
use crate::types::{DType, Dim, Type};
use crate::value::Value;

pub(super) static OPS: &[OpDef] = &[
    OpDef::new(
        names::TUPLE_GETITEM,
        Arity::Exact(2),
        &GetItem { list: false },
    )
    .consumes(Consumption::Element { index_arg: 1 }),
    OpDef::new(
        names::LIST_GETITEM,
        Arity::Exact(2),
        &GetItem { list: true },
    )
    .consumes(Consumption::Element { index_arg: 1 }),
    OpDef::new(names::LIST_APPEND, Arity::Exact(2), &ListAppend)
        .consumes(Consumption::Transparent(&[0])),
    OpDef::new(names::LEN, Arity::Exact(1), &Len).consumes(Consumption::Transparent(&[])),
    OpDef::new(names::MAKE_DICT, Arity::Exact(2), &MakeDict),
    OpDef::new(names::DICT_GETITEM, Arity::Exact(2), &DictGetItem),
    OpDef::new(names::MAKE_KEYWORD_ARG, Arity::Exact(2), &MakeKeywordArg),
    OpDef::new(
        names::EXTRACT_KEYWORD_ARG,
        Arity::Exact(2),
        &ExtractKeywordArg,
    ),
];

/// Return the element of a tuple or list at a constant index.
///
/// If the index is not constant, the result is the join of all elements.
pub struct GetItem {
    pub list: bool,
}

impl InferShapes for GetItem {
    fn infer_shapes(
        &self,
        _prim: &Primitive,
        inputs: &[AbstractValue],
    ) -> Result<AbstractValue, InferShapesError> {
        let [seq, index] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        let seq_contents = match (self.list, seq.kind()) {
            (false, AbstractKind::Tuple(seq)) | (true, AbstractKind::List(seq)) => seq,
            _ => return Err(InferShapesError::UnsupportedType(seq.ty())),
        };

        let Some(len) = seq_contents.len() else {
            return Ok(seq_contents
                .elements()
                .first()
                .cloned()
                .unwrap_or_else(AbstractValue::any));
        };

        match index.value().as_int() {
            Some(index) => {
                let index = resolve_index(len, index).ok_or(InferShapesError::IndexOutOfRange)?;
                Ok(seq_contents.elements()[index].clone())
            }
            None if !index.is_scalar() => Err(InferShapesError::UnsupportedType(index.ty())),
            None => {
                let mut elems = seq_contents.elements().iter();
                let first = elems.next().ok_or(InferShapesError::IndexOutOfRange)?;
                Ok(elems.fold(first.clone(), |acc, elem| acc.join(elem)))
            }
        }
    }
}

/// Return a list with an element appended.
pub struct ListAppend;

impl InferShapes for ListAppend {
    fn infer_shapes(
        &self,
        _prim: &Primitive,
        inputs: &[AbstractValue],
    ) -> Result<AbstractValue, InferShapesError> {
        let [list, elem] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        let AbstractKind::List(seq) = list.kind() else {
            return Err(InferShapesError::UnsupportedType(list.ty()));
        };
        if seq.is_dynamic_len() {
            let template = match seq.elements().first() {
                Some(existing) => existing.join(elem),
                None => elem.clone(),
            };
            return Ok(AbstractValue::new(AbstractKind::List(
                AbstractSequence::dynamic(Some(template)).with_host_list(seq.host_list().cloned()),
            )));
        }
        let mut elements = seq.elements().to_vec();
        elements.push(elem.clone());
        Ok(AbstractValue::new(AbstractKind::List(
            AbstractSequence::new(elements).with_host_list(seq.host_list().cloned()),
        )))
    }
}

/// Return the length of a sequence, dict, string or the first dimension of
/// a tensor.
pub struct Len;

impl InferShapes for Len {
    fn infer_shapes(
        &self,
        _prim: &Primitive,
        inputs: &[AbstractValue],
    ) -> Result<AbstractValue, InferShapesError> {
        let [x] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        let len = match x.kind() {
            AbstractKind::Tuple(seq) | AbstractKind::List(seq) => seq.len(),
            AbstractKind::Dictionary(entries) => Some(entries.len()),
            AbstractKind::Scalar {
                ty: Type::String,
                value,
            } => value.as_str().map(|s| s.chars().count()),
            AbstractKind::Tensor(t) => match t.shape.dims() {
                Some([]) => {
                    return Err(InferShapesError::InvalidValue(
                        "len() of a 0-d tensor".to_string(),
                    ))
                }
                Some([Dim::Fixed(size), ..]) => Some(*size),
                _ => None,
            },
            _ => return Err(InferShapesError::UnsupportedType(x.ty())),
        };
        Ok(match len {
            Some(len) => AbstractValue::scalar(Value::Int(len as i64)),
            None => AbstractValue::scalar_of(Type::Number(DType::Int64)),
        })
    }
}

/// Build a dict from a tuple of constant keys and a tuple of values.
pub struct MakeDict;

impl InferShapes for MakeDict {
    fn infer_shapes(
        &self,
        _prim: &Primitive,
        inputs: &[AbstractValue],
    ) -> Result<AbstractValue, InferShapesError> {
        let [keys, values] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        let (Some(keys_seq), Some(values_seq)) = (keys.as_sequence(), values.as_sequence()) else {
            return Err(InferShapesError::UnsupportedType(keys.ty()));
        };
        if keys_seq.len().is_none() || keys_seq.len() != values_seq.len() {
            return Err(InferShapesError::IncompatibleShapes);
        }

        let mut entries = Vec::with_capacity(keys_seq.elements().len());
        for (key, value) in keys_seq.elements().iter().zip(values_seq.elements()) {
            let key_value = key.value();
            if key_value.is_any() {
                return Err(InferShapesError::InvalidValue(format!(
                    "dict key should be a constant, but got {}",
                    key
                )));
            }
            entries.push((key_value, value.clone()));
        }
        Ok(AbstractValue::new(AbstractKind::Dictionary(entries)))
    }
}

/// Look up a constant key in a dict.
pub struct DictGetItem;

impl InferShapes for DictGetItem {
    fn infer_shapes(
        &self,
        _prim: &Primitive,
        inputs: &[AbstractValue],
    ) -> Result<AbstractValue, InferShapesError> {
        let [dict, key] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        let AbstractKind::Dictionary(entries) = dict.kind() else {
            return Err(InferShapesError::UnsupportedType(dict.ty()));
        };
        let key = key.value();
        entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| {
                InferShapesError::InvalidValue(format!("key {} is not in the dict", key))
            })
    }
}

/// Wrap a value as a named keyword argument.
pub struct MakeKeywordArg;

impl InferShapes for MakeKeywordArg {
    fn infer_shapes(
        &self,
        _prim: &Primitive,
        inputs: &[AbstractValue],
    ) -> Result<AbstractValue, InferShapesError> {
        let [key, value] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        let Value::Str(key) = key.value() else {
            return Err(InferShapesError::UnsupportedType(key.ty()));
        };
        Ok(AbstractValue::keyword_arg(&key, value.clone()))
    }
}

/// Unwrap a keyword argument whose name matches a constant key.
pub struct ExtractKeywordArg;

impl InferShapes for ExtractKeywordArg {
    fn infer_shapes(
        &self,
        _prim: &Primitive,
        inputs: &[AbstractValue],
    ) -> Result<AbstractValue, InferShapesError> {
        let [key, kwarg] = inputs else {
            return Err(InferShapesError::IncorrectInputCount);
        };
        let Value::Str(key) = key.value() else {
            return Err(InferShapesError::UnsupportedType(key.ty()));
        };
        match kwarg.kind() {
            AbstractKind::KeywordArg { key: name, value } if *name == key => Ok(value.clone()),
            AbstractKind::KeywordArg { key: name, .. } => Err(InferShapesError::InvalidValue(
                format!("expected keyword argument '{}', but got '{}'", key, name),
            )),
            _ => Err(InferShapesError::UnsupportedType(kwarg.ty())),
        }
    }
}
