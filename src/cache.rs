//! Memoization of evaluation results.
//!
//! There are two tiers. An [`EvaluatorCache`] is owned by an engine and
//! keyed by argument values, for one primitive. The [`GlobalEvalCache`] is
//! shared by all engines in the process and is additionally keyed by the
//! primitive's attributes at call time, so that a changed attribute misses
//! the cache.
//!
//! Only successful results are inserted. Abstract values are immutable, so a
//! result read from either cache can be handed to several callers.

use std::sync::OnceLock;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::abstract_value::{AbstractValue, EvalResult};
use crate::primitive::{AttrMap, PrimId, Primitive};

/// Results of evaluating one primitive, keyed by argument values.
#[derive(Clone, Debug, Default)]
pub struct EvaluatorCache {
    entries: FxHashMap<Vec<AbstractValue>, EvalResult>,
}

impl EvaluatorCache {
    pub fn new() -> EvaluatorCache {
        EvaluatorCache::default()
    }

    pub fn get(&self, args: &[AbstractValue]) -> Option<EvalResult> {
        self.entries.get(args).cloned()
    }

    pub fn insert(&mut self, args: Vec<AbstractValue>, result: EvalResult) {
        self.entries.insert(args, result);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct GlobalKey {
    prim: PrimId,
    attrs: AttrMap,
    args: Vec<AbstractValue>,
}

/// Process-wide cache of results of host-inferred primitives.
#[derive(Default)]
pub struct GlobalEvalCache {
    entries: RwLock<FxHashMap<GlobalKey, EvalResult>>,
}

impl GlobalEvalCache {
    pub fn new() -> GlobalEvalCache {
        GlobalEvalCache::default()
    }

    /// Return the cache shared by all engines.
    pub fn global() -> &'static GlobalEvalCache {
        static CACHE: OnceLock<GlobalEvalCache> = OnceLock::new();
        CACHE.get_or_init(GlobalEvalCache::new)
    }

    /// Look up the result of calling `prim`, with attributes `attrs`, on
    /// `args`.
    pub fn get(
        &self,
        prim: &Primitive,
        attrs: &AttrMap,
        args: &[AbstractValue],
    ) -> Option<EvalResult> {
        let key = GlobalKey {
            prim: prim.id(),
            attrs: attrs.clone(),
            args: args.to_vec(),
        };
        let result = self.entries.read().get(&key).cloned();
        if result.is_some() {
            tracing::debug!(prim = prim.name(), "global evaluator cache hit");
        }
        result
    }

    /// Insert a result. `attrs` must be the attributes of `prim` from
    /// before the evaluation, since evaluation may change them.
    pub fn insert(
        &self,
        prim: &Primitive,
        attrs: AttrMap,
        args: Vec<AbstractValue>,
        result: EvalResult,
    ) {
        let key = GlobalKey {
            prim: prim.id(),
            attrs,
            args,
        };
        self.entries.write().insert(key, result);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::{EvaluatorCache, GlobalEvalCache};
    use crate::abstract_value::{AbstractValue, EvalResult};
    use crate::primitive::Primitive;
    use crate::types::{DType, Shape};
    use crate::value::Value;

    fn tensor(shape: &[usize]) -> AbstractValue {
        AbstractValue::tensor(DType::Float32, Shape::fixed(shape))
    }

    #[test]
    fn test_local_cache_uses_structural_equality() {
        let mut cache = EvaluatorCache::new();
        let result = EvalResult::new(tensor(&[2]));
        cache.insert(vec![tensor(&[2]), tensor(&[2])], result.clone());

        assert_eq!(cache.get(&[tensor(&[2]), tensor(&[2])]), Some(result));
        assert_eq!(cache.get(&[tensor(&[3]), tensor(&[2])]), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_global_cache_keyed_by_attrs() {
        let cache = GlobalEvalCache::new();
        let prim = Primitive::host("MatMul").with_attr("transpose_a", Value::Bool(false));
        let args = vec![tensor(&[2, 3]), tensor(&[3, 4])];
        let result = EvalResult::new(tensor(&[2, 4]));

        cache.insert(&prim, prim.attrs(), args.clone(), result.clone());
        assert_eq!(cache.get(&prim, &prim.attrs(), &args), Some(result));

        prim.set_attr("transpose_a", Value::Bool(true));
        assert_eq!(cache.get(&prim, &prim.attrs(), &args), None);

        let other = Primitive::host("MatMul").with_attr("transpose_a", Value::Bool(false));
        assert_eq!(cache.get(&other, &other.attrs(), &args), None);

        cache.clear();
        assert!(cache.is_empty());
    }
}
