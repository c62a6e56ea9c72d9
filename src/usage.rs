//! Side table recording which elements of tuples and lists are used.
//!
//! Sequence construction seeds an all-false flag vector for its node.
//! Primitives which consume sequence operands then mark elements as used,
//! according to their [`Consumption`]. Elements which are never marked can
//! be removed by dead element elimination, which runs after inference.

use std::fmt;

use smallvec::SmallVec;

use crate::abstract_value::{AbstractKind, AbstractValue};
use crate::graph::{NodeId, NoopHashMap};
use crate::infer_shapes::resolve_index;
use crate::ops::Consumption;

/// Fixed-length bit vector of "element used" flags.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct UsageFlags {
    words: SmallVec<[u64; 1]>,
    len: usize,
}

impl UsageFlags {
    const BITS: usize = u64::BITS as usize;

    /// Return a set of `len` flags, all unset.
    pub fn new(len: usize) -> Self {
        let words = len.div_ceil(Self::BITS);
        UsageFlags {
            words: SmallVec::from_elem(0, words),
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Return true if position `pos` is set.
    pub fn get(&self, pos: usize) -> bool {
        pos < self.len && self.words[pos / Self::BITS] & (1 << (pos % Self::BITS)) != 0
    }

    /// Set the bit at position `pos`. Out of range positions are ignored.
    pub fn set(&mut self, pos: usize) {
        if pos < self.len {
            self.words[pos / Self::BITS] |= 1 << (pos % Self::BITS);
        }
    }

    /// Set every position.
    pub fn set_all(&mut self) {
        for pos in 0..self.len {
            self.set(pos);
        }
    }

    /// Return the number of bits set.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn all_set(&self) -> bool {
        self.count() == self.len
    }

    /// Return an iterator over the indices of set positions.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(|pos| self.get(*pos))
    }
}

impl fmt::Debug for UsageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for pos in 0..self.len {
            write!(f, "{}", if self.get(pos) { '1' } else { '0' })?;
        }
        Ok(())
    }
}

/// Map from sequence-constructing nodes to the usage flags of their
/// elements.
#[derive(Clone, Debug, Default)]
pub struct ElementUsage {
    flags: NoopHashMap<NodeId, UsageFlags>,
}

impl ElementUsage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the flags for a sequence of `len` elements built by `node`.
    ///
    /// Returns false and leaves existing flags untouched if the node was
    /// already seeded, as happens when a node is evaluated in several
    /// contexts.
    pub fn seed(&mut self, node: NodeId, len: usize) -> bool {
        if self.flags.contains_key(&node) {
            return false;
        }
        self.flags.insert(node, UsageFlags::new(len));
        true
    }

    pub fn flags(&self, node: NodeId) -> Option<&UsageFlags> {
        self.flags.get(&node)
    }

    /// Mark one element of the sequence built by `node` as used.
    pub fn mark_used(&mut self, node: NodeId, index: usize) {
        if let Some(flags) = self.flags.get_mut(&node) {
            flags.set(index);
        }
    }

    /// Mark every element of `value`, and of any sequences nested inside
    /// it, as used.
    pub fn mark_all_used(&mut self, value: &AbstractValue) {
        match value.kind() {
            AbstractKind::Tuple(seq) | AbstractKind::List(seq) => {
                if let Some(flags) = seq.origin().and_then(|node| self.flags.get_mut(&node)) {
                    flags.set_all();
                }
                for elem in seq.elements() {
                    self.mark_all_used(elem);
                }
            }
            AbstractKind::Dictionary(entries) => {
                for (_, elem) in entries {
                    self.mark_all_used(elem);
                }
            }
            AbstractKind::KeywordArg { value, .. } => self.mark_all_used(value),
            _ => {}
        }
    }

    /// Mark the element at `index` of sequence `value` as used.
    pub fn mark_element_used(&mut self, value: &AbstractValue, index: usize) {
        if let Some(node) = value.as_sequence().and_then(|seq| seq.origin()) {
            self.mark_used(node, index);
        }
    }

    /// Record how the primitive `prim_name` uses its operands `args`.
    pub fn consume(&mut self, prim_name: &str, consumption: Consumption, args: &[AbstractValue]) {
        for (i, arg) in args.iter().enumerate() {
            let Some(seq) = arg.as_sequence() else {
                continue;
            };
            if !consumption.passes(i) {
                tracing::debug!(
                    prim = prim_name,
                    operand = i,
                    "primitive uses all sequence elements"
                );
                self.mark_all_used(arg);
                continue;
            }
            let Consumption::Element { index_arg } = consumption else {
                continue;
            };
            let index = args
                .get(index_arg)
                .and_then(|index| index.value().as_int())
                .zip(seq.len())
                .and_then(|(index, len)| resolve_index(len, index));
            match index {
                Some(index) => self.mark_element_used(arg, index),
                None => self.mark_all_used(arg),
            }
        }
    }

    pub fn clear(&mut self) {
        self.flags.clear();
    }
}
