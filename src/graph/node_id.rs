use std::num::NonZero;

/// ID of a node in a [`GraphStore`](crate::graph::GraphStore).
///
/// Node IDs are u32 values < `u32::MAX`.
#[derive(Copy, Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeId(NonZero<u32>);

impl NodeId {
    /// Return the underlying u32 value of the ID.
    pub fn as_u32(self) -> u32 {
        self.0.get() - 1
    }

    /// Return the underlying ID value as a usize, for slice indexing.
    pub fn as_usize(self) -> usize {
        self.as_u32() as usize
    }

    /// Construct a node ID from a u32 value, or return `None` if the value
    /// is `u32::MAX`.
    pub fn from_u32(value: u32) -> Option<NodeId> {
        // Stored as `value + 1` so that `Option<NodeId>` is the same size as
        // `NodeId`.
        value.checked_add(1).and_then(NonZero::new).map(NodeId)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.as_u32())
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({})", self.as_u32())
    }
}

/// ID of a function graph in a [`GraphStore`](crate::graph::GraphStore).
#[derive(Copy, Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct GraphId(u32);

impl GraphId {
    pub(crate) fn from_index(index: usize) -> GraphId {
        GraphId(index as u32)
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for GraphId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.0)
    }
}

impl std::fmt::Debug for GraphId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GraphId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::NodeId;

    #[test]
    fn test_node_id_round_trip() {
        let id = NodeId::from_u32(7).unwrap();
        assert_eq!(id.as_u32(), 7);
        assert_eq!(id.as_usize(), 7);
        assert_eq!(id.to_string(), "%7");
        assert_eq!(format!("{:?}", id), "NodeId(7)");
        assert!(NodeId::from_u32(u32::MAX).is_none());
        assert_eq!(
            std::mem::size_of::<Option<NodeId>>(),
            std::mem::size_of::<NodeId>()
        );
    }
}
