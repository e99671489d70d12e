use crate::utilities::BoundingBox;

/// Widest node layout supported.
pub const MAX_BRANCHING_FACTOR: usize = 16;

/// Largest number of blocks a single leaf may reference.
pub const MAX_LEAF_BLOCKS: usize = 15;

/// Reference to a child of a node.
///
/// Leaf references count primitive blocks, not primitives. `Barrier` marks the root of a subtree
/// that was finished independently during a parallel build; layout compaction turns it back into `Inner`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum NodeRef {
    #[default]
    Empty,
    Leaf { offset: u32, count: u32 },
    Inner { index: u32 },
    Barrier { index: u32 },
}

const TAG_BITS: u32 = 2;
const TAG_MASK: u64 = 0b11;
const PAYLOAD_BITS: u32 = 32;
const COUNT_MASK: u64 = (1 << 29) - 1;

impl NodeRef {
    #[inline(always)]
    pub fn leaf(offset: usize, count: usize) -> Self {
        Self::Leaf {
            offset: offset as u32,
            count: count as u32,
        }
    }

    #[inline(always)]
    pub fn inner(index: usize) -> Self {
        Self::Inner {
            index: index as u32,
        }
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    #[inline(always)]
    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf { .. })
    }

    /// True for inner nodes, barrier-marked or not.
    #[inline(always)]
    pub fn is_node(&self) -> bool {
        matches!(self, Self::Inner { .. } | Self::Barrier { .. })
    }

    #[inline(always)]
    pub fn is_barrier(&self) -> bool {
        matches!(self, Self::Barrier { .. })
    }

    /// Index of the referenced node, for inner and barrier references.
    #[inline(always)]
    pub fn node_index(&self) -> Option<usize> {
        match *self {
            Self::Inner { index } | Self::Barrier { index } => Some(index as usize),
            _ => None,
        }
    }

    /// First block and block count, for leaf references.
    #[inline(always)]
    pub fn leaf_range(&self) -> Option<(usize, usize)> {
        match *self {
            Self::Leaf { offset, count } => Some((offset as usize, count as usize)),
            _ => None,
        }
    }

    /// Drops the barrier mark.
    #[inline(always)]
    pub fn clear_barrier(self) -> Self {
        match self {
            Self::Barrier { index } => Self::Inner { index },
            other => other,
        }
    }

    /// Packs the reference into the low 63 bits of a word. Empty packs to zero.
    #[inline]
    pub fn to_bits(self) -> u64 {
        match self {
            Self::Empty => 0,
            Self::Leaf { offset, count } => {
                1 | (offset as u64) << TAG_BITS | ((count as u64) & COUNT_MASK) << (TAG_BITS + PAYLOAD_BITS)
            }
            Self::Inner { index } => 2 | (index as u64) << TAG_BITS,
            Self::Barrier { index } => 3 | (index as u64) << TAG_BITS,
        }
    }

    /// Inverse of `to_bits`. Bit 63 is ignored.
    #[inline]
    pub fn from_bits(bits: u64) -> Self {
        let payload = ((bits >> TAG_BITS) & u32::MAX as u64) as u32;
        match bits & TAG_MASK {
            0 => Self::Empty,
            1 => Self::Leaf {
                offset: payload,
                count: ((bits >> (TAG_BITS + PAYLOAD_BITS)) & COUNT_MASK) as u32,
            },
            2 => Self::Inner { index: payload },
            _ => Self::Barrier { index: payload },
        }
    }
}

/// Node with up to `N` children. Unused slots hold `NodeRef::Empty` and empty bounds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Node<const N: usize> {
    pub bounds: [BoundingBox; N],
    pub children: [NodeRef; N],
}

impl<const N: usize> Default for Node<N> {
    fn default() -> Self {
        Self {
            bounds: [BoundingBox::EMPTY; N],
            children: [NodeRef::Empty; N],
        }
    }
}

impl<const N: usize> Node<N> {
    /// Creates a node from `(bounds, child)` pairs. Panics if there are more than `N`.
    pub fn from_children(children: &[(BoundingBox, NodeRef)]) -> Self {
        assert!(children.len() <= N, "Node width {} cannot hold {} children.", N, children.len());
        let mut node = Self::default();
        for (slot, (bounds, child)) in children.iter().enumerate() {
            node.set(slot, *bounds, *child);
        }
        node
    }

    #[inline(always)]
    pub fn set(&mut self, slot: usize, bounds: BoundingBox, child: NodeRef) {
        self.bounds[slot] = bounds;
        self.children[slot] = child;
    }

    /// Number of occupied slots.
    #[inline]
    pub fn child_count(&self) -> usize {
        self.children.iter().filter(|child| !child.is_empty()).count()
    }

    /// Union of the child bounds.
    #[inline]
    pub fn merged_bounds(&self) -> BoundingBox {
        self.valid_children()
            .fold(BoundingBox::EMPTY, |acc, (bounds, _)| BoundingBox::create_merged_boxes(acc, bounds))
    }

    /// Iterates over the occupied slots.
    #[inline]
    pub fn valid_children(&self) -> impl Iterator<Item = (BoundingBox, NodeRef)> + '_ {
        self.bounds
            .iter()
            .zip(self.children.iter())
            .filter(|(_, child)| !child.is_empty())
            .map(|(bounds, child)| (*bounds, *child))
    }
}

pub type Node4 = Node<4>;
pub type Node8 = Node<8>;
pub type Node16 = Node<16>;

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_bits_round_trip_every_variant() {
        for node_ref in [
            NodeRef::Empty,
            NodeRef::leaf(123_456, 15),
            NodeRef::inner(u32::MAX as usize),
            NodeRef::Barrier { index: 7 },
        ] {
            assert_eq!(NodeRef::from_bits(node_ref.to_bits()), node_ref);
            assert_eq!(node_ref.to_bits() >> 63, 0);
        }
        assert_eq!(NodeRef::Empty.to_bits(), 0);
    }

    #[test]
    fn test_barrier_is_a_node() {
        let barrier = NodeRef::Barrier { index: 4 };
        assert!(barrier.is_node());
        assert_eq!(barrier.node_index(), Some(4));
        assert_eq!(barrier.clear_barrier(), NodeRef::inner(4));
        assert_eq!(NodeRef::leaf(2, 3).leaf_range(), Some((2, 3)));
    }

    #[test]
    fn test_merged_bounds_skip_empty_slots() {
        let a = BoundingBox::new(Vec3::ZERO, Vec3::ONE);
        let b = BoundingBox::new(Vec3::splat(2.0), Vec3::splat(3.0));
        let node = Node4::from_children(&[(a, NodeRef::leaf(0, 1)), (b, NodeRef::leaf(1, 1))]);
        assert_eq!(node.child_count(), 2);
        assert_eq!(node.merged_bounds(), BoundingBox::new(Vec3::ZERO, Vec3::splat(3.0)));
    }

    #[test]
    #[should_panic(expected = "cannot hold")]
    fn test_too_many_children() {
        Node::<2>::from_children(&[(BoundingBox::EMPTY, NodeRef::leaf(0, 1)); 3]);
    }
}
