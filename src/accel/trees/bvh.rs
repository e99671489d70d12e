use super::node::{Node, NodeRef, MAX_BRANCHING_FACTOR};
use crate::accel::primitives::IPrimitiveType;
use crate::error::{AccelError, Result};
use crate::utilities::BoundingBox;
use std::mem;

/// Bounding volume hierarchy with `N`-wide nodes over leaf blocks of `P`.
///
/// Nodes and leaf blocks live in two flat arrays and reference each other by index. The arrays
/// are only ever replaced as a whole by a build, so no node is freed individually.
#[derive(Clone, Debug)]
pub struct Bvh<const N: usize, P: IPrimitiveType> {
    pub nodes: Vec<Node<N>>,
    pub leaves: Vec<P>,
    pub root: NodeRef,
    pub bounds: BoundingBox,
    pub num_primitives: usize,
    branching_factor: usize,
}

pub type Bvh4<P> = Bvh<4, P>;
pub type Bvh8<P> = Bvh<8, P>;
pub type Bvh16<P> = Bvh<16, P>;

impl<const N: usize, P: IPrimitiveType> Bvh<N, P> {
    /// Creates an empty hierarchy whose builds use `branching_factor` children per node.
    pub fn new(branching_factor: usize) -> Result<Self> {
        let maximum = N.min(MAX_BRANCHING_FACTOR);
        if branching_factor > maximum {
            return Err(AccelError::BranchingFactorTooLarge {
                requested: branching_factor,
                maximum,
            });
        }
        if branching_factor < 2 {
            return Err(AccelError::InvalidSettings(format!(
                "branching factor {} is below 2",
                branching_factor
            )));
        }
        Ok(Self {
            nodes: Vec::new(),
            leaves: Vec::new(),
            root: NodeRef::Empty,
            bounds: BoundingBox::EMPTY,
            num_primitives: 0,
            branching_factor,
        })
    }

    /// Gets the number of children a build puts into each node.
    #[inline(always)]
    pub fn branching_factor(&self) -> usize {
        self.branching_factor
    }

    /// Gets whether the hierarchy holds no primitives.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Drops every node and leaf.
    pub fn clear(&mut self) {
        self.nodes = Vec::new();
        self.leaves = Vec::new();
        self.root = NodeRef::Empty;
        self.bounds = BoundingBox::EMPTY;
        self.num_primitives = 0;
    }

    /// Gets the node behind an inner or barrier reference.
    #[inline(always)]
    pub fn node(&self, node_ref: NodeRef) -> Option<&Node<N>> {
        node_ref.node_index().and_then(|index| self.nodes.get(index))
    }

    /// Gets the blocks behind a leaf reference.
    #[inline(always)]
    pub fn leaf(&self, node_ref: NodeRef) -> Option<&[P]> {
        let (offset, count) = node_ref.leaf_range()?;
        self.leaves.get(offset..offset + count)
    }

    /// Bytes held by node and leaf storage.
    pub fn bytes_used(&self) -> usize {
        self.nodes.len() * mem::size_of::<Node<N>>() + self.leaves.len() * mem::size_of::<P>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::primitives::Triangle4;

    #[test]
    fn test_branching_factor_is_checked_against_width() {
        assert!(Bvh4::<Triangle4>::new(4).is_ok());
        assert_eq!(
            Bvh4::<Triangle4>::new(8).err(),
            Some(AccelError::BranchingFactorTooLarge {
                requested: 8,
                maximum: 4
            })
        );
        assert!(Bvh16::<Triangle4>::new(2).is_ok());
        assert!(Bvh8::<Triangle4>::new(1).is_err());
    }

    #[test]
    fn test_new_is_empty() {
        let bvh = Bvh8::<Triangle4>::new(8).unwrap();
        assert!(bvh.is_empty());
        assert_eq!(bvh.bytes_used(), 0);
        assert!(bvh.node(NodeRef::inner(0)).is_none());
    }
}
