use super::bvh::Bvh;
use super::node::{Node, NodeRef};
use crate::accel::primitives::IPrimitiveType;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Copies the nodes and leaf blocks reachable from `root` into fresh, gap-free arrays.
///
/// Nodes reachable through plain inner references are placed first, depth first. Each subtree
/// behind a barrier reference then follows as one contiguous depth-first run. Every barrier mark
/// is cleared in the result.
///
/// # Returns
/// The compacted nodes, leaf blocks and the relocated root.
pub(crate) fn relocate<const N: usize, P: Clone>(
    nodes: &[Node<N>],
    leaves: &[P],
    root: NodeRef,
) -> (Vec<Node<N>>, Vec<P>, NodeRef) {
    let mut relocation = Relocation {
        source_nodes: nodes,
        source_leaves: leaves,
        nodes: Vec::with_capacity(nodes.len()),
        leaves: Vec::with_capacity(leaves.len()),
        deferred: Vec::new(),
    };
    let new_root = relocation.copy(root, true);
    let mut next = 0;
    while next < relocation.deferred.len() {
        let (node, slot, old) = relocation.deferred[next];
        let moved = relocation.copy(old, false);
        relocation.nodes[node].children[slot] = moved;
        next += 1;
    }
    (relocation.nodes, relocation.leaves, new_root)
}

struct Relocation<'a, const N: usize, P> {
    source_nodes: &'a [Node<N>],
    source_leaves: &'a [P],
    nodes: Vec<Node<N>>,
    leaves: Vec<P>,
    /// Barrier children whose subtrees are copied after the top of the tree: new parent, slot, old reference.
    deferred: Vec<(usize, usize, NodeRef)>,
}

impl<'a, const N: usize, P: Clone> Relocation<'a, N, P> {
    fn copy(&mut self, node_ref: NodeRef, stop_at_barriers: bool) -> NodeRef {
        match node_ref {
            NodeRef::Empty => NodeRef::Empty,
            NodeRef::Leaf { offset, count } => {
                let start = self.leaves.len();
                let (offset, count) = (offset as usize, count as usize);
                self.leaves.extend_from_slice(&self.source_leaves[offset..offset + count]);
                NodeRef::leaf(start, count)
            }
            NodeRef::Inner { index } | NodeRef::Barrier { index } => {
                let source = self.source_nodes[index as usize];
                let new_index = self.nodes.len();
                self.nodes.push(source);
                for (slot, child) in source.children.iter().enumerate() {
                    let moved = if stop_at_barriers && child.is_barrier() {
                        self.deferred.push((new_index, slot, *child));
                        NodeRef::Empty
                    } else {
                        self.copy(*child, stop_at_barriers)
                    };
                    self.nodes[new_index].children[slot] = moved;
                }
                NodeRef::inner(new_index)
            }
        }
    }
}

/// Frontier entry ordered by area.
struct ByArea(f32, usize);

impl PartialEq for ByArea {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ByArea {}

impl PartialOrd for ByArea {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ByArea {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0).then_with(|| other.1.cmp(&self.1))
    }
}

impl<const N: usize, P: IPrimitiveType> Bvh<N, P> {
    /// Drops every barrier mark without moving anything.
    pub fn clear_barriers(&mut self) {
        self.root = self.root.clear_barrier();
        for node in &mut self.nodes {
            for child in &mut node.children {
                *child = child.clear_barrier();
            }
        }
    }

    /// Removes unused node and leaf slots and stores the tree in depth-first order.
    pub fn compact(&mut self) {
        let (nodes, leaves, root) = relocate(&self.nodes, &self.leaves, self.root);
        self.nodes = nodes;
        self.leaves = leaves;
        self.root = root;
    }

    /// Moves the `count` nodes with the largest bounds to the front of the node array, grown
    /// from the root by always taking the largest node on the frontier. The subtrees below them
    /// follow one after another.
    pub fn layout_large_nodes(&mut self, count: usize) {
        let Some(root_index) = self.root.node_index() else {
            return;
        };
        self.clear_barriers();
        let mut top = vec![false; self.nodes.len()];
        let mut frontier = BinaryHeap::new();
        frontier.push(ByArea(self.bounds.safe_half_area(), root_index));
        let mut selected = 0;
        while selected < count {
            let Some(ByArea(_, index)) = frontier.pop() else {
                break;
            };
            top[index] = true;
            selected += 1;
            for (bounds, child) in self.nodes[index].valid_children() {
                if let Some(child_index) = child.node_index() {
                    frontier.push(ByArea(bounds.safe_half_area(), child_index));
                }
            }
        }
        for index in 0..self.nodes.len() {
            if !top[index] {
                continue;
            }
            for child in &mut self.nodes[index].children {
                if let NodeRef::Inner { index: child_index } = *child {
                    if !top[child_index as usize] {
                        *child = NodeRef::Barrier { index: child_index };
                    }
                }
            }
        }
        log::trace!("layout moved {} large nodes to the front", selected);
        self.compact();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::primitives::Triangle1;
    use crate::utilities::BoundingBox;
    use glam::Vec3;

    fn unit(x: f32) -> BoundingBox {
        BoundingBox::new(Vec3::new(x, 0.0, 0.0), Vec3::new(x + 1.0, 1.0, 1.0))
    }

    /// Root at slot 5 with a barrier child at slot 0 and an inner child at slot 2, plus unused slots.
    fn scattered() -> (Vec<Node<2>>, Vec<u32>) {
        let mut nodes = vec![Node::<2>::default(); 6];
        nodes[0] = Node::from_children(&[(unit(0.0), NodeRef::leaf(4, 1)), (unit(1.0), NodeRef::leaf(6, 2))]);
        nodes[2] = Node::from_children(&[(unit(10.0), NodeRef::leaf(0, 1)), (unit(11.0), NodeRef::leaf(1, 1))]);
        nodes[5] = Node::from_children(&[
            (unit(0.0), NodeRef::Barrier { index: 0 }),
            (unit(10.0), NodeRef::inner(2)),
        ]);
        (nodes, vec![10, 11, 99, 99, 20, 99, 21, 22])
    }

    #[test]
    fn test_relocation_removes_gaps_and_barriers() {
        let (nodes, leaves) = scattered();
        let (nodes, leaves, root) = relocate(&nodes, &leaves, NodeRef::inner(5));
        assert_eq!(root, NodeRef::inner(0));
        assert_eq!(nodes.len(), 3);
        assert_eq!(leaves, vec![10, 11, 20, 21, 22]);
        // The inner child precedes the deferred barrier subtree.
        assert_eq!(nodes[0].children[1], NodeRef::inner(1));
        assert_eq!(nodes[0].children[0], NodeRef::inner(2));
        assert_eq!(nodes[2].children[1], NodeRef::leaf(3, 2));
        assert!(nodes.iter().all(|node| node.children.iter().all(|child| !child.is_barrier())));
    }

    #[test]
    fn test_layout_large_nodes_keeps_the_tree() {
        let mut bvh = Bvh::<2, Triangle1>::new(2).unwrap();
        let mut nodes = vec![Node::<2>::default(); 3];
        nodes[0] = Node::from_children(&[(unit(0.0), NodeRef::inner(1)), (unit(10.0), NodeRef::inner(2))]);
        nodes[1] = Node::from_children(&[(unit(0.0), NodeRef::leaf(0, 1)), (unit(0.5), NodeRef::leaf(1, 1))]);
        nodes[2] = Node::from_children(&[(unit(10.0), NodeRef::leaf(2, 1)), (unit(10.5), NodeRef::leaf(3, 1))]);
        bvh.nodes = nodes;
        bvh.leaves = vec![Triangle1::default(); 4];
        bvh.root = NodeRef::inner(0);
        bvh.bounds = BoundingBox::new(Vec3::ZERO, Vec3::new(11.5, 1.0, 1.0));

        bvh.layout_large_nodes(1);
        assert_eq!(bvh.nodes.len(), 3);
        assert_eq!(bvh.root, NodeRef::inner(0));
        let children: Vec<_> = bvh.nodes[0].valid_children().map(|(_, child)| child).collect();
        assert_eq!(children, vec![NodeRef::inner(1), NodeRef::inner(2)]);
        assert!(bvh.nodes.iter().all(|node| node.child_count() == 2));
    }
}
