use super::build_settings::BuildSettings;
use super::bvh::Bvh;
use super::node::{NodeRef, MAX_LEAF_BLOCKS};
use crate::accel::primitives::IPrimitiveType;
use crate::utilities::BoundingBox;

impl<const N: usize, P: IPrimitiveType> Bvh<N, P> {
    /// Checks the structural invariants of a finished build and panics on the first violation.
    ///
    /// Every inner slot must hold exactly the union of its child's slots, the root bounds must match
    /// the root, no reference may go deeper than `settings.max_depth`, leaves must reference existing
    /// blocks and stay within the leaf size ceiling, and no barrier mark may be left.
    pub fn validate(&self, settings: &BuildSettings) {
        let mut leaf_blocks = 0;
        self.validate_node(self.root, self.bounds, 1, settings, &mut leaf_blocks);
        assert!(
            leaf_blocks <= self.leaves.len(),
            "Leaves reference {} blocks but only {} exist.",
            leaf_blocks,
            self.leaves.len()
        );
    }

    fn validate_node(
        &self,
        node_ref: NodeRef,
        expected: BoundingBox,
        depth: usize,
        settings: &BuildSettings,
        leaf_blocks: &mut usize,
    ) {
        if node_ref.is_empty() {
            return;
        }
        assert!(!node_ref.is_barrier(), "Barrier {:?} survived layout compaction.", node_ref);
        assert!(
            depth <= settings.max_depth,
            "{:?} sits at depth {}, beyond the limit of {}.",
            node_ref,
            depth,
            settings.max_depth
        );
        if let Some((offset, count)) = node_ref.leaf_range() {
            assert!(count > 0 && count <= MAX_LEAF_BLOCKS, "Leaf holds {} blocks.", count);
            let Some(blocks) = self.leaves.get(offset..offset + count) else {
                panic!("Leaf range {}..{} is outside of {} blocks.", offset, offset + count, self.leaves.len());
            };
            let primitives: usize = blocks.iter().map(|block| block.primitive_count()).sum();
            let ceiling = settings.effective_max_leaf_size::<P>();
            assert!(
                primitives > 0 && primitives <= ceiling,
                "Leaf holds {} primitives, the ceiling is {}.",
                primitives,
                ceiling
            );
            *leaf_blocks += count;
            return;
        }
        let Some(node) = self.node(node_ref) else {
            panic!("{:?} is outside of {} nodes.", node_ref, self.nodes.len());
        };
        assert!(node.child_count() >= 2, "Node {:?} has fewer than two children.", node_ref);
        let merged = node.merged_bounds();
        assert_eq!(merged, expected, "Bounds of {:?} are not the union of its children.", node_ref);
        for (bounds, child) in node.valid_children() {
            self.validate_node(child, bounds, depth + 1, settings, leaf_blocks);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::primitives::Triangle1;
    use crate::accel::trees::Node;
    use glam::Vec3;

    fn unit(x: f32) -> BoundingBox {
        BoundingBox::new(Vec3::new(x, 0.0, 0.0), Vec3::new(x + 1.0, 1.0, 1.0))
    }

    fn triangle(prim_id: u32) -> Triangle1 {
        Triangle1::new(Vec3::ZERO, Vec3::X, Vec3::Y, 0, prim_id)
    }

    /// Root over two leaves of one triangle each.
    fn two_leaves() -> Bvh<2, Triangle1> {
        let mut bvh = Bvh::<2, Triangle1>::new(2).unwrap();
        bvh.nodes = vec![Node::from_children(&[
            (unit(0.0), NodeRef::leaf(0, 1)),
            (unit(2.0), NodeRef::leaf(1, 1)),
        ])];
        bvh.leaves = vec![triangle(0), triangle(1)];
        bvh.root = NodeRef::inner(0);
        bvh.bounds = BoundingBox::new(Vec3::ZERO, Vec3::new(3.0, 1.0, 1.0));
        bvh.num_primitives = 2;
        bvh
    }

    #[test]
    fn test_consistent_tree_passes() {
        two_leaves().validate(&BuildSettings::default());
    }

    #[test]
    #[should_panic(expected = "not the union")]
    fn test_wrong_root_bounds() {
        let mut bvh = two_leaves();
        bvh.bounds = unit(0.0);
        bvh.validate(&BuildSettings::default());
    }

    #[test]
    #[should_panic(expected = "beyond the limit")]
    fn test_depth_limit() {
        two_leaves().validate(&BuildSettings::default().with_max_depth(1));
    }

    #[test]
    #[should_panic(expected = "outside of 2 blocks")]
    fn test_leaf_range_out_of_bounds() {
        let mut bvh = two_leaves();
        bvh.nodes[0].children[1] = NodeRef::leaf(1, 2);
        bvh.validate(&BuildSettings::default());
    }

    #[test]
    #[should_panic(expected = "the ceiling is 1")]
    fn test_leaf_size_ceiling() {
        let mut bvh = two_leaves();
        bvh.nodes[0].children[0] = NodeRef::leaf(0, 2);
        bvh.validate(&BuildSettings::default().with_leaf_sizes(1, 1));
    }

    #[test]
    #[should_panic(expected = "survived layout compaction")]
    fn test_barrier_left_behind() {
        let mut bvh = two_leaves();
        bvh.root = NodeRef::Barrier { index: 0 };
        bvh.validate(&BuildSettings::default());
    }
}
