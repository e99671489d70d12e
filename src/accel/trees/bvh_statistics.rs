use super::build_settings::BuildSettings;
use super::bvh::Bvh;
use super::node::NodeRef;
use crate::accel::primitives::IPrimitiveType;
use crate::utilities::BoundingBox;
use std::fmt;

/// Read-only snapshot of a built hierarchy.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BvhStatistics {
    /// Expected traversal cost of a random ray that hits the root, in units of the build's cost model.
    pub sah: f32,
    pub bytes_used: usize,
    pub inner_nodes: usize,
    pub leaves: usize,
    pub leaf_blocks: usize,
    pub primitives: usize,
    /// Depth of the deepest reference, the root being at depth 1.
    pub max_depth: usize,
    /// Fraction of child slots in use, over inner nodes of the build's branching factor.
    pub fill_rate: f32,
}

struct StatisticsWalk {
    node_area: f32,
    leaf_cost_area: f32,
    child_slots: usize,
    statistics: BvhStatistics,
}

impl<const N: usize, P: IPrimitiveType> Bvh<N, P> {
    /// Gathers the statistics of the current tree, costing it with `settings`.
    pub fn statistics(&self, settings: &BuildSettings) -> BvhStatistics {
        let mut walk = StatisticsWalk {
            node_area: 0.0,
            leaf_cost_area: 0.0,
            child_slots: 0,
            statistics: BvhStatistics {
                bytes_used: self.bytes_used(),
                ..BvhStatistics::default()
            },
        };
        self.gather_statistics(self.root, self.bounds, 1, &mut walk);

        let root_area = self.bounds.safe_half_area();
        let mut statistics = walk.statistics;
        if root_area > 0.0 {
            statistics.sah =
                (settings.traversal_cost * walk.node_area + settings.intersection_cost * walk.leaf_cost_area) / root_area;
        }
        let available = statistics.inner_nodes * self.branching_factor();
        if available > 0 {
            statistics.fill_rate = walk.child_slots as f32 / available as f32;
        }
        statistics
    }

    fn gather_statistics(&self, node_ref: NodeRef, bounds: BoundingBox, depth: usize, walk: &mut StatisticsWalk) {
        if node_ref.is_empty() {
            return;
        }
        walk.statistics.max_depth = walk.statistics.max_depth.max(depth);
        let area = bounds.safe_half_area();
        if let Some(blocks) = self.leaf(node_ref) {
            walk.statistics.leaves += 1;
            walk.statistics.leaf_blocks += blocks.len();
            walk.statistics.primitives += blocks.iter().map(|block| block.primitive_count()).sum::<usize>();
            walk.leaf_cost_area += blocks.len() as f32 * area;
            return;
        }
        let Some(node) = self.node(node_ref) else {
            return;
        };
        walk.statistics.inner_nodes += 1;
        walk.node_area += area;
        for (child_bounds, child) in node.valid_children() {
            walk.child_slots += 1;
            self.gather_statistics(child, child_bounds, depth + 1, walk);
        }
    }
}

impl fmt::Display for BvhStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sah = {:.3}, {:.3} MB, {} inner nodes ({:.1}% filled), {} leaves, {} blocks, {} primitives, depth {}",
            self.sah,
            self.bytes_used as f64 * 1e-6,
            self.inner_nodes,
            self.fill_rate * 100.0,
            self.leaves,
            self.leaf_blocks,
            self.primitives,
            self.max_depth
        )
    }
}
