use super::bvh::Bvh;
use super::bvh_builder::IBvhBuilder;
use super::node::NodeRef;
use crate::accel::primitives::{IGeometryProvider, IPrimitiveType};
use crate::error::Result;
use crate::utilities::task_scheduling::TaskScheduler;
use crate::utilities::BoundingBox;
use std::time::Instant;

impl<const N: usize, P: IPrimitiveType> Bvh<N, P> {
    /// Reloads every leaf from the geometry and recomputes all bounds bottom-up. The topology is kept.
    ///
    /// # Returns
    /// The new root bounds.
    pub fn refit<G: IGeometryProvider<P> + ?Sized>(&mut self, provider: &G) -> BoundingBox {
        self.bounds = self.refit_node(self.root, provider);
        self.bounds
    }

    /// Refits the subtree below `node_ref` and returns its new bounds.
    pub fn refit_node<G: IGeometryProvider<P> + ?Sized>(&mut self, node_ref: NodeRef, provider: &G) -> BoundingBox {
        match node_ref {
            NodeRef::Empty => BoundingBox::EMPTY,
            NodeRef::Leaf { offset, count } => {
                let (offset, count) = (offset as usize, count as usize);
                match self.leaves.get_mut(offset..offset + count) {
                    Some(blocks) => provider.update_leaf(blocks),
                    None => BoundingBox::EMPTY,
                }
            }
            NodeRef::Inner { index } | NodeRef::Barrier { index } => {
                let index = index as usize;
                let Some(children) = self.nodes.get(index).map(|node| node.children) else {
                    return BoundingBox::EMPTY;
                };
                for (slot, child) in children.into_iter().enumerate() {
                    if !child.is_empty() {
                        let bounds = self.refit_node(child, provider);
                        self.nodes[index].bounds[slot] = bounds;
                    }
                }
                self.nodes[index].merged_bounds()
            }
        }
    }

    /// Sets every inner child slot to the union of the child's own slots, keeping leaf slots.
    /// Used after subtrees were linked with bounds that were estimated before they were built.
    pub(crate) fn merge_child_bounds(&mut self) {
        self.bounds = self.merge_child_bounds_below(self.root, self.bounds);
    }

    fn merge_child_bounds_below(&mut self, node_ref: NodeRef, leaf_bounds: BoundingBox) -> BoundingBox {
        let Some(index) = node_ref.node_index() else {
            return leaf_bounds;
        };
        let node = self.nodes[index];
        for (slot, child) in node.children.into_iter().enumerate() {
            if !child.is_empty() {
                let bounds = self.merge_child_bounds_below(child, node.bounds[slot]);
                self.nodes[index].bounds[slot] = bounds;
            }
        }
        self.nodes[index].merged_bounds()
    }
}

/// Builder for deforming geometry: builds fully the first time, then only refits as long as the
/// primitive count stays the same.
pub struct BvhRefitBuilder<B> {
    builder: B,
    built_primitives: Option<usize>,
}

impl<B> BvhRefitBuilder<B> {
    pub fn new(builder: B) -> Self {
        Self {
            builder,
            built_primitives: None,
        }
    }
}

impl<const N: usize, P, G, B> IBvhBuilder<N, P, G> for BvhRefitBuilder<B>
where
    P: IPrimitiveType,
    G: IGeometryProvider<P> + ?Sized,
    B: IBvhBuilder<N, P, G>,
{
    fn build(&mut self, bvh: &mut Bvh<N, P>, provider: &G, scheduler: &TaskScheduler) -> Result<()> {
        let primitive_count = provider.primitive_count();
        if self.built_primitives == Some(primitive_count) && !bvh.is_empty() {
            let start = Instant::now();
            bvh.refit(provider);
            log::debug!(
                "refit {} primitives in {:.3} ms",
                bvh.num_primitives,
                start.elapsed().as_secs_f64() * 1e3
            );
            return Ok(());
        }
        self.built_primitives = None;
        self.builder.build(bvh, provider, scheduler)?;
        self.built_primitives = Some(primitive_count);
        Ok(())
    }

    fn name(&self) -> &'static str {
        self.builder.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::geometry::TriangleMesh;
    use crate::accel::primitives::Triangle4;
    use crate::accel::trees::{BuildSettings, Bvh4, BvhBuilderSah};
    use glam::Vec3;

    fn grid_mesh() -> TriangleMesh {
        let corners: Vec<[Vec3; 3]> = (0..100)
            .map(|i| {
                let base = Vec3::new((i % 10) as f32, (i / 10) as f32, 0.0);
                [base, base + Vec3::new(0.5, 0.0, 0.0), base + Vec3::new(0.0, 0.5, 0.25)]
            })
            .collect();
        TriangleMesh::from_soup(0, &corners)
    }

    fn built(mesh: &TriangleMesh, scheduler: &TaskScheduler) -> Bvh4<Triangle4> {
        let mut bvh = Bvh4::<Triangle4>::new(4).unwrap();
        BvhBuilderSah::new(BuildSettings::for_primitive::<Triangle4>())
            .build(&mut bvh, mesh, scheduler)
            .unwrap();
        bvh
    }

    #[test]
    fn test_refit_is_idempotent() {
        let mesh = grid_mesh();
        let scheduler = TaskScheduler::with_threads(1).unwrap();
        let mut bvh = built(&mesh, &scheduler);
        let first = bvh.refit(&mesh);
        let nodes = bvh.nodes.clone();
        let second = bvh.refit(&mesh);
        assert_eq!(first, second);
        assert_eq!(nodes, bvh.nodes);
        assert_eq!(first, BoundingBox::new(Vec3::ZERO, Vec3::new(9.5, 9.5, 0.25)));
    }

    #[test]
    fn test_refit_follows_moved_vertices() {
        let mut mesh = grid_mesh();
        let scheduler = TaskScheduler::with_threads(1).unwrap();
        let mut bvh = built(&mesh, &scheduler);
        for vertex in &mut mesh.vertices {
            vertex.z += 3.0;
        }
        let bounds = bvh.refit(&mesh);
        assert_eq!(bounds.min.z, 3.0);
        assert_eq!(bounds.max.z, 3.25);
        bvh.validate(&BuildSettings::for_primitive::<Triangle4>());
    }

    #[test]
    fn test_refit_builder_keeps_topology() {
        let mut mesh = grid_mesh();
        let scheduler = TaskScheduler::with_threads(1).unwrap();
        let mut builder = BvhRefitBuilder::new(BvhBuilderSah::new(BuildSettings::for_primitive::<Triangle4>()));
        let mut bvh = Bvh4::<Triangle4>::new(4).unwrap();
        builder.build(&mut bvh, &mesh, &scheduler).unwrap();
        let children: Vec<_> = bvh.nodes.iter().map(|node| node.children).collect();

        for vertex in &mut mesh.vertices {
            *vertex *= 2.0;
        }
        builder.build(&mut bvh, &mesh, &scheduler).unwrap();
        assert_eq!(children, bvh.nodes.iter().map(|node| node.children).collect::<Vec<_>>());
        assert_eq!(bvh.bounds.max, Vec3::new(19.0, 19.0, 0.5));

        mesh.triangles.truncate(50);
        builder.build(&mut bvh, &mesh, &scheduler).unwrap();
        assert_eq!(bvh.num_primitives, 50);
    }
}
