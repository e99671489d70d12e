use super::lazy_patch_builder::{LazyPatchBuilder, QuadLeaf};
use super::subdiv_mesh::{PatchLeaf, SubdivMesh};
use super::tessellation::MAX_SUBDIVISION_LEVEL;
use crate::accel::primitives::intersect_triangle;
use crate::accel::ray::{Ray, RayInverse, RayPacket};
use crate::accel::trees::{intersects_ray, Bvh4, BvhStatistics, BuildSettings, IBvhBuilder, IRayLeafTester, NodeRef};
use crate::error::{AccelError, Result};
use crate::utilities::task_scheduling::TaskScheduler;
use glam::Vec2;

/// Deepest quad tree stack: three siblings per level plus the current path.
const QUAD_STACK_CAPACITY: usize = 3 * MAX_SUBDIVISION_LEVEL + 2;

/// 4-wide hierarchy over patch bounds whose leaves expand into quad trees the first time a ray
/// reaches them.
pub struct SubdivAccel {
    mesh: SubdivMesh,
    bvh: Bvh4<PatchLeaf>,
    builder: Box<dyn IBvhBuilder<4, PatchLeaf, SubdivMesh>>,
    settings: BuildSettings,
    lazy: LazyPatchBuilder,
}

impl SubdivAccel {
    /// Creates an unbuilt accel over `mesh`, tessellating patches at `level` when they are expanded.
    pub fn new(
        mesh: SubdivMesh,
        builder: Box<dyn IBvhBuilder<4, PatchLeaf, SubdivMesh>>,
        settings: BuildSettings,
        level: usize,
    ) -> Result<Self> {
        let lazy = LazyPatchBuilder::new(mesh.patches.len(), level)?;
        Ok(Self {
            mesh,
            bvh: Bvh4::new(settings.branching_factor)?,
            builder,
            settings,
            lazy,
        })
    }

    pub fn mesh(&self) -> &SubdivMesh {
        &self.mesh
    }

    pub fn bvh(&self) -> &Bvh4<PatchLeaf> {
        &self.bvh
    }

    pub fn lazy(&self) -> &LazyPatchBuilder {
        &self.lazy
    }

    pub fn builder_name(&self) -> &'static str {
        self.builder.name()
    }

    /// Builds the patch hierarchy and drops every expansion of a previous build.
    pub fn build(&mut self, scheduler: &TaskScheduler) -> Result<()> {
        self.builder.build(&mut self.bvh, &self.mesh, scheduler)?;
        self.lazy = LazyPatchBuilder::new(self.mesh.patches.len(), self.lazy.level())?;
        Ok(())
    }

    pub fn statistics(&self) -> BvhStatistics {
        self.bvh.statistics(&self.settings)
    }

    /// Closest hit, expanding the patches the ray reaches.
    pub fn intersect(&self, ray: &mut Ray) -> Result<bool> {
        let mut tester = SubdivLeafTester::new(self);
        let hit = self.bvh.intersect_with(ray, &mut tester);
        tester.finish(hit)
    }

    pub fn occluded(&self, ray: &Ray) -> Result<bool> {
        let mut tester = SubdivLeafTester::new(self);
        let occluded = self.bvh.occluded_with(ray, &mut tester);
        tester.finish(occluded)
    }

    pub fn intersect_packet<const K: usize>(&self, packet: &mut RayPacket<K>) -> Result<()> {
        let mut tester = SubdivLeafTester::new(self);
        self.bvh.intersect_packet_hybrid(packet, &mut tester);
        tester.finish(())
    }

    pub fn occluded_packet<const K: usize>(&self, packet: &RayPacket<K>) -> Result<[bool; K]> {
        let mut tester = SubdivLeafTester::new(self);
        let occluded = self.bvh.occluded_packet_hybrid(packet, &mut tester);
        tester.finish(occluded)
    }

    /// Walks the quad tree of one patch. With `any_hit` it stops at the first hit without touching `ray`.
    fn traverse_quad_tree(&self, root: NodeRef, leaf: &PatchLeaf, ray: &mut Ray, any_hit: bool) -> bool {
        let Some(patch) = self.mesh.patch(leaf.prim_id as usize) else {
            return false;
        };
        let inverse = RayInverse::new(ray);
        let mut stack = [NodeRef::Empty; QUAD_STACK_CAPACITY];
        let mut stack_end = 1;
        stack[0] = root;
        let mut hit = false;
        while stack_end > 0 {
            stack_end -= 1;
            let node_ref = stack[stack_end];
            if let Some(quad) = self.lazy.quad(node_ref) {
                let corners = self.lazy.quad_corners(patch, quad);
                if any_hit {
                    if intersect_triangle(ray, corners[0], corners[1], corners[2]).is_some()
                        || intersect_triangle(ray, corners[0], corners[2], corners[3]).is_some()
                    {
                        return true;
                    }
                    continue;
                }
                hit |= self.intersect_quad(quad, &corners, leaf, ray);
                continue;
            }
            let Some(node) = self.lazy.node(node_ref) else {
                continue;
            };
            for (bounds, child) in node.valid_children() {
                if intersects_ray(&bounds, ray, &inverse).is_some() {
                    debug_assert!(stack_end < QUAD_STACK_CAPACITY, "Quad tree stack overflow.");
                    stack[stack_end] = child;
                    stack_end += 1;
                }
            }
        }
        hit
    }

    /// Intersects a quad as two triangles and reports the hit in patch parameters.
    fn intersect_quad(&self, quad: &QuadLeaf, corners: &[glam::Vec3; 4], leaf: &PatchLeaf, ray: &mut Ray) -> bool {
        let level = self.lazy.level();
        let grid = (1u32 << level) as f32;
        let params = [
            Vec2::new(quad.u_start as f32, quad.v_start as f32),
            Vec2::new(quad.u_end as f32, quad.v_start as f32),
            Vec2::new(quad.u_end as f32, quad.v_end as f32),
            Vec2::new(quad.u_start as f32, quad.v_end as f32),
        ]
        .map(|param| param / grid);
        let mut hit = false;
        for (a, b, c) in [(0, 1, 2), (0, 2, 3)] {
            if let Some((t, u, v)) = intersect_triangle(ray, corners[a], corners[b], corners[c]) {
                let uv = params[a] + u * (params[b] - params[a]) + v * (params[c] - params[a]);
                hit |= ray.update(t, uv.x, uv.y, leaf.geom_id, leaf.prim_id);
            }
        }
        hit
    }
}

/// Expands patches on first touch and keeps the first expansion error.
struct SubdivLeafTester<'a> {
    accel: &'a SubdivAccel,
    error: Option<AccelError>,
}

impl<'a> SubdivLeafTester<'a> {
    fn new(accel: &'a SubdivAccel) -> Self {
        Self { accel, error: None }
    }

    fn expand(&mut self, leaf: &PatchLeaf) -> Option<NodeRef> {
        if self.error.is_some() {
            return None;
        }
        let patch = self.accel.mesh.patch(leaf.prim_id as usize)?;
        match self.accel.lazy.expand(leaf.prim_id as usize, patch) {
            Ok(root) => Some(root),
            Err(error) => {
                self.error = Some(error);
                None
            }
        }
    }

    fn finish<T>(self, value: T) -> Result<T> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(value),
        }
    }
}

impl<'a> IRayLeafTester<PatchLeaf> for SubdivLeafTester<'a> {
    fn intersect_leaf(&mut self, blocks: &[PatchLeaf], ray: &mut Ray) -> bool {
        let mut hit = false;
        for leaf in blocks {
            if let Some(root) = self.expand(leaf) {
                hit |= self.accel.traverse_quad_tree(root, leaf, ray, false);
            }
        }
        hit
    }

    fn occluded_leaf(&mut self, blocks: &[PatchLeaf], ray: &Ray) -> bool {
        for leaf in blocks {
            if let Some(root) = self.expand(leaf) {
                let mut shadow = *ray;
                if self.accel.traverse_quad_tree(root, leaf, &mut shadow, true) {
                    return true;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::subdiv::{BSplinePatch, GregoryPatch, Patch, PatchBuildState};
    use crate::accel::trees::BvhBuilderSah;
    use glam::Vec3;
    use std::sync::atomic::Ordering;

    fn accel(mesh: SubdivMesh, level: usize) -> SubdivAccel {
        let settings = BuildSettings::for_primitive::<PatchLeaf>();
        let builder = Box::new(BvhBuilderSah::new(settings.clone()));
        let mut accel = SubdivAccel::new(mesh, builder, settings, level).unwrap();
        accel.build(&TaskScheduler::with_threads(1).unwrap()).unwrap();
        accel
    }

    #[test]
    fn test_only_touched_patches_expand() {
        let accel = accel(SubdivMesh::height_field(0, 8, 8, |_, _| 0.0), 2);
        let mut ray = Ray::new(Vec3::new(2.25, 5.0, 3.75), -Vec3::Y);
        assert_eq!(accel.intersect(&mut ray), Ok(true));
        assert!((ray.t_far - 5.0).abs() < 1e-5);
        assert_eq!(ray.prim_id, 3 * 8 + 2);
        assert!((ray.u - 0.25).abs() < 1e-5 && (ray.v - 0.75).abs() < 1e-5);

        let expanded = (0..64)
            .filter(|&patch| matches!(accel.lazy().state(patch), Some(PatchBuildState::Built(_))))
            .count();
        assert!((1..=8).contains(&expanded));
        assert_eq!(accel.lazy().state(3 * 8 + 2).map(|state| matches!(state, PatchBuildState::Built(_))), Some(true));
        assert_eq!(accel.lazy().counters().expansions.load(Ordering::Relaxed), expanded);

        assert_eq!(accel.occluded(&Ray::new(Vec3::new(7.5, 1.0, 7.5), -Vec3::Y)), Ok(true));
        assert_eq!(accel.occluded(&Ray::new(Vec3::new(9.5, 1.0, 7.5), -Vec3::Y)), Ok(false));
    }

    #[test]
    fn test_bspline_patch_is_hit_on_its_surface() {
        let points = std::array::from_fn(|row| std::array::from_fn(|column| Vec3::new(column as f32, 0.0, row as f32)));
        let patch = Patch::BSpline(BSplinePatch::new(points));
        let accel = accel(SubdivMesh::new(1, vec![patch]), 3);
        let mut ray = Ray::new(Vec3::new(1.5, 2.0, 1.5), -Vec3::Y);
        assert_eq!(accel.intersect(&mut ray), Ok(true));
        assert_eq!(ray.geom_id, 1);
        assert!((ray.t_far - 2.0).abs() < 1e-4);
        let mut outside = Ray::new(Vec3::new(0.5, 2.0, 0.5), -Vec3::Y);
        assert_eq!(accel.intersect(&mut outside), Ok(false));
    }

    #[test]
    fn test_gregory_patch_is_hit() {
        // Bezier grid of the plane y = 0 over [0, 3]^2, with the face points near (0, 0) lifted.
        let points = std::array::from_fn(|row| std::array::from_fn(|column| Vec3::new(column as f32, 0.0, row as f32)));
        let mut face_points = GregoryPatch::from_bezier(points).face_points;
        face_points[0] = [Vec3::new(1.0, 0.5, 1.0), Vec3::new(1.0, -0.5, 1.0)];
        let patch = Patch::Gregory(GregoryPatch::new(points, face_points));
        let accel = accel(SubdivMesh::new(2, vec![patch]), 3);

        let mut far_corner = Ray::new(Vec3::new(2.6, 2.0, 2.4), -Vec3::Y);
        assert_eq!(accel.intersect(&mut far_corner), Ok(true));
        assert_eq!(far_corner.geom_id, 2);
        assert!((far_corner.t_far - 2.0).abs() < 1e-2);

        // Near the lifted corner the surface dips below the plane.
        let mut bent = Ray::new(Vec3::new(0.9, 2.0, 1.2), -Vec3::Y);
        assert_eq!(accel.intersect(&mut bent), Ok(true));
        assert!(bent.t_far > 2.0 && bent.t_far < 2.05);
        assert_eq!(accel.occluded(&Ray::new(Vec3::new(3.5, 2.0, 1.5), -Vec3::Y)), Ok(false));
    }

    #[test]
    fn test_packets_agree_with_single_rays() {
        let accel = accel(SubdivMesh::height_field(0, 4, 4, |x, z| 0.1 * x * z), 1);
        let rays: [Ray; 4] = std::array::from_fn(|lane| Ray::new(Vec3::new(0.5 + lane as f32, 10.0, 1.5), -Vec3::Y));
        let mut packet = RayPacket::new(rays);
        accel.intersect_packet(&mut packet).unwrap();
        for lane in 0..4 {
            let mut single = rays[lane];
            assert_eq!(accel.intersect(&mut single), Ok(true));
            assert_eq!(packet.rays[lane].prim_id, single.prim_id);
            assert_eq!(packet.rays[lane].t_far, single.t_far);
        }
        assert_eq!(accel.occluded_packet(&RayPacket::new(rays)), Ok([true; 4]));
    }

    #[test]
    fn test_exhausted_arena_is_reported() {
        let mut accel = accel(SubdivMesh::height_field(0, 2, 1, |_, _| 0.0), 1);
        accel.lazy = LazyPatchBuilder::with_capacity(2, 1, 1, 2).unwrap();
        let mut ray = Ray::new(Vec3::new(0.5, 1.0, 0.5), -Vec3::Y);
        assert!(matches!(accel.intersect(&mut ray), Err(AccelError::ArenaExhausted { .. })));
    }
}
