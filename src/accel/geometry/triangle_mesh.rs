use crate::accel::primitives::{IGeometryProvider, PrimRef, Triangle1, Triangle4};
use crate::utilities::BoundingBox;
use glam::Vec3;

/// Indexed triangle mesh.
#[derive(Clone, Debug, Default)]
pub struct TriangleMesh {
    pub geom_id: u32,
    pub vertices: Vec<Vec3>,
    pub triangles: Vec<[u32; 3]>,
}

impl TriangleMesh {
    pub fn new(geom_id: u32, vertices: Vec<Vec3>, triangles: Vec<[u32; 3]>) -> Self {
        Self {
            geom_id,
            vertices,
            triangles,
        }
    }

    /// Builds a mesh from a triangle soup, three vertices per triangle.
    pub fn from_soup(geom_id: u32, corners: &[[Vec3; 3]]) -> Self {
        let vertices = corners.iter().flatten().copied().collect();
        let triangles = (0..corners.len() as u32)
            .map(|i| [3 * i, 3 * i + 1, 3 * i + 2])
            .collect();
        Self::new(geom_id, vertices, triangles)
    }

    /// Gets the corners of a triangle, or `None` if an index is out of range.
    #[inline]
    pub fn triangle(&self, prim_id: usize) -> Option<[Vec3; 3]> {
        let [a, b, c] = *self.triangles.get(prim_id)?;
        Some([
            *self.vertices.get(a as usize)?,
            *self.vertices.get(b as usize)?,
            *self.vertices.get(c as usize)?,
        ])
    }

    /// Loads a triangle for a leaf. Degenerate triangles never make it into a leaf, so the
    /// lookup only fails if the mesh shrank after the build; such a triangle collapses to the origin.
    #[inline]
    fn leaf_triangle(&self, prim_id: u32) -> [Vec3; 3] {
        self.triangle(prim_id as usize).unwrap_or([Vec3::ZERO; 3])
    }
}

/// Clips a triangle against `axis = position` and returns the bounds of the parts on each side.
pub fn clip_triangle_bounds(corners: &[Vec3; 3], dim: usize, position: f32) -> (BoundingBox, BoundingBox) {
    let mut left = BoundingBox::EMPTY;
    let mut right = BoundingBox::EMPTY;
    for i in 0..3 {
        let a = corners[i];
        let b = corners[(i + 1) % 3];
        let (da, db) = (a[dim], b[dim]);
        if da <= position {
            left.extend_point(a);
        }
        if da >= position {
            right.extend_point(a);
        }
        if (da < position && db > position) || (da > position && db < position) {
            let t = (position - da) / (db - da);
            let mut crossing = a.lerp(b, t);
            crossing[dim] = position;
            left.extend_point(crossing);
            right.extend_point(crossing);
        }
    }
    (left, right)
}

fn is_degenerate(corners: &[Vec3; 3]) -> bool {
    corners.iter().any(|corner| !corner.is_finite())
        || (corners[1] - corners[0])
            .cross(corners[2] - corners[0])
            .length_squared()
            == 0.0
}

impl TriangleMesh {
    fn mesh_prim_ref(&self, prim_id: usize) -> Option<PrimRef> {
        let corners = self.triangle(prim_id)?;
        if is_degenerate(&corners) {
            return None;
        }
        Some(PrimRef::new(
            BoundingBox::from_points(&corners),
            self.geom_id,
            prim_id as u32,
        ))
    }

    fn mesh_split(&self, prim: &PrimRef, dim: usize, position: f32) -> (PrimRef, PrimRef) {
        let (left, right) = match self.triangle(prim.prim_id as usize) {
            Some(corners) => {
                let (left, right) = clip_triangle_bounds(&corners, dim, position);
                // An already clipped reference covers only part of the triangle.
                (
                    BoundingBox::intersection(&left, &prim.bounds),
                    BoundingBox::intersection(&right, &prim.bounds),
                )
            }
            None => prim.bounds.split(dim, position),
        };
        (
            PrimRef::new(left, prim.geom_id, prim.prim_id),
            PrimRef::new(right, prim.geom_id, prim.prim_id),
        )
    }
}

impl IGeometryProvider<Triangle1> for TriangleMesh {
    fn primitive_count(&self) -> usize {
        self.triangles.len()
    }

    fn prim_ref(&self, prim_id: usize) -> Option<PrimRef> {
        self.mesh_prim_ref(prim_id)
    }

    fn fill_leaf(&self, prims: &[PrimRef], blocks: &mut [Triangle1]) {
        for (block, prim) in blocks.iter_mut().zip(prims) {
            let [v0, v1, v2] = self.leaf_triangle(prim.prim_id);
            *block = Triangle1::new(v0, v1, v2, prim.geom_id, prim.prim_id);
        }
    }

    fn update_leaf(&self, blocks: &mut [Triangle1]) -> BoundingBox {
        let mut bounds = BoundingBox::EMPTY;
        for block in blocks.iter_mut().filter(|block| block.prim_id != u32::MAX) {
            let [v0, v1, v2] = self.leaf_triangle(block.prim_id);
            block.v0 = v0;
            block.v1 = v1;
            block.v2 = v2;
            bounds.extend(&BoundingBox::from_points(&[v0, v1, v2]));
        }
        bounds
    }

    fn split_primitive(&self, prim: &PrimRef, dim: usize, position: f32) -> (PrimRef, PrimRef) {
        self.mesh_split(prim, dim, position)
    }
}

impl IGeometryProvider<Triangle4> for TriangleMesh {
    fn primitive_count(&self) -> usize {
        self.triangles.len()
    }

    fn prim_ref(&self, prim_id: usize) -> Option<PrimRef> {
        self.mesh_prim_ref(prim_id)
    }

    fn fill_leaf(&self, prims: &[PrimRef], blocks: &mut [Triangle4]) {
        for (block, chunk) in blocks.iter_mut().zip(prims.chunks(4)) {
            *block = Triangle4::default();
            for (lane, prim) in chunk.iter().enumerate() {
                let [v0, v1, v2] = self.leaf_triangle(prim.prim_id);
                block.set(lane, v0, v1, v2, prim.geom_id, prim.prim_id);
            }
        }
    }

    fn update_leaf(&self, blocks: &mut [Triangle4]) -> BoundingBox {
        let mut bounds = BoundingBox::EMPTY;
        for block in blocks.iter_mut() {
            for lane in 0..4 {
                if !block.valid(lane) {
                    continue;
                }
                let [v0, v1, v2] = self.leaf_triangle(block.prim_ids[lane]);
                let geom_id = block.geom_ids[lane];
                let prim_id = block.prim_ids[lane];
                block.set(lane, v0, v1, v2, geom_id, prim_id);
                bounds.extend(&BoundingBox::from_points(&[v0, v1, v2]));
            }
        }
        bounds
    }

    fn split_primitive(&self, prim: &PrimRef, dim: usize, position: f32) -> (PrimRef, PrimRef) {
        self.mesh_split(prim, dim, position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::primitives::IPrimitiveType;

    #[test]
    fn test_degenerate_triangles_are_skipped() {
        let mesh = TriangleMesh::new(
            0,
            vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::new(2.0, 0.0, 0.0), Vec3::NAN],
            vec![[0, 1, 2], [0, 1, 3], [0, 1, 4], [0, 1, 9]],
        );
        let refs = IGeometryProvider::<Triangle4>::create_prim_refs(&mesh);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].prim_id, 0);
    }

    #[test]
    fn test_clipping_is_tighter_than_box_split() {
        let corners = [Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0), Vec3::new(0.0, 2.0, 0.0)];
        let (left, right) = clip_triangle_bounds(&corners, 0, 1.0);
        assert_eq!(left, BoundingBox::new(Vec3::ZERO, Vec3::new(1.0, 2.0, 0.0)));
        // Right of x = 1 the triangle only reaches up to y = 1.
        assert_eq!(right, BoundingBox::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 1.0, 0.0)));
    }

    #[test]
    fn test_fill_and_update_triangle4() {
        let mut mesh = TriangleMesh::from_soup(
            3,
            &[
                [Vec3::ZERO, Vec3::X, Vec3::Y],
                [Vec3::Z, Vec3::Z + Vec3::X, Vec3::Z + Vec3::Y],
            ],
        );
        let refs = IGeometryProvider::<Triangle4>::create_prim_refs(&mesh);
        let mut blocks = vec![Triangle4::default(); Triangle4::blocks(refs.len())];
        IGeometryProvider::<Triangle4>::fill_leaf(&mesh, &refs, &mut blocks);
        assert_eq!(blocks[0].primitive_count(), 2);
        assert_eq!(blocks[0].geom_ids[1], 3);

        for vertex in mesh.vertices.iter_mut() {
            *vertex += Vec3::splat(1.0);
        }
        let bounds = IGeometryProvider::<Triangle4>::update_leaf(&mesh, &mut blocks);
        assert_eq!(bounds, BoundingBox::new(Vec3::splat(1.0), Vec3::splat(2.0)));
        assert_eq!(blocks[0].v0[0], Vec3::splat(1.0));
    }
}
