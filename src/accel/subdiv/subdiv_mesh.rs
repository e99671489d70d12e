use super::patch::{BilinearPatch, Patch};
use crate::accel::primitives::{IGeometryProvider, IPrimitiveType, PrimRef};
use crate::accel::ray::INVALID_ID;
use crate::utilities::BoundingBox;
use glam::Vec3;

/// Placeholder leaf of the patch hierarchy. The quad tree of the patch is built on first touch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PatchLeaf {
    pub geom_id: u32,
    pub prim_id: u32,
}

impl Default for PatchLeaf {
    fn default() -> Self {
        Self {
            geom_id: INVALID_ID,
            prim_id: INVALID_ID,
        }
    }
}

impl IPrimitiveType for PatchLeaf {
    const NAME: &'static str = "subdiv_patch";
    const BLOCK_SIZE: usize = 1;

    #[inline(always)]
    fn primitive_count(&self) -> usize {
        usize::from(self.prim_id != INVALID_ID)
    }
}

/// Set of surface patches.
#[derive(Clone, Debug, Default)]
pub struct SubdivMesh {
    pub geom_id: u32,
    pub patches: Vec<Patch>,
}

impl SubdivMesh {
    pub fn new(geom_id: u32, patches: Vec<Patch>) -> Self {
        Self { geom_id, patches }
    }

    /// Bilinear patches over the quads of a `columns` x `rows` height field in the xz plane.
    pub fn height_field(geom_id: u32, columns: usize, rows: usize, height: impl Fn(f32, f32) -> f32) -> Self {
        let point = |x: usize, z: usize| {
            let (x, z) = (x as f32, z as f32);
            Vec3::new(x, height(x, z), z)
        };
        let mut patches = Vec::with_capacity(columns * rows);
        for z in 0..rows {
            for x in 0..columns {
                patches.push(Patch::Bilinear(BilinearPatch::new(
                    point(x, z),
                    point(x + 1, z),
                    point(x + 1, z + 1),
                    point(x, z + 1),
                )));
            }
        }
        Self::new(geom_id, patches)
    }

    #[inline(always)]
    pub fn patch(&self, prim_id: usize) -> Option<&Patch> {
        self.patches.get(prim_id)
    }
}

impl IGeometryProvider<PatchLeaf> for SubdivMesh {
    fn primitive_count(&self) -> usize {
        self.patches.len()
    }

    fn prim_ref(&self, prim_id: usize) -> Option<PrimRef> {
        let bounds = self.patches.get(prim_id)?.bounds();
        if bounds.is_empty() || !bounds.min.is_finite() || !bounds.max.is_finite() {
            return None;
        }
        Some(PrimRef::new(bounds, self.geom_id, prim_id as u32))
    }

    fn fill_leaf(&self, prims: &[PrimRef], blocks: &mut [PatchLeaf]) {
        for (block, prim) in blocks.iter_mut().zip(prims) {
            *block = PatchLeaf {
                geom_id: prim.geom_id,
                prim_id: prim.prim_id,
            };
        }
    }

    fn update_leaf(&self, blocks: &mut [PatchLeaf]) -> BoundingBox {
        let mut bounds = BoundingBox::EMPTY;
        for block in blocks.iter().filter(|block| block.prim_id != INVALID_ID) {
            if let Some(patch) = self.patch(block.prim_id as usize) {
                bounds.extend(&patch.bounds());
            }
        }
        bounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_height_field_patches() {
        let mesh = SubdivMesh::height_field(3, 4, 2, |x, _| x);
        assert_eq!(IGeometryProvider::<PatchLeaf>::primitive_count(&mesh), 8);
        let prim = IGeometryProvider::<PatchLeaf>::prim_ref(&mesh, 5).unwrap();
        assert_eq!(prim.bounds, BoundingBox::new(Vec3::new(1.0, 1.0, 1.0), Vec3::new(2.0, 2.0, 2.0)));
        assert_eq!((prim.geom_id, prim.prim_id), (3, 5));

        let mut blocks = [PatchLeaf::default(); 2];
        mesh.fill_leaf(&[prim], &mut blocks[..1]);
        assert_eq!(blocks[0].primitive_count(), 1);
        assert_eq!(blocks[1].primitive_count(), 0);
        assert_eq!(mesh.update_leaf(&mut blocks), prim.bounds);
    }
}
