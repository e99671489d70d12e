use super::prim_ref::PrimRef;
use crate::accel::ray::Ray;
use crate::utilities::BoundingBox;
use std::fmt::Debug;

/// Leaf block layout of a primitive representation.
///
/// A leaf is a run of consecutive blocks; each block packs up to `BLOCK_SIZE` primitives.
/// Unused lanes of a block stay at their `Default` value.
pub trait IPrimitiveType: Clone + Default + Send + Sync + Debug + 'static {
    /// Name used in logs and registry lookups.
    const NAME: &'static str;
    /// Primitives per block.
    const BLOCK_SIZE: usize;

    /// Number of blocks needed for `count` primitives.
    #[inline(always)]
    fn blocks(count: usize) -> usize {
        count.div_ceil(Self::BLOCK_SIZE)
    }

    /// Number of occupied lanes in this block.
    fn primitive_count(&self) -> usize;
}

/// Ray queries against one leaf block.
pub trait IPrimitiveIntersector: IPrimitiveType {
    /// Intersects every primitive of the block, recording the closest hit in `ray`. Returns true on any hit.
    fn intersect(&self, ray: &mut Ray) -> bool;

    /// Returns true if any primitive of the block blocks the ray interval.
    fn occluded(&self, ray: &Ray) -> bool;
}

/// Source of primitives for a builder.
///
/// The builders only see `PrimRef`s. The provider turns them into leaf blocks, re-reads them
/// for refitting, and clips them for spatial splits.
pub trait IGeometryProvider<P: IPrimitiveType>: Send + Sync {
    /// Number of primitive slots, including degenerate ones.
    fn primitive_count(&self) -> usize;

    /// Gets the reference for primitive `prim_id`, or `None` if it is degenerate and must be skipped.
    fn prim_ref(&self, prim_id: usize) -> Option<PrimRef>;

    /// Packs `prims` into `blocks`. `blocks.len()` equals `P::blocks(prims.len())`.
    fn fill_leaf(&self, prims: &[PrimRef], blocks: &mut [P]);

    /// Reloads the primitives of a leaf from the current geometry and returns their new bounds.
    fn update_leaf(&self, blocks: &mut [P]) -> BoundingBox;

    /// Clips a primitive against the plane `axis = position`.
    ///
    /// The default only clips the bounding box. Providers that know the real shape override it
    /// to return tighter bounds for each side.
    fn split_primitive(&self, prim: &PrimRef, dim: usize, position: f32) -> (PrimRef, PrimRef) {
        let (left, right) = prim.bounds.split(dim, position);
        (
            PrimRef::new(left, prim.geom_id, prim.prim_id),
            PrimRef::new(right, prim.geom_id, prim.prim_id),
        )
    }

    /// Gathers the references of every non-degenerate primitive.
    fn create_prim_refs(&self) -> Vec<PrimRef> {
        (0..self.primitive_count())
            .filter_map(|prim_id| self.prim_ref(prim_id))
            .collect()
    }
}
