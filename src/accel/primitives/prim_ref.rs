use crate::utilities::BoundingBox;
use glam::Vec3;

/// Bounding box of one primitive together with the ids needed to find it again.
///
/// Builders shuffle these around freely; the geometry itself is only touched when leaves are filled.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PrimRef {
    pub bounds: BoundingBox,
    pub geom_id: u32,
    pub prim_id: u32,
}

impl Default for PrimRef {
    fn default() -> Self {
        Self {
            bounds: BoundingBox::EMPTY,
            geom_id: u32::MAX,
            prim_id: u32::MAX,
        }
    }
}

impl PrimRef {
    #[inline]
    pub fn new(bounds: BoundingBox, geom_id: u32, prim_id: u32) -> Self {
        Self {
            bounds,
            geom_id,
            prim_id,
        }
    }

    /// Twice the centroid of the bounds.
    #[inline(always)]
    pub fn center2(&self) -> Vec3 {
        self.bounds.center2()
    }
}

/// Geometry bounds and centroid bounds of a set of primitives.
/// Centroids are tracked doubled, see `PrimRef::center2`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CentGeomBBox {
    pub geom_bounds: BoundingBox,
    pub cent_bounds: BoundingBox,
}

impl Default for CentGeomBBox {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl CentGeomBBox {
    pub const EMPTY: Self = Self {
        geom_bounds: BoundingBox::EMPTY,
        cent_bounds: BoundingBox::EMPTY,
    };

    #[inline(always)]
    pub fn extend(&mut self, bounds: &BoundingBox) {
        self.geom_bounds.extend(bounds);
        self.cent_bounds.extend_point(bounds.center2());
    }

    #[inline(always)]
    pub fn merge(&mut self, other: &Self) {
        self.geom_bounds.extend(&other.geom_bounds);
        self.cent_bounds.extend(&other.cent_bounds);
    }
}

/// Primitive count plus bounds of a primitive range.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PrimInfo {
    pub count: usize,
    pub geom_bounds: BoundingBox,
    pub cent_bounds: BoundingBox,
}

impl PrimInfo {
    pub const EMPTY: Self = Self {
        count: 0,
        geom_bounds: BoundingBox::EMPTY,
        cent_bounds: BoundingBox::EMPTY,
    };

    /// Computes the info of a range by scanning it.
    pub fn from_prims(prims: &[PrimRef]) -> Self {
        let mut info = Self::EMPTY;
        for prim in prims {
            info.add(prim);
        }
        info
    }

    #[inline(always)]
    pub fn add(&mut self, prim: &PrimRef) {
        self.count += 1;
        self.geom_bounds.extend(&prim.bounds);
        self.cent_bounds.extend_point(prim.center2());
    }

    #[inline(always)]
    pub fn merge(&mut self, other: &Self) {
        self.count += other.count;
        self.geom_bounds.extend(&other.geom_bounds);
        self.cent_bounds.extend(&other.cent_bounds);
    }

    #[inline(always)]
    pub fn size(&self) -> usize {
        self.count
    }

    /// Half surface area of the geometry bounds, zero for an empty range.
    #[inline(always)]
    pub fn half_area(&self) -> f32 {
        self.geom_bounds.safe_half_area()
    }

    #[inline(always)]
    pub fn bounds(&self) -> CentGeomBBox {
        CentGeomBBox {
            geom_bounds: self.geom_bounds,
            cent_bounds: self.cent_bounds,
        }
    }
}
