use crate::accel::primitives::{Bezier1, IGeometryProvider, PrimRef};
use crate::utilities::BoundingBox;
use glam::{Vec3, Vec4};

/// Set of cubic Bézier curves sharing one control point buffer.
/// Each curve starts at `curves[i]` and uses four consecutive control points.
#[derive(Clone, Debug, Default)]
pub struct BezierCurves {
    pub geom_id: u32,
    /// Control points with the radius in `w`.
    pub control_points: Vec<Vec4>,
    pub curves: Vec<u32>,
}

impl BezierCurves {
    pub fn new(geom_id: u32, control_points: Vec<Vec4>, curves: Vec<u32>) -> Self {
        Self {
            geom_id,
            control_points,
            curves,
        }
    }

    /// Gets the control points of a curve, or `None` if they run past the buffer.
    pub fn curve(&self, prim_id: usize) -> Option<[Vec4; 4]> {
        let first = *self.curves.get(prim_id)? as usize;
        let points = self.control_points.get(first..first + 4)?;
        Some([points[0], points[1], points[2], points[3]])
    }

    /// Bounds of the control hull grown by the largest radius. The curve lies inside its hull.
    pub fn curve_bounds(points: &[Vec4; 4]) -> BoundingBox {
        let mut bounds = BoundingBox::EMPTY;
        let mut radius = 0.0f32;
        for point in points {
            bounds.extend_point(point.truncate());
            radius = radius.max(point.w);
        }
        BoundingBox::new(bounds.min - Vec3::splat(radius), bounds.max + Vec3::splat(radius))
    }
}

impl IGeometryProvider<Bezier1> for BezierCurves {
    fn primitive_count(&self) -> usize {
        self.curves.len()
    }

    fn prim_ref(&self, prim_id: usize) -> Option<PrimRef> {
        let points = self.curve(prim_id)?;
        if points.iter().any(|point| !point.is_finite()) {
            return None;
        }
        Some(PrimRef::new(Self::curve_bounds(&points), self.geom_id, prim_id as u32))
    }

    fn fill_leaf(&self, prims: &[PrimRef], blocks: &mut [Bezier1]) {
        for (block, prim) in blocks.iter_mut().zip(prims) {
            let [p0, p1, p2, p3] = self.curve(prim.prim_id as usize).unwrap_or([Vec4::ZERO; 4]);
            *block = Bezier1 {
                p0,
                p1,
                p2,
                p3,
                geom_id: prim.geom_id,
                prim_id: prim.prim_id,
            };
        }
    }

    fn update_leaf(&self, blocks: &mut [Bezier1]) -> BoundingBox {
        let mut bounds = BoundingBox::EMPTY;
        for block in blocks.iter_mut().filter(|block| block.prim_id != u32::MAX) {
            if let Some(points) = self.curve(block.prim_id as usize) {
                [block.p0, block.p1, block.p2, block.p3] = points;
                bounds.extend(&Self::curve_bounds(&points));
            }
        }
        bounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_include_radius() {
        let curves = BezierCurves::new(
            1,
            vec![
                Vec4::new(0.0, 0.0, 0.0, 0.1),
                Vec4::new(1.0, 1.0, 0.0, 0.2),
                Vec4::new(2.0, 1.0, 0.0, 0.1),
                Vec4::new(3.0, 0.0, 0.0, 0.1),
            ],
            vec![0, 1],
        );
        assert_eq!(curves.primitive_count(), 2);
        let prim = curves.prim_ref(0).unwrap();
        assert!(prim.bounds.min.abs_diff_eq(Vec3::splat(-0.2), 1e-6));
        assert!(prim.bounds.max.abs_diff_eq(Vec3::new(3.2, 1.2, 0.2), 1e-6));
        assert!(curves.prim_ref(1).is_none());
    }
}
