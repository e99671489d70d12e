use crate::utilities::BoundingBox;
use glam::Vec3;

/// Uniform cubic B-spline basis at `t`.
#[inline(always)]
fn bspline_basis(t: f32) -> [f32; 4] {
    let s = 1.0 - t;
    let t2 = t * t;
    let t3 = t2 * t;
    [
        s * s * s / 6.0,
        (3.0 * t3 - 6.0 * t2 + 4.0) / 6.0,
        (-3.0 * t3 + 3.0 * t2 + 3.0 * t + 1.0) / 6.0,
        t3 / 6.0,
    ]
}

/// Bicubic uniform B-spline patch over a 4x4 grid of control points, stored row by row along v.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BSplinePatch {
    pub points: [[Vec3; 4]; 4],
}

impl BSplinePatch {
    pub fn new(points: [[Vec3; 4]; 4]) -> Self {
        Self { points }
    }

    pub fn eval(&self, u: f32, v: f32) -> Vec3 {
        let bu = bspline_basis(u);
        let bv = bspline_basis(v);
        let mut point = Vec3::ZERO;
        for (row, weight_v) in self.points.iter().zip(bv) {
            let mut row_point = Vec3::ZERO;
            for (control, weight_u) in row.iter().zip(bu) {
                row_point += *control * weight_u;
            }
            point += row_point * weight_v;
        }
        point
    }

    /// Bounds of the control points, which contain the whole surface.
    pub fn bounds(&self) -> BoundingBox {
        let mut bounds = BoundingBox::EMPTY;
        for &point in self.points.iter().flatten() {
            bounds.extend_point(point);
        }
        bounds
    }
}

/// Bilinear patch through four corners, counter-clockwise from `(0, 0)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BilinearPatch {
    pub corners: [Vec3; 4],
}

impl BilinearPatch {
    pub fn new(v00: Vec3, v10: Vec3, v11: Vec3, v01: Vec3) -> Self {
        Self {
            corners: [v00, v10, v11, v01],
        }
    }

    #[inline]
    pub fn eval(&self, u: f32, v: f32) -> Vec3 {
        let [v00, v10, v11, v01] = self.corners;
        v00.lerp(v10, u).lerp(v01.lerp(v11, u), v)
    }

    pub fn bounds(&self) -> BoundingBox {
        BoundingBox::from_points(&self.corners)
    }
}

/// Cubic Bernstein basis at `t`.
#[inline(always)]
fn bezier_basis(t: f32) -> [f32; 4] {
    let s = 1.0 - t;
    [s * s * s, 3.0 * t * s * s, 3.0 * t * t * s, t * t * t]
}

/// Blends the two face points of one interior corner. `du` and `dv` are the parametric distances
/// from the patch corner along u and v. At the corner itself the midpoint is used; its basis weight
/// is zero there.
#[inline(always)]
fn blend_face_points(face_points: &[Vec3; 2], du: f32, dv: f32) -> Vec3 {
    let sum = du + dv;
    if sum <= 0.0 {
        return (face_points[0] + face_points[1]) * 0.5;
    }
    (face_points[0] * du + face_points[1] * dv) / sum
}

/// Gregory patch around an extraordinary vertex: a bicubic Bezier patch whose four interior
/// control points are each split into two face points, blended rationally by position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GregoryPatch {
    /// Bezier control grid, row by row along v. The interior points `[1..3][1..3]` are replaced by `face_points`.
    pub points: [[Vec3; 4]; 4],
    /// Face points of the interior corners, counter-clockwise from `(0, 0)`. `[k][0]` shapes the
    /// tangents across the nearest edge of constant v, `[k][1]` across the nearest edge of constant u.
    pub face_points: [[Vec3; 2]; 4],
}

impl GregoryPatch {
    pub fn new(points: [[Vec3; 4]; 4], face_points: [[Vec3; 2]; 4]) -> Self {
        Self { points, face_points }
    }

    /// Gregory patch that reduces to the bicubic Bezier patch over `points`.
    pub fn from_bezier(points: [[Vec3; 4]; 4]) -> Self {
        let interior = [points[1][1], points[1][2], points[2][2], points[2][1]];
        Self::new(points, interior.map(|point| [point, point]))
    }

    pub fn eval(&self, u: f32, v: f32) -> Vec3 {
        let mut grid = self.points;
        let [f0, f1, f2, f3] = &self.face_points;
        grid[1][1] = blend_face_points(f0, u, v);
        grid[1][2] = blend_face_points(f1, 1.0 - u, v);
        grid[2][2] = blend_face_points(f2, 1.0 - u, 1.0 - v);
        grid[2][1] = blend_face_points(f3, u, 1.0 - v);

        let bu = bezier_basis(u);
        let bv = bezier_basis(v);
        let mut point = Vec3::ZERO;
        for (row, weight_v) in grid.iter().zip(bv) {
            let mut row_point = Vec3::ZERO;
            for (control, weight_u) in row.iter().zip(bu) {
                row_point += *control * weight_u;
            }
            point += row_point * weight_v;
        }
        point
    }

    /// Bounds of the boundary control points and the face points. Every blended interior point
    /// lies between its two face points, so the surface stays inside.
    pub fn bounds(&self) -> BoundingBox {
        let mut bounds = BoundingBox::EMPTY;
        for (row, points) in self.points.iter().enumerate() {
            for (column, &point) in points.iter().enumerate() {
                let interior = (1..3).contains(&row) && (1..3).contains(&column);
                if !interior {
                    bounds.extend_point(point);
                }
            }
        }
        for &point in self.face_points.iter().flatten() {
            bounds.extend_point(point);
        }
        bounds
    }
}

/// Surface patch evaluated over `[0, 1]^2`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Patch {
    BSpline(BSplinePatch),
    /// Irregular patch next to an extraordinary vertex.
    Gregory(GregoryPatch),
    Bilinear(BilinearPatch),
}

impl Patch {
    /// Surface point at `(u, v)`.
    #[inline]
    pub fn eval(&self, u: f32, v: f32) -> Vec3 {
        match self {
            Patch::BSpline(patch) => patch.eval(u, v),
            Patch::Gregory(patch) => patch.eval(u, v),
            Patch::Bilinear(patch) => patch.eval(u, v),
        }
    }

    /// Conservative bounds of the whole patch.
    pub fn bounds(&self) -> BoundingBox {
        match self {
            Patch::BSpline(patch) => patch.bounds(),
            Patch::Gregory(patch) => patch.bounds(),
            Patch::Bilinear(patch) => patch.bounds(),
        }
    }

    /// Surface points at the corners of the parameter rectangle, counter-clockwise from `(u0, v0)`.
    #[inline]
    pub fn quad_corners(&self, u0: f32, u1: f32, v0: f32, v1: f32) -> [Vec3; 4] {
        [self.eval(u0, v0), self.eval(u1, v0), self.eval(u1, v1), self.eval(u0, v1)]
    }

    /// Bounds of the quad spanned by the corner evaluations of the parameter rectangle.
    pub fn quad_bounds(&self, u0: f32, u1: f32, v0: f32, v1: f32) -> BoundingBox {
        BoundingBox::from_points(&self.quad_corners(u0, u1, v0, v1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Control grid of the plane `z = 0` with unit spacing.
    fn planar_grid() -> BSplinePatch {
        BSplinePatch::new(std::array::from_fn(|row| {
            std::array::from_fn(|column| Vec3::new(column as f32, row as f32, 0.0))
        }))
    }

    #[test]
    fn test_basis_partitions_unity() {
        for t in [0.0, 0.25, 0.5, 1.0] {
            let sum: f32 = bspline_basis(t).iter().sum();
            assert!((sum - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_planar_bspline_reproduces_the_plane() {
        let patch = planar_grid();
        // A linear control grid evaluates to the inner cell, offset by one control spacing.
        assert!((patch.eval(0.0, 0.0) - Vec3::new(1.0, 1.0, 0.0)).length() < 1e-5);
        assert!((patch.eval(1.0, 1.0) - Vec3::new(2.0, 2.0, 0.0)).length() < 1e-5);
        assert!((patch.eval(0.5, 0.25) - Vec3::new(1.5, 1.25, 0.0)).length() < 1e-5);
        assert!(patch.bounds().contains_box(&BoundingBox::from_point(patch.eval(0.3, 0.7))));
    }

    #[test]
    fn test_gregory_patch_interpolates_corners() {
        let points = std::array::from_fn(|row| {
            std::array::from_fn(|column| Vec3::new(column as f32, row as f32, ((row + column) % 2) as f32))
        });
        let bezier = GregoryPatch::from_bezier(points);
        assert_eq!(bezier.eval(0.0, 0.0), points[0][0]);
        assert!((bezier.eval(1.0, 1.0) - points[3][3]).length() < 1e-5);
        assert!((bezier.eval(1.0, 0.0) - points[0][3]).length() < 1e-5);

        // Pulling the face points apart bends the interior but keeps the corners.
        let mut face_points = bezier.face_points;
        face_points[0] = [points[1][1] + Vec3::Z, points[1][1] - Vec3::Z];
        let gregory = Patch::Gregory(GregoryPatch::new(points, face_points));
        assert_eq!(gregory.eval(0.0, 0.0), points[0][0]);
        assert!((gregory.eval(0.0, 1.0) - points[3][0]).length() < 1e-5);
        assert!((gregory.eval(0.25, 0.25) - bezier.eval(0.25, 0.25)).length() < 1e-5);
        assert!((gregory.eval(0.4, 0.1) - bezier.eval(0.4, 0.1)).length() > 1e-3);
        for (u, v) in [(0.1, 0.7), (0.5, 0.5), (0.9, 0.2)] {
            assert!(gregory.bounds().contains_box(&BoundingBox::from_point(gregory.eval(u, v))));
        }
    }

    #[test]
    fn test_bilinear_quad_bounds() {
        let patch = Patch::Bilinear(BilinearPatch::new(
            Vec3::ZERO,
            Vec3::new(2.0, 0.0, 0.0),
            Vec3::new(2.0, 2.0, 1.0),
            Vec3::new(0.0, 2.0, 0.0),
        ));
        assert_eq!(patch.eval(0.5, 0.0), Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(
            patch.quad_bounds(0.0, 0.5, 0.0, 0.5),
            BoundingBox::new(Vec3::ZERO, Vec3::new(1.0, 1.0, 0.25))
        );
        assert_eq!(patch.bounds().max, Vec3::new(2.0, 2.0, 1.0));
    }
}
