use super::primitive_type::{IPrimitiveIntersector, IPrimitiveType};
use crate::accel::ray::{Ray, INVALID_ID};
use glam::Vec3;

/// Determinant magnitude below which a ray counts as parallel to the triangle.
const PARALLEL_EPSILON: f32 = 1e-12;

/// Möller–Trumbore ray/triangle test.
///
/// # Returns
/// Distance and barycentric `(u, v)` of the hit, if it lies inside the ray interval.
#[inline]
pub fn intersect_triangle(ray: &Ray, v0: Vec3, v1: Vec3, v2: Vec3) -> Option<(f32, f32, f32)> {
    let e1 = v1 - v0;
    let e2 = v2 - v0;
    let p = ray.direction.cross(e2);
    let determinant = e1.dot(p);
    if determinant.abs() < PARALLEL_EPSILON {
        return None;
    }
    let inverse_determinant = 1.0 / determinant;
    let s = ray.origin - v0;
    let u = s.dot(p) * inverse_determinant;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = ray.direction.dot(q) * inverse_determinant;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inverse_determinant;
    if t < ray.t_near || t >= ray.t_far {
        return None;
    }
    Some((t, u, v))
}

/// One triangle per block.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Triangle1 {
    pub v0: Vec3,
    pub v1: Vec3,
    pub v2: Vec3,
    pub geom_id: u32,
    pub prim_id: u32,
}

impl Default for Triangle1 {
    fn default() -> Self {
        Self {
            v0: Vec3::ZERO,
            v1: Vec3::ZERO,
            v2: Vec3::ZERO,
            geom_id: INVALID_ID,
            prim_id: INVALID_ID,
        }
    }
}

impl Triangle1 {
    pub fn new(v0: Vec3, v1: Vec3, v2: Vec3, geom_id: u32, prim_id: u32) -> Self {
        Self {
            v0,
            v1,
            v2,
            geom_id,
            prim_id,
        }
    }
}

impl IPrimitiveType for Triangle1 {
    const NAME: &'static str = "triangle1";
    const BLOCK_SIZE: usize = 1;

    #[inline(always)]
    fn primitive_count(&self) -> usize {
        usize::from(self.prim_id != INVALID_ID)
    }
}

impl IPrimitiveIntersector for Triangle1 {
    fn intersect(&self, ray: &mut Ray) -> bool {
        if self.prim_id == INVALID_ID {
            return false;
        }
        match intersect_triangle(ray, self.v0, self.v1, self.v2) {
            Some((t, u, v)) => ray.update(t, u, v, self.geom_id, self.prim_id),
            None => false,
        }
    }

    fn occluded(&self, ray: &Ray) -> bool {
        self.prim_id != INVALID_ID && intersect_triangle(ray, self.v0, self.v1, self.v2).is_some()
    }
}

/// Four triangles per block, stored lane by lane.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Triangle4 {
    pub v0: [Vec3; 4],
    pub v1: [Vec3; 4],
    pub v2: [Vec3; 4],
    pub geom_ids: [u32; 4],
    pub prim_ids: [u32; 4],
}

impl Default for Triangle4 {
    fn default() -> Self {
        Self {
            v0: [Vec3::ZERO; 4],
            v1: [Vec3::ZERO; 4],
            v2: [Vec3::ZERO; 4],
            geom_ids: [INVALID_ID; 4],
            prim_ids: [INVALID_ID; 4],
        }
    }
}

impl Triangle4 {
    /// Writes one lane.
    #[inline]
    pub fn set(&mut self, lane: usize, v0: Vec3, v1: Vec3, v2: Vec3, geom_id: u32, prim_id: u32) {
        self.v0[lane] = v0;
        self.v1[lane] = v1;
        self.v2[lane] = v2;
        self.geom_ids[lane] = geom_id;
        self.prim_ids[lane] = prim_id;
    }

    #[inline(always)]
    pub fn valid(&self, lane: usize) -> bool {
        self.prim_ids[lane] != INVALID_ID
    }
}

impl IPrimitiveType for Triangle4 {
    const NAME: &'static str = "triangle4";
    const BLOCK_SIZE: usize = 4;

    #[inline(always)]
    fn primitive_count(&self) -> usize {
        (0..4).filter(|&lane| self.valid(lane)).count()
    }
}

impl IPrimitiveIntersector for Triangle4 {
    fn intersect(&self, ray: &mut Ray) -> bool {
        let mut hit = false;
        for lane in 0..4 {
            if !self.valid(lane) {
                continue;
            }
            if let Some((t, u, v)) = intersect_triangle(ray, self.v0[lane], self.v1[lane], self.v2[lane]) {
                hit |= ray.update(t, u, v, self.geom_ids[lane], self.prim_ids[lane]);
            }
        }
        hit
    }

    fn occluded(&self, ray: &Ray) -> bool {
        (0..4).any(|lane| {
            self.valid(lane)
                && intersect_triangle(ray, self.v0[lane], self.v1[lane], self.v2[lane]).is_some()
        })
    }
}
