use super::primitive_type::IPrimitiveType;
use crate::accel::ray::INVALID_ID;
use glam::Vec4;

/// One cubic Bézier curve segment per block. Each control point carries its radius in `w`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bezier1 {
    pub p0: Vec4,
    pub p1: Vec4,
    pub p2: Vec4,
    pub p3: Vec4,
    pub geom_id: u32,
    pub prim_id: u32,
}

impl Default for Bezier1 {
    fn default() -> Self {
        Self {
            p0: Vec4::ZERO,
            p1: Vec4::ZERO,
            p2: Vec4::ZERO,
            p3: Vec4::ZERO,
            geom_id: INVALID_ID,
            prim_id: INVALID_ID,
        }
    }
}

impl IPrimitiveType for Bezier1 {
    const NAME: &'static str = "bezier1";
    const BLOCK_SIZE: usize = 1;

    #[inline(always)]
    fn primitive_count(&self) -> usize {
        usize::from(self.prim_id != INVALID_ID)
    }
}
