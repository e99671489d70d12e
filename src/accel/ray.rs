use glam::Vec3;

/// Id stored in a ray that hit nothing.
pub const INVALID_ID: u32 = u32::MAX;

/// Single ray with its hit record.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
    pub t_near: f32,
    /// Far end of the interval. Shrinks to the closest hit found so far.
    pub t_far: f32,
    pub u: f32,
    pub v: f32,
    pub geom_id: u32,
    pub prim_id: u32,
}

impl Default for Ray {
    fn default() -> Self {
        Self::new(Vec3::ZERO, Vec3::Z)
    }
}

impl Ray {
    /// Creates a ray over `[0, inf)` with no hit.
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self::with_range(origin, direction, 0.0, f32::INFINITY)
    }

    pub fn with_range(origin: Vec3, direction: Vec3, t_near: f32, t_far: f32) -> Self {
        Self {
            origin,
            direction,
            t_near,
            t_far,
            u: 0.0,
            v: 0.0,
            geom_id: INVALID_ID,
            prim_id: INVALID_ID,
        }
    }

    #[inline(always)]
    pub fn hit(&self) -> bool {
        self.geom_id != INVALID_ID
    }

    /// Records a hit at distance `t` if it is inside the current interval.
    #[inline(always)]
    pub fn update(&mut self, t: f32, u: f32, v: f32, geom_id: u32, prim_id: u32) -> bool {
        if t < self.t_near || t >= self.t_far {
            return false;
        }
        self.t_far = t;
        self.u = u;
        self.v = v;
        self.geom_id = geom_id;
        self.prim_id = prim_id;
        true
    }
}

/// Reciprocal direction and origin-over-direction, precomputed for slab tests.
#[derive(Clone, Copy, Debug)]
pub struct RayInverse {
    pub origin: Vec3,
    pub inverse_direction: Vec3,
}

impl RayInverse {
    #[inline(always)]
    pub fn new(ray: &Ray) -> Self {
        Self {
            origin: ray.origin,
            inverse_direction: Vec3::new(
                safe_reciprocal(ray.direction.x),
                safe_reciprocal(ray.direction.y),
                safe_reciprocal(ray.direction.z),
            ),
        }
    }
}

#[inline(always)]
fn safe_reciprocal(value: f32) -> f32 {
    if value.abs() < 1e-18 {
        1e18f32.copysign(value)
    } else {
        1.0 / value
    }
}

/// `K` rays traced together. Inactive lanes are skipped by every traverser.
#[derive(Clone, Copy, Debug)]
pub struct RayPacket<const K: usize> {
    pub rays: [Ray; K],
    pub active: [bool; K],
}

impl<const K: usize> Default for RayPacket<K> {
    fn default() -> Self {
        Self {
            rays: [Ray::default(); K],
            active: [false; K],
        }
    }
}

impl<const K: usize> RayPacket<K> {
    /// Creates a packet with every lane active.
    pub fn new(rays: [Ray; K]) -> Self {
        Self {
            rays,
            active: [true; K],
        }
    }

    pub fn any_active(&self) -> bool {
        self.active.iter().any(|&active| active)
    }
}

pub type RayPacket4 = RayPacket<4>;
pub type RayPacket8 = RayPacket<8>;
pub type RayPacket16 = RayPacket<16>;
