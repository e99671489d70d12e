mod accel_instance;
pub mod geometry;
pub mod primitives;
pub mod ray;
pub mod subdiv;
pub mod trees;

pub use accel_instance::{
    bvh4_bezier1, bvh4_subdiv, bvh4_triangle1, bvh4_triangle4, bvh8_triangle4, create_builder, AccelInstance,
    BvhAccel, IAccel, Intersect1Fn, IntersectNFn, Intersectors, Occluded1Fn, OccludedNFn,
};
