mod bezier1;
mod prim_ref;
mod primitive_type;
mod triangle;

pub use bezier1::Bezier1;
pub use prim_ref::{CentGeomBBox, PrimInfo, PrimRef};
pub use primitive_type::{IGeometryProvider, IPrimitiveIntersector, IPrimitiveType};
pub use triangle::{intersect_triangle, Triangle1, Triangle4};
