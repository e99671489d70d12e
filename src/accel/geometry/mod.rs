mod bezier_curves;
mod triangle_mesh;

pub use bezier_curves::BezierCurves;
pub use triangle_mesh::{clip_triangle_bounds, TriangleMesh};
