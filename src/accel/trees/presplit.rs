use super::build_settings::BuildSettings;
use crate::accel::primitives::{IGeometryProvider, IPrimitiveType, PrimRef};

/// Splits primitives whose bounds are much larger than average before binning.
///
/// Large primitives are cut in the middle of their longest axis, repeatedly, up to
/// `presplit_max_levels` times each. Every cut adds one reference, and at most
/// `replication_factor * prims.len()` references are added overall.
pub fn presplit<P, G>(prims: Vec<PrimRef>, provider: &G, settings: &BuildSettings) -> Vec<PrimRef>
where
    P: IPrimitiveType,
    G: IGeometryProvider<P> + ?Sized,
{
    if prims.is_empty() {
        return prims;
    }
    let mut budget = (prims.len() as f32 * settings.replication_factor) as usize;
    let average_area =
        prims.iter().map(|prim| prim.bounds.safe_half_area()).sum::<f32>() / prims.len() as f32;
    let threshold = average_area * settings.presplit_area_factor;

    let mut result = Vec::with_capacity(prims.len() + budget);
    let mut stack = Vec::new();
    for prim in prims {
        stack.push((prim, 0usize));
        while let Some((prim, level)) = stack.pop() {
            if budget > 0
                && level < settings.presplit_max_levels
                && prim.bounds.safe_half_area() > threshold
            {
                let dim = prim.bounds.max_dim();
                let position = prim.bounds.center()[dim];
                let (left, right) = provider.split_primitive(&prim, dim, position);
                if !left.bounds.is_empty() && !right.bounds.is_empty() {
                    budget -= 1;
                    stack.push((right, level + 1));
                    stack.push((left, level + 1));
                    continue;
                }
            }
            result.push(prim);
        }
    }
    log::trace!("presplit produced {} references", result.len());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::geometry::TriangleMesh;
    use crate::accel::primitives::{PrimInfo, Triangle4};
    use glam::Vec3;

    #[test]
    fn test_only_large_primitives_are_split() {
        let mut corners: Vec<[Vec3; 3]> = (0..20)
            .map(|i| {
                let x = i as f32;
                [Vec3::new(x, 0.0, 0.0), Vec3::new(x + 0.1, 0.0, 0.0), Vec3::new(x, 0.1, 0.1)]
            })
            .collect();
        corners.push([Vec3::ZERO, Vec3::new(20.0, 0.0, 0.0), Vec3::new(0.0, 20.0, 20.0)]);
        let mesh = TriangleMesh::from_soup(0, &corners);
        let prims = IGeometryProvider::<Triangle4>::create_prim_refs(&mesh);
        let before = PrimInfo::from_prims(&prims);
        let settings = BuildSettings::default();
        let split = presplit::<Triangle4, _>(prims, &mesh, &settings);

        let big = split.iter().filter(|prim| prim.prim_id == 20).count();
        assert!(big > 1 && big <= 1 << settings.presplit_max_levels);
        assert_eq!(split.iter().filter(|prim| prim.prim_id < 20).count(), 20);
        let after = PrimInfo::from_prims(&split);
        assert!(before.geom_bounds.contains_box(&after.geom_bounds));
    }

    #[test]
    fn test_zero_budget_keeps_input() {
        let mesh = TriangleMesh::from_soup(
            0,
            &[[Vec3::ZERO, Vec3::new(100.0, 0.0, 0.0), Vec3::Y], [Vec3::ZERO, Vec3::X, Vec3::Y]],
        );
        let prims = IGeometryProvider::<Triangle4>::create_prim_refs(&mesh);
        let settings = BuildSettings {
            replication_factor: 0.0,
            ..BuildSettings::default()
        };
        assert_eq!(presplit::<Triangle4, _>(prims.clone(), &mesh, &settings), prims);
    }
}
