use super::build_settings::BuildSettings;
use crate::accel::primitives::{IGeometryProvider, IPrimitiveType, PrimInfo, PrimRef};
use crate::utilities::BoundingBox;
use glam::Vec3;

/// Number of bins per axis.
pub const NUM_SPATIAL_BINS: usize = 16;

/// Uniform planes over the geometry bounds of a range.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpatialMapping {
    pub offset: Vec3,
    pub scale: Vec3,
    pub bin_width: Vec3,
}

impl SpatialMapping {
    pub fn new(info: &PrimInfo) -> Self {
        let extent = info.geom_bounds.size();
        let valid = extent.cmpgt(Vec3::splat(1e-19));
        Self {
            offset: info.geom_bounds.min,
            scale: Vec3::select(valid, Vec3::splat(NUM_SPATIAL_BINS as f32) / extent, Vec3::ZERO),
            bin_width: extent / NUM_SPATIAL_BINS as f32,
        }
    }

    #[inline(always)]
    pub fn bin(&self, point: Vec3) -> [usize; 3] {
        let bins = ((point - self.offset) * self.scale).floor();
        let last = (NUM_SPATIAL_BINS - 1) as f32;
        [
            bins.x.clamp(0.0, last) as usize,
            bins.y.clamp(0.0, last) as usize,
            bins.z.clamp(0.0, last) as usize,
        ]
    }

    /// Position of the plane at the lower edge of bin `pos`.
    #[inline(always)]
    pub fn plane(&self, dim: usize, pos: usize) -> f32 {
        self.offset[dim] + pos as f32 * self.bin_width[dim]
    }

    #[inline(always)]
    pub fn invalid(&self, dim: usize) -> bool {
        self.scale[dim] == 0.0
    }
}

/// Split plane that may cut primitives in two.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpatialSplit {
    pub dim: usize,
    /// Bin index of the plane.
    pub pos: usize,
    pub plane: f32,
    pub num_left: usize,
    pub num_right: usize,
    pub sah: f32,
    pub mapping: SpatialMapping,
}

impl SpatialSplit {
    /// Primitives this split adds to the build.
    #[inline(always)]
    pub fn replications(&self, count: usize) -> usize {
        (self.num_left + self.num_right).saturating_sub(count)
    }
}

/// Per-bin clipped bounds, plus how many primitives start and end in each bin.
#[derive(Clone, Debug)]
pub struct SpatialBinner {
    bounds: [[BoundingBox; NUM_SPATIAL_BINS]; 3],
    begin: [[usize; NUM_SPATIAL_BINS]; 3],
    end: [[usize; NUM_SPATIAL_BINS]; 3],
}

impl Default for SpatialBinner {
    fn default() -> Self {
        Self {
            bounds: [[BoundingBox::EMPTY; NUM_SPATIAL_BINS]; 3],
            begin: [[0; NUM_SPATIAL_BINS]; 3],
            end: [[0; NUM_SPATIAL_BINS]; 3],
        }
    }
}

impl SpatialBinner {
    /// Clips every primitive into the bins it overlaps.
    pub fn bin<P, G>(&mut self, prims: &[PrimRef], mapping: &SpatialMapping, provider: &G)
    where
        P: IPrimitiveType,
        G: IGeometryProvider<P> + ?Sized,
    {
        for prim in prims {
            let first = mapping.bin(prim.bounds.min);
            let last = mapping.bin(prim.bounds.max);
            for dim in 0..3 {
                if mapping.invalid(dim) {
                    continue;
                }
                let (first, last) = (first[dim], last[dim]);
                self.begin[dim][first] += 1;
                self.end[dim][last] += 1;
                if first == last {
                    self.bounds[dim][first].extend(&prim.bounds);
                    continue;
                }
                let mut rest = *prim;
                for bin in first..last {
                    let (left, right) = provider.split_primitive(&rest, dim, mapping.plane(dim, bin + 1));
                    self.bounds[dim][bin].extend(&left.bounds);
                    rest = right;
                }
                self.bounds[dim][last].extend(&rest.bounds);
            }
        }
    }

    /// Finds the cheapest plane, or `None` if no plane leaves primitives on both sides.
    pub fn best(&self, mapping: &SpatialMapping, settings: &BuildSettings) -> Option<SpatialSplit> {
        let mut best: Option<SpatialSplit> = None;
        for dim in 0..3 {
            if mapping.invalid(dim) {
                continue;
            }
            let mut right_areas = [0.0f32; NUM_SPATIAL_BINS];
            let mut right_counts = [0usize; NUM_SPATIAL_BINS];
            let mut bounds = BoundingBox::EMPTY;
            let mut count = 0;
            for bin in (1..NUM_SPATIAL_BINS).rev() {
                count += self.end[dim][bin];
                bounds.extend(&self.bounds[dim][bin]);
                right_counts[bin] = count;
                right_areas[bin] = bounds.safe_half_area();
            }

            let mut left_bounds = BoundingBox::EMPTY;
            let mut left_count = 0;
            for bin in 1..NUM_SPATIAL_BINS {
                left_count += self.begin[dim][bin - 1];
                left_bounds.extend(&self.bounds[dim][bin - 1]);
                let right_count = right_counts[bin];
                if left_count == 0 || right_count == 0 {
                    continue;
                }
                let sah = left_bounds.safe_half_area() * settings.blocks(left_count) as f32
                    + right_areas[bin] * settings.blocks(right_count) as f32;
                if best.map_or(true, |best| sah < best.sah) {
                    best = Some(SpatialSplit {
                        dim,
                        pos: bin,
                        plane: mapping.plane(dim, bin),
                        num_left: left_count,
                        num_right: right_count,
                        sah,
                        mapping: *mapping,
                    });
                }
            }
        }
        best
    }
}

/// Bins a range spatially and returns its best plane.
pub fn find_spatial_split<P, G>(
    prims: &[PrimRef],
    info: &PrimInfo,
    settings: &BuildSettings,
    provider: &G,
) -> Option<SpatialSplit>
where
    P: IPrimitiveType,
    G: IGeometryProvider<P> + ?Sized,
{
    let mapping = SpatialMapping::new(info);
    let mut binner = SpatialBinner::default();
    binner.bin(prims, &mapping, provider);
    binner.best(&mapping, settings)
}

/// Distributes primitives to the two sides of the plane, clipping those that straddle it.
///
/// # Returns
/// Left and right lists with their infos. A side can come back empty if clipping removed
/// every primitive the binning had counted for it.
pub fn partition_spatial<P, G>(
    prims: &[PrimRef],
    split: &SpatialSplit,
    provider: &G,
) -> ((Vec<PrimRef>, PrimInfo), (Vec<PrimRef>, PrimInfo))
where
    P: IPrimitiveType,
    G: IGeometryProvider<P> + ?Sized,
{
    let mut left = Vec::with_capacity(split.num_left);
    let mut right = Vec::with_capacity(split.num_right);
    let mut left_info = PrimInfo::EMPTY;
    let mut right_info = PrimInfo::EMPTY;
    for prim in prims {
        let first = split.mapping.bin(prim.bounds.min)[split.dim];
        let last = split.mapping.bin(prim.bounds.max)[split.dim];
        if last < split.pos {
            left_info.add(prim);
            left.push(*prim);
        } else if first >= split.pos {
            right_info.add(prim);
            right.push(*prim);
        } else {
            let (left_part, right_part) = provider.split_primitive(prim, split.dim, split.plane);
            if !left_part.bounds.is_empty() {
                left_info.add(&left_part);
                left.push(left_part);
            }
            if !right_part.bounds.is_empty() {
                right_info.add(&right_part);
                right.push(right_part);
            }
        }
    }
    ((left, left_info), (right, right_info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::geometry::TriangleMesh;
    use crate::accel::primitives::Triangle1;

    /// Long diagonal slivers overlap everywhere when only centroids are partitioned.
    fn sliver_mesh() -> TriangleMesh {
        let corners: Vec<[Vec3; 3]> = (0..8)
            .map(|i| {
                let y = i as f32 * 0.1;
                [
                    Vec3::new(0.0, y, 0.0),
                    Vec3::new(16.0, y + 0.05, 0.0),
                    Vec3::new(16.0, y, 0.05),
                ]
            })
            .chain((0..8).map(|i| {
                let x = i as f32 * 2.0;
                [
                    Vec3::new(x, 0.0, 0.0),
                    Vec3::new(x + 1.0, 0.0, 0.0),
                    Vec3::new(x, 1.0, 0.0),
                ]
            }))
            .collect();
        TriangleMesh::from_soup(0, &corners)
    }

    #[test]
    fn test_counts_include_replicas() {
        let mesh = sliver_mesh();
        let prims = IGeometryProvider::<Triangle1>::create_prim_refs(&mesh);
        let info = PrimInfo::from_prims(&prims);
        let split = find_spatial_split::<Triangle1, _>(&prims, &info, &BuildSettings::default(), &mesh).unwrap();
        assert!(split.num_left + split.num_right >= prims.len());

        let ((left, left_info), (right, right_info)) = partition_spatial::<Triangle1, _>(&prims, &split, &mesh);
        assert_eq!(left.len(), left_info.count);
        assert_eq!(right.len(), right_info.count);
        assert!(left.len() + right.len() >= prims.len());
        assert!(left.len() + right.len() <= prims.len() + split.replications(prims.len()));
        assert!(left_info.geom_bounds.max[split.dim] <= split.plane + 1e-5);
        assert!(right_info.geom_bounds.min[split.dim] >= split.plane - 1e-5);
    }

    #[test]
    fn test_point_range_has_no_plane() {
        let mesh = TriangleMesh::default();
        let prims = vec![PrimRef::new(BoundingBox::from_point(Vec3::ONE), 0, 0); 4];
        let info = PrimInfo::from_prims(&prims);
        assert!(find_spatial_split::<Triangle1, _>(&prims, &info, &BuildSettings::default(), &mesh).is_none());
    }
}
