use super::build_settings::BuildSettings;
use crate::accel::primitives::{PrimInfo, PrimRef};
use crate::utilities::BoundingBox;
use glam::Vec3;

/// Number of bins per axis.
pub const NUM_OBJECT_BINS: usize = 16;

/// Centroid extents at or below this are treated as flat and never split.
const MIN_CENTROID_EXTENT: f32 = 1e-19;

/// Affine map from doubled centroids to bin indices.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BinMapping {
    pub offset: Vec3,
    /// Zero on axes that cannot be split.
    pub scale: Vec3,
}

impl BinMapping {
    pub fn new(info: &PrimInfo) -> Self {
        let extent = info.cent_bounds.size();
        let scale = Vec3::select(
            extent.cmpgt(Vec3::splat(MIN_CENTROID_EXTENT)),
            Vec3::splat(0.99 * NUM_OBJECT_BINS as f32) / extent,
            Vec3::ZERO,
        );
        Self {
            offset: info.cent_bounds.min,
            scale,
        }
    }

    /// Bin of a doubled centroid on every axis.
    #[inline(always)]
    pub fn bin(&self, center2: Vec3) -> [usize; 3] {
        let bins = ((center2 - self.offset) * self.scale).floor();
        let last = (NUM_OBJECT_BINS - 1) as f32;
        [
            bins.x.clamp(0.0, last) as usize,
            bins.y.clamp(0.0, last) as usize,
            bins.z.clamp(0.0, last) as usize,
        ]
    }

    /// True if the axis has no centroid extent to split.
    #[inline(always)]
    pub fn invalid(&self, dim: usize) -> bool {
        self.scale[dim] == 0.0
    }
}

/// Object partition found by binning.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ObjectSplit {
    pub dim: usize,
    /// Primitives in bins below `pos` go left.
    pub pos: i32,
    pub num_left: usize,
    pub sah: f32,
    pub left_bounds: BoundingBox,
    pub right_bounds: BoundingBox,
    pub mapping: BinMapping,
}

impl ObjectSplit {
    #[inline(always)]
    pub fn is_left(&self, prim: &PrimRef) -> bool {
        (self.mapping.bin(prim.center2())[self.dim] as i32) < self.pos
    }

    /// Area the two sides share, relative to nothing. Zero if they are disjoint.
    #[inline]
    pub fn overlap_area(&self) -> f32 {
        BoundingBox::intersection(&self.left_bounds, &self.right_bounds).safe_half_area()
    }
}

/// Per-bin bounds and counts along all three axes.
#[derive(Clone, Debug)]
pub struct ObjectBinner {
    bounds: [[BoundingBox; NUM_OBJECT_BINS]; 3],
    counts: [[usize; NUM_OBJECT_BINS]; 3],
}

impl Default for ObjectBinner {
    fn default() -> Self {
        Self {
            bounds: [[BoundingBox::EMPTY; NUM_OBJECT_BINS]; 3],
            counts: [[0; NUM_OBJECT_BINS]; 3],
        }
    }
}

impl ObjectBinner {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Accumulates primitives into their bins.
    pub fn bin(&mut self, prims: &[PrimRef], mapping: &BinMapping) {
        for prim in prims {
            let bins = mapping.bin(prim.center2());
            for dim in 0..3 {
                self.counts[dim][bins[dim]] += 1;
                self.bounds[dim][bins[dim]].extend(&prim.bounds);
            }
        }
    }

    /// Adds the bins of a binner that scanned another part of the same range.
    pub fn merge(&mut self, other: &Self) {
        for dim in 0..3 {
            for bin in 0..NUM_OBJECT_BINS {
                self.counts[dim][bin] += other.counts[dim][bin];
                self.bounds[dim][bin].extend(&other.bounds[dim][bin]);
            }
        }
    }

    /// Finds the split position with the lowest cost, or `None` if no position beats leaving the range whole.
    ///
    /// # Arguments
    /// * `info` - Info of the binned range.
    /// * `mapping` - Mapping the bins were filled with.
    /// * `settings` - Provides the cost block size.
    pub fn best(&self, info: &PrimInfo, mapping: &BinMapping, settings: &BuildSettings) -> Option<ObjectSplit> {
        let mut best_sah = settings.blocks(info.count) as f32 * info.half_area();
        let mut best = None;
        for dim in 0..3 {
            if mapping.invalid(dim) {
                continue;
            }
            let mut right_areas = [0.0f32; NUM_OBJECT_BINS];
            let mut right_bounds = [BoundingBox::EMPTY; NUM_OBJECT_BINS];
            let mut right_counts = [0usize; NUM_OBJECT_BINS];
            let mut bounds = BoundingBox::EMPTY;
            let mut count = 0;
            for bin in (1..NUM_OBJECT_BINS).rev() {
                count += self.counts[dim][bin];
                bounds.extend(&self.bounds[dim][bin]);
                right_counts[bin] = count;
                right_bounds[bin] = bounds;
                right_areas[bin] = bounds.safe_half_area();
            }

            let mut left_bounds = BoundingBox::EMPTY;
            let mut left_count = 0;
            for bin in 1..NUM_OBJECT_BINS {
                left_count += self.counts[dim][bin - 1];
                left_bounds.extend(&self.bounds[dim][bin - 1]);
                let right_count = right_counts[bin];
                if left_count == 0 || right_count == 0 {
                    continue;
                }
                let sah = left_bounds.safe_half_area() * settings.blocks(left_count) as f32
                    + right_areas[bin] * settings.blocks(right_count) as f32;
                if sah < best_sah {
                    best_sah = sah;
                    best = Some(ObjectSplit {
                        dim,
                        pos: bin as i32,
                        num_left: left_count,
                        sah,
                        left_bounds,
                        right_bounds: right_bounds[bin],
                        mapping: *mapping,
                    });
                }
            }
        }
        best
    }
}

/// Bins a range and returns its best object split.
pub fn find_object_split(prims: &[PrimRef], info: &PrimInfo, settings: &BuildSettings) -> Option<ObjectSplit> {
    let mapping = BinMapping::new(info);
    let mut binner = ObjectBinner::default();
    binner.bin(prims, &mapping);
    binner.best(info, &mapping, settings)
}

/// Reorders a range in place so the primitives going left come first.
///
/// # Returns
/// Infos of the left and right parts, gathered during the same pass.
pub fn partition_object(prims: &mut [PrimRef], split: &ObjectSplit) -> (PrimInfo, PrimInfo) {
    let mut left = PrimInfo::EMPTY;
    let mut right = PrimInfo::EMPTY;
    let mut begin = 0;
    let mut end = prims.len();
    while begin < end {
        if split.is_left(&prims[begin]) {
            left.add(&prims[begin]);
            begin += 1;
        } else {
            end -= 1;
            prims.swap(begin, end);
            right.add(&prims[end]);
        }
    }
    debug_assert_eq!(left.count, split.num_left, "Partition must agree with binning.");
    (left, right)
}

/// Fallback when no split improves on a leaf: halves the range by index.
pub fn split_median(prims: &[PrimRef]) -> (usize, PrimInfo, PrimInfo) {
    let mid = prims.len() / 2;
    (
        mid,
        PrimInfo::from_prims(&prims[..mid]),
        PrimInfo::from_prims(&prims[mid..]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box_at(x: f32) -> PrimRef {
        PrimRef::new(
            BoundingBox::new(Vec3::new(x, 0.0, 0.0), Vec3::new(x + 1.0, 1.0, 1.0)),
            0,
            x as u32,
        )
    }

    #[test]
    fn test_separates_two_clusters() {
        let mut prims: Vec<PrimRef> = [0.0, 20.0, 1.0, 21.0, 2.0, 22.0]
            .iter()
            .map(|&x| unit_box_at(x))
            .collect();
        let info = PrimInfo::from_prims(&prims);
        let settings = BuildSettings::default();
        let split = find_object_split(&prims, &info, &settings).unwrap();
        assert_eq!(split.dim, 0);
        assert_eq!(split.num_left, 3);
        assert_eq!(split.overlap_area(), 0.0);

        let (left, right) = partition_object(&mut prims, &split);
        assert_eq!(left.count + right.count, info.count);
        assert!(prims[..3].iter().all(|prim| prim.bounds.min.x < 10.0));
        assert!(prims[3..].iter().all(|prim| prim.bounds.min.x > 10.0));
        assert_eq!(left.geom_bounds.max.x, 3.0);
        assert_eq!(right.geom_bounds.min.x, 20.0);
    }

    #[test]
    fn test_identical_centroids_give_no_split() {
        let prims = vec![unit_box_at(5.0); 40];
        let info = PrimInfo::from_prims(&prims);
        let mapping = BinMapping::new(&info);
        assert!((0..3).all(|dim| mapping.invalid(dim)));
        assert!(find_object_split(&prims, &info, &BuildSettings::default()).is_none());

        let (mid, left, right) = split_median(&prims);
        assert_eq!(mid, 20);
        assert_eq!(left.count + right.count, 40);
    }

    #[test]
    fn test_parallel_bins_merge_to_sequential() {
        let prims: Vec<PrimRef> = (0..100).map(|i| unit_box_at((i * 7 % 31) as f32)).collect();
        let info = PrimInfo::from_prims(&prims);
        let mapping = BinMapping::new(&info);
        let mut whole = ObjectBinner::default();
        whole.bin(&prims, &mapping);
        let mut merged = ObjectBinner::default();
        for chunk in prims.chunks(17) {
            let mut part = ObjectBinner::default();
            part.bin(chunk, &mapping);
            merged.merge(&part);
        }
        let settings = BuildSettings::default();
        assert_eq!(
            whole.best(&info, &mapping, &settings),
            merged.best(&info, &mapping, &settings)
        );
    }

    #[test]
    fn test_bins_stay_in_range() {
        let info = PrimInfo::from_prims(&[unit_box_at(0.0), unit_box_at(10.0)]);
        let mapping = BinMapping::new(&info);
        assert_eq!(mapping.bin(info.cent_bounds.min)[0], 0);
        assert_eq!(mapping.bin(info.cent_bounds.max)[0], NUM_OBJECT_BINS - 1);
        assert_eq!(mapping.bin(Vec3::splat(1e9))[0], NUM_OBJECT_BINS - 1);
    }
}
