use super::build_record::{BuildRecord, PrimStorage};
use super::build_settings::BuildSettings;
use super::bvh::Bvh;
use super::bvh_builder::{BuilderCore, IBvhBuilder, WorkerArenas};
use super::node::NodeRef;
use crate::accel::primitives::{IGeometryProvider, IPrimitiveType, PrimInfo, PrimRef};
use crate::error::Result;
use crate::utilities::memory::SharedSpan;
use crate::utilities::task_scheduling::TaskScheduler;
use crate::utilities::{BoundingBox, IThreadDispatcher};
use glam::Vec3;
use std::time::Instant;

/// Bits per axis of a morton code.
const MORTON_BITS_PER_AXIS: u32 = 10;

/// Spreads the low 10 bits of `value` so that two zero bits follow each of them.
#[inline(always)]
fn expand_bits(value: u32) -> u32 {
    let mut x = value & 0x3ff;
    x = (x | (x << 16)) & 0x030000ff;
    x = (x | (x << 8)) & 0x0300f00f;
    x = (x | (x << 4)) & 0x030c30c3;
    x = (x | (x << 2)) & 0x09249249;
    x
}

/// Quantizes points of a centroid box to the morton grid.
#[derive(Clone, Copy, Debug)]
pub struct MortonMapping {
    offset: Vec3,
    scale: Vec3,
}

impl MortonMapping {
    pub fn new(info: &PrimInfo) -> Self {
        let extent = info.cent_bounds.size();
        let cells = ((1 << MORTON_BITS_PER_AXIS) - 1) as f32;
        Self {
            offset: info.cent_bounds.min,
            scale: Vec3::select(extent.cmpgt(Vec3::splat(1e-19)), Vec3::splat(cells) / extent, Vec3::ZERO),
        }
    }

    /// 30-bit code of a doubled centroid, x in the highest interleaved bit.
    #[inline]
    pub fn code(&self, center2: Vec3) -> u32 {
        let cells = ((1 << MORTON_BITS_PER_AXIS) - 1) as f32;
        let grid = ((center2 - self.offset) * self.scale).clamp(Vec3::ZERO, Vec3::splat(cells));
        (expand_bits(grid.x as u32) << 2) | (expand_bits(grid.y as u32) << 1) | expand_bits(grid.z as u32)
    }
}

/// Builder ordering primitives along a morton curve and splitting at the highest bit on which
/// a range's first and last codes differ.
#[derive(Clone, Debug)]
pub struct BvhBuilderMorton {
    settings: BuildSettings,
}

impl BvhBuilderMorton {
    pub fn new(settings: BuildSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }
}

/// Range of the morton-sorted primitives, with their codes alongside.
struct MortonRecord<'a> {
    prims: &'a mut [PrimRef],
    codes: &'a [u32],
    info: PrimInfo,
    depth: usize,
}

impl<'a> MortonRecord<'a> {
    fn new(prims: &'a mut [PrimRef], codes: &'a [u32], depth: usize) -> Self {
        let info = PrimInfo::from_prims(prims);
        Self {
            prims,
            codes,
            info,
            depth,
        }
    }

    /// Splits at the highest differing code bit, or in the middle when all codes are equal.
    fn split(self, child_depth: usize) -> (Self, Self) {
        let MortonRecord { prims, codes, .. } = self;
        let (Some(&first), Some(&last)) = (codes.first(), codes.last()) else {
            unreachable!("Only ranges above the minimum leaf size are split.");
        };
        let difference = first ^ last;
        let mid = if difference == 0 {
            codes.len() / 2
        } else {
            let bit = 1u32 << (31 - difference.leading_zeros());
            codes.partition_point(|code| code & bit == 0)
        };
        let (left_prims, right_prims) = prims.split_at_mut(mid);
        let (left_codes, right_codes) = codes.split_at(mid);
        (
            Self::new(left_prims, left_codes, child_depth),
            Self::new(right_prims, right_codes, child_depth),
        )
    }

    fn into_build_record(self) -> BuildRecord<'a> {
        BuildRecord::new(PrimStorage::Slice(self.prims), self.info, self.depth)
    }
}

impl<'g, const N: usize, P, G> BuilderCore<'g, N, P, G>
where
    P: IPrimitiveType,
    G: IGeometryProvider<P> + ?Sized,
{
    fn build_morton_subtree(
        &self,
        arenas: &mut WorkerArenas<N, P>,
        record: MortonRecord,
    ) -> Result<(BoundingBox, NodeRef)> {
        if record.info.count <= self.max_leaf_size
            || record.depth + self.settings.large_leaf_levels >= self.settings.max_depth
        {
            return self.create_large_leaf(arenas, record.into_build_record());
        }
        let child_depth = record.depth + 1;
        let mut children = Vec::with_capacity(self.settings.branching_factor);
        children.push(record);
        while children.len() < self.settings.branching_factor {
            let mut best: Option<(usize, f32)> = None;
            for (index, child) in children.iter().enumerate() {
                if child.info.count <= self.settings.min_leaf_size {
                    continue;
                }
                let area = child.info.half_area();
                if best.map_or(true, |(_, best_area)| area > best_area) {
                    best = Some((index, area));
                }
            }
            let Some((index, _)) = best else {
                break;
            };
            let (left, right) = children.swap_remove(index).split(child_depth);
            children.push(left);
            children.push(right);
        }
        let mut slots = Vec::with_capacity(children.len());
        for child in children {
            slots.push(self.build_morton_subtree(arenas, child)?);
        }
        self.create_node(arenas, &slots)
    }
}

/// Computes the morton key of every primitive, code in the high word and index in the low word.
fn compute_keys(prims: &[PrimRef], mapping: &MortonMapping, dispatcher: &dyn IThreadDispatcher) -> Result<Vec<u64>> {
    let mut keys = vec![0u64; prims.len()];
    let worker_count = dispatcher.worker_count().max(1);
    {
        let span = SharedSpan::new(&mut keys);
        let length = prims.len();
        dispatcher.dispatch_workers(
            &|worker| {
                let range = length * worker / worker_count..length * (worker + 1) / worker_count;
                for index in range {
                    let code = mapping.code(prims[index].center2());
                    // Workers own disjoint index ranges.
                    unsafe { span.write(index, (code as u64) << 32 | index as u64) };
                }
            },
            worker_count,
        )?;
    }
    Ok(keys)
}

impl<const N: usize, P, G> IBvhBuilder<N, P, G> for BvhBuilderMorton
where
    P: IPrimitiveType,
    G: IGeometryProvider<P> + ?Sized,
{
    fn build(&mut self, bvh: &mut Bvh<N, P>, provider: &G, scheduler: &TaskScheduler) -> Result<()> {
        let start = Instant::now();
        let thread_count = scheduler.thread_count()?;
        log::debug!("morton: Init");

        let prims = provider.create_prim_refs();
        let num_primitives = prims.len();
        let info = PrimInfo::from_prims(&prims);
        let core = BuilderCore::<N, P, G>::new(provider, &self.settings, false, num_primitives, thread_count)?;

        let mut keys = compute_keys(&prims, &MortonMapping::new(&info), scheduler)?;
        keys.sort_unstable();
        let mut sorted: Vec<PrimRef> = keys.iter().map(|key| prims[(key & u32::MAX as u64) as usize]).collect();
        let codes: Vec<u32> = keys.iter().map(|key| (key >> 32) as u32).collect();

        let mut arenas = WorkerArenas::default();
        let root = if sorted.is_empty() {
            (BoundingBox::EMPTY, NodeRef::Empty)
        } else {
            core.build_morton_subtree(&mut arenas, MortonRecord::new(&mut sorted, &codes, 1))?
        };
        core.finish(bvh, root, vec![arenas], Vec::new(), num_primitives)?;

        let seconds = start.elapsed().as_secs_f64();
        log::info!(
            "morton built {} primitives into {} nodes in {:.3} ms ({:.2} Mprim/s)",
            num_primitives,
            bvh.nodes.len(),
            seconds * 1e3,
            num_primitives as f64 / seconds.max(1e-9) * 1e-6
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "morton"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::geometry::TriangleMesh;
    use crate::accel::primitives::Triangle4;
    use crate::accel::trees::Bvh4;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_codes_interleave_axes() {
        assert_eq!(expand_bits(0b11), 0b1001);
        assert_eq!(expand_bits(0x3ff), 0x09249249);
        let info = PrimInfo::from_prims(&[
            PrimRef::new(BoundingBox::from_point(Vec3::ZERO), 0, 0),
            PrimRef::new(BoundingBox::from_point(Vec3::ONE), 0, 1),
        ]);
        let mapping = MortonMapping::new(&info);
        assert_eq!(mapping.code(Vec3::ZERO), 0);
        assert_eq!(mapping.code(Vec3::splat(2.0)), (1 << 30) - 1);
        assert_eq!(mapping.code(Vec3::new(2.0, 0.0, 0.0)), 0x09249249 << 2);
    }

    #[test]
    fn test_split_at_highest_differing_bit() {
        let mut prims = vec![PrimRef::default(); 4];
        let codes = [0b0001, 0b0011, 0b0100, 0b0110];
        let record = MortonRecord {
            prims: &mut prims,
            codes: &codes,
            info: PrimInfo::EMPTY,
            depth: 1,
        };
        let (left, right) = record.split(2);
        assert_eq!(left.codes, &[0b0001, 0b0011]);
        assert_eq!(right.codes, &[0b0100, 0b0110]);

        let equal = [5u32; 3];
        let mut prims = vec![PrimRef::default(); 3];
        let (left, right) = MortonRecord::new(&mut prims, &equal, 1).split(2);
        assert_eq!((left.codes.len(), right.codes.len()), (1, 2));
    }

    #[test]
    fn test_morton_build_is_valid() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(17);
        let corners: Vec<[Vec3; 3]> = (0..2000)
            .map(|_| {
                let base = Vec3::new(rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0));
                [base, base + Vec3::new(0.01, 0.0, 0.0), base + Vec3::new(0.0, 0.01, 0.0)]
            })
            .collect();
        let mesh = TriangleMesh::from_soup(0, &corners);
        let scheduler = TaskScheduler::with_threads(3).unwrap();
        let settings = BuildSettings::for_primitive::<Triangle4>();
        let mut bvh = Bvh4::<Triangle4>::new(4).unwrap();
        BvhBuilderMorton::new(settings.clone()).build(&mut bvh, &mesh, &scheduler).unwrap();

        bvh.validate(&settings);
        let stored: usize = bvh.leaves.iter().map(|block| block.primitive_count()).sum();
        assert_eq!(stored, 2000);
    }
}
