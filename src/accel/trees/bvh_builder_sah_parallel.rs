use super::build_record::{BuildRecord, ParentSlot, PrimStorage, Split};
use super::bvh_builder::{BuilderCore, Links, SplitOutcome, WorkerArenas};
use super::node::NodeRef;
use super::object_partition::{partition_object, BinMapping, ObjectBinner, ObjectSplit};
use crate::accel::primitives::{IGeometryProvider, IPrimitiveType, PrimInfo, PrimRef};
use crate::error::{AccelError, Result};
use crate::utilities::local_spin_wait::LocalSpinWait;
use crate::utilities::memory::SharedSpan;
use crate::utilities::task_scheduling::{LockStepTaskScheduler, TaskScheduler};
use crate::utilities::BoundingBox;
use parking_lot::Mutex;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Ranges at least this large are binned and partitioned by the whole gang.
const PARALLEL_RANGE_MIN: usize = 1024;

#[inline(always)]
fn chunk_range(length: usize, thread_index: usize, thread_count: usize) -> Range<usize> {
    length * thread_index / thread_count..length * (thread_index + 1) / thread_count
}

/// State shared by the elements of a parallel build.
struct ParallelBuild<'a, const N: usize, P: IPrimitiveType> {
    /// Records waiting for a thread.
    records: Mutex<Vec<BuildRecord<'a>>>,
    /// Records taken from `records` whose processing has not finished.
    active_records: AtomicUsize,
    links: Mutex<Links>,
    arenas: Vec<Mutex<WorkerArenas<N, P>>>,
    error: Mutex<Option<AccelError>>,
    abort: AtomicBool,
}

impl<'a, const N: usize, P: IPrimitiveType> ParallelBuild<'a, N, P> {
    fn new(thread_count: usize) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            active_records: AtomicUsize::new(0),
            links: Mutex::new(Vec::new()),
            arenas: (0..thread_count).map(|_| Mutex::new(WorkerArenas::default())).collect(),
            error: Mutex::new(None),
            abort: AtomicBool::new(false),
        }
    }

    /// Keeps the first error and stops every thread at its next record.
    fn fail(&self, error: AccelError) {
        let mut slot = self.error.lock();
        if slot.is_none() {
            *slot = Some(error);
        }
        self.abort.store(true, Ordering::Release);
    }
}

impl<'g, const N: usize, P, G> BuilderCore<'g, N, P, G>
where
    P: IPrimitiveType,
    G: IGeometryProvider<P> + ?Sized,
{
    /// Builds with `thread_count` threads of `scheduler`.
    ///
    /// One element per thread joins a lock-step gang. Element 0 drives the gang through the top
    /// of the tree, binning and partitioning each large range with every thread, until there are
    /// as many open ranges as threads. Then all elements pull ranges from a shared list: ranges
    /// below `single_threaded_threshold` are finished by one thread as a barrier subtree, larger
    /// ones are split once and their children go back to the list.
    ///
    /// The caller holds the scheduler's lock-step reservation for the whole call.
    ///
    /// # Returns
    /// An empty root, the per-thread arenas and the links that place every subtree, the root included.
    pub(crate) fn build_parallel(
        &self,
        prims: &mut [PrimRef],
        scheduler: &TaskScheduler,
        thread_count: usize,
    ) -> Result<((BoundingBox, NodeRef), Vec<WorkerArenas<N, P>>, Links)> {
        let info = PrimInfo::from_prims(prims);
        let state = ParallelBuild::<N, P>::new(thread_count);
        let gang = LockStepTaskScheduler::new(thread_count);
        let root_prims = Mutex::new(Some(prims));
        log::debug!("parallel build of {} primitives on {} threads", info.count, thread_count);

        scheduler.execute_task(
            TaskScheduler::thread_index(),
            thread_count,
            "bvh_build_parallel",
            |context| {
                let index = context.task_index;
                if !gang.enter(index, thread_count) {
                    if let Some(prims) = root_prims.lock().take() {
                        let root = self.make_record_parallel(&gang, thread_count, PrimStorage::Slice(prims), info, 1);
                        if let Err(error) = self.expand_top_level(&gang, thread_count, &state, root) {
                            state.fail(error);
                        }
                    }
                    gang.leave(index, thread_count);
                }
                self.drain_records(&state, index);
            },
            None,
        )?;

        if let Some(error) = state.error.into_inner() {
            return Err(error);
        }
        let arenas = state.arenas.into_iter().map(Mutex::into_inner).collect();
        Ok(((BoundingBox::EMPTY, NodeRef::Empty), arenas, state.links.into_inner()))
    }

    /// Splits the largest open range until every thread can get one. Runs on the driver only.
    fn expand_top_level<'a>(
        &self,
        gang: &LockStepTaskScheduler,
        thread_count: usize,
        state: &ParallelBuild<'a, N, P>,
        root: BuildRecord<'a>,
    ) -> Result<()> {
        let mut open = vec![root];
        {
            let mut arenas = state.arenas[0].lock();
            while open.len() < thread_count {
                let mut best: Option<(usize, usize)> = None;
                for (index, record) in open.iter().enumerate() {
                    if record.size() >= self.settings.single_threaded_threshold
                        && !self.should_make_leaf(record)
                        && best.map_or(true, |(_, size)| record.size() > size)
                    {
                        best = Some((index, record.size()));
                    }
                }
                let Some((index, _)) = best else {
                    break;
                };
                let record = open.swap_remove(index);
                let parent = record.parent;
                let children = self.fill_children(record, &mut |child, depth| {
                    self.split_parallel(gang, thread_count, child, depth)
                })?;
                self.spawn_node(&mut arenas, parent, children, &state.links, &mut open)?;
            }
        }
        log::debug!("top level expanded into {} ranges", open.len());
        state.records.lock().extend(open);
        Ok(())
    }

    /// Pulls records until none are left and no thread can produce more.
    fn drain_records(&self, state: &ParallelBuild<'_, N, P>, task_index: usize) {
        let mut wait = LocalSpinWait::new();
        loop {
            if state.abort.load(Ordering::Acquire) {
                break;
            }
            let next = {
                let mut records = state.records.lock();
                let next = records.pop();
                if next.is_some() {
                    state.active_records.fetch_add(1, Ordering::SeqCst);
                } else if state.active_records.load(Ordering::SeqCst) == 0 {
                    break;
                }
                next
            };
            let Some(record) = next else {
                wait.spin_once();
                continue;
            };
            wait.reset();
            if let Err(error) = self.process_record(state, task_index, record) {
                state.fail(error);
            }
            state.active_records.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn process_record<'a>(
        &self,
        state: &ParallelBuild<'a, N, P>,
        task_index: usize,
        record: BuildRecord<'a>,
    ) -> Result<()> {
        let parent = record.parent;
        let mut arenas = state.arenas[task_index].lock();
        if record.size() < self.settings.single_threaded_threshold || self.should_make_leaf(&record) {
            let (bounds, subtree) = self.build_subtree(&mut arenas, record)?;
            let subtree = match subtree {
                NodeRef::Inner { index } => NodeRef::Barrier { index },
                other => other,
            };
            state.links.lock().push((parent, bounds, subtree));
            return Ok(());
        }
        let children = self.fill_children(record, &mut |child, depth| self.split_record(child, depth))?;
        let mut spawned = Vec::with_capacity(children.len());
        self.spawn_node(&mut arenas, parent, children, &state.links, &mut spawned)?;
        state.records.lock().extend(spawned);
        Ok(())
    }

    /// Creates a node whose children are still open. The children are handed out with the slot
    /// they must be linked into.
    fn spawn_node<'a>(
        &self,
        arenas: &mut WorkerArenas<N, P>,
        parent: ParentSlot,
        mut children: Vec<BuildRecord<'a>>,
        links: &Mutex<Links>,
        open: &mut Vec<BuildRecord<'a>>,
    ) -> Result<()> {
        if children.len() == 1 {
            if let Some(child) = children.pop() {
                let (bounds, leaf) = self.create_large_leaf(arenas, child)?;
                links.lock().push((parent, bounds, leaf));
            }
            return Ok(());
        }
        let slots: Vec<_> = children
            .iter()
            .map(|child| (child.info.geom_bounds, NodeRef::Empty))
            .collect();
        let (bounds, node) = self.create_node(arenas, &slots)?;
        let Some(node_index) = node.node_index() else {
            unreachable!("create_node returns inner references.");
        };
        for (slot, mut child) in children.into_iter().enumerate() {
            child.parent = ParentSlot::Child {
                node: node_index as u32,
                slot: slot as u8,
            };
            open.push(child);
        }
        links.lock().push((parent, bounds, node));
        Ok(())
    }

    fn make_record_parallel<'a>(
        &self,
        gang: &LockStepTaskScheduler,
        thread_count: usize,
        prims: PrimStorage<'a>,
        info: PrimInfo,
        depth: usize,
    ) -> BuildRecord<'a> {
        let split = self.find_split_parallel(gang, thread_count, prims.as_slice(), &info);
        BuildRecord {
            prims,
            info,
            depth,
            split,
            parent: ParentSlot::Root,
        }
    }

    fn split_parallel<'a>(
        &self,
        gang: &LockStepTaskScheduler,
        thread_count: usize,
        record: BuildRecord<'a>,
        child_depth: usize,
    ) -> Result<SplitOutcome<'a>> {
        match record.split {
            Split::Object(object) if record.size() >= PARALLEL_RANGE_MIN => {
                let mut prims = record.prims;
                let (left_info, right_info) =
                    self.partition_parallel(gang, thread_count, prims.as_mut_slice(), &object);
                let (left, right) = prims.split_at(left_info.count);
                Ok(SplitOutcome::Two(
                    self.make_record_parallel(gang, thread_count, left, left_info, child_depth),
                    self.make_record_parallel(gang, thread_count, right, right_info, child_depth),
                ))
            }
            _ => self.split_record(record, child_depth),
        }
    }

    /// Object binning with one binner per thread, merged through the gang's reduction barrier.
    fn find_split_parallel(
        &self,
        gang: &LockStepTaskScheduler,
        thread_count: usize,
        prims: &[PrimRef],
        info: &PrimInfo,
    ) -> Split {
        if prims.len() < PARALLEL_RANGE_MIN {
            return self.find_split(prims, info, true);
        }
        let mapping = BinMapping::new(info);
        let binners: Vec<Mutex<ObjectBinner>> =
            (0..thread_count).map(|_| Mutex::new(ObjectBinner::default())).collect();
        let reduce = |parent: usize, child: usize| {
            let partial = binners[child].lock().clone();
            binners[parent].lock().merge(&partial);
        };
        gang.dispatch_task(
            &|thread_index, thread_count| {
                binners[thread_index]
                    .lock()
                    .bin(&prims[chunk_range(prims.len(), thread_index, thread_count)], &mapping);
                gang.sync_threads_with_reduction(thread_index, thread_count, &reduce);
            },
            0,
            thread_count,
        );
        let object = binners[0].lock().best(info, &mapping, self.settings);
        self.choose_split(prims, info, object.map_or(Split::Invalid, Split::Object), true)
    }

    /// Three phase partition: count the left side of every chunk, scatter the chunks to their
    /// final positions in a scratch buffer, copy the buffer back.
    fn partition_parallel(
        &self,
        gang: &LockStepTaskScheduler,
        thread_count: usize,
        prims: &mut [PrimRef],
        split: &ObjectSplit,
    ) -> (PrimInfo, PrimInfo) {
        if prims.len() < PARALLEL_RANGE_MIN {
            return partition_object(prims, split);
        }
        let length = prims.len();
        let left_counts: Vec<AtomicUsize> = (0..thread_count).map(|_| AtomicUsize::new(0)).collect();
        {
            let source: &[PrimRef] = prims;
            gang.dispatch_task(
                &|thread_index, thread_count| {
                    let chunk = &source[chunk_range(length, thread_index, thread_count)];
                    let count = chunk.iter().filter(|prim| split.is_left(prim)).count();
                    left_counts[thread_index].store(count, Ordering::Relaxed);
                },
                0,
                thread_count,
            );
        }

        let num_left: usize = left_counts.iter().map(|count| count.load(Ordering::Relaxed)).sum();
        let mut left_starts = Vec::with_capacity(thread_count);
        let mut right_starts = Vec::with_capacity(thread_count);
        let (mut left, mut right) = (0, num_left);
        for (thread_index, count) in left_counts.iter().enumerate() {
            let count = count.load(Ordering::Relaxed);
            left_starts.push(left);
            right_starts.push(right);
            left += count;
            right += chunk_range(length, thread_index, thread_count).len() - count;
        }

        let mut scratch = vec![PrimRef::default(); length];
        let infos: Vec<Mutex<(PrimInfo, PrimInfo)>> =
            (0..thread_count).map(|_| Mutex::new((PrimInfo::EMPTY, PrimInfo::EMPTY))).collect();
        {
            let source: &[PrimRef] = prims;
            let target = SharedSpan::new(&mut scratch);
            gang.dispatch_task(
                &|thread_index, thread_count| {
                    let mut left_index = left_starts[thread_index];
                    let mut right_index = right_starts[thread_index];
                    let mut left_info = PrimInfo::EMPTY;
                    let mut right_info = PrimInfo::EMPTY;
                    for prim in &source[chunk_range(length, thread_index, thread_count)] {
                        // Chunks scatter into disjoint ranges computed from the counts.
                        if split.is_left(prim) {
                            left_info.add(prim);
                            unsafe { target.write(left_index, *prim) };
                            left_index += 1;
                        } else {
                            right_info.add(prim);
                            unsafe { target.write(right_index, *prim) };
                            right_index += 1;
                        }
                    }
                    *infos[thread_index].lock() = (left_info, right_info);
                },
                0,
                thread_count,
            );
        }
        {
            let source: &[PrimRef] = &scratch;
            let target = SharedSpan::new(prims);
            gang.dispatch_task(
                &|thread_index, thread_count| {
                    let range = chunk_range(length, thread_index, thread_count);
                    let chunk = unsafe { target.slice_mut(range.start, range.len()) };
                    chunk.copy_from_slice(&source[range]);
                },
                0,
                thread_count,
            );
        }

        let mut left_info = PrimInfo::EMPTY;
        let mut right_info = PrimInfo::EMPTY;
        for info in infos {
            let (left, right) = info.into_inner();
            left_info.merge(&left);
            right_info.merge(&right);
        }
        debug_assert_eq!(left_info.count, num_left);
        (left_info, right_info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::geometry::TriangleMesh;
    use crate::accel::primitives::Triangle4;
    use crate::accel::trees::{BuildSettings, Bvh4, BvhBuilderSah, IBvhBuilder};
    use glam::Vec3;
    use rand::{Rng, SeedableRng};

    fn random_mesh(count: usize, seed: u64) -> TriangleMesh {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let corners: Vec<[Vec3; 3]> = (0..count)
            .map(|_| {
                let base = Vec3::new(rng.gen_range(-50.0..50.0), rng.gen_range(-50.0..50.0), rng.gen_range(-50.0..50.0));
                [
                    base,
                    base + Vec3::new(rng.gen_range(0.1..1.0), 0.0, 0.0),
                    base + Vec3::new(0.0, rng.gen_range(0.1..1.0), rng.gen_range(0.0..1.0)),
                ]
            })
            .collect();
        TriangleMesh::from_soup(0, &corners)
    }

    #[test]
    fn test_chunks_cover_the_range() {
        let ranges: Vec<_> = (0..3).map(|index| chunk_range(10, index, 3)).collect();
        assert_eq!(ranges, vec![0..3, 3..6, 6..10]);
    }

    #[test]
    fn test_parallel_build_matches_sequential_shape() {
        let mesh = random_mesh(6000, 7);
        let settings = BuildSettings {
            parallel_build_threshold: 100,
            single_threaded_threshold: 256,
            ..BuildSettings::for_primitive::<Triangle4>()
        };

        let parallel_scheduler = TaskScheduler::with_threads(4).unwrap();
        let mut parallel = Bvh4::<Triangle4>::new(4).unwrap();
        BvhBuilderSah::new(settings.clone())
            .build(&mut parallel, &mesh, &parallel_scheduler)
            .unwrap();

        let settings_for_check = settings.clone();
        let sequential_scheduler = TaskScheduler::with_threads(1).unwrap();
        let mut sequential = Bvh4::<Triangle4>::new(4).unwrap();
        BvhBuilderSah::new(settings).build(&mut sequential, &mesh, &sequential_scheduler).unwrap();

        parallel.validate(&settings_for_check);
        assert_eq!(parallel.bounds, sequential.bounds);
        assert_eq!(parallel.num_primitives, 6000);
        let stored: usize = parallel.leaves.iter().map(|block| block.primitive_count()).sum();
        assert_eq!(stored, 6000);
        assert!(parallel.nodes.iter().all(|node| node.children.iter().all(|child| !child.is_barrier())));
    }

    #[test]
    fn test_concurrent_builds_share_one_scheduler() {
        let meshes: Vec<_> = (0..2).map(|seed| random_mesh(3000, 20 + seed)).collect();
        let settings = BuildSettings {
            parallel_build_threshold: 100,
            single_threaded_threshold: 128,
            ..BuildSettings::for_primitive::<Triangle4>()
        };
        let scheduler = TaskScheduler::with_threads(4).unwrap();
        std::thread::scope(|scope| {
            let builds: Vec<_> = meshes
                .iter()
                .map(|mesh| {
                    let (settings, scheduler) = (&settings, &scheduler);
                    scope.spawn(move || {
                        for _ in 0..4 {
                            let mut bvh = Bvh4::<Triangle4>::new(4).unwrap();
                            BvhBuilderSah::new(settings.clone()).build(&mut bvh, mesh, scheduler).unwrap();
                            bvh.validate(settings);
                            assert_eq!(bvh.num_primitives, 3000);
                        }
                    })
                })
                .collect();
            for build in builds {
                build.join().unwrap();
            }
        });
    }

    #[test]
    fn test_build_inside_scheduler_task() {
        let mesh = random_mesh(2000, 31);
        let settings = BuildSettings {
            parallel_build_threshold: 100,
            ..BuildSettings::for_primitive::<Triangle4>()
        };
        let scheduler = TaskScheduler::with_threads(3).unwrap();
        let counts = Mutex::new(Vec::new());
        scheduler
            .execute_task(
                0,
                6,
                "nested_builds",
                |_| {
                    let mut bvh = Bvh4::<Triangle4>::new(4).unwrap();
                    BvhBuilderSah::new(settings.clone()).build(&mut bvh, &mesh, &scheduler).unwrap();
                    bvh.validate(&settings);
                    counts.lock().push(bvh.num_primitives);
                },
                None,
            )
            .unwrap();
        assert_eq!(counts.into_inner(), vec![2000; 6]);
    }

    #[test]
    fn test_parallel_partition_matches_sequential() {
        let mesh = random_mesh(3000, 11);
        let mut prims = IGeometryProvider::<Triangle4>::create_prim_refs(&mesh);
        let info = PrimInfo::from_prims(&prims);
        let settings = BuildSettings::default();
        let core = BuilderCore::<4, Triangle4, TriangleMesh>::new(&mesh, &settings, false, prims.len(), 3).unwrap();
        let Split::Object(split) = core.find_split(&prims, &info, false) else {
            panic!("random triangles must have an object split");
        };

        let mut expected = prims.clone();
        let (expected_left, _) = partition_object(&mut expected, &split);

        let gang = LockStepTaskScheduler::new(3);
        let result = Mutex::new(None);
        std::thread::scope(|scope| {
            for thread_index in 1..3 {
                let gang = &gang;
                scope.spawn(move || gang.enter(thread_index, 3));
            }
            gang.enter(0, 3);
            *result.lock() = Some(core.partition_parallel(&gang, 3, &mut prims, &split));
            gang.leave(0, 3);
        });
        let (left, right) = result.into_inner().unwrap();
        assert_eq!(left.count, expected_left.count);
        assert_eq!(left.count + right.count, prims.len());
        assert!(prims[..left.count].iter().all(|prim| split.is_left(prim)));
        assert!(prims[left.count..].iter().all(|prim| !split.is_left(prim)));
        assert_eq!(left.geom_bounds, expected_left.geom_bounds);
    }
}
