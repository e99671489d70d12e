use super::build_record::{BuildRecord, ParentSlot, PrimStorage, Split};
use super::build_settings::BuildSettings;
use super::bvh::Bvh;
use super::bvh_layout::relocate;
use super::node::{Node, NodeRef};
use super::object_partition::{find_object_split, partition_object, split_median};
use super::spatial_split::{find_spatial_split, partition_spatial};
use crate::accel::primitives::{IGeometryProvider, IPrimitiveType, PrimInfo, PrimRef};
use crate::error::{AccelError, Result};
use crate::utilities::memory::{BlockArena, ThreadLocalArena};
use crate::utilities::task_scheduling::TaskScheduler;
use crate::utilities::BoundingBox;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Builds or updates a hierarchy from a geometry provider.
pub trait IBvhBuilder<const N: usize, P: IPrimitiveType, G: IGeometryProvider<P> + ?Sized>: Send + Sync {
    /// Replaces the contents of `bvh` with a hierarchy over `provider`.
    fn build(&mut self, bvh: &mut Bvh<N, P>, provider: &G, scheduler: &TaskScheduler) -> Result<()>;

    /// Name used in logs.
    fn name(&self) -> &'static str;
}

/// Per-thread allocators for nodes and leaf blocks.
pub(crate) struct WorkerArenas<const N: usize, P> {
    pub nodes: ThreadLocalArena<Node<N>>,
    pub leaves: ThreadLocalArena<P>,
}

impl<const N: usize, P: IPrimitiveType> Default for WorkerArenas<N, P> {
    fn default() -> Self {
        Self {
            nodes: ThreadLocalArena::new(),
            leaves: ThreadLocalArena::new(),
        }
    }
}

/// Result of splitting one record.
pub(crate) enum SplitOutcome<'a> {
    Two(BuildRecord<'a>, BuildRecord<'a>),
    /// A spatial split left one side empty; the other side replaces the record.
    One(BuildRecord<'a>),
}

/// Subtrees that could not be written into their parent when they were created, with their bounds.
pub(crate) type Links = Vec<(ParentSlot, BoundingBox, NodeRef)>;

/// State shared by every builder: settings, geometry, arenas and the replication budget.
pub(crate) struct BuilderCore<'g, const N: usize, P: IPrimitiveType, G: IGeometryProvider<P> + ?Sized> {
    pub provider: &'g G,
    pub settings: &'g BuildSettings,
    pub max_leaf_size: usize,
    spatial: bool,
    replication_budget: AtomicUsize,
    pub node_arena: BlockArena,
    pub leaf_arena: BlockArena,
    _marker: PhantomData<fn() -> P>,
}

impl<'g, const N: usize, P, G> BuilderCore<'g, N, P, G>
where
    P: IPrimitiveType,
    G: IGeometryProvider<P> + ?Sized,
{
    /// Prepares a build over `primitive_count` references.
    ///
    /// # Arguments
    /// * `provider` - Geometry being built over.
    /// * `settings` - Build parameters, validated against the node width.
    /// * `spatial` - Whether spatial splits may be chosen.
    /// * `primitive_count` - Number of references the build starts with.
    /// * `thread_count` - Number of threads allocating from the arenas.
    pub fn new(
        provider: &'g G,
        settings: &'g BuildSettings,
        spatial: bool,
        primitive_count: usize,
        thread_count: usize,
    ) -> Result<Self> {
        settings.validate(N)?;
        let replication_budget = if spatial {
            (primitive_count as f32 * settings.replication_factor) as usize
        } else {
            0
        };
        // Leaves never outnumber references, and a tree has fewer inner nodes than leaves.
        let max_references = primitive_count + replication_budget + 1;
        Ok(Self {
            provider,
            settings,
            max_leaf_size: settings.effective_max_leaf_size::<P>(),
            spatial,
            replication_budget: AtomicUsize::new(replication_budget),
            node_arena: BlockArena::for_estimate("bvh node", max_references, thread_count),
            leaf_arena: BlockArena::for_estimate("bvh leaf", 2 * max_references, thread_count),
            _marker: PhantomData,
        })
    }

    /// Replicas still available to spatial splits.
    pub fn remaining_replications(&self) -> usize {
        self.replication_budget.load(Ordering::Acquire)
    }

    fn reserve_replications(&self, count: usize) -> bool {
        self.replication_budget
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |budget| budget.checked_sub(count))
            .is_ok()
    }

    /// Chooses between the best object partition and, when the object partition's sides
    /// overlap enough, the best spatial split.
    pub fn find_split(&self, prims: &[PrimRef], info: &PrimInfo, allow_spatial: bool) -> Split {
        let object = find_object_split(prims, info, self.settings);
        self.choose_split(prims, info, object.map_or(Split::Invalid, Split::Object), allow_spatial)
    }

    /// Considers a spatial split against an already computed object split.
    pub fn choose_split(&self, prims: &[PrimRef], info: &PrimInfo, object: Split, allow_spatial: bool) -> Split {
        if !allow_spatial || !self.spatial || self.remaining_replications() == 0 {
            return object;
        }
        let area = info.half_area();
        if let Split::Object(object_split) = &object {
            if object_split.overlap_area() < self.settings.spatial_split_overlap_threshold * area {
                return object;
            }
        }
        let Some(spatial) = find_spatial_split(prims, info, self.settings, self.provider) else {
            return object;
        };
        let leaf_cost = self.settings.blocks(info.count) as f32 * area;
        let useful = spatial.num_left < info.count && spatial.num_right < info.count;
        if useful
            && spatial.sah < object.sah()
            && spatial.sah < leaf_cost
            && spatial.replications(info.count) <= self.remaining_replications()
        {
            log::trace!(
                "spatial split dim {} plane {} replicates {}",
                spatial.dim,
                spatial.plane,
                spatial.replications(info.count)
            );
            Split::Spatial(spatial)
        } else {
            object
        }
    }

    /// Creates a child record with its split precomputed.
    pub fn make_record<'a>(&self, prims: PrimStorage<'a>, info: PrimInfo, depth: usize) -> BuildRecord<'a> {
        let split = self.find_split(prims.as_slice(), &info, true);
        BuildRecord {
            prims,
            info,
            depth,
            split,
            parent: ParentSlot::Root,
        }
    }

    /// Creates the record covering a whole primitive array.
    pub fn root_record<'a>(&self, prims: &'a mut [PrimRef]) -> BuildRecord<'a> {
        let info = PrimInfo::from_prims(prims);
        self.make_record(PrimStorage::Slice(prims), info, 1)
    }

    /// Leaf test: small ranges, ranges near the depth limit, and ranges whose leaf cost beats
    /// their split cost while under the leaf size ceiling become leaves.
    pub fn should_make_leaf(&self, record: &BuildRecord) -> bool {
        let settings = self.settings;
        let size = record.size();
        if size <= settings.min_leaf_size || record.depth + settings.large_leaf_levels >= settings.max_depth {
            return true;
        }
        if size > self.max_leaf_size {
            return false;
        }
        let area = record.area();
        let leaf_sah = settings.intersection_cost * settings.blocks(size) as f32 * area;
        let split_sah = settings.traversal_cost * area + settings.intersection_cost * record.split.sah();
        leaf_sah <= split_sah
    }

    /// Splits a record along its precomputed split, falling back to halving it by index if
    /// there is no valid split.
    ///
    /// # Arguments
    /// * `record` - Record to split.
    /// * `child_depth` - Depth assigned to the resulting records.
    pub fn split_record<'a>(&self, record: BuildRecord<'a>, child_depth: usize) -> Result<SplitOutcome<'a>> {
        let BuildRecord {
            mut prims,
            info,
            depth,
            split,
            parent,
        } = record;
        match split {
            Split::Object(object) => {
                let (left_info, right_info) = partition_object(prims.as_mut_slice(), &object);
                let (left, right) = prims.split_at(left_info.count);
                Ok(SplitOutcome::Two(
                    self.make_record(left, left_info, child_depth),
                    self.make_record(right, right_info, child_depth),
                ))
            }
            Split::Spatial(spatial) => {
                if !self.reserve_replications(spatial.replications(info.count)) {
                    let split = self.find_split(prims.as_slice(), &info, false);
                    let record = BuildRecord {
                        prims,
                        info,
                        depth,
                        split,
                        parent,
                    };
                    return self.split_record(record, child_depth);
                }
                let ((left, left_info), (right, right_info)) =
                    partition_spatial(prims.as_slice(), &spatial, self.provider);
                if left.is_empty() || right.is_empty() {
                    let (prims, info) = if left.is_empty() {
                        (right, right_info)
                    } else {
                        (left, left_info)
                    };
                    let split = self.find_split(&prims, &info, false);
                    return Ok(SplitOutcome::One(BuildRecord {
                        prims: PrimStorage::List(prims),
                        info,
                        depth,
                        split,
                        parent,
                    }));
                }
                Ok(SplitOutcome::Two(
                    self.make_record(PrimStorage::List(left), left_info, child_depth),
                    self.make_record(PrimStorage::List(right), right_info, child_depth),
                ))
            }
            Split::Invalid => {
                let (mid, left_info, right_info) = split_median(prims.as_slice());
                let (left, right) = prims.split_at(mid);
                Ok(SplitOutcome::Two(
                    self.make_record(left, left_info, child_depth),
                    self.make_record(right, right_info, child_depth),
                ))
            }
        }
    }

    /// Splits the children of a new node until the branching factor is reached, always picking
    /// the child with the largest surface area among those above the minimum leaf size.
    pub fn fill_children<'a>(
        &self,
        record: BuildRecord<'a>,
        split: &mut dyn FnMut(BuildRecord<'a>, usize) -> Result<SplitOutcome<'a>>,
    ) -> Result<Vec<BuildRecord<'a>>> {
        let child_depth = record.depth + 1;
        let branching_factor = self.settings.branching_factor;
        let mut children = Vec::with_capacity(branching_factor);
        children.push(record);
        while children.len() < branching_factor {
            let mut best: Option<(usize, f32)> = None;
            for (index, child) in children.iter().enumerate() {
                if child.size() <= self.settings.min_leaf_size {
                    continue;
                }
                let area = child.area();
                if best.map_or(true, |(_, best_area)| area > best_area) {
                    best = Some((index, area));
                }
            }
            let Some((index, _)) = best else {
                break;
            };
            let child = children.swap_remove(index);
            match split(child, child_depth)? {
                SplitOutcome::Two(left, right) => {
                    children.push(left);
                    children.push(right);
                }
                SplitOutcome::One(record) => children.push(record),
            }
        }
        Ok(children)
    }

    /// Packs a range into leaf blocks.
    pub fn create_leaf(&self, arenas: &mut WorkerArenas<N, P>, prims: &[PrimRef]) -> Result<NodeRef> {
        if prims.is_empty() {
            return Ok(NodeRef::Empty);
        }
        let blocks = P::blocks(prims.len());
        let (offset, slots) = arenas.leaves.alloc(&self.leaf_arena, blocks)?;
        self.provider.fill_leaf(prims, slots);
        Ok(NodeRef::leaf(offset, blocks))
    }

    /// Allocates a node holding the given children.
    ///
    /// # Returns
    /// Union of the child bounds and the node's reference.
    pub fn create_node(
        &self,
        arenas: &mut WorkerArenas<N, P>,
        children: &[(BoundingBox, NodeRef)],
    ) -> Result<(BoundingBox, NodeRef)> {
        let node = Node::from_children(children);
        let bounds = node.merged_bounds();
        let index = arenas.nodes.push(&self.node_arena, node)?;
        Ok((bounds, NodeRef::inner(index)))
    }

    /// Turns a range into a leaf, or into a balanced subtree of leaves if it is too large for one.
    /// Ranges are halved by index, the largest first, without consulting the cost model.
    ///
    /// # Returns
    /// Bounds of the built subtree and its reference.
    pub fn create_large_leaf(&self, arenas: &mut WorkerArenas<N, P>, record: BuildRecord) -> Result<(BoundingBox, NodeRef)> {
        if record.depth > self.settings.max_depth {
            return Err(AccelError::DepthLimitReached {
                depth: record.depth,
                max_depth: self.settings.max_depth,
            });
        }
        if record.size() <= self.max_leaf_size {
            let leaf = self.create_leaf(arenas, record.prims.as_slice())?;
            return Ok((record.info.geom_bounds, leaf));
        }

        let child_depth = record.depth + 1;
        let mut children = Vec::with_capacity(self.settings.branching_factor);
        children.push(record);
        while children.len() < self.settings.branching_factor {
            let mut best: Option<(usize, usize)> = None;
            for (index, child) in children.iter().enumerate() {
                if child.size() > self.max_leaf_size && best.map_or(true, |(_, size)| child.size() > size) {
                    best = Some((index, child.size()));
                }
            }
            let Some((index, _)) = best else {
                break;
            };
            let child = children.swap_remove(index);
            let (mid, left_info, right_info) = split_median(child.prims.as_slice());
            let (left, right) = child.prims.split_at(mid);
            children.push(BuildRecord::new(left, left_info, child_depth));
            children.push(BuildRecord::new(right, right_info, child_depth));
        }

        let mut slots = Vec::with_capacity(children.len());
        for child in children {
            slots.push(self.create_large_leaf(arenas, child)?);
        }
        self.create_node(arenas, &slots)
    }

    /// Builds a subtree on the calling thread. Nodes are created after their children, so every
    /// reference is known when its node is written.
    ///
    /// # Returns
    /// Bounds of the built subtree and its reference. The bounds are the union of what the subtree
    /// stores, which can be tighter than the record's bounds after spatial splits.
    pub fn build_subtree(&self, arenas: &mut WorkerArenas<N, P>, record: BuildRecord) -> Result<(BoundingBox, NodeRef)> {
        if self.should_make_leaf(&record) {
            return self.create_large_leaf(arenas, record);
        }
        log::trace!(
            "split {} primitives at depth {} with sah {}",
            record.size(),
            record.depth,
            record.split.sah()
        );
        let mut children = self.fill_children(record, &mut |child, depth| self.split_record(child, depth))?;
        if children.len() == 1 {
            if let Some(child) = children.pop() {
                return self.create_large_leaf(arenas, child);
            }
        }
        let mut slots = Vec::with_capacity(children.len());
        for child in children {
            slots.push(self.build_subtree(arenas, child)?);
        }
        self.create_node(arenas, &slots)
    }

    /// Merges the per-thread arenas, patches the deferred references and compacts the result into `bvh`.
    ///
    /// # Arguments
    /// * `root` - Root bounds and reference, unless a link carries the root.
    /// * `arenas` - Arenas of every thread that took part.
    /// * `links` - Deferred subtrees.
    /// * `num_primitives` - Primitive count before replication.
    pub fn finish(
        &self,
        bvh: &mut Bvh<N, P>,
        root: (BoundingBox, NodeRef),
        arenas: Vec<WorkerArenas<N, P>>,
        links: Links,
        num_primitives: usize,
    ) -> Result<()> {
        let (node_arenas, leaf_arenas): (Vec<_>, Vec<_>) =
            arenas.into_iter().map(|arena| (arena.nodes, arena.leaves)).unzip();
        let mut nodes = ThreadLocalArena::merge(&self.node_arena, node_arenas);
        let leaves = ThreadLocalArena::merge(&self.leaf_arena, leaf_arenas);
        let (mut root_bounds, mut root) = root;
        let linked = !links.is_empty();
        for (parent, bounds, child) in links {
            match parent {
                ParentSlot::Root => (root_bounds, root) = (bounds, child),
                ParentSlot::Child { node, slot } => nodes[node as usize].set(slot as usize, bounds, child),
            }
        }
        log::debug!("LayoutCompaction: {} node slots, {} leaf slots", nodes.len(), leaves.len());
        let (nodes, leaves, root) = relocate(&nodes, &leaves, root);
        bvh.nodes = nodes;
        bvh.leaves = leaves;
        bvh.root = root;
        bvh.bounds = if root.is_empty() { BoundingBox::EMPTY } else { root_bounds };
        bvh.num_primitives = num_primitives;
        if linked {
            bvh.merge_child_bounds();
        }
        log::debug!("Done");
        Ok(())
    }
}
