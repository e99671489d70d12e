use super::patch::Patch;
use super::tessellation::{RegularGridLookUpTables, MAX_SUBDIVISION_LEVEL};
use crate::accel::trees::{Node4, NodeRef};
use crate::error::{AccelError, Result};
use crate::utilities::memory::ConcurrentArena;
use crate::utilities::BoundingBox;
use crossbeam_utils::{Backoff, CachePadded};
use glam::Vec3;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

const UNBUILT: u64 = 0;
const BUILDING: u64 = 1;

/// Observable state of a lazily built patch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchBuildState {
    Unbuilt,
    Building,
    Built(NodeRef),
}

/// Build state of one patch in a single atomic cell: unbuilt, building, or the packed reference
/// of the finished quad tree.
///
/// A built reference never packs to 0 or 1: empty references are never published and leaves
/// always hold at least one block.
#[derive(Debug, Default)]
pub struct PatchState {
    state: AtomicU64,
}

/// How often the lazy path was taken.
#[derive(Debug, Default)]
pub struct LazyBuildCounters {
    /// Calls that found another thread building and had to wait.
    pub contention: CachePadded<AtomicUsize>,
    /// Expansion bodies run, failed ones included.
    pub expansions: CachePadded<AtomicUsize>,
}

impl PatchState {
    pub fn load(&self) -> PatchBuildState {
        match self.state.load(Ordering::Acquire) {
            UNBUILT => PatchBuildState::Unbuilt,
            BUILDING => PatchBuildState::Building,
            bits => PatchBuildState::Built(NodeRef::from_bits(bits)),
        }
    }

    /// Returns the built reference, running `build` first if nobody has.
    ///
    /// The caller that moves the cell from unbuilt to building runs `build` and publishes its
    /// result with release ordering. Every other caller waits for the publication. A failed build
    /// puts the cell back to unbuilt, so a waiter may pick the work up again.
    pub fn get_or_build(&self, counters: &LazyBuildCounters, build: impl FnOnce() -> Result<NodeRef>) -> Result<NodeRef> {
        let mut build = Some(build);
        let mut waited = false;
        loop {
            match self
                .state
                .compare_exchange(UNBUILT, BUILDING, Ordering::Acquire, Ordering::Acquire)
            {
                Ok(_) => {
                    counters.expansions.fetch_add(1, Ordering::Relaxed);
                    let Some(build) = build.take() else {
                        unreachable!("Each caller wins the unbuilt state at most once.");
                    };
                    return match build() {
                        Ok(node_ref) => {
                            debug_assert!(node_ref.to_bits() > BUILDING, "{:?} cannot be published.", node_ref);
                            self.state.store(node_ref.to_bits(), Ordering::Release);
                            Ok(node_ref)
                        }
                        Err(error) => {
                            self.state.store(UNBUILT, Ordering::Release);
                            Err(error)
                        }
                    };
                }
                Err(BUILDING) => {
                    if !waited {
                        waited = true;
                        counters.contention.fetch_add(1, Ordering::Relaxed);
                    }
                    let backoff = Backoff::new();
                    while self.state.load(Ordering::Acquire) == BUILDING {
                        backoff.snooze();
                    }
                }
                Err(UNBUILT) => {}
                Err(bits) => return Ok(NodeRef::from_bits(bits)),
            }
        }
    }

    /// Puts the cell back to unbuilt. Requires exclusive access.
    pub fn reset(&mut self) {
        *self.state.get_mut() = UNBUILT;
    }
}

/// One quad of a patch's tessellation grid, as grid indices of its parameter rectangle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QuadLeaf {
    pub patch: u32,
    pub u_start: u16,
    pub u_end: u16,
    pub v_start: u16,
    pub v_end: u16,
}

/// Expands patches into 4-wide quad trees on demand, from any number of traversing threads.
///
/// Each level halves the patch's grid in u and v, down to single grid quads at the subdivision
/// level. Nodes and quads come from fixed-capacity arenas sized for expanding every patch.
pub struct LazyPatchBuilder {
    level: usize,
    tables: RegularGridLookUpTables,
    states: Vec<PatchState>,
    nodes: ConcurrentArena<Node4>,
    quads: ConcurrentArena<QuadLeaf>,
    counters: LazyBuildCounters,
}

impl LazyPatchBuilder {
    /// Creates the builder for `patch_count` patches tessellated at `level`.
    pub fn new(patch_count: usize, level: usize) -> Result<Self> {
        let quads_per_patch = 1usize << (2 * level);
        let nodes_per_patch = (quads_per_patch - 1) / 3;
        Self::with_capacity(patch_count, level, patch_count * nodes_per_patch, patch_count * quads_per_patch)
    }

    /// Creates the builder with explicit arena capacities.
    pub fn with_capacity(patch_count: usize, level: usize, node_capacity: usize, quad_capacity: usize) -> Result<Self> {
        if level > MAX_SUBDIVISION_LEVEL {
            return Err(AccelError::InvalidSettings(format!(
                "subdivision level {} exceeds the maximum of {}",
                level, MAX_SUBDIVISION_LEVEL
            )));
        }
        Ok(Self {
            level,
            tables: RegularGridLookUpTables::new(),
            states: (0..patch_count).map(|_| PatchState::default()).collect(),
            nodes: ConcurrentArena::new("subdiv node", node_capacity),
            quads: ConcurrentArena::new("subdiv quad", quad_capacity),
            counters: LazyBuildCounters::default(),
        })
    }

    #[inline(always)]
    pub fn level(&self) -> usize {
        self.level
    }

    #[inline(always)]
    pub fn counters(&self) -> &LazyBuildCounters {
        &self.counters
    }

    pub fn state(&self, patch_index: usize) -> Option<PatchBuildState> {
        self.states.get(patch_index).map(PatchState::load)
    }

    /// Gets the quad tree of a patch, building it if this is the first touch.
    pub fn expand(&self, patch_index: usize, patch: &Patch) -> Result<NodeRef> {
        let Some(state) = self.states.get(patch_index) else {
            return Err(AccelError::InvalidSettings(format!(
                "patch {} is outside of {} patch states",
                patch_index,
                self.states.len()
            )));
        };
        state.get_or_build(&self.counters, || {
            let last = RegularGridLookUpTables::grid_size(self.level) - 1;
            let (_, root) = self.create_sub_tree(patch_index as u32, patch, 0, last, 0, last)?;
            log::debug!(
                "expanded patch {} at level {} ({} nodes, {} quads in use)",
                patch_index,
                self.level,
                self.nodes.len(),
                self.quads.len()
            );
            Ok(root)
        })
    }

    fn create_sub_tree(
        &self,
        patch_index: u32,
        patch: &Patch,
        u_start: usize,
        u_end: usize,
        v_start: usize,
        v_end: usize,
    ) -> Result<(BoundingBox, NodeRef)> {
        if u_end - u_start <= 1 {
            let quad = QuadLeaf {
                patch: patch_index,
                u_start: u_start as u16,
                u_end: u_end as u16,
                v_start: v_start as u16,
                v_end: v_end as u16,
            };
            let bounds = BoundingBox::from_points(&self.quad_corners(patch, &quad));
            let index = self.quads.alloc(quad)?;
            return Ok((bounds, NodeRef::leaf(index, 1)));
        }
        let index = self.nodes.reserve()?;
        let u_mid = (u_start + u_end) / 2;
        let v_mid = (v_start + v_end) / 2;
        let children = [
            self.create_sub_tree(patch_index, patch, u_start, u_mid, v_start, v_mid)?,
            self.create_sub_tree(patch_index, patch, u_mid, u_end, v_start, v_mid)?,
            self.create_sub_tree(patch_index, patch, u_mid, u_end, v_mid, v_end)?,
            self.create_sub_tree(patch_index, patch, u_start, u_mid, v_mid, v_end)?,
        ];
        let node = Node4::from_children(&children);
        let bounds = node.merged_bounds();
        self.nodes.set(index, node);
        Ok((bounds, NodeRef::inner(index)))
    }

    /// Surface points at the corners of a quad, counter-clockwise from `(u_start, v_start)`.
    pub fn quad_corners(&self, patch: &Patch, quad: &QuadLeaf) -> [Vec3; 4] {
        let u0 = self.tables.look_up(self.level, quad.u_start as usize);
        let u1 = self.tables.look_up(self.level, quad.u_end as usize);
        let v0 = self.tables.look_up(self.level, quad.v_start as usize);
        let v1 = self.tables.look_up(self.level, quad.v_end as usize);
        patch.quad_corners(u0, u1, v0, v1)
    }

    #[inline(always)]
    pub fn node(&self, node_ref: NodeRef) -> Option<&Node4> {
        node_ref.node_index().and_then(|index| self.nodes.get(index))
    }

    #[inline(always)]
    pub fn quad(&self, node_ref: NodeRef) -> Option<&QuadLeaf> {
        node_ref.leaf_range().and_then(|(offset, _)| self.quads.get(offset))
    }

    /// Drops every expansion. Requires exclusive access, so no traversal can hold a quad tree.
    pub fn reset(&mut self) {
        for state in &mut self.states {
            state.reset();
        }
        self.nodes.clear();
        self.quads.clear();
    }
}
