use super::build_settings::BuildSettings;
use super::bvh::Bvh;
use super::bvh_builder::{BuilderCore, IBvhBuilder, Links, WorkerArenas};
use super::node::NodeRef;
use super::presplit::presplit;
use crate::accel::primitives::{IGeometryProvider, IPrimitiveType, PrimRef};
use crate::error::Result;
use crate::utilities::task_scheduling::TaskScheduler;
use crate::utilities::BoundingBox;
use std::time::Instant;

/// Top-down builder choosing splits with the surface area heuristic over binned centroids.
///
/// The spatial variant may also cut primitives at bin planes when object partitions overlap. The
/// presplit variant cuts unusually large primitives once before building.
#[derive(Clone, Debug)]
pub struct BvhBuilderSah {
    settings: BuildSettings,
    spatial: bool,
    presplit: bool,
}

impl BvhBuilderSah {
    /// Object partitions only.
    pub fn new(settings: BuildSettings) -> Self {
        Self {
            settings,
            spatial: false,
            presplit: false,
        }
    }

    /// Object partitions plus spatial splits.
    pub fn spatial(settings: BuildSettings) -> Self {
        Self {
            spatial: true,
            ..Self::new(settings)
        }
    }

    /// Object partitions over presplit primitives.
    pub fn presplit(settings: BuildSettings) -> Self {
        Self {
            presplit: true,
            ..Self::new(settings)
        }
    }

    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }
}

impl<'g, const N: usize, P, G> BuilderCore<'g, N, P, G>
where
    P: IPrimitiveType,
    G: IGeometryProvider<P> + ?Sized,
{
    /// Builds the whole tree on the calling thread.
    pub(crate) fn build_sequential(
        &self,
        prims: &mut [PrimRef],
    ) -> Result<((BoundingBox, NodeRef), Vec<WorkerArenas<N, P>>, Links)> {
        let mut arenas = WorkerArenas::default();
        let record = self.root_record(prims);
        let root = if record.size() == 0 {
            (BoundingBox::EMPTY, NodeRef::Empty)
        } else {
            self.build_subtree(&mut arenas, record)?
        };
        Ok((root, vec![arenas], Vec::new()))
    }
}

impl<const N: usize, P, G> IBvhBuilder<N, P, G> for BvhBuilderSah
where
    P: IPrimitiveType,
    G: IGeometryProvider<P> + ?Sized,
{
    fn build(&mut self, bvh: &mut Bvh<N, P>, provider: &G, scheduler: &TaskScheduler) -> Result<()> {
        let start = Instant::now();
        let thread_count = scheduler.thread_count()?;
        let name = IBvhBuilder::<N, P, G>::name(self);
        log::debug!("{}: Init", name);

        let mut prims = provider.create_prim_refs();
        let num_primitives = prims.len();
        if self.presplit {
            prims = presplit(prims, provider, &self.settings);
        }
        let core = BuilderCore::<N, P, G>::new(provider, &self.settings, self.spatial, prims.len(), thread_count)?;
        let lock_step = if thread_count > 1 && prims.len() >= self.settings.parallel_build_threshold {
            let reservation = scheduler.try_reserve_lock_step();
            if reservation.is_none() {
                log::debug!("{}: scheduler busy with another gang, building sequentially", name);
            }
            reservation
        } else {
            None
        };
        let (root, arenas, links) = if lock_step.is_some() {
            core.build_parallel(&mut prims, scheduler, thread_count)?
        } else {
            core.build_sequential(&mut prims)?
        };
        drop(lock_step);
        if self.spatial {
            log::debug!("{}: {} replications left", name, core.remaining_replications());
        }
        core.finish(bvh, root, arenas, links, num_primitives)?;

        let seconds = start.elapsed().as_secs_f64();
        log::info!(
            "{} built {} primitives into {} nodes in {:.3} ms ({:.2} Mprim/s)",
            name,
            num_primitives,
            bvh.nodes.len(),
            seconds * 1e3,
            num_primitives as f64 / seconds.max(1e-9) * 1e-6
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        match (self.spatial, self.presplit) {
            (true, _) => "sah_spatial",
            (false, true) => "sah_presplit",
            (false, false) => "sah",
        }
    }
}
