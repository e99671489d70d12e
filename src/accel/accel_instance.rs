use crate::accel::geometry::{BezierCurves, TriangleMesh};
use crate::accel::primitives::{Bezier1, IGeometryProvider, IPrimitiveIntersector, IPrimitiveType, Triangle1, Triangle4};
use crate::accel::ray::{Ray, RayPacket};
use crate::accel::subdiv::{PatchLeaf, SubdivAccel, SubdivMesh};
use crate::accel::trees::{
    BuildSettings, Bvh, BvhBuilderMorton, BvhBuilderSah, BvhStatistics, IBvhBuilder, PrimitiveLeafTester,
};
use crate::config::{AccelConfig, BuilderKind, TraverserKind};
use crate::error::{AccelError, Result};
use crate::utilities::task_scheduling::TaskScheduler;
use crate::utilities::BoundingBox;
use std::time::Instant;

/// Acceleration structure that can be rebuilt and inspected through the registry.
pub trait IAccel: Send + Sync {
    /// Registry name, such as `bvh4.triangle4`.
    fn name(&self) -> &'static str;

    /// Name of the builder the accel runs.
    fn builder_name(&self) -> &'static str;

    /// Rebuilds the accel from its geometry.
    fn build(&mut self, scheduler: &TaskScheduler) -> Result<()>;

    fn bounds(&self) -> BoundingBox;

    /// Primitives referenced by the last build.
    fn primitive_count(&self) -> usize;

    fn statistics(&self) -> BvhStatistics;
}

pub type Intersect1Fn<A> = fn(&A, &mut Ray) -> Result<bool>;
pub type Occluded1Fn<A> = fn(&A, &Ray) -> Result<bool>;
pub type IntersectNFn<A, const K: usize> = fn(&A, &mut RayPacket<K>) -> Result<()>;
pub type OccludedNFn<A, const K: usize> = fn(&A, &RayPacket<K>) -> Result<[bool; K]>;

/// Entry points of one accel type, per ray packet width. Missing entries are `None`.
pub struct Intersectors<A> {
    pub name: &'static str,
    pub intersect1: Option<Intersect1Fn<A>>,
    pub occluded1: Option<Occluded1Fn<A>>,
    pub intersect4: Option<IntersectNFn<A, 4>>,
    pub occluded4: Option<OccludedNFn<A, 4>>,
    pub intersect8: Option<IntersectNFn<A, 8>>,
    pub occluded8: Option<OccludedNFn<A, 8>>,
    pub intersect16: Option<IntersectNFn<A, 16>>,
    pub occluded16: Option<OccludedNFn<A, 16>>,
}

impl<A> Intersectors<A> {
    /// Table without any entry point.
    pub fn empty(name: &'static str) -> Self {
        Self {
            name,
            intersect1: None,
            occluded1: None,
            intersect4: None,
            occluded4: None,
            intersect8: None,
            occluded8: None,
            intersect16: None,
            occluded16: None,
        }
    }
}

// Copy for every `A`, unlike the derive.
impl<A> Clone for Intersectors<A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A> Copy for Intersectors<A> {}

/// Accel bound to its intersector table and the configuration it was created with.
pub struct AccelInstance<A: IAccel> {
    accel: A,
    intersectors: Intersectors<A>,
    config: AccelConfig,
}

impl<A: IAccel> AccelInstance<A> {
    pub fn new(accel: A, intersectors: Intersectors<A>, config: AccelConfig) -> Self {
        Self {
            accel,
            intersectors,
            config,
        }
    }

    pub fn accel(&self) -> &A {
        &self.accel
    }

    /// Gets the accel mutably, for editing its geometry between builds.
    pub fn accel_mut(&mut self) -> &mut A {
        &mut self.accel
    }

    pub fn intersectors(&self) -> &Intersectors<A> {
        &self.intersectors
    }

    pub fn config(&self) -> &AccelConfig {
        &self.config
    }

    /// Builds the accel and reports the build according to the configuration.
    pub fn build(&mut self, scheduler: &TaskScheduler) -> Result<()> {
        let name = self.accel.name();
        if self.config.verbose >= 1 {
            log::info!("building {} using {} ...", name, self.accel.builder_name());
        }
        let start = Instant::now();
        self.accel.build(scheduler)?;
        let seconds = start.elapsed().as_secs_f64().max(1e-9);
        let primitives = self.accel.primitive_count();

        log::info!(
            "{} built with {}: {} primitives in {:.3} ms ({:.3} Mprim/s)",
            name,
            self.accel.builder_name(),
            primitives,
            seconds * 1e3,
            1e-6 * primitives as f64 / seconds
        );
        if self.config.verbose >= 2 {
            log::info!("{}: {}", name, self.accel.statistics());
        }
        if self.config.benchmark {
            let statistics = self.accel.statistics();
            log::info!(
                "BENCHMARK_BUILD {} {} {} {}",
                seconds,
                primitives as f64 / seconds,
                statistics.sah,
                statistics.bytes_used
            );
        }
        Ok(())
    }

    #[inline(always)]
    fn entry<F>(&self, entry: Option<F>, width: usize) -> Result<F> {
        entry.ok_or(AccelError::IntersectorUnavailable {
            accel: self.intersectors.name,
            width,
        })
    }

    pub fn intersect(&self, ray: &mut Ray) -> Result<bool> {
        self.entry(self.intersectors.intersect1, 1)?(&self.accel, ray)
    }

    pub fn occluded(&self, ray: &Ray) -> Result<bool> {
        self.entry(self.intersectors.occluded1, 1)?(&self.accel, ray)
    }

    pub fn intersect4(&self, packet: &mut RayPacket<4>) -> Result<()> {
        self.entry(self.intersectors.intersect4, 4)?(&self.accel, packet)
    }

    pub fn occluded4(&self, packet: &RayPacket<4>) -> Result<[bool; 4]> {
        self.entry(self.intersectors.occluded4, 4)?(&self.accel, packet)
    }

    pub fn intersect8(&self, packet: &mut RayPacket<8>) -> Result<()> {
        self.entry(self.intersectors.intersect8, 8)?(&self.accel, packet)
    }

    pub fn occluded8(&self, packet: &RayPacket<8>) -> Result<[bool; 8]> {
        self.entry(self.intersectors.occluded8, 8)?(&self.accel, packet)
    }

    pub fn intersect16(&self, packet: &mut RayPacket<16>) -> Result<()> {
        self.entry(self.intersectors.intersect16, 16)?(&self.accel, packet)
    }

    pub fn occluded16(&self, packet: &RayPacket<16>) -> Result<[bool; 16]> {
        self.entry(self.intersectors.occluded16, 16)?(&self.accel, packet)
    }
}

/// Hierarchy over one geometry provider, rebuilt through a boxed builder.
pub struct BvhAccel<const N: usize, P: IPrimitiveType, G: IGeometryProvider<P>> {
    name: &'static str,
    bvh: Bvh<N, P>,
    geometry: G,
    builder: Box<dyn IBvhBuilder<N, P, G>>,
    settings: BuildSettings,
}

impl<const N: usize, P: IPrimitiveType, G: IGeometryProvider<P>> BvhAccel<N, P, G> {
    pub fn new(
        name: &'static str,
        geometry: G,
        builder: Box<dyn IBvhBuilder<N, P, G>>,
        settings: BuildSettings,
    ) -> Result<Self> {
        settings.validate(N)?;
        Ok(Self {
            name,
            bvh: Bvh::new(settings.branching_factor)?,
            geometry,
            builder,
            settings,
        })
    }

    pub fn bvh(&self) -> &Bvh<N, P> {
        &self.bvh
    }

    pub fn geometry(&self) -> &G {
        &self.geometry
    }

    /// Gets the geometry for editing. Changes show up after the next build.
    pub fn geometry_mut(&mut self) -> &mut G {
        &mut self.geometry
    }

    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    /// Replaces the builder, keeping the current tree until the next build.
    pub fn set_builder(&mut self, builder: Box<dyn IBvhBuilder<N, P, G>>) {
        self.builder = builder;
    }
}

impl<const N: usize, P: IPrimitiveType, G: IGeometryProvider<P>> IAccel for BvhAccel<N, P, G> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn builder_name(&self) -> &'static str {
        self.builder.name()
    }

    fn build(&mut self, scheduler: &TaskScheduler) -> Result<()> {
        self.builder.build(&mut self.bvh, &self.geometry, scheduler)
    }

    fn bounds(&self) -> BoundingBox {
        self.bvh.bounds
    }

    fn primitive_count(&self) -> usize {
        self.bvh.num_primitives
    }

    fn statistics(&self) -> BvhStatistics {
        self.bvh.statistics(&self.settings)
    }
}

impl IAccel for SubdivAccel {
    fn name(&self) -> &'static str {
        "bvh4.subdiv"
    }

    fn builder_name(&self) -> &'static str {
        SubdivAccel::builder_name(self)
    }

    fn build(&mut self, scheduler: &TaskScheduler) -> Result<()> {
        SubdivAccel::build(self, scheduler)
    }

    fn bounds(&self) -> BoundingBox {
        self.bvh().bounds
    }

    fn primitive_count(&self) -> usize {
        self.bvh().num_primitives
    }

    fn statistics(&self) -> BvhStatistics {
        SubdivAccel::statistics(self)
    }
}

/// Creates the builder strategy `kind` names.
pub fn create_builder<const N: usize, P, G>(kind: BuilderKind, settings: BuildSettings) -> Box<dyn IBvhBuilder<N, P, G>>
where
    P: IPrimitiveType,
    G: IGeometryProvider<P> + 'static,
{
    match kind {
        BuilderKind::Default | BuilderKind::Sah => Box::new(BvhBuilderSah::new(settings)),
        BuilderKind::SahSpatial => Box::new(BvhBuilderSah::spatial(settings)),
        BuilderKind::SahPresplit => Box::new(BvhBuilderSah::presplit(settings)),
        BuilderKind::Morton => Box::new(BvhBuilderMorton::new(settings)),
    }
}

/// Creates the configured builder if the primitive type supports it.
fn select_builder<const N: usize, P, G>(
    kind: BuilderKind,
    supported: &[BuilderKind],
    settings: &BuildSettings,
) -> Result<Box<dyn IBvhBuilder<N, P, G>>>
where
    P: IPrimitiveType,
    G: IGeometryProvider<P> + 'static,
{
    if !supported.contains(&kind) {
        return Err(AccelError::UnknownBuilder {
            name: kind.name().to_string(),
            primitive: P::NAME.to_string(),
        });
    }
    Ok(create_builder(kind, settings.clone()))
}

fn intersect1<const N: usize, P: IPrimitiveIntersector, G: IGeometryProvider<P>>(
    accel: &BvhAccel<N, P, G>,
    ray: &mut Ray,
) -> Result<bool> {
    Ok(accel.bvh.intersect(ray))
}

fn occluded1<const N: usize, P: IPrimitiveIntersector, G: IGeometryProvider<P>>(
    accel: &BvhAccel<N, P, G>,
    ray: &Ray,
) -> Result<bool> {
    Ok(accel.bvh.occluded(ray))
}

fn intersect_hybrid<const K: usize, const N: usize, P: IPrimitiveIntersector, G: IGeometryProvider<P>>(
    accel: &BvhAccel<N, P, G>,
    packet: &mut RayPacket<K>,
) -> Result<()> {
    accel.bvh.intersect_packet_hybrid(packet, &mut PrimitiveLeafTester);
    Ok(())
}

fn occluded_hybrid<const K: usize, const N: usize, P: IPrimitiveIntersector, G: IGeometryProvider<P>>(
    accel: &BvhAccel<N, P, G>,
    packet: &RayPacket<K>,
) -> Result<[bool; K]> {
    Ok(accel.bvh.occluded_packet_hybrid(packet, &mut PrimitiveLeafTester))
}

fn intersect_chunk<const K: usize, const N: usize, P: IPrimitiveIntersector, G: IGeometryProvider<P>>(
    accel: &BvhAccel<N, P, G>,
    packet: &mut RayPacket<K>,
) -> Result<()> {
    accel.bvh.intersect_packet_chunk(packet, &mut PrimitiveLeafTester);
    Ok(())
}

fn occluded_chunk<const K: usize, const N: usize, P: IPrimitiveIntersector, G: IGeometryProvider<P>>(
    accel: &BvhAccel<N, P, G>,
    packet: &RayPacket<K>,
) -> Result<[bool; K]> {
    Ok(accel.bvh.occluded_packet_chunk(packet, &mut PrimitiveLeafTester))
}

/// Intersector table for primitives with their own intersector, using `traverser` for packets.
fn bvh_intersectors<const N: usize, P: IPrimitiveIntersector, G: IGeometryProvider<P>>(
    name: &'static str,
    traverser: TraverserKind,
) -> Intersectors<BvhAccel<N, P, G>> {
    let mut intersectors = Intersectors::empty(name);
    intersectors.intersect1 = Some(intersect1::<N, P, G>);
    intersectors.occluded1 = Some(occluded1::<N, P, G>);
    match traverser {
        TraverserKind::Chunk => {
            intersectors.intersect4 = Some(intersect_chunk::<4, N, P, G>);
            intersectors.occluded4 = Some(occluded_chunk::<4, N, P, G>);
            intersectors.intersect8 = Some(intersect_chunk::<8, N, P, G>);
            intersectors.occluded8 = Some(occluded_chunk::<8, N, P, G>);
            intersectors.intersect16 = Some(intersect_chunk::<16, N, P, G>);
            intersectors.occluded16 = Some(occluded_chunk::<16, N, P, G>);
        }
        TraverserKind::Default | TraverserKind::Hybrid => {
            intersectors.intersect4 = Some(intersect_hybrid::<4, N, P, G>);
            intersectors.occluded4 = Some(occluded_hybrid::<4, N, P, G>);
            intersectors.intersect8 = Some(intersect_hybrid::<8, N, P, G>);
            intersectors.occluded8 = Some(occluded_hybrid::<8, N, P, G>);
            intersectors.intersect16 = Some(intersect_hybrid::<16, N, P, G>);
            intersectors.occluded16 = Some(occluded_hybrid::<16, N, P, G>);
        }
    }
    intersectors
}

/// 4-wide hierarchy over single-triangle leaves. Spatial splits are not offered and packets are
/// always traversed ray by ray.
pub fn bvh4_triangle1(
    mesh: TriangleMesh,
    config: &AccelConfig,
) -> Result<AccelInstance<BvhAccel<4, Triangle1, TriangleMesh>>> {
    let settings = BuildSettings::for_primitive::<Triangle1>();
    let builder = select_builder(
        config.tri_builder,
        &[BuilderKind::Default, BuilderKind::Sah, BuilderKind::SahPresplit, BuilderKind::Morton],
        &settings,
    )?;
    let name = "bvh4.triangle1";
    let accel = BvhAccel::new(name, mesh, builder, settings)?;
    Ok(AccelInstance::new(accel, bvh_intersectors(name, TraverserKind::Hybrid), config.clone()))
}

/// 4-wide hierarchy over 4-triangle leaf blocks.
pub fn bvh4_triangle4(
    mesh: TriangleMesh,
    config: &AccelConfig,
) -> Result<AccelInstance<BvhAccel<4, Triangle4, TriangleMesh>>> {
    let settings = BuildSettings::for_primitive::<Triangle4>();
    let builder = select_builder(config.tri_builder, &BuilderKind::ALL, &settings)?;
    let name = "bvh4.triangle4";
    let accel = BvhAccel::new(name, mesh, builder, settings)?;
    Ok(AccelInstance::new(accel, bvh_intersectors(name, config.tri_traverser), config.clone()))
}

/// 8-wide hierarchy over 4-triangle leaf blocks.
pub fn bvh8_triangle4(
    mesh: TriangleMesh,
    config: &AccelConfig,
) -> Result<AccelInstance<BvhAccel<8, Triangle4, TriangleMesh>>> {
    let settings = BuildSettings::for_primitive::<Triangle4>().with_branching_factor(8);
    let builder = select_builder(config.tri_builder, &BuilderKind::ALL, &settings)?;
    let name = "bvh8.triangle4";
    let accel = BvhAccel::new(name, mesh, builder, settings)?;
    Ok(AccelInstance::new(accel, bvh_intersectors(name, config.tri_traverser), config.clone()))
}

/// 4-wide hierarchy over curves. Curves have no intersector, so the table is empty.
pub fn bvh4_bezier1(
    curves: BezierCurves,
    config: &AccelConfig,
) -> Result<AccelInstance<BvhAccel<4, Bezier1, BezierCurves>>> {
    let settings = BuildSettings::for_primitive::<Bezier1>();
    let name = "bvh4.bezier1";
    let accel = BvhAccel::new(name, curves, Box::new(BvhBuilderSah::new(settings.clone())), settings)?;
    Ok(AccelInstance::new(accel, Intersectors::empty(name), config.clone()))
}

/// 4-wide hierarchy over patches that are tessellated at the configured level when first hit.
pub fn bvh4_subdiv(mesh: SubdivMesh, config: &AccelConfig) -> Result<AccelInstance<SubdivAccel>> {
    let settings = BuildSettings::for_primitive::<PatchLeaf>();
    let builder = Box::new(BvhBuilderSah::new(settings.clone()));
    let accel = SubdivAccel::new(mesh, builder, settings, config.subdivision_level)?;

    let mut intersectors = Intersectors::empty("bvh4.subdiv");
    intersectors.intersect1 = Some(SubdivAccel::intersect);
    intersectors.occluded1 = Some(SubdivAccel::occluded);
    intersectors.intersect4 = Some(SubdivAccel::intersect_packet::<4>);
    intersectors.occluded4 = Some(SubdivAccel::occluded_packet::<4>);
    intersectors.intersect8 = Some(SubdivAccel::intersect_packet::<8>);
    intersectors.occluded8 = Some(SubdivAccel::occluded_packet::<8>);
    intersectors.intersect16 = Some(SubdivAccel::intersect_packet::<16>);
    intersectors.occluded16 = Some(SubdivAccel::occluded_packet::<16>);
    Ok(AccelInstance::new(accel, intersectors, config.clone()))
}
