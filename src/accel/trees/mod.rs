//! Bounding volume hierarchies: node layout, builders, layout passes, refit and traversal.

mod build_record;
mod build_settings;
mod bvh;
mod bvh_builder;
mod bvh_builder_morton;
mod bvh_builder_sah;
mod bvh_builder_sah_parallel;
mod bvh_diagnostics;
mod bvh_layout;
mod bvh_refit;
mod bvh_statistics;
mod bvh_traversal;
mod node;
pub mod object_partition;
mod presplit;
pub mod spatial_split;

pub use build_record::{BuildRecord, ParentSlot, PrimStorage, Split};
pub use build_settings::BuildSettings;
pub use bvh::{Bvh, Bvh16, Bvh4, Bvh8};
pub use bvh_builder::IBvhBuilder;
pub use bvh_builder_morton::{BvhBuilderMorton, MortonMapping};
pub use bvh_builder_sah::BvhBuilderSah;
pub use bvh_refit::BvhRefitBuilder;
pub use bvh_statistics::BvhStatistics;
pub use bvh_traversal::{intersects_ray, IRayLeafTester, PrimitiveLeafTester, TRAVERSAL_STACK_CAPACITY};
pub use node::{Node, Node16, Node4, Node8, NodeRef, MAX_BRANCHING_FACTOR, MAX_LEAF_BLOCKS};
pub use presplit::presplit;
