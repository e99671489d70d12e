//! Bounding volume hierarchy construction and traversal for ray tracing.
//!
//! Builders partition primitives with a binned surface area heuristic (optionally with spatial
//! splits), recurse over N-wide nodes and parallelize the top of the tree on an explicit
//! [`utilities::task_scheduling::TaskScheduler`]. Subdivision patches are tessellated lazily the
//! first time a ray reaches them.

pub mod accel;
pub mod config;
pub mod error;
pub mod utilities;

pub use config::AccelConfig;
pub use error::{AccelError, Result};
