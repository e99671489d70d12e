//! Error types for acceleration structure construction and traversal.

use thiserror::Error;

/// Errors raised by the scheduler, the builders and the accel registry.
///
/// Every variant is fatal for the operation that produced it: it unwinds to the
/// top-level build or traversal entry point and is never retried internally.
/// Degenerate splits and lazy-build contention are not errors and never show up here.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AccelError {
    /// `create` was called on a scheduler whose threads are already running.
    #[error("threads already running")]
    ThreadsAlreadyRunning,

    /// A scheduler-dependent call happened before `create` or after `destroy`.
    #[error("threads not running")]
    ThreadsNotRunning,

    /// The operating system refused to start a pool thread.
    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawnFailed(String),

    /// Requested branching factor exceeds what the node layout can hold.
    #[error("branching factor {requested} too large, maximum is {maximum}")]
    BranchingFactorTooLarge {
        /// Branching factor asked for.
        requested: usize,
        /// Largest supported branching factor.
        maximum: usize,
    },

    /// Build settings that cannot produce a valid tree.
    #[error("invalid build settings: {0}")]
    InvalidSettings(String),

    /// Builder name not known for the primitive type.
    #[error("unknown builder {name} for {primitive}")]
    UnknownBuilder {
        /// Name from the configuration.
        name: String,
        /// Primitive type the builder was requested for.
        primitive: String,
    },

    /// Traverser name not known for the primitive type.
    #[error("unknown traverser {name} for {primitive}")]
    UnknownTraverser {
        /// Name from the configuration.
        name: String,
        /// Primitive type the traverser was requested for.
        primitive: String,
    },

    /// Malformed configuration string entry.
    #[error("invalid configuration entry: {0}")]
    InvalidConfig(String),

    /// Recursion went past the hard depth limit.
    #[error("depth limit reached: depth {depth} exceeds maximum {max_depth}")]
    DepthLimitReached {
        /// Depth at which the build gave up.
        depth: usize,
        /// Configured maximum depth.
        max_depth: usize,
    },

    /// A preallocated arena ran out of space.
    #[error("not enough {arena} space allocated (capacity {capacity})")]
    ArenaExhausted {
        /// Which arena overflowed.
        arena: &'static str,
        /// Capacity in items.
        capacity: usize,
    },

    /// The registry holds no intersector for the requested packet width.
    #[error("no intersector{width} registered for {accel}")]
    IntersectorUnavailable {
        /// Accel name.
        accel: &'static str,
        /// Packet width.
        width: usize,
    },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AccelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            AccelError::ThreadsAlreadyRunning.to_string(),
            "threads already running"
        );
        assert_eq!(
            AccelError::UnknownBuilder {
                name: "fast".into(),
                primitive: "triangle4".into()
            }
            .to_string(),
            "unknown builder fast for triangle4"
        );
        assert_eq!(
            AccelError::ArenaExhausted {
                arena: "bvh node",
                capacity: 12
            }
            .to_string(),
            "not enough bvh node space allocated (capacity 12)"
        );
    }
}
