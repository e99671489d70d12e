use super::node::{MAX_BRANCHING_FACTOR, MAX_LEAF_BLOCKS};
use crate::accel::primitives::IPrimitiveType;
use crate::error::{AccelError, Result};

/// Numeric parameters of a build.
#[derive(Clone, Debug, PartialEq)]
pub struct BuildSettings {
    /// Children per inner node.
    pub branching_factor: usize,
    /// Hard depth limit. Exceeding it aborts the build.
    pub max_depth: usize,
    /// Primitive granularity of the leaf cost. Leaves are costed in blocks of this many primitives.
    pub sah_block_size: usize,
    /// Ranges with at most this many primitives always become leaves.
    pub min_leaf_size: usize,
    /// Ranges with more primitives never become leaves through the cost test.
    pub max_leaf_size: usize,
    /// Cost of traversing one node.
    pub traversal_cost: f32,
    /// Cost of intersecting one block of primitives.
    pub intersection_cost: f32,
    /// Spatial splits are only searched when the object split's children overlap by more than
    /// this fraction of the parent's area.
    pub spatial_split_overlap_threshold: f32,
    /// Ranges this close to `max_depth` are finished with balanced leaf subtrees.
    pub large_leaf_levels: usize,
    /// Subtrees below this size are built by one thread without further hand-off.
    pub single_threaded_threshold: usize,
    /// Builds with fewer primitives run single threaded.
    pub parallel_build_threshold: usize,
    /// Spatial splits and presplitting may add this fraction of the primitive count as replicas.
    pub replication_factor: f32,
    /// Presplitting targets primitives whose area exceeds this multiple of the average.
    pub presplit_area_factor: f32,
    /// Maximum number of times presplitting halves one primitive.
    pub presplit_max_levels: usize,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            branching_factor: 4,
            max_depth: 64,
            sah_block_size: 1,
            min_leaf_size: 1,
            max_leaf_size: 8,
            traversal_cost: 1.0,
            intersection_cost: 1.0,
            spatial_split_overlap_threshold: 0.2,
            large_leaf_levels: 8,
            single_threaded_threshold: 4096,
            parallel_build_threshold: 50_000,
            replication_factor: 1.0,
            presplit_area_factor: 4.0,
            presplit_max_levels: 4,
        }
    }
}

impl BuildSettings {
    /// Default settings costed in blocks of the primitive type.
    pub fn for_primitive<P: IPrimitiveType>() -> Self {
        Self {
            sah_block_size: P::BLOCK_SIZE,
            max_leaf_size: (2 * P::BLOCK_SIZE).max(8),
            ..Self::default()
        }
    }

    pub fn with_branching_factor(mut self, branching_factor: usize) -> Self {
        self.branching_factor = branching_factor;
        self
    }

    pub fn with_leaf_sizes(mut self, min_leaf_size: usize, max_leaf_size: usize) -> Self {
        self.min_leaf_size = min_leaf_size;
        self.max_leaf_size = max_leaf_size;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Number of cost blocks for `count` primitives.
    #[inline(always)]
    pub fn blocks(&self, count: usize) -> usize {
        count.div_ceil(self.sah_block_size)
    }

    /// Largest leaf the primitive type can store, in primitives.
    #[inline]
    pub fn effective_max_leaf_size<P: IPrimitiveType>(&self) -> usize {
        self.max_leaf_size.min(MAX_LEAF_BLOCKS * P::BLOCK_SIZE)
    }

    /// Checks the settings for a node layout holding at most `max_branching` children.
    pub fn validate(&self, max_branching: usize) -> Result<()> {
        let maximum = max_branching.min(MAX_BRANCHING_FACTOR);
        if self.branching_factor > maximum {
            return Err(AccelError::BranchingFactorTooLarge {
                requested: self.branching_factor,
                maximum,
            });
        }
        if self.branching_factor < 2 {
            return Err(AccelError::InvalidSettings(format!(
                "branching factor {} is below 2",
                self.branching_factor
            )));
        }
        if self.max_depth == 0 {
            return Err(AccelError::InvalidSettings("max depth must be positive".into()));
        }
        if self.sah_block_size == 0 {
            return Err(AccelError::InvalidSettings("sah block size must be positive".into()));
        }
        if self.min_leaf_size == 0 || self.min_leaf_size > self.max_leaf_size {
            return Err(AccelError::InvalidSettings(format!(
                "leaf sizes {}..={} are not a valid range",
                self.min_leaf_size, self.max_leaf_size
            )));
        }
        let costs = [self.traversal_cost, self.intersection_cost];
        if costs.iter().any(|cost| !cost.is_finite() || *cost <= 0.0) {
            return Err(AccelError::InvalidSettings("costs must be finite and positive".into()));
        }
        if !(self.spatial_split_overlap_threshold >= 0.0) || !(self.replication_factor >= 0.0) {
            return Err(AccelError::InvalidSettings(
                "split thresholds must not be negative".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::primitives::Triangle4;

    #[test]
    fn test_defaults_are_valid() {
        assert_eq!(BuildSettings::default().validate(4), Ok(()));
        let settings = BuildSettings::for_primitive::<Triangle4>();
        assert_eq!(settings.sah_block_size, 4);
        assert_eq!(settings.blocks(5), 2);
        assert_eq!(settings.spatial_split_overlap_threshold, 0.2);
    }

    #[test]
    fn test_branching_factor_limits() {
        let settings = BuildSettings::default().with_branching_factor(8);
        assert_eq!(
            settings.validate(4),
            Err(AccelError::BranchingFactorTooLarge {
                requested: 8,
                maximum: 4
            })
        );
        assert_eq!(settings.validate(16), Ok(()));
        let settings = BuildSettings::default().with_branching_factor(32);
        assert!(matches!(
            settings.validate(64),
            Err(AccelError::BranchingFactorTooLarge { maximum: 16, .. })
        ));
        assert!(matches!(
            BuildSettings::default().with_branching_factor(1).validate(4),
            Err(AccelError::InvalidSettings(_))
        ));
    }

    #[test]
    fn test_leaf_ceiling() {
        let settings = BuildSettings::default().with_leaf_sizes(1, 100);
        assert_eq!(settings.effective_max_leaf_size::<Triangle4>(), 60);
        assert!(matches!(
            BuildSettings::default().with_leaf_sizes(5, 4).validate(4),
            Err(AccelError::InvalidSettings(_))
        ));
    }
}
