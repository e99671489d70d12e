/// Deepest subdivision level the lookup tables cover.
pub const MAX_SUBDIVISION_LEVEL: usize = 8;

/// Parameters of a regular `u_res` x `v_res` grid over `[0, 1]^2`, stored row by row.
///
/// The last column of `u` and the last row of `v` are exactly 1.0 rather than the result of a
/// division, so neighbouring patches meet without cracks.
///
/// # Returns
/// The `u` and `v` arrays, `u_res * v_res` entries each.
pub fn grid_uv_tessellator(u_res: usize, v_res: usize) -> (Vec<f32>, Vec<f32>) {
    debug_assert!(u_res >= 2 && v_res >= 2, "A grid needs at least two points per side.");
    let inv_u_segments = 1.0 / (u_res - 1) as f32;
    let inv_v_segments = 1.0 / (v_res - 1) as f32;
    let mut u_array = Vec::with_capacity(u_res * v_res);
    let mut v_array = Vec::with_capacity(u_res * v_res);
    for y in 0..v_res {
        let v = if y + 1 == v_res { 1.0 } else { y as f32 * inv_v_segments };
        for x in 0..u_res {
            u_array.push(if x + 1 == u_res { 1.0 } else { x as f32 * inv_u_segments });
            v_array.push(v);
        }
    }
    (u_array, v_array)
}

/// Grid parameters for every subdivision level, so quad corners at shared indices get
/// bit-identical parameters.
#[derive(Clone, Debug)]
pub struct RegularGridLookUpTables {
    tables: Vec<Vec<f32>>,
}

impl Default for RegularGridLookUpTables {
    fn default() -> Self {
        Self::new()
    }
}

impl RegularGridLookUpTables {
    pub fn new() -> Self {
        let tables = (0..=MAX_SUBDIVISION_LEVEL)
            .map(|level| {
                let grid_size = (1 << level) + 1;
                let (u_array, _) = grid_uv_tessellator(grid_size, 2);
                u_array[..grid_size].to_vec()
            })
            .collect();
        Self { tables }
    }

    /// Points per side of the grid at `level`.
    #[inline(always)]
    pub fn grid_size(level: usize) -> usize {
        (1 << level) + 1
    }

    /// Parameter of grid index `index` at `level`.
    #[inline(always)]
    pub fn look_up(&self, level: usize, index: usize) -> f32 {
        self.tables[level][index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_borders_are_exactly_one() {
        let (u, v) = grid_uv_tessellator(7, 4);
        assert_eq!(u.len(), 28);
        for row in 0..4 {
            assert_eq!(u[row * 7 + 6], 1.0);
            assert_eq!(u[row * 7], 0.0);
        }
        assert!(v[21..].iter().all(|&value| value == 1.0));
        assert!((u[3] - 0.5).abs() < 1e-7);
        assert!((v[7] - 1.0 / 3.0).abs() < 1e-7);
    }

    #[test]
    fn test_lookup_tables_match_grid() {
        let tables = RegularGridLookUpTables::new();
        assert_eq!(tables.look_up(0, 0), 0.0);
        assert_eq!(tables.look_up(0, 1), 1.0);
        assert_eq!(tables.look_up(3, 4), 0.5);
        assert_eq!(tables.look_up(MAX_SUBDIVISION_LEVEL, RegularGridLookUpTables::grid_size(MAX_SUBDIVISION_LEVEL) - 1), 1.0);
    }
}
