use super::object_partition::ObjectSplit;
use super::spatial_split::SpatialSplit;
use crate::accel::primitives::{PrimInfo, PrimRef};

/// Split chosen for a build record.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Split {
    /// No split beats keeping the range whole. Splitting falls back to halving the range by index.
    Invalid,
    Object(ObjectSplit),
    Spatial(SpatialSplit),
}

impl Split {
    /// Surface area heuristic cost, infinite for `Invalid`.
    #[inline(always)]
    pub fn sah(&self) -> f32 {
        match self {
            Split::Invalid => f32::INFINITY,
            Split::Object(split) => split.sah,
            Split::Spatial(split) => split.sah,
        }
    }

    #[inline(always)]
    pub fn is_valid(&self) -> bool {
        !matches!(self, Split::Invalid)
    }
}

/// Primitives of a pending range.
///
/// Object partitions split a slice of the shared primitive array in place. Spatial splits
/// replicate primitives, so their children own their primitives in a list instead.
#[derive(Debug)]
pub enum PrimStorage<'a> {
    Slice(&'a mut [PrimRef]),
    List(Vec<PrimRef>),
}

impl<'a> PrimStorage<'a> {
    #[inline(always)]
    pub fn as_slice(&self) -> &[PrimRef] {
        match self {
            PrimStorage::Slice(prims) => prims,
            PrimStorage::List(prims) => prims,
        }
    }

    #[inline(always)]
    pub fn as_mut_slice(&mut self) -> &mut [PrimRef] {
        match self {
            PrimStorage::Slice(prims) => prims,
            PrimStorage::List(prims) => prims,
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Splits into the primitives before and after `mid`.
    pub fn split_at(self, mid: usize) -> (Self, Self) {
        match self {
            PrimStorage::Slice(prims) => {
                let (left, right) = prims.split_at_mut(mid);
                (PrimStorage::Slice(left), PrimStorage::Slice(right))
            }
            PrimStorage::List(mut prims) => {
                let right = prims.split_off(mid);
                (PrimStorage::List(prims), PrimStorage::List(right))
            }
        }
    }
}

/// Node slot a finished subtree reference must be written to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParentSlot {
    Root,
    Child { node: u32, slot: u8 },
}

/// Pending range of a build, consumed exactly once by leaf or node creation.
#[derive(Debug)]
pub struct BuildRecord<'a> {
    pub prims: PrimStorage<'a>,
    pub info: PrimInfo,
    pub depth: usize,
    /// Split precomputed for the range; used both by the leaf test and when the range is split.
    pub split: Split,
    pub parent: ParentSlot,
}

impl<'a> BuildRecord<'a> {
    pub fn new(prims: PrimStorage<'a>, info: PrimInfo, depth: usize) -> Self {
        Self {
            prims,
            info,
            depth,
            split: Split::Invalid,
            parent: ParentSlot::Root,
        }
    }

    #[inline(always)]
    pub fn size(&self) -> usize {
        self.info.count
    }

    /// Half area of the range's geometry bounds.
    #[inline(always)]
    pub fn area(&self) -> f32 {
        self.info.half_area()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_split_keeps_order() {
        let mut prims: Vec<PrimRef> = (0..5).map(|i| PrimRef { prim_id: i, ..PrimRef::default() }).collect();
        let (left, right) = PrimStorage::Slice(&mut prims).split_at(2);
        assert_eq!(left.len(), 2);
        assert_eq!(right.as_slice()[0].prim_id, 2);

        let (left, right) = PrimStorage::List(prims.clone()).split_at(4);
        assert_eq!(left.len(), 4);
        assert_eq!(right.as_slice()[0].prim_id, 4);
        assert!(matches!(right, PrimStorage::List(_)));
    }

    #[test]
    fn test_invalid_split_costs_infinity() {
        assert_eq!(Split::Invalid.sah(), f32::INFINITY);
        assert!(!Split::Invalid.is_valid());
    }
}
