use glam::Vec3;
use std::fmt;

/// Provides simple axis-aligned bounding box functionality.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    /// Location with the lowest X, Y, and Z coordinates in the axis-aligned bounding box.
    pub min: Vec3,
    /// Location with the highest X, Y, and Z coordinates in the axis-aligned bounding box.
    pub max: Vec3,
}

impl Default for BoundingBox {
    #[inline]
    fn default() -> Self {
        Self::EMPTY
    }
}

impl BoundingBox {
    /// Inverted box that acts as the identity for merging.
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// Constructs a bounding box from the specified minimum and maximum.
    #[inline]
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Constructs a degenerate bounding box around a single point.
    #[inline]
    pub fn from_point(point: Vec3) -> Self {
        Self {
            min: point,
            max: point,
        }
    }

    /// Creates the smallest possible bounding box that contains a list of points.
    pub fn from_points(points: &[Vec3]) -> Self {
        if points.is_empty() {
            panic!("Cannot construct a bounding box from an empty list.");
        }
        let mut min = points[0];
        let mut max = min;
        for point in points.iter().skip(1) {
            min = min.min(*point);
            max = max.max(*point);
        }
        Self { min, max }
    }

    /// True if the box contains no point, which is the case for `EMPTY`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    /// Computes a bounding box which contains two other bounding boxes.
    #[inline]
    pub fn create_merged(min_a: Vec3, max_a: Vec3, min_b: Vec3, max_b: Vec3) -> (Vec3, Vec3) {
        (min_a.min(min_b), max_a.max(max_b))
    }

    /// Computes a bounding box which contains two other bounding boxes.
    #[inline]
    pub fn create_merged_boxes(a: Self, b: Self) -> Self {
        let (min, max) = Self::create_merged(a.min, a.max, b.min, b.max);
        Self { min, max }
    }

    /// Grows the box to contain another box.
    #[inline]
    pub fn extend(&mut self, other: &Self) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Grows the box to contain a point.
    #[inline]
    pub fn extend_point(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Computes the overlap of two boxes. The result is empty if they are disjoint.
    #[inline]
    pub fn intersection(a: &Self, b: &Self) -> Self {
        Self {
            min: a.min.max(b.min),
            max: a.max.min(b.max),
        }
    }

    /// Determines if a bounding box intersects another bounding box.
    #[inline]
    pub fn intersects(a: Self, b: Self) -> bool {
        Self::intersects_bounds(a.min, a.max, b.min, b.max)
    }

    /// Determines if a bounding box intersects another bounding box.
    #[inline]
    pub fn intersects_bounds(min_a: Vec3, max_a: Vec3, min_b: Vec3, max_b: Vec3) -> bool {
        let no_intersection_on_axes = max_a.cmplt(min_b) | max_b.cmplt(min_a);
        !no_intersection_on_axes.any()
    }

    /// Extent of the box along each axis.
    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Twice the centroid. Binning works on this directly to skip the multiply.
    #[inline]
    pub fn center2(&self) -> Vec3 {
        self.min + self.max
    }

    /// Centroid of the box.
    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Computes the volume of the bounding box.
    #[inline]
    pub fn compute_volume(&self) -> f32 {
        let diagonal = self.max - self.min;
        diagonal.x * diagonal.y * diagonal.z
    }

    /// Half of the surface area. This is the metric the surface area heuristic compares.
    #[inline]
    pub fn half_area(&self) -> f32 {
        let d = self.max - self.min;
        d.x * d.y + d.y * d.z + d.z * d.x
    }

    /// Half surface area that reports zero for empty boxes instead of a garbage value.
    #[inline]
    pub fn safe_half_area(&self) -> f32 {
        if self.is_empty() {
            0.0
        } else {
            self.half_area()
        }
    }

    /// Clips the box against the plane `axis = position`, returning the parts on each side.
    /// Either part may come back empty.
    #[inline]
    pub fn split(&self, dim: usize, position: f32) -> (Self, Self) {
        let mut left = *self;
        let mut right = *self;
        left.max[dim] = left.max[dim].min(position);
        right.min[dim] = right.min[dim].max(position);
        (left, right)
    }

    /// True if every point of `other` lies in this box.
    #[inline]
    pub fn contains_box(&self, other: &Self) -> bool {
        self.min.cmple(other.min).all() && self.max.cmpge(other.max).all()
    }

    /// Index of the axis with the largest extent.
    #[inline]
    pub fn max_dim(&self) -> usize {
        let d = self.size();
        if d.x >= d.y && d.x >= d.z {
            0
        } else if d.y >= d.z {
            1
        } else {
            2
        }
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_merge_identity() {
        let b = BoundingBox::new(Vec3::new(-1.0, 0.0, 2.0), Vec3::new(3.0, 1.0, 4.0));
        assert!(BoundingBox::EMPTY.is_empty());
        assert_eq!(BoundingBox::create_merged_boxes(BoundingBox::EMPTY, b), b);
        let mut e = BoundingBox::EMPTY;
        e.extend(&b);
        assert_eq!(e, b);
    }

    #[test]
    fn test_half_area() {
        let b = BoundingBox::new(Vec3::ZERO, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(b.half_area(), 2.0 + 6.0 + 3.0);
        assert_eq!(BoundingBox::EMPTY.safe_half_area(), 0.0);
    }

    #[test]
    fn test_split() {
        let b = BoundingBox::new(Vec3::ZERO, Vec3::splat(2.0));
        let (l, r) = b.split(1, 0.5);
        assert_eq!(l.max.y, 0.5);
        assert_eq!(r.min.y, 0.5);
        assert_eq!(BoundingBox::create_merged_boxes(l, r), b);
        let (l, r) = b.split(0, 5.0);
        assert_eq!(l, b);
        assert!(r.is_empty());
    }

    #[test]
    fn test_intersection() {
        let a = BoundingBox::new(Vec3::ZERO, Vec3::splat(2.0));
        let b = BoundingBox::new(Vec3::splat(1.0), Vec3::splat(3.0));
        let c = BoundingBox::new(Vec3::splat(5.0), Vec3::splat(6.0));
        assert_eq!(
            BoundingBox::intersection(&a, &b),
            BoundingBox::new(Vec3::splat(1.0), Vec3::splat(2.0))
        );
        assert!(BoundingBox::intersection(&a, &c).is_empty());
        assert!(BoundingBox::intersects(a, b));
        assert!(!BoundingBox::intersects(a, c));
    }

    #[test]
    #[should_panic(expected = "empty list")]
    fn test_from_points_empty() {
        BoundingBox::from_points(&[]);
    }
}
