use super::bvh::Bvh;
use super::node::NodeRef;
use crate::accel::primitives::{IPrimitiveIntersector, IPrimitiveType};
use crate::accel::ray::{Ray, RayInverse, RayPacket};
use crate::utilities::BoundingBox;

/// Entries of the fixed traversal stack. Each level pushes at most `N - 1` entries, so this covers
/// 16-wide trees at the default depth limit.
pub const TRAVERSAL_STACK_CAPACITY: usize = 1024;

/// Intersects the leaves reached by a traversal.
pub trait IRayLeafTester<P> {
    /// Intersects the blocks of one leaf, recording the closest hit in `ray`. Returns true on any hit.
    fn intersect_leaf(&mut self, blocks: &[P], ray: &mut Ray) -> bool;

    /// Returns true if anything in the blocks of one leaf blocks the ray interval.
    fn occluded_leaf(&mut self, blocks: &[P], ray: &Ray) -> bool;
}

/// Tests leaves block by block through the primitive's own intersector.
#[derive(Clone, Copy, Debug, Default)]
pub struct PrimitiveLeafTester;

impl<P: IPrimitiveIntersector> IRayLeafTester<P> for PrimitiveLeafTester {
    #[inline]
    fn intersect_leaf(&mut self, blocks: &[P], ray: &mut Ray) -> bool {
        let mut hit = false;
        for block in blocks {
            hit |= block.intersect(ray);
        }
        hit
    }

    #[inline]
    fn occluded_leaf(&mut self, blocks: &[P], ray: &Ray) -> bool {
        blocks.iter().any(|block| block.occluded(ray))
    }
}

/// Slab test of a ray against a box.
///
/// # Returns
/// The entry distance if the box overlaps `[ray.t_near, ray.t_far]`.
#[inline(always)]
pub fn intersects_ray(bounds: &BoundingBox, ray: &Ray, inverse: &RayInverse) -> Option<f32> {
    let t0 = (bounds.min - inverse.origin) * inverse.inverse_direction;
    let t1 = (bounds.max - inverse.origin) * inverse.inverse_direction;
    let t_entry = t0.min(t1).max_element().max(ray.t_near);
    let t_exit = t0.max(t1).min_element().min(ray.t_far);
    (t_entry <= t_exit).then_some(t_entry)
}

/// Fixed-capacity stack of node references and the distance at which the ray enters each one.
struct TraversalStack {
    entries: [(NodeRef, f32); TRAVERSAL_STACK_CAPACITY],
    end: usize,
}

impl TraversalStack {
    #[inline(always)]
    fn new(root: NodeRef, t_entry: f32) -> Self {
        let mut stack = Self {
            entries: [(NodeRef::Empty, 0.0); TRAVERSAL_STACK_CAPACITY],
            end: 0,
        };
        stack.push(root, t_entry);
        stack
    }

    #[inline(always)]
    fn push(&mut self, node_ref: NodeRef, t_entry: f32) {
        debug_assert!(self.end < TRAVERSAL_STACK_CAPACITY, "Fixed size stack overflow.");
        self.entries[self.end] = (node_ref, t_entry);
        self.end += 1;
    }

    /// Pops entries until one starts within `t_far`. Entries beyond it lie behind a closer hit.
    #[inline(always)]
    fn pop_within(&mut self, t_far: f32) -> Option<NodeRef> {
        while self.end > 0 {
            self.end -= 1;
            let (node_ref, t_entry) = self.entries[self.end];
            if t_entry <= t_far {
                return Some(node_ref);
            }
        }
        None
    }
}

impl<const N: usize, P: IPrimitiveType> Bvh<N, P> {
    /// Pushes the children of `node` hit by the ray, the nearest last so it is visited first.
    #[inline(always)]
    fn push_hit_children(&self, index: usize, ray: &Ray, inverse: &RayInverse, stack: &mut TraversalStack) {
        let node = &self.nodes[index];
        let mut hits = [(0.0f32, NodeRef::Empty); N];
        let mut hit_count = 0;
        for (bounds, child) in node.valid_children() {
            if let Some(t) = intersects_ray(&bounds, ray, inverse) {
                hits[hit_count] = (t, child);
                hit_count += 1;
            }
        }
        let hits = &mut hits[..hit_count];
        hits.sort_unstable_by(|a, b| b.0.total_cmp(&a.0));
        for &(t_entry, child) in hits.iter() {
            stack.push(child, t_entry);
        }
    }

    /// Finds the closest hit along `ray`, shrinking `ray.t_far` to it.
    ///
    /// # Returns
    /// True if anything was hit.
    pub fn intersect_with<T: IRayLeafTester<P>>(&self, ray: &mut Ray, tester: &mut T) -> bool {
        if self.root.is_empty() {
            return false;
        }
        let inverse = RayInverse::new(ray);
        let Some(t_entry) = intersects_ray(&self.bounds, ray, &inverse) else {
            return false;
        };
        let mut stack = TraversalStack::new(self.root, t_entry);
        let mut hit = false;
        while let Some(node_ref) = stack.pop_within(ray.t_far) {
            match node_ref {
                NodeRef::Empty => {}
                NodeRef::Leaf { .. } => {
                    if let Some(blocks) = self.leaf(node_ref) {
                        hit |= tester.intersect_leaf(blocks, ray);
                    }
                }
                NodeRef::Inner { index } | NodeRef::Barrier { index } => {
                    self.push_hit_children(index as usize, ray, &inverse, &mut stack);
                }
            }
        }
        hit
    }

    /// Returns true as soon as anything blocks the ray interval.
    pub fn occluded_with<T: IRayLeafTester<P>>(&self, ray: &Ray, tester: &mut T) -> bool {
        if self.root.is_empty() {
            return false;
        }
        let inverse = RayInverse::new(ray);
        let Some(t_entry) = intersects_ray(&self.bounds, ray, &inverse) else {
            return false;
        };
        let mut stack = TraversalStack::new(self.root, t_entry);
        while let Some(node_ref) = stack.pop_within(ray.t_far) {
            match node_ref {
                NodeRef::Empty => {}
                NodeRef::Leaf { .. } => {
                    if let Some(blocks) = self.leaf(node_ref) {
                        if tester.occluded_leaf(blocks, ray) {
                            return true;
                        }
                    }
                }
                NodeRef::Inner { index } | NodeRef::Barrier { index } => {
                    self.push_hit_children(index as usize, ray, &inverse, &mut stack);
                }
            }
        }
        false
    }

    /// Per-ray traversal of every active lane of a packet.
    pub fn intersect_packet_hybrid<const K: usize, T: IRayLeafTester<P>>(
        &self,
        packet: &mut RayPacket<K>,
        tester: &mut T,
    ) {
        for lane in 0..K {
            if packet.active[lane] {
                self.intersect_with(&mut packet.rays[lane], tester);
            }
        }
    }

    /// Per-ray occlusion of every active lane of a packet. Inactive lanes report false.
    pub fn occluded_packet_hybrid<const K: usize, T: IRayLeafTester<P>>(
        &self,
        packet: &RayPacket<K>,
        tester: &mut T,
    ) -> [bool; K] {
        let mut occluded = [false; K];
        for lane in 0..K {
            occluded[lane] = packet.active[lane] && self.occluded_with(&packet.rays[lane], tester);
        }
        occluded
    }

    /// Lanes of `packet` that are in `lanes` and hit `bounds`, plus the nearest entry among them.
    #[inline(always)]
    fn packet_hits<const K: usize>(
        bounds: &BoundingBox,
        packet: &RayPacket<K>,
        inverses: &[RayInverse; K],
        lanes: &[bool; K],
    ) -> Option<([bool; K], f32)> {
        let mut mask = [false; K];
        let mut nearest = f32::INFINITY;
        for lane in 0..K {
            if !lanes[lane] {
                continue;
            }
            if let Some(t) = intersects_ray(bounds, &packet.rays[lane], &inverses[lane]) {
                mask[lane] = true;
                nearest = nearest.min(t);
            }
        }
        mask.contains(&true).then_some((mask, nearest))
    }

    /// Packet traversal with one shared stack. A node is entered when any active lane hits it, and
    /// leaves are tested against the lanes that hit the leaf's slot.
    pub fn intersect_packet_chunk<const K: usize, T: IRayLeafTester<P>>(
        &self,
        packet: &mut RayPacket<K>,
        tester: &mut T,
    ) {
        if self.root.is_empty() || !packet.any_active() {
            return;
        }
        let inverses: [RayInverse; K] = std::array::from_fn(|lane| RayInverse::new(&packet.rays[lane]));
        let Some((root_mask, _)) = Self::packet_hits(&self.bounds, packet, &inverses, &packet.active) else {
            return;
        };
        let mut stack: Vec<(NodeRef, [bool; K])> = Vec::with_capacity(64);
        stack.push((self.root, root_mask));
        while let Some((node_ref, mask)) = stack.pop() {
            match node_ref {
                NodeRef::Empty => {}
                NodeRef::Leaf { .. } => {
                    let Some(blocks) = self.leaf(node_ref) else {
                        continue;
                    };
                    for lane in 0..K {
                        if mask[lane] {
                            tester.intersect_leaf(blocks, &mut packet.rays[lane]);
                        }
                    }
                }
                NodeRef::Inner { index } | NodeRef::Barrier { index } => {
                    let node = &self.nodes[index as usize];
                    let mut hits: Vec<(f32, NodeRef, [bool; K])> = Vec::with_capacity(N);
                    for (bounds, child) in node.valid_children() {
                        // Lanes that shortened their interval since the push are re-tested here.
                        if let Some((child_mask, t)) = Self::packet_hits(&bounds, packet, &inverses, &mask) {
                            hits.push((t, child, child_mask));
                        }
                    }
                    hits.sort_unstable_by(|a, b| b.0.total_cmp(&a.0));
                    stack.extend(hits.into_iter().map(|(_, child, child_mask)| (child, child_mask)));
                }
            }
        }
    }

    /// Occlusion with one shared stack. Lanes drop out as soon as they are occluded.
    pub fn occluded_packet_chunk<const K: usize, T: IRayLeafTester<P>>(
        &self,
        packet: &RayPacket<K>,
        tester: &mut T,
    ) -> [bool; K] {
        let mut occluded = [false; K];
        if self.root.is_empty() || !packet.any_active() {
            return occluded;
        }
        let inverses: [RayInverse; K] = std::array::from_fn(|lane| RayInverse::new(&packet.rays[lane]));
        let Some((root_mask, _)) = Self::packet_hits(&self.bounds, packet, &inverses, &packet.active) else {
            return occluded;
        };
        let mut stack: Vec<(NodeRef, [bool; K])> = Vec::with_capacity(64);
        stack.push((self.root, root_mask));
        while let Some((node_ref, mut mask)) = stack.pop() {
            for lane in 0..K {
                mask[lane] &= !occluded[lane];
            }
            if !mask.contains(&true) {
                continue;
            }
            match node_ref {
                NodeRef::Empty => {}
                NodeRef::Leaf { .. } => {
                    let Some(blocks) = self.leaf(node_ref) else {
                        continue;
                    };
                    for lane in 0..K {
                        if mask[lane] && tester.occluded_leaf(blocks, &packet.rays[lane]) {
                            occluded[lane] = true;
                        }
                    }
                    let done = (0..K).all(|lane| occluded[lane] || !packet.active[lane]);
                    if done {
                        break;
                    }
                }
                NodeRef::Inner { index } | NodeRef::Barrier { index } => {
                    for (bounds, child) in self.nodes[index as usize].valid_children() {
                        if let Some((child_mask, _)) = Self::packet_hits(&bounds, packet, &inverses, &mask) {
                            stack.push((child, child_mask));
                        }
                    }
                }
            }
        }
        occluded
    }
}

impl<const N: usize, P: IPrimitiveIntersector> Bvh<N, P> {
    /// Closest hit through the primitive intersector.
    pub fn intersect(&self, ray: &mut Ray) -> bool {
        self.intersect_with(ray, &mut PrimitiveLeafTester)
    }

    /// Occlusion through the primitive intersector.
    pub fn occluded(&self, ray: &Ray) -> bool {
        self.occluded_with(ray, &mut PrimitiveLeafTester)
    }
}
