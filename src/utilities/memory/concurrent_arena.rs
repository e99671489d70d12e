use crate::error::{AccelError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

/// Fixed-capacity append-only storage that any thread can allocate from through a shared reference.
///
/// Slots are written once and never move, so a published index stays valid for the arena's lifetime.
/// Used by structures that grow during traversal, where no thread has exclusive access.
pub struct ConcurrentArena<T> {
    name: &'static str,
    slots: Box<[OnceLock<T>]>,
    next: AtomicUsize,
}

impl<T> ConcurrentArena<T> {
    /// Creates an arena holding at most `capacity` items.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            slots: (0..capacity).map(|_| OnceLock::new()).collect(),
            next: AtomicUsize::new(0),
        }
    }

    /// Gets the number of slots.
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Gets the number of slots handed out.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.next.load(Ordering::Acquire).min(self.slots.len())
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reserves a slot without filling it. The slot reads as `None` until `set` is called.
    pub fn reserve(&self) -> Result<usize> {
        let index = self.next.fetch_add(1, Ordering::AcqRel);
        if index >= self.slots.len() {
            return Err(AccelError::ArenaExhausted {
                arena: self.name,
                capacity: self.slots.len(),
            });
        }
        Ok(index)
    }

    /// Fills a reserved slot. Filling a slot twice keeps the first value.
    pub fn set(&self, index: usize, value: T) {
        let _ = self.slots[index].set(value);
    }

    /// Allocates a slot holding `value`.
    pub fn alloc(&self, value: T) -> Result<usize> {
        let index = self.reserve()?;
        self.set(index, value);
        Ok(index)
    }

    /// Gets the item in a slot, or `None` if the slot was never filled.
    #[inline(always)]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index).and_then(OnceLock::get)
    }

    /// Drops every item. Requires exclusive access, so no traversal can hold an index.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.take();
        }
        *self.next.get_mut() = 0;
    }
}
