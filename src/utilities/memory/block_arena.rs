use crate::error::{AccelError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Shared source of fixed-size blocks for per-thread bump allocators.
///
/// Threads only touch the shared counter when their current block runs out, so allocation
/// never takes a lock. Capacity is fixed up front; running past it is an error.
pub struct BlockArena {
    name: &'static str,
    block_size: usize,
    max_blocks: usize,
    next_block: AtomicUsize,
}

impl BlockArena {
    /// Default number of items per block.
    pub const DEFAULT_BLOCK_SIZE: usize = 256;

    /// Creates an arena.
    ///
    /// # Arguments
    /// * `name` - Name reported when the arena runs out of space.
    /// * `block_size` - Items per block. Also the largest single allocation.
    /// * `max_blocks` - Number of blocks that can be handed out.
    pub fn new(name: &'static str, block_size: usize, max_blocks: usize) -> Self {
        Self {
            name,
            block_size: block_size.max(1),
            max_blocks,
            next_block: AtomicUsize::new(0),
        }
    }

    /// Creates an arena sized for roughly `estimated_items` items allocated by `thread_count` threads.
    /// Every thread may waste up to a block at the end, and allocations that don't fit the current
    /// block's remainder waste at most the remainder, so twice the estimate plus a block per thread suffices.
    pub fn for_estimate(name: &'static str, estimated_items: usize, thread_count: usize) -> Self {
        let block_size = Self::DEFAULT_BLOCK_SIZE;
        let max_blocks = 2 * estimated_items.div_ceil(block_size) + thread_count + 2;
        Self::new(name, block_size, max_blocks)
    }

    /// Gets the number of items per block.
    #[inline(always)]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Gets the capacity in items.
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.block_size * self.max_blocks
    }

    /// Gets the number of blocks handed out so far.
    #[inline(always)]
    pub fn blocks_used(&self) -> usize {
        self.next_block.load(Ordering::Acquire).min(self.max_blocks)
    }

    /// Claims the next block id.
    pub fn claim_block(&self) -> Result<usize> {
        let block = self.next_block.fetch_add(1, Ordering::AcqRel);
        if block >= self.max_blocks {
            return Err(AccelError::ArenaExhausted {
                arena: self.name,
                capacity: self.capacity(),
            });
        }
        Ok(block)
    }

    /// Forgets every handed out block.
    pub fn reset(&mut self) {
        *self.next_block.get_mut() = 0;
    }
}

/// Bump allocator owned by one thread, drawing blocks from a shared `BlockArena`.
///
/// Indices returned are global: `block_id * block_size + offset`. After the build, `merge`
/// stitches every thread's blocks into one contiguous vector where those indices are valid.
pub struct ThreadLocalArena<T> {
    blocks: Vec<(usize, Vec<T>)>,
}

impl<T> Default for ThreadLocalArena<T> {
    fn default() -> Self {
        Self { blocks: Vec::new() }
    }
}

impl<T: Default + Clone> ThreadLocalArena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates `count` contiguous default-initialized items.
    ///
    /// # Returns
    /// Global index of the first item and the items themselves.
    pub fn alloc(&mut self, arena: &BlockArena, count: usize) -> Result<(usize, &mut [T])> {
        let block_size = arena.block_size();
        if count > block_size {
            return Err(AccelError::ArenaExhausted {
                arena: arena.name,
                capacity: block_size,
            });
        }
        let fits = self
            .blocks
            .last()
            .is_some_and(|(_, items)| items.len() + count <= block_size);
        if !fits {
            let block = arena.claim_block()?;
            self.blocks.push((block, Vec::with_capacity(block_size)));
        }
        let Some((block, items)) = self.blocks.last_mut() else {
            unreachable!("A block was pushed above.");
        };
        let start = items.len();
        items.resize(start + count, T::default());
        Ok((*block * block_size + start, &mut items[start..]))
    }

    /// Allocates a single item holding `value`.
    pub fn push(&mut self, arena: &BlockArena, value: T) -> Result<usize> {
        let (index, slot) = self.alloc(arena, 1)?;
        slot[0] = value;
        Ok(index)
    }

    /// Gets the number of items allocated by this thread.
    pub fn allocated(&self) -> usize {
        self.blocks.iter().map(|(_, items)| items.len()).sum()
    }

    /// Moves the items of every thread into one vector indexed by the global indices.
    /// Slots nobody allocated hold `T::default()`.
    pub fn merge(arena: &BlockArena, arenas: impl IntoIterator<Item = ThreadLocalArena<T>>) -> Vec<T> {
        let block_size = arena.block_size();
        let mut merged = vec![T::default(); arena.blocks_used() * block_size];
        for local in arenas {
            for (block, items) in local.blocks {
                let start = block * block_size;
                for (slot, item) in merged[start..start + items.len()].iter_mut().zip(items) {
                    *slot = item;
                }
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::thread;

    #[test]
    fn test_merge_preserves_global_indices() {
        let arena = BlockArena::new("test", 4, 16);
        let locals: Vec<Mutex<ThreadLocalArena<u32>>> =
            (0..3).map(|_| Mutex::new(ThreadLocalArena::new())).collect();
        let indices = Mutex::new(Vec::new());
        thread::scope(|scope| {
            for worker in 0..3 {
                let (arena, locals, indices) = (&arena, &locals, &indices);
                scope.spawn(move || {
                    for i in 0..5u32 {
                        let value = worker * 100 + i;
                        let index = locals[worker as usize].lock().push(arena, value).unwrap();
                        indices.lock().push((index, value));
                    }
                });
            }
        });
        let merged = ThreadLocalArena::merge(&arena, locals.into_iter().map(|l| l.into_inner()));
        for (index, value) in indices.into_inner() {
            assert_eq!(merged[index], value);
        }
    }

    #[test]
    fn test_contiguous_allocation_skips_to_next_block() {
        let arena = BlockArena::new("test", 4, 4);
        let mut local = ThreadLocalArena::<u8>::new();
        let (first, _) = local.alloc(&arena, 3).unwrap();
        let (second, items) = local.alloc(&arena, 2).unwrap();
        assert_eq!(first, 0);
        assert_eq!(second, 4);
        assert_eq!(items.len(), 2);
        assert_eq!(local.allocated(), 5);
    }

    #[test]
    fn test_exhaustion_is_an_error() {
        let arena = BlockArena::new("bvh node", 2, 1);
        let mut local = ThreadLocalArena::<u8>::new();
        local.alloc(&arena, 2).unwrap();
        assert_eq!(
            local.alloc(&arena, 1).map(|(index, _)| index),
            Err(AccelError::ArenaExhausted {
                arena: "bvh node",
                capacity: 2
            })
        );
    }

    #[test]
    fn test_estimate_capacity() {
        let arena = BlockArena::for_estimate("leaf", 1000, 4);
        assert_eq!(arena.capacity(), (2 * 4 + 4 + 2) * BlockArena::DEFAULT_BLOCK_SIZE);
    }
}
