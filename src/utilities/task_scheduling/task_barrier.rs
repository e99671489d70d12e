use crate::utilities::local_spin_wait::LocalSpinWait;
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Spin barrier for a fixed group of threads.
///
/// Plain synchronization uses a counter plus a generation number. The reducing variant combines
/// per-thread partial results along a binary tree: thread `i` waits for threads `2i + 1` and `2i + 2`,
/// folds their results into its own, then reports upward. Thread 0 ends up with the total and
/// releases everyone.
pub struct TaskBarrier {
    arrived: CachePadded<AtomicUsize>,
    generation: CachePadded<AtomicUsize>,
    reduced_epochs: Box<[CachePadded<AtomicUsize>]>,
    release_epoch: CachePadded<AtomicUsize>,
}

impl TaskBarrier {
    /// Creates a barrier for at most `max_threads` participants.
    pub fn new(max_threads: usize) -> Self {
        Self {
            arrived: CachePadded::new(AtomicUsize::new(0)),
            generation: CachePadded::new(AtomicUsize::new(0)),
            reduced_epochs: (0..max_threads.max(1))
                .map(|_| CachePadded::new(AtomicUsize::new(0)))
                .collect(),
            release_epoch: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Gets the largest group size the barrier supports.
    #[inline(always)]
    pub fn max_threads(&self) -> usize {
        self.reduced_epochs.len()
    }

    /// Blocks until all `thread_count` participants called `sync`.
    pub fn sync(&self, _thread_index: usize, thread_count: usize) {
        debug_assert!(thread_count <= self.max_threads());
        if thread_count <= 1 {
            return;
        }
        let generation = self.generation.load(Ordering::Acquire);
        if self.arrived.fetch_add(1, Ordering::AcqRel) + 1 == thread_count {
            self.arrived.store(0, Ordering::Relaxed);
            self.generation.fetch_add(1, Ordering::Release);
        } else {
            LocalSpinWait::spin_until(|| self.generation.load(Ordering::Acquire) != generation);
        }
    }

    /// Blocks until all participants arrived, combining their partial results on the way.
    ///
    /// # Arguments
    /// * `thread_index` - Slot of the calling participant.
    /// * `thread_count` - Number of participants.
    /// * `reduce` - Called as `reduce(parent, child)` on the parent's thread once the child's result is final.
    pub fn sync_with_reduction(
        &self,
        thread_index: usize,
        thread_count: usize,
        reduce: &(dyn Fn(usize, usize) + Sync),
    ) {
        debug_assert!(thread_count <= self.max_threads());
        debug_assert!(thread_index < thread_count);
        let epoch = self.release_epoch.load(Ordering::Acquire);
        let next_epoch = epoch.wrapping_add(1);
        for child in [2 * thread_index + 1, 2 * thread_index + 2] {
            if child < thread_count {
                LocalSpinWait::spin_until(|| {
                    self.reduced_epochs[child].load(Ordering::Acquire) == next_epoch
                });
                reduce(thread_index, child);
            }
        }
        if thread_index == 0 {
            self.release_epoch.store(next_epoch, Ordering::Release);
        } else {
            self.reduced_epochs[thread_index].store(next_epoch, Ordering::Release);
            LocalSpinWait::spin_until(|| self.release_epoch.load(Ordering::Acquire) != epoch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::thread;

    #[test]
    fn test_sync_separates_phases() {
        const THREADS: usize = 4;
        let barrier = TaskBarrier::new(THREADS);
        let phase_one = AtomicUsize::new(0);
        thread::scope(|scope| {
            for thread_index in 0..THREADS {
                let barrier = &barrier;
                let phase_one = &phase_one;
                scope.spawn(move || {
                    for round in 0..10 {
                        phase_one.fetch_add(1, Ordering::Relaxed);
                        barrier.sync(thread_index, THREADS);
                        assert_eq!(phase_one.load(Ordering::Relaxed), (round + 1) * THREADS);
                        barrier.sync(thread_index, THREADS);
                    }
                });
            }
        });
    }

    #[test]
    fn test_reduction_sums_partials() {
        const THREADS: usize = 5;
        let barrier = TaskBarrier::new(THREADS);
        let partials: Vec<Mutex<usize>> = (0..THREADS).map(|_| Mutex::new(0)).collect();
        thread::scope(|scope| {
            for thread_index in 0..THREADS {
                let barrier = &barrier;
                let partials = &partials;
                scope.spawn(move || {
                    for round in 1..=3 {
                        *partials[thread_index].lock() = thread_index * round;
                        let reduce = |parent: usize, child: usize| {
                            let child_value = *partials[child].lock();
                            *partials[parent].lock() += child_value;
                        };
                        barrier.sync_with_reduction(thread_index, THREADS, &reduce);
                        if thread_index == 0 {
                            assert_eq!(*partials[0].lock(), (0 + 1 + 2 + 3 + 4) * round);
                        }
                        barrier.sync(thread_index, THREADS);
                    }
                });
            }
        });
    }
}
