use super::lock_step_task_scheduler::LockStepJob;
use crate::utilities::local_spin_wait::LocalSpinWait;
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Lock-step gang of up to four hardware threads sharing one physical core.
///
/// Each participant owns one byte of a 32-bit state word and announces its arrival by setting it.
/// Thread 0 waits for every byte, flips to the other state word and clears the old one, which
/// releases the others. Alternating between two words keeps a fast thread arriving at the next
/// barrier from colliding with the clear of the current one.
pub struct LockStepTaskScheduler4ThreadsLocalCore {
    thread_state: [CachePadded<AtomicU32>; 2],
    mode: CachePadded<AtomicUsize>,
    job: Mutex<LockStepJob>,
    task_counter: AtomicUsize,
}

impl Default for LockStepTaskScheduler4ThreadsLocalCore {
    fn default() -> Self {
        Self::new()
    }
}

impl LockStepTaskScheduler4ThreadsLocalCore {
    /// Largest gang this barrier supports.
    pub const MAX_THREADS: usize = 4;

    pub fn new() -> Self {
        Self {
            thread_state: [
                CachePadded::new(AtomicU32::new(0)),
                CachePadded::new(AtomicU32::new(0)),
            ],
            mode: CachePadded::new(AtomicUsize::new(0)),
            job: Mutex::new(LockStepJob::Release),
            task_counter: AtomicUsize::new(0),
        }
    }

    #[inline(always)]
    fn arrival_bit(thread_index: usize) -> u32 {
        1 << (8 * thread_index)
    }

    /// Spins until all `thread_count` local threads arrived.
    pub fn sync_threads(&self, thread_index: usize, thread_count: usize) {
        debug_assert!(thread_count <= Self::MAX_THREADS && thread_index < thread_count);
        let mode = self.mode.load(Ordering::Acquire);
        let state = &self.thread_state[mode];
        let bit = Self::arrival_bit(thread_index);
        state.fetch_or(bit, Ordering::AcqRel);
        if thread_index == 0 {
            let all_arrived = (0..thread_count).fold(0, |mask, i| mask | Self::arrival_bit(i));
            LocalSpinWait::spin_until(|| state.load(Ordering::Acquire) == all_arrived);
            self.mode.store(1 - mode, Ordering::Relaxed);
            state.store(0, Ordering::Release);
        } else {
            LocalSpinWait::spin_until(|| state.load(Ordering::Acquire) & bit == 0);
        }
    }

    fn dispatch(&self, thread_index: usize, thread_count: usize) -> bool {
        if thread_index == 0 {
            self.task_counter.store(0, Ordering::Relaxed);
        }
        self.sync_threads(thread_index, thread_count);
        let job = *self.job.lock();
        match job {
            LockStepJob::Release => return true,
            LockStepJob::Task(function) => {
                let function = unsafe { &*function };
                function(thread_index, thread_count);
            }
            LockStepJob::TaskSet {
                function,
                task_count,
            } => {
                let function = unsafe { &*function };
                loop {
                    let task_index = self.task_counter.fetch_add(1, Ordering::Relaxed);
                    if task_index >= task_count {
                        break;
                    }
                    function(thread_index, thread_count, task_index, task_count);
                }
            }
        }
        self.sync_threads(thread_index, thread_count);
        false
    }

    /// Thread 0 returns false and drives. The others serve jobs until released and return true.
    pub fn enter(&self, thread_index: usize, thread_count: usize) -> bool {
        if thread_index == 0 {
            return false;
        }
        while !self.dispatch(thread_index, thread_count) {}
        true
    }

    /// Runs `function` on every local thread. Called by thread 0.
    pub fn dispatch_task(
        &self,
        function: &(dyn Fn(usize, usize) + Sync),
        thread_index: usize,
        thread_count: usize,
    ) {
        *self.job.lock() = LockStepJob::task(function);
        self.dispatch(thread_index, thread_count);
    }

    /// Spreads `task_count` tasks over the local threads. Called by thread 0.
    pub fn dispatch_task_set(
        &self,
        function: &(dyn Fn(usize, usize, usize, usize) + Sync),
        task_count: usize,
        thread_index: usize,
        thread_count: usize,
    ) {
        *self.job.lock() = LockStepJob::task_set(function, task_count);
        self.dispatch(thread_index, thread_count);
    }

    /// Lets the threads waiting in `enter` return. Called by thread 0.
    pub fn release_threads(&self, thread_index: usize, thread_count: usize) {
        *self.job.lock() = LockStepJob::Release;
        self.dispatch(thread_index, thread_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_four_thread_phases() {
        const THREADS: usize = 4;
        let scheduler = LockStepTaskScheduler4ThreadsLocalCore::new();
        let counter = AtomicUsize::new(0);
        thread::scope(|scope| {
            for thread_index in 1..THREADS {
                let scheduler = &scheduler;
                scope.spawn(move || assert!(scheduler.enter(thread_index, THREADS)));
            }
            assert!(!scheduler.enter(0, THREADS));
            for round in 1..=20 {
                scheduler.dispatch_task(
                    &|thread_index, thread_count| {
                        counter.fetch_add(1, Ordering::Relaxed);
                        scheduler.sync_threads(thread_index, thread_count);
                        assert_eq!(counter.load(Ordering::Relaxed), round * THREADS);
                        scheduler.sync_threads(thread_index, thread_count);
                    },
                    0,
                    THREADS,
                );
            }
            scheduler.release_threads(0, THREADS);
        });
        assert_eq!(counter.load(Ordering::Relaxed), 20 * THREADS);
    }

    #[test]
    fn test_task_set_on_two_threads() {
        let scheduler = LockStepTaskScheduler4ThreadsLocalCore::new();
        let sum = AtomicUsize::new(0);
        thread::scope(|scope| {
            let scheduler_ref = &scheduler;
            scope.spawn(move || assert!(scheduler_ref.enter(1, 2)));
            assert!(!scheduler.enter(0, 2));
            scheduler.dispatch_task_set(
                &|_, _, task_index, _| {
                    sum.fetch_add(task_index, Ordering::Relaxed);
                },
                10,
                0,
                2,
            );
            scheduler.release_threads(0, 2);
        });
        assert_eq!(sum.load(Ordering::Relaxed), 45);
    }
}
