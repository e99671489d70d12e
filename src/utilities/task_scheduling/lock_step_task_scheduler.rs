use super::task_barrier::TaskBarrier;
use parking_lot::Mutex;
use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

thread_local! {
    static LOCK_STEP_THREAD_INDEX: Cell<usize> = const { Cell::new(0) };
    static LOCK_STEP_INSTANCE: Cell<usize> = const { Cell::new(0) };
}

/// Body run on every participant: `(thread_index, thread_count)`.
pub type LockStepFunction = dyn Fn(usize, usize) + Sync;

/// Body run once per task of a task set: `(thread_index, thread_count, task_index, task_count)`.
pub type LockStepSetFunction = dyn Fn(usize, usize, usize, usize) + Sync;

/// Borrowed job published by thread 0. Only dereferenced between the two barriers of a dispatch,
/// while thread 0 is still inside the dispatch call that owns the borrow.
#[derive(Clone, Copy)]
pub(crate) enum LockStepJob {
    Release,
    Task(*const LockStepFunction),
    TaskSet {
        function: *const LockStepSetFunction,
        task_count: usize,
    },
}

unsafe impl Send for LockStepJob {}

impl LockStepJob {
    pub(crate) fn task<'a>(function: &'a (dyn Fn(usize, usize) + Sync + 'a)) -> Self {
        Self::Task(unsafe {
            std::mem::transmute::<
                *const (dyn Fn(usize, usize) + Sync + 'a),
                *const LockStepFunction,
            >(function as *const _)
        })
    }

    pub(crate) fn task_set<'a>(
        function: &'a (dyn Fn(usize, usize, usize, usize) + Sync + 'a),
        task_count: usize,
    ) -> Self {
        Self::TaskSet {
            function: unsafe {
                std::mem::transmute::<
                    *const (dyn Fn(usize, usize, usize, usize) + Sync + 'a),
                    *const LockStepSetFunction,
                >(function as *const _)
            },
            task_count,
        }
    }
}

/// Gang of threads advancing through phases in lock step.
///
/// Thread 0 drives: it publishes a job and runs it together with the other participants, which
/// sit in `enter` executing whatever thread 0 dispatches until it calls `leave`. Every dispatch
/// is bracketed by two barriers, so a phase never overlaps the next.
pub struct LockStepTaskScheduler {
    barrier: TaskBarrier,
    job: Mutex<LockStepJob>,
    task_counter: AtomicUsize,
}

impl LockStepTaskScheduler {
    /// Creates a lock-step scheduler for gangs of at most `max_threads` threads.
    pub fn new(max_threads: usize) -> Self {
        Self {
            barrier: TaskBarrier::new(max_threads),
            job: Mutex::new(LockStepJob::Release),
            task_counter: AtomicUsize::new(0),
        }
    }

    /// Gets the largest gang size supported.
    pub fn max_threads(&self) -> usize {
        self.barrier.max_threads()
    }

    /// Gets the lock-step slot of the calling thread within the scheduler it last entered.
    #[inline(always)]
    pub fn thread_index() -> usize {
        LOCK_STEP_THREAD_INDEX.with(|index| index.get())
    }

    /// Gets whether the calling thread currently participates in this scheduler.
    pub fn in_scope(&self) -> bool {
        LOCK_STEP_INSTANCE.with(|instance| instance.get()) == self as *const Self as usize
    }

    /// Joins the gang. Thread 0 returns false immediately and becomes the driver. Every other
    /// thread serves dispatched jobs until the driver releases the gang and then returns true.
    pub fn enter(&self, thread_index: usize, thread_count: usize) -> bool {
        LOCK_STEP_THREAD_INDEX.with(|index| index.set(thread_index));
        LOCK_STEP_INSTANCE.with(|instance| instance.set(self as *const Self as usize));
        if thread_index == 0 {
            return false;
        }
        while !self.dispatch(thread_index, thread_count) {}
        LOCK_STEP_INSTANCE.with(|instance| instance.set(0));
        true
    }

    /// Runs one published job on the calling thread. Returns true when the job was the release.
    fn dispatch(&self, thread_index: usize, thread_count: usize) -> bool {
        if thread_index == 0 {
            self.task_counter.store(0, Ordering::Relaxed);
        }
        self.barrier.sync(thread_index, thread_count);
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
        self.barrier.sync(thread_index, thread_count);
        false
    }

    /// Runs `function` once on every participant. Called by thread 0.
    pub fn dispatch_task(
        &self,
        function: &(dyn Fn(usize, usize) + Sync),
        thread_index: usize,
        thread_count: usize,
    ) {
        debug_assert_eq!(thread_index, 0, "Only the driving thread dispatches.");
        *self.job.lock() = LockStepJob::task(function);
        self.dispatch(thread_index, thread_count);
    }

    /// Spreads `task_count` tasks over the participants through a shared counter. Called by thread 0.
    pub fn dispatch_task_set(
        &self,
        function: &(dyn Fn(usize, usize, usize, usize) + Sync),
        task_count: usize,
        thread_index: usize,
        thread_count: usize,
    ) {
        debug_assert_eq!(thread_index, 0, "Only the driving thread dispatches.");
        *self.job.lock() = LockStepJob::task_set(function, task_count);
        self.dispatch(thread_index, thread_count);
    }

    /// Lets the participants waiting in `enter` return. Called by thread 0.
    pub fn release_threads(&self, thread_index: usize, thread_count: usize) {
        *self.job.lock() = LockStepJob::Release;
        self.dispatch(thread_index, thread_count);
    }

    /// Ends the driver's lock-step section.
    pub fn leave(&self, thread_index: usize, thread_count: usize) {
        if thread_index == 0 {
            self.release_threads(thread_index, thread_count);
            LOCK_STEP_INSTANCE.with(|instance| instance.set(0));
        }
    }

    /// Barrier across the gang, usable from inside a dispatched job.
    #[inline(always)]
    pub fn sync_threads(&self, thread_index: usize, thread_count: usize) {
        self.barrier.sync(thread_index, thread_count);
    }

    /// Barrier that folds per-thread partial results into thread 0's, see `TaskBarrier::sync_with_reduction`.
    #[inline(always)]
    pub fn sync_threads_with_reduction(
        &self,
        thread_index: usize,
        thread_count: usize,
        reduce: &(dyn Fn(usize, usize) + Sync),
    ) {
        self.barrier
            .sync_with_reduction(thread_index, thread_count, reduce);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::thread;

    fn run_gang(threads: usize, driver: impl Fn(&LockStepTaskScheduler) + Sync) -> LockStepTaskScheduler {
        let scheduler = LockStepTaskScheduler::new(threads);
        thread::scope(|scope| {
            for thread_index in 1..threads {
                let scheduler = &scheduler;
                scope.spawn(move || {
                    assert!(scheduler.enter(thread_index, threads));
                    assert!(!scheduler.in_scope());
                });
            }
            assert!(!scheduler.enter(0, threads));
            assert!(scheduler.in_scope());
            driver(&scheduler);
            scheduler.leave(0, threads);
        });
        scheduler
    }

    #[test]
    fn test_dispatch_runs_on_every_thread() {
        const THREADS: usize = 4;
        let visits: Vec<AtomicUsize> = (0..THREADS).map(|_| AtomicUsize::new(0)).collect();
        run_gang(THREADS, |scheduler| {
            for _ in 0..3 {
                scheduler.dispatch_task(
                    &|thread_index, thread_count| {
                        assert_eq!(thread_count, THREADS);
                        assert_eq!(LockStepTaskScheduler::thread_index(), thread_index);
                        visits[thread_index].fetch_add(1, Ordering::Relaxed);
                    },
                    0,
                    THREADS,
                );
            }
        });
        assert!(visits.iter().all(|v| v.load(Ordering::Relaxed) == 3));
    }

    #[test]
    fn test_task_set_hands_out_every_task_once() {
        const THREADS: usize = 3;
        let seen = Mutex::new(vec![0usize; 50]);
        run_gang(THREADS, |scheduler| {
            scheduler.dispatch_task_set(
                &|_, _, task_index, task_count| {
                    assert_eq!(task_count, 50);
                    seen.lock()[task_index] += 1;
                },
                50,
                0,
                THREADS,
            );
        });
        assert!(seen.lock().iter().all(|&count| count == 1));
    }

    #[test]
    fn test_reduction_inside_dispatch() {
        const THREADS: usize = 4;
        let partials: Vec<Mutex<usize>> = (0..THREADS).map(|_| Mutex::new(0)).collect();
        run_gang(THREADS, |scheduler| {
            scheduler.dispatch_task(
                &|thread_index, thread_count| {
                    *partials[thread_index].lock() = thread_index + 1;
                    scheduler.sync_threads_with_reduction(thread_index, thread_count, &|parent, child| {
                        let child_value = *partials[child].lock();
                        *partials[parent].lock() += child_value;
                    });
                },
                0,
                THREADS,
            );
        });
        assert_eq!(*partials[0].lock(), 1 + 2 + 3 + 4);
    }

    #[test]
    fn test_single_thread_gang() {
        let counter = AtomicUsize::new(0);
        run_gang(1, |scheduler| {
            scheduler.dispatch_task_set(
                &|_, _, _, _| {
                    counter.fetch_add(1, Ordering::Relaxed);
                },
                7,
                0,
                1,
            );
        });
        assert_eq!(counter.load(Ordering::Relaxed), 7);
    }
}
