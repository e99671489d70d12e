use crate::error::Result;
use crate::utilities::task_scheduling::TaskScheduler;

/// Provides multithreading dispatch primitives and a thread count for the builders to use.
///
/// Builders do not need a load balancing parallel for. All that's needed is a way to jumpstart some threads;
/// the work distribution inside a dispatch (shared counters, lock-step phases) is up to the caller.
pub trait IThreadDispatcher: Send + Sync {
    /// Gets the number of workers available in the thread dispatcher.
    ///
    /// Bodies that rendezvous with each other expect the workers to be truly independent threads.
    /// If the count doesn't represent independent threads, such dispatches deadlock.
    fn worker_count(&self) -> usize;

    /// Invokes `worker_body` once per worker index in `0..min(maximum_worker_count, worker_count)`
    /// and returns after all invocations finished.
    ///
    /// # Arguments
    /// * `worker_body` - Function invoked with the worker index.
    /// * `maximum_worker_count` - Maximum number of workers to dispatch.
    fn dispatch_workers(
        &self,
        worker_body: &(dyn Fn(usize) + Sync),
        maximum_worker_count: usize,
    ) -> Result<()>;
}

impl IThreadDispatcher for TaskScheduler {
    fn worker_count(&self) -> usize {
        self.thread_count().unwrap_or(0)
    }

    fn dispatch_workers(
        &self,
        worker_body: &(dyn Fn(usize) + Sync),
        maximum_worker_count: usize,
    ) -> Result<()> {
        let worker_count = self.thread_count()?.min(maximum_worker_count);
        self.execute_task(
            TaskScheduler::thread_index(),
            worker_count,
            "dispatch_workers",
            |context| worker_body(context.task_index),
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_dispatch_is_capped_by_worker_count() {
        let scheduler = TaskScheduler::with_threads(3).unwrap();
        assert_eq!(scheduler.worker_count(), 3);
        let invocations = AtomicUsize::new(0);
        let index_sum = AtomicUsize::new(0);
        scheduler
            .dispatch_workers(
                &|worker_index| {
                    invocations.fetch_add(1, Ordering::Relaxed);
                    index_sum.fetch_add(worker_index, Ordering::Relaxed);
                },
                8,
            )
            .unwrap();
        assert_eq!(invocations.load(Ordering::Relaxed), 3);
        assert_eq!(index_sum.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_idle_scheduler_has_no_workers() {
        let scheduler = TaskScheduler::new();
        assert_eq!(scheduler.worker_count(), 0);
        assert!(scheduler.dispatch_workers(&|_| {}, 4).is_err());
    }
}
