use super::task::{QueuedTask, ScopedRunFunction, Task, TaskBody, TaskContext};
use super::task_event::TaskEvent;
use crate::error::{AccelError, Result};
use crate::utilities::local_spin_wait::LocalSpinWait;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cell::Cell;
use std::collections::VecDeque;
use std::panic;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Stack size of pool threads. Recursive subtree builds run on these threads.
const WORKER_STACK_SIZE: usize = 4 * 1024 * 1024;

thread_local! {
    static CURRENT_THREAD_INDEX: Cell<usize> = const { Cell::new(0) };
}

/// End of the global queue a task is inserted at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Queue {
    /// Runs before everything already queued.
    Front,
    /// Runs after everything already queued.
    Back,
}

struct SchedulerShared {
    queue: Mutex<VecDeque<Arc<QueuedTask>>>,
    work_available: Condvar,
    terminate: AtomicBool,
    thread_count: AtomicUsize,
}

impl SchedulerShared {
    /// Claims one element of the task at the head of the queue and runs it.
    /// Returns false if the queue was empty.
    fn try_run_one(&self, thread_index: usize) -> bool {
        let (task, element) = {
            let mut queue = self.queue.lock();
            let Some(task) = queue.front().cloned() else {
                return false;
            };
            let element = task.try_claim();
            if task.fully_claimed() {
                queue.pop_front();
            }
            (task, element)
        };
        let Some(element) = element else {
            return false;
        };
        task.run_element(TaskContext {
            thread_index,
            thread_count: self.thread_count.load(Ordering::Relaxed),
            task_index: element,
            task_count: task.elements,
        });
        true
    }

    fn worker_loop(&self, thread_index: usize) {
        CURRENT_THREAD_INDEX.with(|index| index.set(thread_index));
        log::debug!("task scheduler worker {} started", thread_index);
        loop {
            if self.terminate.load(Ordering::Acquire) {
                break;
            }
            if self.try_run_one(thread_index) {
                continue;
            }
            let mut queue = self.queue.lock();
            while queue.is_empty() && !self.terminate.load(Ordering::Acquire) {
                self.work_available.wait(&mut queue);
            }
        }
        log::debug!("task scheduler worker {} stopped", thread_index);
    }

    /// Blocks until the event fires, running queued work in the meantime.
    fn wait(&self, thread_index: usize, event: &TaskEvent) {
        let mut spin_wait = LocalSpinWait::new();
        while !event.is_set() {
            if self.try_run_one(thread_index) {
                spin_wait.reset();
            } else {
                spin_wait.spin_once();
            }
        }
        if let Some(payload) = event.take_panic() {
            panic::resume_unwind(payload);
        }
    }
}

/// Fixed-size pool of worker threads pulling index-parallel tasks from one global queue.
///
/// The scheduler is an explicit object. Nothing runs until `create` starts the pool, and the
/// thread calling into the scheduler always occupies slot 0 while the pool threads occupy 1..n.
/// Waiting threads keep executing queued elements, so nested `execute_task` calls make progress.
/// Lock-step gangs are the exception: their members spin at barriers without taking other work,
/// so at most one gang may occupy the pool at a time, see [`TaskScheduler::try_reserve_lock_step`].
pub struct TaskScheduler {
    shared: Arc<SchedulerShared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    lock_step: Mutex<()>,
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler {
    /// Creates an idle scheduler. `create` must be called before any task is submitted.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SchedulerShared {
                queue: Mutex::new(VecDeque::new()),
                work_available: Condvar::new(),
                terminate: AtomicBool::new(false),
                thread_count: AtomicUsize::new(0),
            }),
            threads: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            lock_step: Mutex::new(()),
        }
    }

    /// Creates a scheduler and starts `thread_count` participants.
    pub fn with_threads(thread_count: usize) -> Result<Self> {
        let scheduler = Self::new();
        scheduler.create(thread_count)?;
        Ok(scheduler)
    }

    /// Starts the pool.
    ///
    /// # Arguments
    /// * `thread_count` - Number of participants including the calling thread. Zero selects the logical core count.
    pub fn create(&self, thread_count: usize) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(AccelError::ThreadsAlreadyRunning);
        }
        let thread_count = if thread_count == 0 {
            thread::available_parallelism()
                .map(|count| count.get())
                .unwrap_or(1)
        } else {
            thread_count
        };
        self.shared.terminate.store(false, Ordering::Release);
        self.shared
            .thread_count
            .store(thread_count, Ordering::Release);

        let mut threads = self.threads.lock();
        for thread_index in 1..thread_count {
            let shared = self.shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("bvh-worker-{}", thread_index))
                .stack_size(WORKER_STACK_SIZE)
                .spawn(move || shared.worker_loop(thread_index));
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(error) => {
                    drop(threads);
                    self.stop_threads();
                    self.running.store(false, Ordering::Release);
                    return Err(AccelError::ThreadSpawnFailed(error.to_string()));
                }
            }
        }
        log::debug!("task scheduler created with {} threads", thread_count);
        Ok(())
    }

    /// Runs every queued element on the calling thread, then stops and joins the pool threads.
    /// Threads blocked in `execute_task` or `wait_for_event` see their events fire instead of
    /// waiting on work nobody will run.
    pub fn destroy(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Err(AccelError::ThreadsNotRunning);
        }
        let mut drained = 0;
        while self.shared.try_run_one(Self::thread_index()) {
            drained += 1;
        }
        if drained > 0 {
            log::debug!("task scheduler ran {} pending elements before shutdown", drained);
        }
        self.stop_threads();
        self.shared.thread_count.store(0, Ordering::Release);
        log::debug!("task scheduler destroyed");
        Ok(())
    }

    fn stop_threads(&self) {
        {
            let _queue = self.shared.queue.lock();
            self.shared.terminate.store(true, Ordering::Release);
            self.shared.work_available.notify_all();
        }
        let handles: Vec<_> = self.threads.lock().drain(..).collect();
        for handle in handles {
            // Panics inside tasks are caught per element, a worker itself never panics.
            let _ = handle.join();
        }
    }

    #[inline(always)]
    fn ensure_running(&self) -> Result<()> {
        if self.running.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(AccelError::ThreadsNotRunning)
        }
    }

    /// Gets whether `create` has been called and `destroy` has not.
    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Gets the number of participants, including the thread in slot 0.
    pub fn thread_count(&self) -> Result<usize> {
        self.ensure_running()?;
        Ok(self.shared.thread_count.load(Ordering::Acquire))
    }

    /// Gets the slot of the calling thread. Threads that are not part of a pool report 0.
    #[inline(always)]
    pub fn thread_index() -> usize {
        CURRENT_THREAD_INDEX.with(|index| index.get())
    }

    /// Reserves the pool for one lock-step gang.
    ///
    /// Gang members wait for each other at barriers and never run queued work meanwhile, so a gang
    /// only finishes once every participant joined it. A second gang in flight, or a gang driven
    /// from a pool thread while slot 0 is busy elsewhere, could starve that rendezvous forever.
    ///
    /// # Returns
    /// Guard holding the reservation, or `None` if another gang holds it or the caller is a pool
    /// thread. Callers fall back to work that does not need the whole pool.
    pub fn try_reserve_lock_step(&self) -> Option<MutexGuard<'_, ()>> {
        if Self::thread_index() != 0 {
            return None;
        }
        self.lock_step.try_lock()
    }

    fn enqueue(&self, queue: Queue, task: Arc<QueuedTask>) {
        let mut tasks = self.shared.queue.lock();
        match queue {
            Queue::Front => tasks.push_front(task),
            Queue::Back => tasks.push_back(task),
        }
        self.shared.work_available.notify_all();
    }

    /// Enqueues a task without waiting for it.
    ///
    /// # Arguments
    /// * `thread_index` - Slot of the submitting thread.
    /// * `queue` - End of the queue to insert at.
    /// * `task` - Task to run.
    ///
    /// # Returns
    /// Event that fires once every element and the completion callback finished.
    pub fn add_task(&self, thread_index: usize, queue: Queue, task: Task) -> Result<TaskEvent> {
        self.ensure_running()?;
        let event = TaskEvent::new();
        log::trace!(
            "thread {} queued task {} with {} elements",
            thread_index,
            task.name(),
            task.elements()
        );
        self.enqueue(queue, Arc::new(QueuedTask::from_task(task, event.clone())));
        Ok(event)
    }

    /// Blocks until the event fires. The calling thread runs queued elements while it waits.
    /// A panic raised by any element of the task is resumed here.
    pub fn wait_for_event(&self, thread_index: usize, event: &TaskEvent) -> Result<()> {
        self.ensure_running()?;
        self.shared.wait(thread_index, event);
        Ok(())
    }

    /// Runs an index-parallel loop and blocks until it and its completion callback finished.
    ///
    /// The closures may borrow from the caller's stack. The calling thread takes part in the loop.
    ///
    /// # Arguments
    /// * `thread_index` - Slot of the calling thread.
    /// * `elements` - Number of times `run` is invoked.
    /// * `name` - Name used for diagnostics.
    /// * `run` - Function invoked once per element.
    /// * `complete` - Invoked exactly once after the last element finished.
    pub fn execute_task<'s, F>(
        &self,
        thread_index: usize,
        elements: usize,
        name: &'static str,
        run: F,
        complete: Option<Box<dyn FnOnce(usize) + Send + 's>>,
    ) -> Result<()>
    where
        F: Fn(TaskContext) + Sync + 's,
    {
        self.ensure_running()?;
        if elements == 0 {
            if let Some(complete) = complete {
                complete(thread_index);
            }
            return Ok(());
        }
        let run_ref: &(dyn Fn(TaskContext) + Sync + 's) = &run;
        // The borrows stay alive because this function only returns after the event fired,
        // and no element touches the closures after it counted itself finished.
        let body = ScopedRunFunction(unsafe {
            std::mem::transmute::<
                *const (dyn Fn(TaskContext) + Sync + 's),
                *const (dyn Fn(TaskContext) + Sync + 'static),
            >(run_ref as *const (dyn Fn(TaskContext) + Sync + 's))
        });
        let complete = complete.map(|complete| unsafe {
            std::mem::transmute::<
                Box<dyn FnOnce(usize) + Send + 's>,
                Box<dyn FnOnce(usize) + Send + 'static>,
            >(complete)
        });
        let event = TaskEvent::new();
        let task = Arc::new(QueuedTask::new(
            name,
            elements,
            TaskBody::Scoped(body),
            complete,
            event.clone(),
        ));
        self.enqueue(Queue::Front, task);
        self.shared.wait(thread_index, &event);
        Ok(())
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.destroy();
        }
    }
}
