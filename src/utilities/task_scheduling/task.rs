//! Task definition for the task scheduling system.
//!
//! A task is an index-parallel loop: its run function is invoked once per element, spread
//! over whichever threads pull it from the queue. When the last element finishes, the optional
//! completion callback runs exactly once and then the task's event fires.

use super::task_event::TaskEvent;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Arguments passed to a task's run function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskContext {
    /// Index of the thread executing the element.
    pub thread_index: usize,
    /// Number of threads in the scheduler.
    pub thread_count: usize,
    /// Element being executed.
    pub task_index: usize,
    /// Total number of elements in the task.
    pub task_count: usize,
}

/// Function executed for every element of a task.
pub type RunFunction = dyn Fn(TaskContext) + Send + Sync;

/// Function executed once after all elements of a task completed. Receives the finishing thread's index.
pub type CompleteFunction = dyn FnOnce(usize) + Send;

/// Description of a task to be submitted to a `TaskScheduler`.
pub struct Task {
    pub(crate) name: &'static str,
    pub(crate) elements: usize,
    pub(crate) run: Option<Box<RunFunction>>,
    pub(crate) complete: Option<Box<CompleteFunction>>,
}

impl Task {
    /// Creates a task running `run` once for each of `elements` elements.
    ///
    /// # Arguments
    /// * `name` - Name used for diagnostics.
    /// * `elements` - Number of elements the task is split into.
    /// * `run` - Function invoked per element.
    pub fn new<F>(name: &'static str, elements: usize, run: F) -> Self
    where
        F: Fn(TaskContext) + Send + Sync + 'static,
    {
        Self {
            name,
            elements,
            run: Some(Box::new(run)),
            complete: None,
        }
    }

    /// Creates a task with no run function whose only work is the completion callback.
    pub fn completion<C>(name: &'static str, complete: C) -> Self
    where
        C: FnOnce(usize) + Send + 'static,
    {
        Self {
            name,
            elements: 1,
            run: None,
            complete: Some(Box::new(complete)),
        }
    }

    /// Attaches a completion callback, invoked once after every element has finished.
    pub fn with_completion<C>(mut self, complete: C) -> Self
    where
        C: FnOnce(usize) + Send + 'static,
    {
        self.complete = Some(Box::new(complete));
        self
    }

    /// Gets the diagnostic name of the task.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Gets the number of elements of the task.
    pub fn elements(&self) -> usize {
        self.elements
    }
}

/// Borrowed run function of a task submitted through `execute_task`.
///
/// The submitting thread blocks until every element finished, and an element is the only
/// thing that dereferences this pointer, so the pointee outlives every use.
#[derive(Clone, Copy)]
pub(crate) struct ScopedRunFunction(pub(crate) *const (dyn Fn(TaskContext) + Sync + 'static));

unsafe impl Send for ScopedRunFunction {}
unsafe impl Sync for ScopedRunFunction {}

pub(crate) enum TaskBody {
    Empty,
    Owned(Box<RunFunction>),
    Scoped(ScopedRunFunction),
}

/// A task sitting in the scheduler queue, shared by every thread that claims one of its elements.
pub(crate) struct QueuedTask {
    pub(crate) name: &'static str,
    pub(crate) elements: usize,
    next_element: AtomicUsize,
    remaining: AtomicUsize,
    body: TaskBody,
    complete: Mutex<Option<Box<CompleteFunction>>>,
    pub(crate) event: TaskEvent,
}

impl QueuedTask {
    pub(crate) fn new(
        name: &'static str,
        elements: usize,
        body: TaskBody,
        complete: Option<Box<CompleteFunction>>,
        event: TaskEvent,
    ) -> Self {
        debug_assert!(elements > 0, "Queued tasks must have at least one element.");
        Self {
            name,
            elements,
            next_element: AtomicUsize::new(0),
            remaining: AtomicUsize::new(elements),
            body,
            complete: Mutex::new(complete),
            event,
        }
    }

    pub(crate) fn from_task(task: Task, event: TaskEvent) -> Self {
        let body = match task.run {
            Some(run) => TaskBody::Owned(run),
            None => TaskBody::Empty,
        };
        Self::new(task.name, task.elements.max(1), body, task.complete, event)
    }

    /// Claims the next unprocessed element, if any remain.
    #[inline(always)]
    pub(crate) fn try_claim(&self) -> Option<usize> {
        let element = self.next_element.fetch_add(1, Ordering::Relaxed);
        (element < self.elements).then_some(element)
    }

    /// Gets whether every element has been handed out. The task can leave the queue at that point.
    #[inline(always)]
    pub(crate) fn fully_claimed(&self) -> bool {
        self.next_element.load(Ordering::Relaxed) >= self.elements
    }

    /// Runs one claimed element. The thread finishing the last element runs the completion
    /// callback and then signals the event.
    pub(crate) fn run_element(&self, context: TaskContext) {
        let result = match &self.body {
            TaskBody::Empty => Ok(()),
            TaskBody::Owned(run) => panic::catch_unwind(AssertUnwindSafe(|| run(context))),
            TaskBody::Scoped(run) => {
                // Element is claimed and not yet counted as finished, so the submitter is still waiting.
                let run = unsafe { &*run.0 };
                panic::catch_unwind(AssertUnwindSafe(|| run(context)))
            }
        };
        if let Err(payload) = result {
            self.event.record_panic(payload);
        }

        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            let complete = self.complete.lock().take();
            if let Some(complete) = complete {
                if let Err(payload) =
                    panic::catch_unwind(AssertUnwindSafe(|| complete(context.thread_index)))
                {
                    self.event.record_panic(payload);
                }
            }
            self.event.signal();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn context(task_index: usize, task_count: usize) -> TaskContext {
        TaskContext {
            thread_index: 0,
            thread_count: 1,
            task_index,
            task_count,
        }
    }

    #[test]
    fn test_claims_each_element_once() {
        let task = QueuedTask::from_task(Task::new("claim", 3, |_| {}), TaskEvent::new());
        assert_eq!(task.try_claim(), Some(0));
        assert_eq!(task.try_claim(), Some(1));
        assert!(!task.fully_claimed());
        assert_eq!(task.try_claim(), Some(2));
        assert!(task.fully_claimed());
        assert_eq!(task.try_claim(), None);
    }

    #[test]
    fn test_completion_runs_after_last_element() {
        let counter = Arc::new(AtomicUsize::new(0));
        let completed_at = Arc::new(AtomicUsize::new(usize::MAX));
        let run_counter = counter.clone();
        let complete_counter = counter.clone();
        let complete_slot = completed_at.clone();
        let event = TaskEvent::new();
        let task = QueuedTask::from_task(
            Task::new("complete", 2, move |_| {
                run_counter.fetch_add(1, Ordering::Relaxed);
            })
            .with_completion(move |_| {
                complete_slot.store(complete_counter.load(Ordering::Relaxed), Ordering::Relaxed);
            }),
            event.clone(),
        );
        task.run_element(context(0, 2));
        assert!(!event.is_set());
        assert_eq!(completed_at.load(Ordering::Relaxed), usize::MAX);
        task.run_element(context(1, 2));
        assert!(event.is_set());
        assert_eq!(completed_at.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_panicking_element_still_signals() {
        let event = TaskEvent::new();
        let task = QueuedTask::from_task(
            Task::new("panics", 1, |_| panic!("element failed")),
            event.clone(),
        );
        task.run_element(context(0, 1));
        assert!(event.is_set());
        assert!(event.take_panic().is_some());
    }
}
