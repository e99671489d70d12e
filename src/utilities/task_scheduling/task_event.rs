//! Completion event signalled once a task and its completion callback have finished.

use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct EventState {
    done: AtomicBool,
    /// First panic payload raised by any element of the task, handed to the waiter.
    panic: Mutex<Option<Box<dyn Any + Send>>>,
}

/// Handle to the completion event of a scheduled task.
///
/// Cloning the handle is cheap; all clones observe the same event.
#[derive(Clone)]
pub struct TaskEvent {
    state: Arc<EventState>,
}

impl Default for TaskEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskEvent {
    /// Creates an unsignalled event.
    pub fn new() -> Self {
        Self {
            state: Arc::new(EventState {
                done: AtomicBool::new(false),
                panic: Mutex::new(None),
            }),
        }
    }

    /// Gets whether the event fired. Everything the task wrote is visible to a caller that observes `true`.
    #[inline(always)]
    pub fn is_set(&self) -> bool {
        self.state.done.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub(crate) fn signal(&self) {
        self.state.done.store(true, Ordering::Release);
    }

    pub(crate) fn record_panic(&self, payload: Box<dyn Any + Send>) {
        let mut slot = self.state.panic.lock();
        if slot.is_none() {
            *slot = Some(payload);
        }
    }

    pub(crate) fn take_panic(&self) -> Option<Box<dyn Any + Send>> {
        self.state.panic.lock().take()
    }
}
