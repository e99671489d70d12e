//! Task scheduling for parallel acceleration structure builds.
//!
//! - `TaskScheduler`: fixed thread pool over one global queue of index-parallel tasks
//! - `Task` and `TaskEvent`: a unit of work with an optional completion callback, and its completion signal
//! - `TaskBarrier`: spin barrier with optional binary-tree reduction
//! - `LockStepTaskScheduler`: gang of threads driven through barrier-separated phases
//! - `LockStepTaskScheduler4ThreadsLocalCore`: 4-wide variant for threads sharing one core

mod lock_step_local_core;
mod lock_step_task_scheduler;
mod task;
mod task_barrier;
mod task_event;
mod task_scheduler;

pub use lock_step_local_core::LockStepTaskScheduler4ThreadsLocalCore;
pub use lock_step_task_scheduler::{LockStepFunction, LockStepSetFunction, LockStepTaskScheduler};
pub use task::{CompleteFunction, RunFunction, Task, TaskContext};
pub use task_barrier::TaskBarrier;
pub use task_event::TaskEvent;
pub use task_scheduler::{Queue, TaskScheduler};
