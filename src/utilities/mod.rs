mod bounding_box;
pub use self::bounding_box::*;

pub(crate) mod local_spin_wait;
pub mod memory;
pub mod task_scheduling;

mod thread_dispatcher;
pub use self::thread_dispatcher::*;
