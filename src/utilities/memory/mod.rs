//! Arena storage for acceleration structures.
//!
//! Nodes and leaves are never freed individually. Builders allocate from per-thread bump
//! allocators backed by a shared block counter, and lazily grown structures allocate from a
//! fixed-capacity concurrent arena.

mod block_arena;
mod concurrent_arena;
mod shared_span;

pub use block_arena::{BlockArena, ThreadLocalArena};
pub use concurrent_arena::ConcurrentArena;
pub(crate) use shared_span::SharedSpan;
