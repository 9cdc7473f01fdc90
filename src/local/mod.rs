//! In-process window allocation.
//!
//! [`InMemoryWindowAllocator`] keeps the per-window counters inside the current process
//! using a [`DashMap`](dashmap::DashMap). It enforces the same cap as the Redis allocator
//! but only among limiters that share the allocator (clones share state).
//!
//! # When to Use
//!
//! - Single-process applications that still want batched permit accounting
//! - Tests and benchmarks that should not depend on a running Redis
//!
//! For limits shared between processes, use the Redis allocator.

mod in_memory_window_allocator;
pub use in_memory_window_allocator::*;
