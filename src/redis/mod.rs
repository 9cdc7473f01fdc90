//! Redis-backed window allocation.
//!
//! Window counters live in Redis and are updated by an atomic Lua script, so limiters in
//! different processes (or on different machines) share one throughput cap per window.
//!
//! # Data model
//!
//! - `<prefix>:<token>:<window_id>`: integer count of permits granted in that window,
//!   expiring `3 × window` seconds after its last grant.
//! - `window_id = ceil(redis_time_seconds / window_size_seconds)`.

mod redis_window_allocator;
pub use redis_window_allocator::*;
