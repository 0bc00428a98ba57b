//! Synchronization primitives.
//!
//! Thin wrappers over std or parking_lot mutexes. Neither implementation
//! allocates on lock or unlock, which matters here: these mutexes guard
//! state mutated from inside `malloc` itself.

pub(crate) mod mutex;
