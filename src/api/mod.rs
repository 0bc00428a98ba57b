//! Public tracing API: the six interception entry points and the
//! statistics snapshot.

pub mod stats;
pub mod trace;
