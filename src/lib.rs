//! # tracealloc
//!
//! Transparent heap interposition and leak tracing for native processes.
//!
//! tracealloc replaces the six standard heap entry points (`malloc`,
//! `calloc`, `realloc`, `memalign`, `valloc`, `free`) so that every
//! allocation a process makes — its own startup code and every library
//! included — is recorded with a call-site backtrace, validated on release,
//! and reported at shutdown if it was never released.
//!
//! ## Features
//!
//! - Intrusive tracking: the bookkeeping header lives inside each
//!   allocation, in front of the returned pointer — no side tables
//! - Two-tier bootstrap: a fixed arena absorbs the allocations the dynamic
//!   loader makes *while* the real allocator is being resolved
//! - Per-allocation integrity tag: releases of foreign or already-released
//!   pointers are detected and ignored
//! - Shutdown leak report with symbolized backtraces
//! - `hook` feature: a preloadable cdylib exporting the C symbols
//!
//! ## Quick Start
//!
//! As a library:
//!
//! ```rust,no_run
//! tracealloc::init();
//!
//! let p = tracealloc::trace_malloc(64);
//! assert!(!p.is_null());
//! unsafe { tracealloc::trace_free(p) };
//!
//! let report = tracealloc::shutdown(false);
//! assert_eq!(report.real_count(), 0);
//! ```
//!
//! As a preloaded tracer:
//!
//! ```text
//! cargo build --release --features hook
//! LD_PRELOAD=target/release/libtracealloc.so ./your-program
//! ```

pub mod api;
pub mod diagnostics;
pub mod report;

mod bootstrap;
mod config;
mod resolver;
mod sync;
mod tracker;
mod util;

#[cfg(all(feature = "hook", target_os = "linux"))]
mod abi;

// Re-export the public API at the crate root for convenience
pub use api::stats::TraceStats;
pub use api::trace::{
    init, is_initialized, stats, trace_calloc, trace_free, trace_malloc, trace_memalign,
    trace_realloc, trace_valloc,
};
pub use report::{analyse, shutdown, LeakReport};

/// Internal knobs for integration tests. Not public API.
#[doc(hidden)]
pub mod __test_support {
    /// Force the lifecycle state into the resolution window, as if some
    /// thread were mid-resolve.
    pub fn enter_resolution_window() {
        crate::api::trace::force_state(crate::api::trace::INITIALIZING);
    }

    /// Leave the forced resolution window (back to uninitialized, so the
    /// next call initializes normally).
    pub fn leave_resolution_window() {
        crate::api::trace::force_state(crate::api::trace::UNINITIALIZED);
    }

    /// Whether a pointer lies inside the bootstrap arena.
    pub fn in_bootstrap_arena(ptr: *const u8) -> bool {
        crate::bootstrap::contains(ptr)
    }

    /// Size and captured-frame count for a live unit, by payload pointer.
    ///
    /// # Safety
    ///
    /// `payload` must be a pointer returned by one of the trace entry
    /// points that has not been released.
    pub unsafe fn live_unit_info(payload: *mut u8) -> Option<(usize, usize)> {
        let header = crate::tracker::unit::from_payload(payload);
        if !crate::tracker::unit::is_valid(header) {
            return None;
        }
        Some(((*header).size(), (*header).frames().len()))
    }
}
