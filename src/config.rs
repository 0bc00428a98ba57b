//! Runtime switches, read once from the environment during initialization.
//!
//! There is no configuration file and no CLI surface; a preloaded tracer can
//! only reasonably be steered through the environment of the process it is
//! riding in.

use std::sync::atomic::{AtomicBool, Ordering};

/// Leak walk force-releases whatever it reports.
static AUTO_RELEASE: AtomicBool = AtomicBool::new(false);

/// Append a `/proc/self/maps` dump to the leak report.
static DUMP_MAPS: AtomicBool = AtomicBool::new(false);

/// Per-call trace lines (only observable with the `diagnostics` feature).
static VERBOSE: AtomicBool = AtomicBool::new(false);

fn env_flag(name: &str) -> bool {
    match std::env::var_os(name) {
        Some(v) => v == "1" || v == "true" || v == "on",
        None => false,
    }
}

/// Read all switches. Called from the initialization path while allocation
/// requests are still routed to the bootstrap arena, so the `var_os`
/// allocations are safe to make.
pub(crate) fn read_config() {
    AUTO_RELEASE.store(env_flag("TRACEALLOC_AUTO_RELEASE"), Ordering::Relaxed);
    DUMP_MAPS.store(env_flag("TRACEALLOC_MAPS"), Ordering::Relaxed);
    VERBOSE.store(env_flag("TRACEALLOC_VERBOSE"), Ordering::Relaxed);
}

pub(crate) fn auto_release() -> bool {
    AUTO_RELEASE.load(Ordering::Relaxed)
}

pub(crate) fn dump_maps() -> bool {
    DUMP_MAPS.load(Ordering::Relaxed)
}

#[cfg(feature = "diagnostics")]
pub(crate) fn verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_flag_accepts_common_spellings() {
        std::env::set_var("TRACEALLOC_TEST_FLAG", "1");
        assert!(env_flag("TRACEALLOC_TEST_FLAG"));
        std::env::set_var("TRACEALLOC_TEST_FLAG", "true");
        assert!(env_flag("TRACEALLOC_TEST_FLAG"));
        std::env::set_var("TRACEALLOC_TEST_FLAG", "0");
        assert!(!env_flag("TRACEALLOC_TEST_FLAG"));
        std::env::remove_var("TRACEALLOC_TEST_FLAG");
        assert!(!env_flag("TRACEALLOC_TEST_FLAG"));
    }
}
