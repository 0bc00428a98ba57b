//! Shutdown-time leak analysis.
//!
//! Walks the tracking registry once, prints whatever is still live to
//! stderr, and (in auto-release mode) force-releases it. The default at
//! process exit is report-only: the process is terminating anyway, so
//! releasing is cosmetic.

use std::ffi::c_void;

use crate::api::trace;
use crate::config;
use crate::diagnostics::maps;
use crate::tracker::registry;
use crate::tracker::unit::UnitHeader;
use crate::util::format_bytes;

/// Summary of one analysis pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeakReport {
    /// Units still live when the walk started, bootstrap included.
    pub leaked_count: u64,

    /// Payload bytes still live, bootstrap included.
    pub leaked_bytes: u64,

    /// Live units that were carved from the bootstrap arena (expected,
    /// reported at lower severity).
    pub bootstrap_count: u64,

    /// Payload bytes in live bootstrap units.
    pub bootstrap_bytes: u64,

    /// Non-bootstrap leaks that carried at least one captured frame.
    pub leaked_with_backtrace: u64,
}

impl LeakReport {
    /// Leaks that are actually worth chasing: live, not bootstrap.
    pub fn real_count(&self) -> u64 {
        self.leaked_count.saturating_sub(self.bootstrap_count)
    }

    /// Bytes behind [`real_count`](Self::real_count).
    pub fn real_bytes(&self) -> u64 {
        self.leaked_bytes.saturating_sub(self.bootstrap_bytes)
    }
}

/// Walk the registry and report everything still live.
///
/// With `auto_release`, each reported non-bootstrap unit is released through
/// the normal free path, which unlinks it from the list being walked; the
/// cursor is always advanced before the release so the walk never touches a
/// just-unlinked node.
///
/// Runs unlocked. It is meant for process teardown, when no other thread is
/// still allocating; concurrent mutation during the walk is the caller's
/// problem, exactly as it is for the destructor hook that drives this.
pub fn analyse(auto_release: bool) -> LeakReport {
    let stats = trace::stats();

    let mut report = LeakReport {
        leaked_count: stats.live_count(),
        leaked_bytes: stats.live_bytes(),
        ..LeakReport::default()
    };

    #[cfg(feature = "log")]
    log::debug!(
        "tracealloc: leak analysis ({} live, auto_release={})",
        report.leaked_count,
        auto_release
    );

    eprintln!(
        "[tracealloc] unreleased: {} allocations, {}",
        report.leaked_count,
        format_bytes(report.leaked_bytes)
    );

    let mut node = registry().first();
    while !node.is_null() {
        let current = node;
        // Advance before any release below can unlink `current`.
        node = unsafe { (*current).next };

        unsafe {
            if (*current).is_bootstrap() {
                report.bootstrap_count += 1;
                report.bootstrap_bytes += (*current).size() as u64;
                eprintln!(
                    "[tracealloc] bootstrap unit, size: {}, serial: {}",
                    (*current).size(),
                    (*current).serial()
                );
                continue;
            }

            print_unit(current);
            if !(*current).frames().is_empty() {
                report.leaked_with_backtrace += 1;
            }

            if auto_release {
                trace::imp_free((*current).payload, true);
            }
        }
    }

    if config::dump_maps() {
        maps::dump();
    }

    report
}

/// Run the final analysis pass. The destructor hook invokes this with the
/// auto-release mode taken from the environment; embedders call it directly
/// with whichever mode they want.
pub fn shutdown(auto_release: bool) -> LeakReport {
    analyse(auto_release)
}

unsafe fn print_unit(header: *const UnitHeader) {
    eprintln!(
        "[tracealloc] ++++++++++++++ unreleased addr: {:p}, size: {}, serial: {} ++++++++++++++",
        (*header).payload,
        (*header).size(),
        (*header).serial()
    );
    eprintln!("[tracealloc] backtrace:");
    for (index, ip) in (*header).frames().iter().enumerate() {
        print_frame(index, *ip);
    }
    eprintln!("[tracealloc] ++++++++++++++ end ++++++++++++++");
}

/// Symbolize one frame. Resolution allocates, which is fine here: the
/// tracer is fully initialized, so nested allocations are simply tracked.
fn print_frame(index: usize, ip: usize) {
    let mut resolved = false;
    backtrace::resolve(ip as *mut c_void, |symbol| {
        resolved = true;
        let name = symbol
            .name()
            .map(|n| n.to_string())
            .unwrap_or_else(|| String::from("<unknown>"));
        match (symbol.filename(), symbol.lineno()) {
            (Some(file), Some(line)) => {
                eprintln!(
                    "[tracealloc]   {:2}: {:#018x} - {} ({}:{})",
                    index,
                    ip,
                    name,
                    file.display(),
                    line
                );
            }
            _ => {
                eprintln!("[tracealloc]   {:2}: {:#018x} - {}", index, ip, name);
            }
        }
    });
    if !resolved {
        eprintln!("[tracealloc]   {:2}: {:#018x}", index, ip);
    }
}
