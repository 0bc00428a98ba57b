//! The interception layer: lifecycle state machine and the six entry points.
//!
//! Every entry point applies the same dispatch at the top:
//!
//! 1. state == INITIALIZING: the resolver is mid-flight on some thread (or
//!    this one, recursively). Serve the request from the bootstrap arena.
//!    Never touch the resolver, never block.
//! 2. state != INITIALIZED: run initialization (which flips the state to
//!    INITIALIZING and may recursively hit rule 1).
//! 3. Otherwise: perform the real operation and register/unregister the
//!    unit with the tracking registry.
//!
//! Rule 1 is what breaks the chicken-and-egg cycle: `dlsym` may allocate
//! before the pointers it is resolving exist, and those allocations must not
//! reach the real path or re-enter resolution.

use std::ptr;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::api::stats::TraceStats;
use crate::bootstrap;
use crate::config;
use crate::resolver;
use crate::sync::mutex::Mutex;
use crate::tracker::registry;
use crate::tracker::unit::{self, UnitHeader, BACKTRACE_DEPTH, HEADER_SIZE};

pub(crate) const UNINITIALIZED: u8 = 0;
pub(crate) const INITIALIZING: u8 = 1;
pub(crate) const INITIALIZED: u8 = 2;
/// Terminal failure state. Resolution failure aborts instead of entering it,
/// but the value stays reserved so state dumps remain stable.
#[allow(dead_code)]
pub(crate) const FAILED: u8 = 3;

static STATE: AtomicU8 = AtomicU8::new(UNINITIALIZED);

/// Serializes the UNINITIALIZED -> INITIALIZING -> INITIALIZED transition.
/// Held only while resolving; threads that observe INITIALIZING route to the
/// bootstrap arena and never contend for it.
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Nesting depth of real-path dispatches, process-global. Consulted only to
/// mute trace lines for recursive calls; never gates correctness.
static DEPTH: AtomicUsize = AtomicUsize::new(0);

#[inline]
fn state() -> u8 {
    STATE.load(Ordering::Acquire)
}

/// Whether the real allocator has been resolved.
pub fn is_initialized() -> bool {
    state() == INITIALIZED
}

/// Resolve the real allocator now instead of lazily at the first allocation.
///
/// Idempotent. The symbol shims call this implicitly; embedders driving the
/// tracer as a library can call it once up front.
pub fn init() {
    ensure_initialized();
}

/// Snapshot the registry's aggregate counters.
pub fn stats() -> TraceStats {
    registry().stats()
}

fn ensure_initialized() {
    // Unsynchronized fast-path read, rechecked under the lock: the hot
    // allocation path must not serialize on the init mutex once ready.
    if state() == INITIALIZED {
        return;
    }

    let _guard = INIT_LOCK.lock();
    if state() == INITIALIZED {
        return;
    }

    STATE.store(INITIALIZING, Ordering::Release);

    config::read_config();

    unsafe { resolver::resolve() };

    // Warm up the unwinder while requests still route to the arena; its
    // lazy first-use allocations must not land on the real path before
    // tracking is ready.
    let mut scratch = [0usize; BACKTRACE_DEPTH];
    unit::capture_backtrace(&mut scratch);

    STATE.store(INITIALIZED, Ordering::Release);

    #[cfg(feature = "log")]
    log::debug!("tracealloc: real allocator resolved, tracing active");
}

/// RAII depth counter around each real-path dispatch.
struct ReentryGuard {
    nested: bool,
}

impl ReentryGuard {
    #[inline]
    fn enter() -> Self {
        Self {
            nested: DEPTH.fetch_add(1, Ordering::Relaxed) > 0,
        }
    }
}

impl Drop for ReentryGuard {
    #[inline]
    fn drop(&mut self) {
        DEPTH.fetch_sub(1, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Tracked `malloc`: allocate `size` payload bytes.
pub fn trace_malloc(size: usize) -> *mut u8 {
    if state() == INITIALIZING {
        return unsafe { bootstrap::allocate(size) };
    }
    if state() != INITIALIZED {
        ensure_initialized();
    }

    let guard = ReentryGuard::enter();
    unsafe { imp_malloc(size, guard.nested) }
}

/// Tracked `calloc`: `count * size` zeroed payload bytes.
pub fn trace_calloc(count: usize, size: usize) -> *mut u8 {
    if state() == INITIALIZING {
        return unsafe { bootstrap::zero_allocate(count, size) };
    }
    if state() != INITIALIZED {
        ensure_initialized();
    }

    let guard = ReentryGuard::enter();
    unsafe { imp_calloc(count, size, guard.nested) }
}

/// Tracked `realloc`. Always copy-based: a brand-new unit of `size` bytes is
/// allocated, the overlapping prefix copied over, and the old unit released.
/// A null `ptr` behaves as a plain allocation.
///
/// # Safety
///
/// `ptr` must be null, a payload pointer previously returned by this tracer,
/// or a foreign pointer (which gets a fresh allocation with nothing copied).
pub unsafe fn trace_realloc(ptr: *mut u8, size: usize) -> *mut u8 {
    if state() == INITIALIZING {
        let fresh = bootstrap::allocate(size);
        if fresh.is_null() {
            // Failed resize leaves the old unit untouched.
            return ptr::null_mut();
        }
        if !ptr.is_null() {
            let old = unit::from_payload(ptr);
            if unit::is_valid(old) {
                let copy = size.min((*old).size());
                ptr::copy_nonoverlapping(ptr, fresh, copy);
                bootstrap::release(ptr);
            }
        }
        return fresh;
    }
    if state() != INITIALIZED {
        ensure_initialized();
    }

    let guard = ReentryGuard::enter();
    imp_realloc(ptr, size, guard.nested)
}

/// Tracked `memalign`: allocate at the given alignment.
///
/// The requested alignment lands on the unit header; the payload keeps it
/// only as long as the header size is a multiple of the request. This is the
/// historical memalign-hooking contract, preserved as-is.
pub fn trace_memalign(alignment: usize, size: usize) -> *mut u8 {
    if state() == INITIALIZING {
        // The arena honors the alignment the same way the real path does:
        // the request lands on the unit header.
        return unsafe { bootstrap::allocate_aligned(alignment, size) };
    }
    if state() != INITIALIZED {
        ensure_initialized();
    }

    let guard = ReentryGuard::enter();
    unsafe { imp_memalign(alignment, size, guard.nested) }
}

/// Tracked `valloc`: page-granularity allocation.
pub fn trace_valloc(size: usize) -> *mut u8 {
    if state() == INITIALIZING {
        return unsafe { bootstrap::allocate(size) };
    }
    if state() != INITIALIZED {
        ensure_initialized();
    }

    let guard = ReentryGuard::enter();
    unsafe { imp_valloc(size, guard.nested) }
}

/// Tracked `free`.
///
/// Pointers that do not carry a valid unit header are silently ignored: they
/// are either foreign (allocated before hooking became active) or already
/// released (the registry poisons the tag on unregister), and a strict
/// policy would crash on both.
///
/// # Safety
///
/// `ptr` must be null or point at memory where reading `HEADER_SIZE` bytes
/// in front of it is defined.
pub unsafe fn trace_free(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    if state() == INITIALIZING {
        // Bootstrap memory is never reclaimed; rule 1 forbids touching the
        // registry path while resolution is in flight.
        bootstrap::release(ptr);
        return;
    }
    if state() != INITIALIZED {
        ensure_initialized();
    }

    let guard = ReentryGuard::enter();
    imp_free(ptr, guard.nested);
}

// ---------------------------------------------------------------------------
// Real-path implementations
// ---------------------------------------------------------------------------

unsafe fn imp_malloc(size: usize, nested: bool) -> *mut u8 {
    let total = match size.checked_add(HEADER_SIZE) {
        Some(t) => t,
        None => return ptr::null_mut(),
    };

    let header = resolver::real_malloc(total) as *mut UnitHeader;
    if header.is_null() {
        // Out of memory propagates to the caller, standard contract.
        return ptr::null_mut();
    }

    unit::initialize(header, size, false);
    registry().register(header);
    trace_line(nested, "malloc", header);

    unit::payload_of(header)
}

unsafe fn imp_calloc(count: usize, size: usize, nested: bool) -> *mut u8 {
    let payload_size = match count.checked_mul(size) {
        Some(t) => t,
        None => return ptr::null_mut(),
    };
    let total = match payload_size.checked_add(HEADER_SIZE) {
        Some(t) => t,
        None => return ptr::null_mut(),
    };

    // Keep the element-wise call shape but widen it so the zeroed region
    // covers the header as well as the requested payload.
    let header = if size == 0 {
        resolver::real_calloc(1, total)
    } else {
        let elems = total / size + usize::from(total % size != 0);
        resolver::real_calloc(elems, size)
    } as *mut UnitHeader;
    if header.is_null() {
        return ptr::null_mut();
    }

    // Recorded size is what the caller asked for, not the widened region.
    unit::initialize(header, payload_size, false);
    registry().register(header);
    trace_line(nested, "calloc", header);

    unit::payload_of(header)
}

unsafe fn imp_realloc(ptr: *mut u8, size: usize, nested: bool) -> *mut u8 {
    let fresh = imp_malloc(size, true);
    if fresh.is_null() {
        return ptr::null_mut();
    }

    if !ptr.is_null() {
        let old = unit::from_payload(ptr);
        if unit::is_valid(old) {
            let copy = size.min((*old).size());
            ptr::copy_nonoverlapping(ptr, fresh, copy);
            imp_free(ptr, true);
        }
        // Foreign pointers get a fresh allocation with nothing copied.
    }

    trace_line(nested, "realloc", unit::from_payload(fresh));
    fresh
}

unsafe fn imp_memalign(alignment: usize, size: usize, nested: bool) -> *mut u8 {
    let total = match size.checked_add(HEADER_SIZE) {
        Some(t) => t,
        None => return ptr::null_mut(),
    };

    let header = resolver::real_memalign(alignment, total) as *mut UnitHeader;
    if header.is_null() {
        return ptr::null_mut();
    }

    unit::initialize(header, size, false);
    registry().register(header);
    trace_line(nested, "memalign", header);

    unit::payload_of(header)
}

unsafe fn imp_valloc(size: usize, nested: bool) -> *mut u8 {
    let total = match size.checked_add(HEADER_SIZE) {
        Some(t) => t,
        None => return ptr::null_mut(),
    };

    let header = resolver::real_valloc(total) as *mut UnitHeader;
    if header.is_null() {
        return ptr::null_mut();
    }

    unit::initialize(header, size, false);
    registry().register(header);
    trace_line(nested, "valloc", header);

    unit::payload_of(header)
}

pub(crate) unsafe fn imp_free(ptr: *mut u8, nested: bool) {
    if ptr.is_null() {
        return;
    }

    let header = unit::from_payload(ptr);
    if !unit::is_valid(header) {
        // Not ours, or released already.
        return;
    }

    let from_bootstrap = (*header).is_bootstrap();
    trace_line(nested, "free", header);

    registry().unregister(header);

    if from_bootstrap {
        bootstrap::release(ptr);
    } else {
        resolver::real_free(header as *mut u8);
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

#[cfg(feature = "diagnostics")]
unsafe fn trace_line(nested: bool, op: &str, header: *const UnitHeader) {
    if nested || !config::verbose() {
        return;
    }
    eprintln!(
        "[tracealloc] {} {:p} ({} bytes)",
        op,
        (*header).payload,
        (*header).size()
    );
}

#[cfg(not(feature = "diagnostics"))]
#[inline]
unsafe fn trace_line(_nested: bool, _op: &str, _header: *const UnitHeader) {}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------

/// Force the lifecycle state. Only reachable through `__test_support`.
#[doc(hidden)]
pub(crate) fn force_state(value: u8) {
    STATE.store(value, Ordering::Release);
}
