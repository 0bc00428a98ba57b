//! Real-allocator resolution.
//!
//! Because the crate (in `hook` builds) exports `malloc` and friends itself,
//! calling `libc::malloc` from inside would recurse straight back in. The
//! genuine implementations are found with `dlsym(RTLD_NEXT, ..)` — "the next
//! definition of this symbol after the current module" — and cached as raw
//! function pointers in atomics.
//!
//! Resolution happens exactly once, under the interception layer's
//! initialization lock. Any allocation `dlsym` performs while resolving is
//! routed to the bootstrap arena by the lifecycle state machine; nothing in
//! this module may depend on the pointers it is producing.

use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::util;

type MallocFn = unsafe extern "C" fn(usize) -> *mut c_void;
type CallocFn = unsafe extern "C" fn(usize, usize) -> *mut c_void;
type ReallocFn = unsafe extern "C" fn(*mut c_void, usize) -> *mut c_void;
type MemalignFn = unsafe extern "C" fn(usize, usize) -> *mut c_void;
type VallocFn = unsafe extern "C" fn(usize) -> *mut c_void;
type FreeFn = unsafe extern "C" fn(*mut c_void);

static REAL_MALLOC: AtomicUsize = AtomicUsize::new(0);
static REAL_CALLOC: AtomicUsize = AtomicUsize::new(0);
static REAL_REALLOC: AtomicUsize = AtomicUsize::new(0);
static REAL_MEMALIGN: AtomicUsize = AtomicUsize::new(0);
static REAL_VALLOC: AtomicUsize = AtomicUsize::new(0);
static REAL_FREE: AtomicUsize = AtomicUsize::new(0);

unsafe fn lookup(name: &'static [u8]) -> usize {
    debug_assert!(name.ends_with(b"\0"));
    libc::dlsym(libc::RTLD_NEXT, name.as_ptr() as *const libc::c_char) as usize
}

/// Resolve all six underlying entry points. Idempotent; missing symbols are
/// fatal because every later allocation depends on them.
pub(crate) unsafe fn resolve() {
    REAL_MALLOC.store(lookup(b"malloc\0"), Ordering::Release);
    REAL_CALLOC.store(lookup(b"calloc\0"), Ordering::Release);
    REAL_REALLOC.store(lookup(b"realloc\0"), Ordering::Release);
    REAL_MEMALIGN.store(lookup(b"memalign\0"), Ordering::Release);
    REAL_VALLOC.store(lookup(b"valloc\0"), Ordering::Release);
    REAL_FREE.store(lookup(b"free\0"), Ordering::Release);

    if REAL_MALLOC.load(Ordering::Acquire) == 0
        || REAL_CALLOC.load(Ordering::Acquire) == 0
        || REAL_REALLOC.load(Ordering::Acquire) == 0
        || REAL_MEMALIGN.load(Ordering::Acquire) == 0
        || REAL_VALLOC.load(Ordering::Acquire) == 0
        || REAL_FREE.load(Ordering::Acquire) == 0
    {
        util::die("tracealloc: failed to resolve the underlying allocator");
    }
}

// The accessors below assume `resolve` has completed; the lifecycle state
// machine guarantees they are only reached in the INITIALIZED state.

#[inline]
pub(crate) unsafe fn real_malloc(size: usize) -> *mut u8 {
    let f: MallocFn = std::mem::transmute(REAL_MALLOC.load(Ordering::Acquire));
    f(size) as *mut u8
}

#[inline]
pub(crate) unsafe fn real_calloc(nmemb: usize, size: usize) -> *mut u8 {
    let f: CallocFn = std::mem::transmute(REAL_CALLOC.load(Ordering::Acquire));
    f(nmemb, size) as *mut u8
}

// Resolved with the rest but unused: resizes go through a fresh
// allocation plus copy so the tracking header is never moved in place.
#[inline]
#[allow(dead_code)]
pub(crate) unsafe fn real_realloc(ptr: *mut u8, size: usize) -> *mut u8 {
    let f: ReallocFn = std::mem::transmute(REAL_REALLOC.load(Ordering::Acquire));
    f(ptr as *mut c_void, size) as *mut u8
}

#[inline]
pub(crate) unsafe fn real_memalign(alignment: usize, size: usize) -> *mut u8 {
    let f: MemalignFn = std::mem::transmute(REAL_MEMALIGN.load(Ordering::Acquire));
    f(alignment, size) as *mut u8
}

#[inline]
pub(crate) unsafe fn real_valloc(size: usize) -> *mut u8 {
    let f: VallocFn = std::mem::transmute(REAL_VALLOC.load(Ordering::Acquire));
    f(size) as *mut u8
}

#[inline]
pub(crate) unsafe fn real_free(ptr: *mut u8) {
    let f: FreeFn = std::mem::transmute(REAL_FREE.load(Ordering::Acquire));
    f(ptr as *mut c_void)
}
