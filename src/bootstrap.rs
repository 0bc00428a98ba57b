//! Bootstrap allocator: a fixed arena for the resolution window.
//!
//! While the real allocator's entry points are being resolved, `dlsym` and
//! the loader machinery behind it may themselves allocate. Those requests
//! cannot go to the real path (its function pointers do not exist yet), so
//! they are carved out of a static bump arena instead. Arena memory is never
//! reclaimed; the window is short and bounded by what symbol resolution
//! allocates.

use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::tracker::registry;
use crate::tracker::unit::{self, UnitHeader, HEADER_SIZE};
use crate::util::{self, align_up};

/// 1 MiB: generous for a window that only has to absorb loader-internal
/// allocations.
const ARENA_SIZE: usize = 1024 * 1024;

#[repr(align(16))]
struct Arena([u8; ARENA_SIZE]);

static mut ARENA: Arena = Arena([0; ARENA_SIZE]);

/// Next free offset into the arena. Advances monotonically; multiple threads
/// can observe the resolution window concurrently, so the advance is a CAS,
/// not a plain read-modify-write.
static CURSOR: AtomicUsize = AtomicUsize::new(0);

#[inline]
fn arena_base() -> *mut u8 {
    unsafe { ptr::addr_of_mut!(ARENA) as *mut u8 }
}

/// Carve `size` payload bytes (plus the tracking header) from the arena,
/// register the unit, and return the payload pointer.
///
/// Requests the arena can never satisfy are refused with null, the same
/// failure contract as the real path. Exhaustion by requests that *could*
/// have fit is fatal: there is no fallback before the real allocator
/// exists, and running out here means the arena is mis-sized for the
/// platform's loader.
pub(crate) unsafe fn allocate(size: usize) -> *mut u8 {
    allocate_aligned(16, size)
}

/// Aligned carve. The alignment lands on the unit header, matching the
/// real memalign path. Non-power-of-two alignments, or alignments the
/// arena cannot honor, are refused with null.
pub(crate) unsafe fn allocate_aligned(alignment: usize, size: usize) -> *mut u8 {
    // Capping size at the arena capacity up front keeps every sum below
    // from overflowing: total and start both stay within a few headers of
    // ARENA_SIZE.
    if size > ARENA_SIZE || !alignment.is_power_of_two() || alignment > ARENA_SIZE {
        return ptr::null_mut();
    }

    let align = alignment.max(16);
    let total = align_up(size + HEADER_SIZE, 16);
    let base = arena_base() as usize;

    let mut start;
    loop {
        let offset = CURSOR.load(Ordering::Relaxed);
        start = align_up(base + offset, align) - base;
        if start + total > ARENA_SIZE {
            util::die("tracealloc: bootstrap arena exhausted");
        }
        if CURSOR
            .compare_exchange_weak(offset, start + total, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            break;
        }
    }

    let header = arena_base().add(start) as *mut UnitHeader;
    unit::initialize(header, size, true);
    registry().register(header);
    unit::payload_of(header)
}

/// `count * size` zeroed payload bytes from the arena.
///
/// Overflow of the multiplication is surfaced as allocation failure, the
/// same contract the real calloc path uses.
pub(crate) unsafe fn zero_allocate(count: usize, size: usize) -> *mut u8 {
    let total = match count.checked_mul(size) {
        Some(t) => t,
        None => return ptr::null_mut(),
    };
    let payload = allocate(total);
    if payload.is_null() {
        return ptr::null_mut();
    }
    ptr::write_bytes(payload, 0, total);
    payload
}

/// Releasing bootstrap memory is deliberately a no-op: the arena never
/// reclaims space. Exists for symmetry with the real release path.
pub(crate) fn release(_payload: *mut u8) {}

/// Whether a pointer lies inside the arena.
pub(crate) fn contains(ptr: *const u8) -> bool {
    let base = arena_base() as usize;
    let p = ptr as usize;
    p >= base && p < base + ARENA_SIZE
}
