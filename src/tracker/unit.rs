//! The per-allocation tracking header.
//!
//! Every pointer handed out by the tracer is preceded by a `UnitHeader`
//! living in the same underlying allocation. The header is recovered from a
//! payload pointer by plain pointer arithmetic, so its size is fixed and the
//! payload keeps `max_align_t` alignment behind it.

use std::ptr;

/// Number of call-stack frames captured per allocation.
pub const BACKTRACE_DEPTH: usize = 10;

/// Magic constant mixed with the header's own address to form the integrity
/// tag. A pointer that was not produced by this tracer will practically never
/// carry a matching tag at `payload - HEADER_SIZE`.
const UNIT_MAGIC: u64 = 0xFEEF_9FF9_CDDC_9889;

/// Header embedded immediately before every traced payload.
///
/// The header *is* the first `HEADER_SIZE` bytes of the memory obtained from
/// the real allocator (or the bootstrap arena); the registry only owns the
/// `prev`/`next` linkage, never the memory.
#[repr(C)]
pub(crate) struct UnitHeader {
    /// `UNIT_MAGIC ^ address(self)`; zeroed when the unit is unregistered.
    pub(crate) tag: u64,

    /// Carved from the bootstrap arena, never actually released.
    pub(crate) bootstrap: bool,

    /// Intrusive registry links.
    pub(crate) prev: *mut UnitHeader,
    pub(crate) next: *mut UnitHeader,

    /// Registration order, assigned under the registry lock.
    pub(crate) serial: u64,

    /// Requested payload size in bytes (not header-inclusive).
    pub(crate) size: usize,

    /// Address returned to the caller: `self + HEADER_SIZE`.
    pub(crate) payload: *mut u8,

    /// Number of valid entries in `trace`.
    pub(crate) trace_len: usize,

    /// Instruction pointers captured at allocation time.
    pub(crate) trace: [usize; BACKTRACE_DEPTH],
}

/// Fixed offset between a header and its payload.
pub(crate) const HEADER_SIZE: usize = std::mem::size_of::<UnitHeader>();

// Payloads sit at `header + HEADER_SIZE` and must keep 16-byte alignment.
const _: () = assert!(HEADER_SIZE % 16 == 0);

impl UnitHeader {
    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    #[inline]
    pub(crate) fn is_bootstrap(&self) -> bool {
        self.bootstrap
    }

    /// Captured frames, oldest call last.
    #[inline]
    pub(crate) fn frames(&self) -> &[usize] {
        &self.trace[..self.trace_len.min(BACKTRACE_DEPTH)]
    }
}

/// Recover the header from a payload pointer.
///
/// # Safety
///
/// `payload` must point at least `HEADER_SIZE` bytes into an addressable
/// region. The placement contract (`header = payload - HEADER_SIZE`) is
/// assumed, never verified; validity is checked separately via [`is_valid`].
#[inline]
pub(crate) unsafe fn from_payload(payload: *mut u8) -> *mut UnitHeader {
    payload.sub(HEADER_SIZE) as *mut UnitHeader
}

/// The payload address for a header.
///
/// # Safety
///
/// `header` must point into an allocation of at least `HEADER_SIZE` bytes.
#[inline]
pub(crate) unsafe fn payload_of(header: *mut UnitHeader) -> *mut u8 {
    (header as *mut u8).add(HEADER_SIZE)
}

/// The tag a header at this address must carry to be considered ours.
#[inline]
pub(crate) fn expected_tag(header: *const UnitHeader) -> u64 {
    UNIT_MAGIC ^ header as usize as u64
}

/// Initialize a freshly carved header in place.
///
/// Registry links and the serial are cleared here and filled in by
/// `TrackingRegistry::register`. Bootstrap units skip backtrace capture:
/// the unwinder is not warmed up yet while they are being created.
///
/// # Safety
///
/// `header` must point at `HEADER_SIZE + size` bytes of writable memory.
pub(crate) unsafe fn initialize(header: *mut UnitHeader, size: usize, bootstrap: bool) {
    (*header).tag = expected_tag(header);
    (*header).bootstrap = bootstrap;
    (*header).prev = ptr::null_mut();
    (*header).next = ptr::null_mut();
    (*header).serial = 0;
    (*header).size = size;
    (*header).payload = payload_of(header);
    (*header).trace = [0; BACKTRACE_DEPTH];
    (*header).trace_len = if bootstrap {
        0
    } else {
        capture_backtrace(&mut (*header).trace)
    };
}

/// Read-only validity check: matching integrity tag and a strictly positive
/// recorded size. Never takes a lock, never mutates.
///
/// # Safety
///
/// `header` must be null or point at readable memory of header size.
#[inline]
pub(crate) unsafe fn is_valid(header: *const UnitHeader) -> bool {
    if header.is_null() {
        return false;
    }
    (*header).tag == expected_tag(header) && (*header).size > 0
}

/// Invalidate a header's tag so any later release of the same payload fails
/// the validity check instead of corrupting the registry.
///
/// # Safety
///
/// `header` must point at a live header.
#[inline]
pub(crate) unsafe fn poison(header: *mut UnitHeader) {
    (*header).tag = 0;
}

/// Fill `frames` with the current call stack's instruction pointers.
///
/// Uses the frame walk only; symbolization is deferred to report time
/// because it allocates.
pub(crate) fn capture_backtrace(frames: &mut [usize; BACKTRACE_DEPTH]) -> usize {
    let mut depth = 0;
    backtrace::trace(|frame| {
        frames[depth] = frame.ip() as usize;
        depth += 1;
        depth < BACKTRACE_DEPTH
    });
    depth
}

#[cfg(test)]
mod tests {
    use super::*;

    // Backing storage for a header plus a payload, with u64 alignment.
    fn backing(payload_size: usize) -> Vec<u64> {
        vec![0u64; (HEADER_SIZE + payload_size + 7) / 8]
    }

    #[test]
    fn test_header_payload_round_trip() {
        let mut buf = backing(64);
        let header = buf.as_mut_ptr() as *mut UnitHeader;
        unsafe {
            initialize(header, 64, false);
            let payload = payload_of(header);
            assert_eq!(from_payload(payload), header);
            assert_eq!((*header).payload, payload);
        }
    }

    #[test]
    fn test_valid_after_initialize() {
        let mut buf = backing(32);
        let header = buf.as_mut_ptr() as *mut UnitHeader;
        unsafe {
            initialize(header, 32, false);
            assert!(is_valid(header));
            assert_eq!((*header).size(), 32);
            assert!(!(*header).is_bootstrap());
        }
    }

    #[test]
    fn test_zero_size_is_invalid() {
        let mut buf = backing(0);
        let header = buf.as_mut_ptr() as *mut UnitHeader;
        unsafe {
            initialize(header, 0, false);
            assert!(!is_valid(header));
        }
    }

    #[test]
    fn test_poison_invalidates() {
        let mut buf = backing(16);
        let header = buf.as_mut_ptr() as *mut UnitHeader;
        unsafe {
            initialize(header, 16, false);
            poison(header);
            assert!(!is_valid(header));
        }
    }

    #[test]
    fn test_tag_is_address_dependent() {
        // A byte-for-byte copy of a valid header at a different address must
        // not validate: the tag binds the header to where it lives.
        let mut buf = backing(16);
        let header = buf.as_mut_ptr() as *mut UnitHeader;
        let mut copy = backing(16);
        let copied = copy.as_mut_ptr() as *mut UnitHeader;
        unsafe {
            initialize(header, 16, false);
            std::ptr::copy_nonoverlapping(header as *const u8, copied as *mut u8, HEADER_SIZE);
            assert!(is_valid(header));
            assert!(!is_valid(copied));
        }
    }

    #[test]
    fn test_backtrace_captured() {
        let mut buf = backing(8);
        let header = buf.as_mut_ptr() as *mut UnitHeader;
        unsafe {
            initialize(header, 8, false);
            assert!((*header).frames().len() > 0);
        }
    }

    #[test]
    fn test_bootstrap_skips_backtrace() {
        let mut buf = backing(8);
        let header = buf.as_mut_ptr() as *mut UnitHeader;
        unsafe {
            initialize(header, 8, true);
            assert!((*header).is_bootstrap());
            assert!((*header).frames().is_empty());
        }
    }
}
