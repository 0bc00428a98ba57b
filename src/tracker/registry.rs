//! The tracking registry: the authoritative ledger of live allocations.
//!
//! An intrusive doubly linked list of [`UnitHeader`]s plus aggregate
//! counters, all guarded by a single mutex. The registry owns the linkage
//! only; the memory behind each unit belongs to whichever allocator produced
//! it and is released through that allocator, never through the registry.

use crate::api::stats::TraceStats;
use crate::sync::mutex::Mutex;
use crate::tracker::unit::{self, UnitHeader};
use crate::util;

/// List ends plus aggregate counters. One critical section: everything in
/// here mutates together under the registry mutex.
struct RegistryInner {
    head: *mut UnitHeader,
    tail: *mut UnitHeader,
    next_serial: u64,
    allocation_count: u64,
    allocated_bytes: u64,
    release_count: u64,
    released_bytes: u64,
}

// The raw pointers are registry linkage into allocator-owned memory; all
// access goes through the mutex.
unsafe impl Send for RegistryInner {}

/// Mutex-guarded intrusive list of live allocation units.
pub(crate) struct TrackingRegistry {
    inner: Mutex<RegistryInner>,
}

impl TrackingRegistry {
    /// Create an empty registry.
    pub(crate) const fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                head: std::ptr::null_mut(),
                tail: std::ptr::null_mut(),
                next_serial: 0,
                allocation_count: 0,
                allocated_bytes: 0,
                release_count: 0,
                released_bytes: 0,
            }),
        }
    }

    /// Append a freshly initialized unit at the tail and assign its serial.
    ///
    /// Registration order reflects the order register calls win the lock,
    /// which is also the order serials are handed out.
    ///
    /// # Safety
    ///
    /// `header` must point at a unit initialized via `unit::initialize` that
    /// is not currently linked into any registry.
    pub(crate) unsafe fn register(&self, header: *mut UnitHeader) {
        if header.is_null() {
            return;
        }

        let mut inner = self.inner.lock();

        (*header).serial = inner.next_serial;
        inner.next_serial += 1;

        (*header).prev = inner.tail;
        (*header).next = std::ptr::null_mut();

        if inner.tail.is_null() {
            inner.head = header;
        } else {
            (*inner.tail).next = header;
        }
        inner.tail = header;

        inner.allocation_count += 1;
        inner.allocated_bytes += (*header).size() as u64;
    }

    /// Unlink a unit from wherever it sits in the list.
    ///
    /// The unit reached this path because it was previously registered, so a
    /// failing integrity tag here means corruption, not a foreign pointer:
    /// fatal. After unlinking, the tag is poisoned so a second release of the
    /// same payload degrades to the lenient foreign-pointer no-op.
    ///
    /// # Safety
    ///
    /// `header` must point at a unit currently linked in this registry.
    pub(crate) unsafe fn unregister(&self, header: *mut UnitHeader) {
        if header.is_null() {
            return;
        }

        let mut inner = self.inner.lock();

        if !unit::is_valid(header) {
            util::die("tracealloc: corrupt unit header on unregister");
        }

        let prev = (*header).prev;
        let next = (*header).next;

        if prev.is_null() {
            inner.head = next;
        } else {
            (*prev).next = next;
        }
        if next.is_null() {
            inner.tail = prev;
        } else {
            (*next).prev = prev;
        }

        (*header).prev = std::ptr::null_mut();
        (*header).next = std::ptr::null_mut();

        inner.release_count += 1;
        inner.released_bytes += (*header).size() as u64;

        unit::poison(header);
    }

    /// Snapshot the aggregate counters.
    pub(crate) fn stats(&self) -> TraceStats {
        let inner = self.inner.lock();
        TraceStats {
            allocation_count: inner.allocation_count,
            allocated_bytes: inner.allocated_bytes,
            release_count: inner.release_count,
            released_bytes: inner.released_bytes,
        }
    }

    /// Current head of the list, for the shutdown walk.
    ///
    /// The walk itself runs unlocked: it happens at process teardown, and
    /// auto-release re-enters the registry through `unregister`.
    pub(crate) fn first(&self) -> *mut UnitHeader {
        self.inner.lock().head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::unit::HEADER_SIZE;

    // Backing storage with u64 alignment; kept alive by the caller.
    fn make_unit(size: usize) -> (Vec<u64>, *mut UnitHeader) {
        let mut buf = vec![0u64; (HEADER_SIZE + size + 7) / 8];
        let header = buf.as_mut_ptr() as *mut UnitHeader;
        unsafe { unit::initialize(header, size, false) };
        (buf, header)
    }

    #[test]
    fn test_register_updates_counters_and_links() {
        let registry = TrackingRegistry::new();
        let (_b1, u1) = make_unit(64);
        let (_b2, u2) = make_unit(32);

        unsafe {
            registry.register(u1);
            registry.register(u2);

            assert_eq!(registry.first(), u1);
            assert_eq!((*u1).next, u2);
            assert_eq!((*u2).prev, u1);
        }

        let stats = registry.stats();
        assert_eq!(stats.allocation_count, 2);
        assert_eq!(stats.allocated_bytes, 96);
        assert_eq!(stats.live_count(), 2);
    }

    #[test]
    fn test_serials_strictly_increase() {
        let registry = TrackingRegistry::new();
        let (_b1, u1) = make_unit(8);
        let (_b2, u2) = make_unit(8);
        let (_b3, u3) = make_unit(8);

        unsafe {
            registry.register(u1);
            registry.register(u2);
            registry.register(u3);
            assert!((*u1).serial() < (*u2).serial());
            assert!((*u2).serial() < (*u3).serial());
        }
    }

    #[test]
    fn test_unregister_middle() {
        let registry = TrackingRegistry::new();
        let (_b1, u1) = make_unit(16);
        let (_b2, u2) = make_unit(16);
        let (_b3, u3) = make_unit(16);

        unsafe {
            registry.register(u1);
            registry.register(u2);
            registry.register(u3);

            registry.unregister(u2);

            assert_eq!((*u1).next, u3);
            assert_eq!((*u3).prev, u1);
        }

        let stats = registry.stats();
        assert_eq!(stats.live_count(), 2);
        assert_eq!(stats.released_bytes, 16);
    }

    #[test]
    fn test_unregister_head_and_tail() {
        let registry = TrackingRegistry::new();
        let (_b1, u1) = make_unit(16);
        let (_b2, u2) = make_unit(16);

        unsafe {
            registry.register(u1);
            registry.register(u2);

            registry.unregister(u1);
            assert_eq!(registry.first(), u2);
            assert!((*u2).prev.is_null());

            registry.unregister(u2);
            assert!(registry.first().is_null());
        }

        let stats = registry.stats();
        assert_eq!(stats.live_count(), 0);
        assert_eq!(stats.allocated_bytes, stats.released_bytes);
    }

    #[test]
    fn test_unregister_poisons_tag() {
        let registry = TrackingRegistry::new();
        let (_b1, u1) = make_unit(16);

        unsafe {
            registry.register(u1);
            registry.unregister(u1);
            assert!(!unit::is_valid(u1));
        }
    }

    #[test]
    fn test_counters_balance_after_churn() {
        let registry = TrackingRegistry::new();
        let mut keep = Vec::new();

        for i in 0..32 {
            let (buf, u) = make_unit(8 + i);
            unsafe { registry.register(u) };
            keep.push((buf, u));
        }
        for (_, u) in &keep {
            unsafe { registry.unregister(*u) };
        }

        let stats = registry.stats();
        assert_eq!(stats.allocation_count, 32);
        assert_eq!(stats.release_count, 32);
        assert_eq!(stats.allocated_bytes, stats.released_bytes);
        assert_eq!(stats.live_count(), 0);
        assert!(registry.first().is_null());
    }
}
