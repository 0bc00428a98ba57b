//! Allocation bookkeeping: the unit header and the tracking registry.

pub(crate) mod registry;
pub(crate) mod unit;

use registry::TrackingRegistry;

/// The process-wide registry instance. Everything the interception layer
/// and the leak analyzer agree on lives here; tests construct their own
/// `TrackingRegistry` values instead of touching this one.
static REGISTRY: TrackingRegistry = TrackingRegistry::new();

#[inline]
pub(crate) fn registry() -> &'static TrackingRegistry {
    &REGISTRY
}
