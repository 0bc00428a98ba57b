//! Aggregate tracing statistics.

use crate::util::format_bytes;

/// Snapshot of the registry's aggregate counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceStats {
    /// Total number of allocations registered.
    pub allocation_count: u64,

    /// Total payload bytes registered.
    pub allocated_bytes: u64,

    /// Total number of releases processed.
    pub release_count: u64,

    /// Total payload bytes released.
    pub released_bytes: u64,
}

impl TraceStats {
    /// Allocations still live.
    pub fn live_count(&self) -> u64 {
        self.allocation_count.saturating_sub(self.release_count)
    }

    /// Payload bytes still live.
    pub fn live_bytes(&self) -> u64 {
        self.allocated_bytes.saturating_sub(self.released_bytes)
    }
}

impl std::fmt::Display for TraceStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Trace statistics:")?;
        writeln!(
            f,
            "  Allocated: {} ({})",
            self.allocation_count,
            format_bytes(self.allocated_bytes)
        )?;
        writeln!(
            f,
            "  Released:  {} ({})",
            self.release_count,
            format_bytes(self.released_bytes)
        )?;
        writeln!(
            f,
            "  Live:      {} ({})",
            self.live_count(),
            format_bytes(self.live_bytes())
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_derivation() {
        let stats = TraceStats {
            allocation_count: 10,
            allocated_bytes: 4096,
            release_count: 7,
            released_bytes: 1024,
        };
        assert_eq!(stats.live_count(), 3);
        assert_eq!(stats.live_bytes(), 3072);
    }

    #[test]
    fn test_display_contains_totals() {
        let stats = TraceStats {
            allocation_count: 2,
            allocated_bytes: 2048,
            release_count: 1,
            released_bytes: 1024,
        };
        let rendered = stats.to_string();
        assert!(rendered.contains("Allocated: 2"));
        assert!(rendered.contains("Live:      1"));
    }
}
