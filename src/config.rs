//! Runtime configuration types.

/// Collector tuning knobs.
///
/// Applied by `rt_init` and `rt_gc_reset_state`; the defaults match the
/// documented collector policy (64 KiB floor, 2/1 growth).
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Lower bound for the next-collection threshold in bytes.
    pub min_threshold_bytes: u64,
    /// Numerator of the live-bytes growth ratio.
    pub growth_num: u64,
    /// Denominator of the live-bytes growth ratio.
    pub growth_den: u64,
    /// Print a `[GC]` line to stderr after every collection.
    pub trace_gc: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            min_threshold_bytes: 64 * 1024,
            growth_num: 2,
            growth_den: 1,
            trace_gc: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_collector_policy() {
        let config = GcConfig::default();
        assert_eq!(config.min_threshold_bytes, 64 * 1024);
        assert_eq!(config.growth_num, 2);
        assert_eq!(config.growth_den, 1);
        assert!(!config.trace_gc);
    }
}
