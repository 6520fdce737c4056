//! Selector configuration and counters.

/// Tunables for the fast selection path.
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    /// Emit a trap instruction for `unreachable` instead of nothing.
    pub trap_unreachable: bool,
    /// Allow folding a single-use load into its consumer.
    pub enable_load_folding: bool,
    /// Largest address-computation offset kept pending before a partial add
    /// is emitted.
    pub max_gep_offset: i64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        SelectorConfig {
            trap_unreachable: false,
            enable_load_folding: true,
            max_gep_offset: 2048,
        }
    }
}

/// Counters collected while selecting one function.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectStats {
    /// Instructions selected by the generic palette.
    pub num_generic: usize,
    /// Instructions selected by the target hook.
    pub num_hook: usize,
    /// Instructions neither path could select.
    pub num_failed: usize,
    /// Register cache hits.
    pub cache_hits: usize,
    /// Constants and addresses materialized.
    pub materializations: usize,
    /// Loads folded into their consumers.
    pub loads_folded: usize,
    /// Instructions deleted by rollback.
    pub rolled_back: usize,
}

impl SelectStats {
    /// Instructions selected by either path.
    #[inline]
    #[must_use]
    pub fn num_selected(&self) -> usize {
        self.num_generic + self.num_hook
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SelectorConfig::default();
        assert!(config.enable_load_folding);
        assert!(!config.trap_unreachable);
        assert_eq!(config.max_gep_offset, 2048);
    }

    #[test]
    fn test_stats_totals() {
        let stats = SelectStats {
            num_generic: 7,
            num_hook: 3,
            ..SelectStats::default()
        };
        assert_eq!(stats.num_selected(), 10);
    }
}
