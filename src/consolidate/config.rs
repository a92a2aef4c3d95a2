use std::time::Duration;

/// Tunable knobs for the consolidation pipeline.
#[derive(Debug, Clone)]
pub struct ConsolidateConfig {
    /// Delay applied before a scheduled pass fires, absorbing near-duplicate
    /// events: stop-triggered session passes wait this long, and
    /// tune-triggered sweep requests coalesce within this window.
    pub debounce: Duration,
}

impl Default for ConsolidateConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(10),
        }
    }
}
