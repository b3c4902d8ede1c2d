//! Analysis configuration.

use serde::{Deserialize, Serialize};

/// Configuration for a hang analysis run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Trace level: 0 silent, 1 warnings and traversal summaries, 2 step
    /// trace, 3 full trace. Never changes a decision.
    pub verbosity: u8,
    /// Shuffle candidate starting streams with this seed. `None` keeps plan
    /// order.
    pub shuffle_seed: Option<u64>,
    /// Log progress every percent of candidates processed.
    pub progress: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            verbosity: 0,
            shuffle_seed: None,
            progress: true,
        }
    }
}
