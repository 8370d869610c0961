use serde::Deserialize;

/// Limits for a [`super::Tree`], loadable from a JSON file by the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Nested relationship watchers allowed inside one evaluation. Deeper lookups
    /// are walked without caching.
    pub max_evaluation_depth: usize,
    /// Batches processed by one flush before giving up on settling.
    pub max_flush_rounds: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_evaluation_depth: 256,
            max_flush_rounds: 1024,
        }
    }
}
