use serde::{Deserialize, Serialize};

/// Read-only compiler configuration shared by concurrent compilation units.
///
/// One value is constructed at middleware startup and handed to every
/// compilation unit by `Arc`; units never mutate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Schema name used as the search path for unqualified table names.
    pub default_schema: Option<String>,
    /// Upper bound on rule applications per optimizer run.
    ///
    /// The search stops at fixpoint or when this budget is exhausted,
    /// whichever comes first.
    pub rule_budget: usize,
    /// Max estimated build-side rows eligible for broadcast join costing.
    pub broadcast_threshold_rows: u64,
    /// Shard count assumed for tables without explicit distribution metadata.
    pub default_shard_count: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            default_schema: None,
            rule_budget: 4096,
            broadcast_threshold_rows: 100_000,
            default_shard_count: 16,
        }
    }
}
