//! Typed identifiers shared across compilation and lowering components.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stable identifier for one SQL statement's compilation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatementId(
    /// Raw numeric id value.
    pub u64,
);

impl StatementId {
    /// Allocate the next process-unique statement id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        StatementId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
