use thiserror::Error;

/// Canonical shardq error taxonomy used across crates.
///
/// Classification guidance:
/// - [`ShardqError::Syntax`]: malformed SQL text rejected by the parser
/// - [`ShardqError::Validation`]: unresolved names or type mismatches found
///   while checking a parsed statement
/// - [`ShardqError::InvalidLifecycleState`]: a compilation-unit operation was
///   invoked from a stage it cannot run in; a programming error, not a
///   SQL-caused failure
/// - [`ShardqError::NoPhysicalPlanFound`]: the optimizer exhausted its search
///   without a plan satisfying the required traits
/// - [`ShardqError::ArityMismatch`]: a structural plan rebuild received the
///   wrong number of children
/// - [`ShardqError::UnsupportedOperator`]: the lowering visitor has no handler
///   for an operator kind
#[derive(Debug, Error)]
pub enum ShardqError {
    /// Parser rejected the input text.
    ///
    /// The message carries the parser's own position/context description.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// Semantic check of a parsed statement failed.
    ///
    /// Examples:
    /// - unknown table/column
    /// - type mismatch in expressions or join keys
    /// - wrong argument count in a call
    #[error("validation error: {message}")]
    Validation {
        /// Human-readable description of the failed check.
        message: String,
        /// Underlying resolution/type failure, when one exists.
        #[source]
        source: Option<Box<ShardqError>>,
    },

    /// Compilation-unit operation invoked from a disallowed stage.
    #[error("invalid lifecycle state: cannot move from {current} to {required}")]
    InvalidLifecycleState {
        /// Stage the unit is currently in.
        current: String,
        /// Stage the operation needs.
        required: String,
    },

    /// Optimizer search finished without a plan in the required convention.
    ///
    /// Also raised when a rule application fails mid-search; the rule failure
    /// is attached as the source and the candidate is never silently dropped.
    #[error("no physical plan found: {message}")]
    NoPhysicalPlanFound {
        /// What the search was looking for.
        message: String,
        /// Rule failure that aborted the run, if any.
        #[source]
        source: Option<Box<ShardqError>>,
    },

    /// Structural rebuild of a plan node with the wrong child count.
    #[error("arity mismatch: {operator} expects {expected} children, got {actual}")]
    ArityMismatch {
        /// Operator kind being rebuilt.
        operator: String,
        /// Child count the operator declares.
        expected: usize,
        /// Child count the caller supplied.
        actual: usize,
    },

    /// Lowering visitor has no handler registered for an operator kind.
    #[error("unsupported operator in lowering: {0}")]
    UnsupportedOperator(String),

    /// Name resolution found no matching object.
    #[error("name not found: {0}")]
    NameNotFound(String),

    /// A relative name matched more than one search-path entry.
    #[error("ambiguous name: {0}")]
    AmbiguousName(String),

    /// Valid request for a SQL shape outside the supported subset.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Invariant breakage that callers cannot recover from.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ShardqError {
    /// Build a [`ShardqError::Validation`] wrapping an underlying failure.
    ///
    /// The validator uses this so resolution/type errors never escape
    /// unwrapped from the validation stage.
    pub fn validation_wrap(message: impl Into<String>, source: ShardqError) -> Self {
        ShardqError::Validation {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Build a plain [`ShardqError::Validation`] with no underlying cause.
    pub fn validation(message: impl Into<String>) -> Self {
        ShardqError::Validation {
            message: message.into(),
            source: None,
        }
    }

    /// True for failures caused by the submitted SQL rather than by misuse of
    /// the compilation API. Used by middleware front ends to pick log levels.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            ShardqError::Syntax(_)
                | ShardqError::Validation { .. }
                | ShardqError::NameNotFound(_)
                | ShardqError::AmbiguousName(_)
                | ShardqError::Unsupported(_)
        )
    }
}

/// Standard shardq result alias.
pub type Result<T> = std::result::Result<T, ShardqError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_wrap_keeps_source() {
        let err = ShardqError::validation_wrap(
            "statement rejected",
            ShardqError::NameNotFound("t.x".to_string()),
        );
        let text = format!("{err}");
        assert!(text.contains("statement rejected"), "{text}");
        match err {
            ShardqError::Validation { source, .. } => {
                assert!(matches!(*source.unwrap(), ShardqError::NameNotFound(_)))
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn lifecycle_errors_are_not_user_errors() {
        let err = ShardqError::InvalidLifecycleState {
            current: "Converted".to_string(),
            required: "Validated".to_string(),
        };
        assert!(!err.is_user_error());
        assert!(ShardqError::Syntax("x".to_string()).is_user_error());
    }
}
