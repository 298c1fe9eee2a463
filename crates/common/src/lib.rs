//! Shared configuration, error types, and identifiers for shardq crates.
//!
//! Architecture role:
//! - provides the common [`ShardqError`] / [`Result`] contracts
//! - defines compiler configuration passed across layers
//! - hosts typed statement identifiers
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]

pub mod config;
pub mod error;
pub mod ids;

pub use config::CompilerConfig;
pub use error::{Result, ShardqError};
pub use ids::StatementId;
