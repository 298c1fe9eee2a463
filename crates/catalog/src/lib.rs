//! Logical schema tree and name resolution for shardq.
//!
//! Architecture role:
//! - hosts the root schema tree (schemas, tables, columns, views) fed from
//!   middleware configuration
//! - carries per-table distribution metadata consumed by optimizer rules
//! - provides the search-path [`CatalogReader`] used by validation,
//!   conversion, and view expansion
//!
//! Key modules:
//! - [`schema`]
//! - [`reader`]

pub mod reader;
pub mod schema;

pub use reader::{CatalogReader, ResolvedTable};
pub use schema::{Distribution, RootSchema, SchemaDef, TableDef, ViewDef};
