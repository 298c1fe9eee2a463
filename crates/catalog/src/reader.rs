use std::sync::Arc;

use arrow_schema::Field;
use shardq_common::{Result, ShardqError};

use crate::schema::{RootSchema, TableDef};

/// A table resolved through the catalog reader, qualified with the schema
/// it was found in.
#[derive(Debug, Clone)]
pub struct ResolvedTable {
    /// Schema the table was found in.
    pub schema_name: String,
    /// The table definition.
    pub table: TableDef,
}

/// Search-path name resolution over a [`RootSchema`].
///
/// Contract:
/// - qualified names (`schema.table`) resolve directly;
/// - unqualified names walk the ordered search path, failing with
///   [`ShardqError::AmbiguousName`] when more than one entry matches and
///   [`ShardqError::NameNotFound`] when none does.
///
/// Stateless across calls; one reader is constructed per compilation unit
/// and reused by the validator, converter, and view-expansion paths.
#[derive(Debug, Clone)]
pub struct CatalogReader {
    root: Arc<RootSchema>,
    search_path: Vec<String>,
}

impl CatalogReader {
    /// Create a reader over `root` resolving unqualified names through
    /// `search_path` in order.
    pub fn new(root: Arc<RootSchema>, search_path: Vec<String>) -> Self {
        Self { root, search_path }
    }

    /// Derive a reader with a different search path over the same root.
    ///
    /// View expansion uses this to resolve a view body against the view's
    /// own schema path.
    pub fn with_search_path(&self, search_path: Vec<String>) -> Self {
        Self {
            root: Arc::clone(&self.root),
            search_path,
        }
    }

    /// The root schema tree this reader resolves against.
    pub fn root(&self) -> &Arc<RootSchema> {
        &self.root
    }

    /// Ordered schema names used for unqualified resolution.
    pub fn search_path(&self) -> &[String] {
        &self.search_path
    }

    /// Resolve a relative or qualified table name path.
    pub fn resolve_table(&self, path: &[String]) -> Result<ResolvedTable> {
        match path {
            [schema_name, table_name] => {
                let schema = self
                    .root
                    .schema(schema_name)
                    .ok_or_else(|| ShardqError::NameNotFound(schema_name.clone()))?;
                let table = schema.table(table_name).ok_or_else(|| {
                    ShardqError::NameNotFound(format!("{schema_name}.{table_name}"))
                })?;
                Ok(ResolvedTable {
                    schema_name: schema_name.clone(),
                    table: table.clone(),
                })
            }
            [table_name] => {
                let mut matches = vec![];
                for schema_name in &self.search_path {
                    if let Some(schema) = self.root.schema(schema_name) {
                        if let Some(table) = schema.table(table_name) {
                            matches.push(ResolvedTable {
                                schema_name: schema_name.clone(),
                                table: table.clone(),
                            });
                        }
                    }
                }
                match matches.len() {
                    0 => Err(ShardqError::NameNotFound(table_name.clone())),
                    1 => Ok(matches.remove(0)),
                    _ => Err(ShardqError::AmbiguousName(format!(
                        "{table_name} matches {} search-path schemas",
                        matches.len()
                    ))),
                }
            }
            _ => Err(ShardqError::NameNotFound(path.join("."))),
        }
    }

    /// Resolve a column within an already-resolved table.
    pub fn resolve_column(table: &ResolvedTable, name: &str) -> Result<(usize, Field)> {
        table
            .table
            .schema
            .fields()
            .iter()
            .enumerate()
            .find(|(_, f)| f.name() == name)
            .map(|(i, f)| (i, f.as_ref().clone()))
            .ok_or_else(|| {
                ShardqError::NameNotFound(format!(
                    "{}.{}.{name}",
                    table.schema_name, table.table.name
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Distribution;
    use arrow_schema::{DataType, Schema};

    fn root() -> Arc<RootSchema> {
        let mut root = RootSchema::new();
        root.add_table(
            "db1",
            TableDef {
                name: "orders".to_string(),
                schema: Schema::new(vec![Field::new("id", DataType::Int64, false)]),
                distribution: Distribution::Sharded {
                    key: "id".to_string(),
                    shard_count: 4,
                },
                row_count: Some(1000),
                view: None,
            },
        );
        root.add_table(
            "db2",
            TableDef {
                name: "orders".to_string(),
                schema: Schema::new(vec![Field::new("id", DataType::Int64, false)]),
                distribution: Distribution::Singleton,
                row_count: None,
                view: None,
            },
        );
        Arc::new(root)
    }

    #[test]
    fn qualified_name_bypasses_search_path() {
        let reader = CatalogReader::new(root(), vec![]);
        let t = reader
            .resolve_table(&["db2".to_string(), "orders".to_string()])
            .expect("resolve");
        assert_eq!(t.schema_name, "db2");
    }

    #[test]
    fn unqualified_name_uses_search_path_order() {
        let reader = CatalogReader::new(root(), vec!["db1".to_string()]);
        let t = reader.resolve_table(&["orders".to_string()]).expect("resolve");
        assert_eq!(t.schema_name, "db1");
    }

    #[test]
    fn ambiguous_when_two_schemas_match() {
        let reader = CatalogReader::new(root(), vec!["db1".to_string(), "db2".to_string()]);
        match reader.resolve_table(&["orders".to_string()]) {
            Err(ShardqError::AmbiguousName(_)) => {}
            other => panic!("expected ambiguous name, got {other:?}"),
        }
    }

    #[test]
    fn missing_table_is_name_not_found() {
        let reader = CatalogReader::new(root(), vec!["db1".to_string()]);
        match reader.resolve_table(&["nope".to_string()]) {
            Err(ShardqError::NameNotFound(_)) => {}
            other => panic!("expected name not found, got {other:?}"),
        }
        match CatalogReader::resolve_column(
            &reader.resolve_table(&["orders".to_string()]).unwrap(),
            "missing",
        ) {
            Err(ShardqError::NameNotFound(_)) => {}
            other => panic!("expected name not found, got {other:?}"),
        }
    }
}
