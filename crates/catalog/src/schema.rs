use std::collections::BTreeMap;
use std::sync::Arc;

use arrow_schema::{Schema, SchemaRef};
use serde::{Deserialize, Serialize};

/// How a table's rows are laid out across the sharded backend.
///
/// The optimizer reads this to decide distributable-convention eligibility
/// and to cost exchange operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distribution {
    /// Rows hash-partitioned by `key` across `shard_count` backends.
    Sharded {
        /// Sharding key column name.
        key: String,
        /// Number of backend shards.
        shard_count: usize,
    },
    /// Full copy present on every backend.
    Broadcast,
    /// Whole table lives on a single backend.
    Singleton,
}

/// View definition expanded by the converter via the recursive
/// parse/validate/convert pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewDef {
    /// View body SQL text.
    pub sql: String,
    /// Schema search path the view body resolves against.
    pub search_path: Vec<String>,
}

/// One table (or view) in the logical schema tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    /// Table name, unqualified.
    pub name: String,
    /// Declared row type.
    pub schema: Schema,
    /// Physical layout across shards.
    pub distribution: Distribution,
    /// Estimated row count, when stats are available.
    #[serde(default)]
    pub row_count: Option<u64>,
    /// Present when this table is a view.
    #[serde(default)]
    pub view: Option<ViewDef>,
}

impl TableDef {
    /// Shared reference to the declared row type.
    pub fn schema_ref(&self) -> SchemaRef {
        Arc::new(self.schema.clone())
    }
}

/// A named schema holding tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDef {
    tables: BTreeMap<String, TableDef>,
}

impl SchemaDef {
    /// Register or replace a table.
    pub fn add_table(&mut self, table: TableDef) {
        self.tables.insert(table.name.clone(), table);
    }

    /// Look up a table by name.
    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.get(name)
    }

    /// Table names in sorted order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

/// Root of the logical schema tree the catalog reader resolves against.
///
/// Built once from middleware configuration and shared read-only across
/// concurrent compilation units.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RootSchema {
    schemas: BTreeMap<String, SchemaDef>,
}

impl RootSchema {
    /// Create an empty root.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table under `schema_name`, creating the schema on demand.
    pub fn add_table(&mut self, schema_name: &str, table: TableDef) {
        self.schemas
            .entry(schema_name.to_string())
            .or_default()
            .add_table(table);
    }

    /// Look up a schema by name.
    pub fn schema(&self, name: &str) -> Option<&SchemaDef> {
        self.schemas.get(name)
    }

    /// Schema names in sorted order.
    pub fn schema_names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_schema::{DataType, Field};

    #[test]
    fn table_def_parses_from_middleware_config() {
        // row_count and view are optional in config files.
        let schema = Schema::new(vec![Field::new("id", DataType::Int64, false)]);
        let json = serde_json::json!({
            "name": "orders",
            "schema": serde_json::to_value(&schema).expect("schema to json"),
            "distribution": {"Sharded": {"key": "id", "shard_count": 4}}
        });
        let table: TableDef = serde_json::from_value(json).expect("parse table def");
        assert_eq!(table.name, "orders");
        assert_eq!(table.row_count, None);
        assert!(table.view.is_none());
        assert!(matches!(
            table.distribution,
            Distribution::Sharded { ref key, shard_count: 4 } if key == "id"
        ));
    }

    #[test]
    fn root_schema_round_trips_views() {
        let mut root = RootSchema::new();
        root.add_table(
            "db1",
            TableDef {
                name: "v".to_string(),
                schema: Schema::new(vec![Field::new("a", DataType::Int64, false)]),
                distribution: Distribution::Singleton,
                row_count: None,
                view: Some(ViewDef {
                    sql: "SELECT a FROM t".to_string(),
                    search_path: vec!["db1".to_string()],
                }),
            },
        );
        let json = serde_json::to_string(&root).expect("serialize");
        let back: RootSchema = serde_json::from_str(&json).expect("deserialize");
        let view = back
            .schema("db1")
            .and_then(|s| s.table("v"))
            .and_then(|t| t.view.as_ref())
            .expect("view survives");
        assert_eq!(view.search_path, vec!["db1".to_string()]);
    }
}
