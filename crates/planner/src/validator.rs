use arrow_schema::SchemaRef;
use shardq_catalog::CatalogReader;
use shardq_common::{Result, ShardqError};
use sqlparser::ast::Statement;

use crate::converter::RelationalConverter;

/// A statement that passed semantic checking, annotated with its derived
/// output row type.
#[derive(Debug, Clone)]
pub struct ValidatedStatement {
    /// The checked AST, handed on to conversion unchanged.
    pub statement: Statement,
    /// Output row type derived during checking.
    pub row_type: SchemaRef,
}

/// Semantic checker over parsed statements.
///
/// Resolves every name through the catalog reader and type-checks
/// expressions bottom-up by running the converter's binding pass; the bound
/// plan is only used for its row type and is discarded. No catalog state is
/// touched.
///
/// Every failure surfaces as [`ShardqError::Validation`] wrapping the
/// underlying resolution or type error; nothing escapes unwrapped.
#[derive(Debug)]
pub struct Validator<'a> {
    reader: &'a CatalogReader,
}

impl<'a> Validator<'a> {
    pub fn new(reader: &'a CatalogReader) -> Self {
        Self { reader }
    }

    /// Check `statement` and derive its output row type.
    pub fn validate(&self, statement: Statement) -> Result<ValidatedStatement> {
        let converter = RelationalConverter::new(self.reader);
        let bound = converter
            .bind_statement(&statement)
            .map_err(wrap_validation)?;
        Ok(ValidatedStatement {
            row_type: bound.row_type(),
            statement,
        })
    }
}

fn wrap_validation(err: ShardqError) -> ShardqError {
    match err {
        // Already classified; do not double-wrap.
        ShardqError::Validation { .. } => err,
        other => ShardqError::validation_wrap("statement failed validation", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_schema::{DataType, Field, Schema};
    use shardq_catalog::{Distribution, RootSchema, TableDef};
    use std::sync::Arc;

    fn reader() -> CatalogReader {
        let mut root = RootSchema::new();
        root.add_table(
            "db1",
            TableDef {
                name: "t1".to_string(),
                schema: Schema::new(vec![
                    Field::new("a", DataType::Int64, false),
                    Field::new("s", DataType::Utf8, true),
                ]),
                distribution: Distribution::Singleton,
                row_count: None,
                view: None,
            },
        );
        CatalogReader::new(Arc::new(root), vec!["db1".to_string()])
    }

    #[test]
    fn valid_statement_gets_row_type() {
        let reader = reader();
        let stmt = shardq_sql::parse_statement("SELECT a, s FROM t1").expect("parse");
        let validated = Validator::new(&reader).validate(stmt).expect("validate");
        let names: Vec<&str> = validated
            .row_type
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect();
        assert_eq!(names, vec!["a", "s"]);
    }

    #[test]
    fn unknown_name_wraps_as_validation_error() {
        let reader = reader();
        let stmt = shardq_sql::parse_statement("SELECT missing FROM t1").expect("parse");
        match Validator::new(&reader).validate(stmt) {
            Err(ShardqError::Validation { source, .. }) => {
                assert!(matches!(
                    source.as_deref(),
                    Some(ShardqError::NameNotFound(_))
                ));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn type_mismatch_stays_single_wrapped() {
        let reader = reader();
        let stmt = shardq_sql::parse_statement("SELECT a FROM t1 WHERE a = s").expect("parse");
        match Validator::new(&reader).validate(stmt) {
            Err(ShardqError::Validation { source, .. }) => assert!(source.is_none()),
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
