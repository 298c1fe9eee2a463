//! Thin wrapper around `sqlparser` that surfaces failures in the shardq
//! error taxonomy. The rest of the pipeline treats the parser as opaque:
//! it consumes [`Statement`] / [`Expr`] values and never touches grammar
//! details itself.

use shardq_common::{Result, ShardqError};
use sqlparser::ast::{Expr, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::{Parser, ParserError};

/// Parse SQL text into statements.
pub fn parse_sql(sql: &str) -> Result<Vec<Statement>> {
    let dialect = GenericDialect {};
    Parser::parse_sql(&dialect, sql).map_err(syntax_error)
}

/// Parse SQL text that must contain exactly one statement.
pub fn parse_statement(sql: &str) -> Result<Statement> {
    let mut stmts = parse_sql(sql)?;
    if stmts.len() != 1 {
        return Err(ShardqError::Syntax(format!(
            "expected a single statement, got {}",
            stmts.len()
        )));
    }
    Ok(stmts.remove(0))
}

/// Parse a standalone scalar expression.
pub fn parse_expr(sql: &str) -> Result<Expr> {
    let dialect = GenericDialect {};
    Parser::new(&dialect)
        .try_with_sql(sql)
        .map_err(syntax_error)?
        .parse_expr()
        .map_err(syntax_error)
}

fn syntax_error(e: ParserError) -> ShardqError {
    // ParserError's display already carries position context.
    ShardqError::Syntax(e.to_string())
}
