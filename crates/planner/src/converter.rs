//! Lowering from validated SQL ASTs to logical plans.
//!
//! Two passes run beyond the naive translation: type flattening happens at
//! scan construction ([`crate::logical_plan::flatten_schema`]) so every
//! mid-tree row type is already flat, and [`decorrelate`] rewrites subquery
//! filters into semi/anti joins so the optimizer never sees an outer-column
//! reference.

use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema};
use shardq_catalog::CatalogReader;
use shardq_common::{Result, ShardqError};
use sqlparser::ast::{
    BinaryOperator as SqlBinaryOp, DataType as SqlDataType, Expr as SqlExpr, FunctionArg,
    FunctionArgExpr, FunctionArguments, GroupByExpr, Ident, JoinConstraint, JoinOperator,
    ObjectName, Query, SelectItem, SetExpr, Statement, TableFactor, TableWithJoins, UnaryOperator,
    Value,
};

use crate::logical_plan::{
    flatten_schema, AggExpr, BinaryOp, Expr, JoinType, LiteralValue, LogicalPlan, SortKey,
};

/// Name environment for expression binding: the flat row type produced by
/// the current FROM clause, with each column tagged by the table or alias
/// it came from.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    columns: Vec<ScopeColumn>,
}

#[derive(Debug, Clone)]
struct ScopeColumn {
    name: String,
    data_type: DataType,
    /// Table name or alias that produced this column; `None` for derived
    /// columns such as aggregate outputs.
    source: Option<String>,
}

impl Scope {
    pub fn from_schema(schema: &Schema) -> Self {
        Self::with_source(schema, None)
    }

    /// Scope over one FROM item's row type, tagging every column with the
    /// item's table name or alias.
    pub fn from_table(schema: &Schema, source: &str) -> Self {
        Self::with_source(schema, Some(source.to_string()))
    }

    fn with_source(schema: &Schema, source: Option<String>) -> Self {
        Self {
            columns: schema
                .fields()
                .iter()
                .map(|f| ScopeColumn {
                    name: f.name().clone(),
                    data_type: f.data_type().clone(),
                    source: source.clone(),
                })
                .collect(),
        }
    }

    /// Columns of `self` followed by columns of `other`, matching an inner
    /// join's output row type.
    pub fn join(mut self, other: Scope) -> Scope {
        self.columns.extend(other.columns);
        self
    }

    /// True when some column of this scope comes from `source`.
    pub fn has_source(&self, source: &str) -> bool {
        self.columns
            .iter()
            .any(|c| c.source.as_deref() == Some(source))
    }

    /// Resolve a possibly-qualified column name.
    ///
    /// The full dotted name is tried first (flattened struct columns keep
    /// their dotted names). A remaining `q.c` form resolves `c` only against
    /// columns whose source is `q`; a qualifier naming no source in this
    /// scope stays unresolved so the caller can defer it to the enclosing
    /// scope instead of capturing it with a same-named local column.
    pub fn resolve(&self, name: &str) -> Option<(usize, DataType)> {
        if let Some(i) = self.columns.iter().position(|c| c.name == name) {
            return Some((i, self.columns[i].data_type.clone()));
        }
        let (qualifier, column) = name.split_once('.')?;
        self.columns
            .iter()
            .position(|c| c.source.as_deref() == Some(qualifier) && c.name == column)
            .map(|i| (i, self.columns[i].data_type.clone()))
    }
}

/// Lowers a validated statement into a logical plan rooted at one node per
/// syntactic construct.
///
/// Holds only a catalog reader; one converter is built per compilation unit
/// and shares the reader with the validator.
#[derive(Debug)]
pub struct RelationalConverter<'a> {
    reader: &'a CatalogReader,
}

impl<'a> RelationalConverter<'a> {
    pub fn new(reader: &'a CatalogReader) -> Self {
        Self { reader }
    }

    /// Full conversion: bind, then decorrelate.
    ///
    /// The returned plan contains no subquery-filter node and no
    /// outer-column reference.
    pub fn convert(&self, stmt: &Statement) -> Result<LogicalPlan> {
        let bound = self.bind_statement(stmt)?;
        decorrelate(bound)
    }

    /// Naive translation without the decorrelation pass.
    ///
    /// The validator calls this to resolve names and derive the output row
    /// type without advancing past subquery filters.
    pub fn bind_statement(&self, stmt: &Statement) -> Result<LogicalPlan> {
        match stmt {
            Statement::Query(q) => self.bind_query(q, None),
            _ => Err(ShardqError::Unsupported(
                "only SELECT statements are compiled by this pipeline".to_string(),
            )),
        }
    }

    /// Bind one query block. `outer` is the enclosing block's scope when this
    /// block is a subquery; unqualified names missing from the local scope
    /// fall back to it as outer-column references.
    fn bind_query(&self, q: &Query, outer: Option<&Scope>) -> Result<LogicalPlan> {
        let select = match &*q.body {
            SetExpr::Select(s) => s.as_ref(),
            SetExpr::Values(values) => {
                let plan = bind_values(values)?;
                return self.finish_query(q, plan);
            }
            _ => {
                return Err(ShardqError::Unsupported(
                    "set operations (UNION/EXCEPT/INTERSECT) are not compiled".to_string(),
                ))
            }
        };

        let (mut plan, scope) = self.bind_from(&select.from)?;

        if let Some(selection) = &select.selection {
            plan = self.bind_selection(selection, plan, &scope, outer)?;
        }

        let group_exprs = self.bind_group_by(&select.group_by, &scope, outer)?;
        let mut aggr_exprs: Vec<(AggExpr, String)> = vec![];
        let mut proj_exprs: Vec<(Expr, String)> = vec![];
        // Output names in SELECT order, to shape the final projection.
        let mut output_names: Vec<String> = vec![];
        let mut saw_agg = false;

        for item in &select.projection {
            let (sql_expr, alias) = match item {
                SelectItem::UnnamedExpr(e) => (e, None),
                SelectItem::ExprWithAlias { expr, alias } => (expr, Some(alias.value.clone())),
                SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(_, _) => {
                    return Err(ShardqError::Unsupported(
                        "SELECT * is not compiled; name columns explicitly".to_string(),
                    ))
                }
            };
            if let Some(agg) = self.try_bind_agg(sql_expr, &scope, outer)? {
                saw_agg = true;
                let name = alias.unwrap_or_else(|| format!("{agg}"));
                output_names.push(name.clone());
                aggr_exprs.push((agg, name));
            } else {
                let expr = self.bind_expr(sql_expr, &scope, outer)?;
                let name = alias.unwrap_or_else(|| output_name(sql_expr, &expr));
                output_names.push(name.clone());
                proj_exprs.push((expr, name));
            }
        }

        if saw_agg || !group_exprs.is_empty() {
            // Bare columns in the SELECT list must be group keys.
            for (e, name) in &proj_exprs {
                if !group_exprs.contains(e) {
                    return Err(ShardqError::validation(format!(
                        "column {name} must appear in GROUP BY or inside an aggregate"
                    )));
                }
            }
            plan = LogicalPlan::Aggregate {
                group_exprs,
                aggr_exprs,
                input: Box::new(plan),
            };
            // Reshape aggregate output into SELECT order.
            let agg_scope = Scope::from_schema(&plan.row_type());
            let mut shaped: Vec<(Expr, String)> = vec![];
            for name in output_names {
                let (index, data_type) = agg_scope
                    .resolve(&name)
                    .ok_or_else(|| ShardqError::NameNotFound(name.clone()))?;
                shaped.push((
                    Expr::Column {
                        name: name.clone(),
                        index,
                        data_type,
                    },
                    name,
                ));
            }
            plan = LogicalPlan::Project {
                exprs: shaped,
                input: Box::new(plan),
            };
        } else {
            plan = LogicalPlan::Project {
                exprs: proj_exprs,
                input: Box::new(plan),
            };
        }

        self.finish_query(q, plan)
    }

    /// Apply ORDER BY and LIMIT, shared by SELECT and VALUES bodies.
    fn finish_query(&self, q: &Query, mut plan: LogicalPlan) -> Result<LogicalPlan> {
        if let Some(order_by) = &q.order_by {
            let scope = Scope::from_schema(&plan.row_type());
            let mut keys = vec![];
            for obe in &order_by.exprs {
                let column = match &obe.expr {
                    SqlExpr::Identifier(id) => id.value.clone(),
                    SqlExpr::CompoundIdentifier(parts) => compound_name(parts),
                    other => {
                        return Err(ShardqError::Unsupported(format!(
                            "ORDER BY supports output columns only, got {other}"
                        )))
                    }
                };
                scope
                    .resolve(&column)
                    .ok_or_else(|| ShardqError::NameNotFound(column.clone()))?;
                keys.push(SortKey {
                    column,
                    descending: !obe.asc.unwrap_or(true),
                });
            }
            plan = LogicalPlan::Sort {
                keys,
                input: Box::new(plan),
            };
        }

        if let Some(limit_expr) = &q.limit {
            plan = LogicalPlan::Limit {
                n: bind_limit(limit_expr)?,
                input: Box::new(plan),
            };
        }
        Ok(plan)
    }

    fn bind_from(&self, from: &[TableWithJoins]) -> Result<(LogicalPlan, Scope)> {
        if from.len() != 1 {
            return Err(ShardqError::Unsupported(
                "exactly one FROM source is compiled; use explicit JOIN syntax".to_string(),
            ));
        }
        let twj = &from[0];
        let (mut left, mut scope) = self.bind_table_factor(&twj.relation)?;

        for j in &twj.joins {
            let (right, right_scope) = self.bind_table_factor(&j.relation)?;
            let constraint = match &j.join_operator {
                JoinOperator::Inner(c) => c,
                other => {
                    return Err(ShardqError::Unsupported(format!(
                        "only INNER JOIN is compiled, got {other:?}"
                    )))
                }
            };
            let on = join_on_pairs(constraint, &scope, &right_scope)?;
            left = LogicalPlan::Join {
                left: Box::new(left),
                right: Box::new(right),
                on,
                join_type: JoinType::Inner,
            };
            scope = scope.join(right_scope);
        }
        Ok((left, scope))
    }

    /// Resolve a FROM item: a base table becomes a scan with a flattened row
    /// type; a view is expanded through the recursive compile pipeline. The
    /// returned scope tags every column with the item's alias or table name.
    fn bind_table_factor(&self, tf: &TableFactor) -> Result<(LogicalPlan, Scope)> {
        match tf {
            TableFactor::Table { name, alias, .. } => {
                let path: Vec<String> = name.0.iter().map(|i| i.value.clone()).collect();
                let resolved = self.reader.resolve_table(&path)?;
                let source = alias
                    .as_ref()
                    .map(|a| a.name.value.clone())
                    .unwrap_or_else(|| resolved.table.name.clone());
                if let Some(view) = &resolved.table.view {
                    let plan = self.expand_view(&view.sql, &view.search_path)?;
                    let scope = Scope::from_table(&plan.row_type(), &source);
                    return Ok((plan, scope));
                }
                let row_type = Arc::new(flatten_schema(&resolved.table.schema));
                let scope = Scope::from_table(&row_type, &source);
                Ok((
                    LogicalPlan::Scan {
                        schema_name: resolved.schema_name,
                        table: resolved.table.name.clone(),
                        row_type,
                        distribution: resolved.table.distribution.clone(),
                        row_count: resolved.table.row_count,
                    },
                    scope,
                ))
            }
            _ => Err(ShardqError::Unsupported(
                "only plain table names are compiled in FROM".to_string(),
            )),
        }
    }

    /// Expand a view body by re-entering the pipeline with the view's own
    /// search path. The sub-plan is decorrelated before being spliced in.
    pub fn expand_view(&self, sql: &str, search_path: &[String]) -> Result<LogicalPlan> {
        let stmt = shardq_sql::parse_statement(sql)?;
        let view_reader = self.reader.with_search_path(search_path.to_vec());
        let converter = RelationalConverter::new(&view_reader);
        converter.convert(&stmt)
    }

    /// Bind a WHERE clause. Subquery conjuncts become subquery-filter nodes
    /// over the plan; the remaining conjuncts fold into one filter.
    fn bind_selection(
        &self,
        selection: &SqlExpr,
        mut plan: LogicalPlan,
        scope: &Scope,
        outer: Option<&Scope>,
    ) -> Result<LogicalPlan> {
        let mut plain: Vec<Expr> = vec![];
        for conjunct in sql_conjuncts(selection) {
            match conjunct {
                SqlExpr::InSubquery {
                    expr,
                    subquery,
                    negated,
                } => {
                    let in_expr = self.bind_expr(expr, scope, outer)?;
                    let sub = self.bind_query(subquery, Some(scope))?;
                    plan = LogicalPlan::InSubqueryFilter {
                        input: Box::new(plan),
                        expr: in_expr,
                        subquery: Box::new(sub),
                        negated: *negated,
                    };
                }
                SqlExpr::Exists { subquery, negated } => {
                    let sub = self.bind_query(subquery, Some(scope))?;
                    plan = LogicalPlan::ExistsSubqueryFilter {
                        input: Box::new(plan),
                        subquery: Box::new(sub),
                        negated: *negated,
                    };
                }
                other => {
                    let bound = self.bind_expr(other, scope, outer)?;
                    let dt = bound.data_type();
                    if dt != DataType::Boolean && dt != DataType::Null {
                        return Err(ShardqError::validation(format!(
                            "WHERE predicate must be boolean, got {dt:?}: {bound}"
                        )));
                    }
                    plain.push(bound);
                }
            }
        }
        if let Some(predicate) = Expr::conjoin(plain) {
            plan = LogicalPlan::Filter {
                predicate,
                input: Box::new(plan),
            };
        }
        Ok(plan)
    }

    fn bind_group_by(
        &self,
        g: &GroupByExpr,
        scope: &Scope,
        outer: Option<&Scope>,
    ) -> Result<Vec<Expr>> {
        match g {
            GroupByExpr::Expressions(es, _mods) => es
                .iter()
                .map(|e| {
                    let bound = self.bind_expr(e, scope, outer)?;
                    match bound {
                        Expr::Column { .. } => Ok(bound),
                        other => Err(ShardqError::Unsupported(format!(
                            "GROUP BY keys must be plain columns, got {other}"
                        ))),
                    }
                })
                .collect(),
            GroupByExpr::All(_mods) => Err(ShardqError::Unsupported(
                "GROUP BY ALL is not compiled".to_string(),
            )),
        }
    }

    fn try_bind_agg(
        &self,
        e: &SqlExpr,
        scope: &Scope,
        outer: Option<&Scope>,
    ) -> Result<Option<AggExpr>> {
        let func = match e {
            SqlExpr::Function(f) => f,
            _ => return Ok(None),
        };
        let fname = object_name_string(&func.name).to_uppercase();
        let arg = match &func.args {
            FunctionArguments::List(list) => list.args.first(),
            _ => None,
        };
        let ctor: fn(Expr) -> AggExpr = match fname.as_str() {
            "COUNT" => AggExpr::Count,
            "SUM" => AggExpr::Sum,
            "MIN" => AggExpr::Min,
            "MAX" => AggExpr::Max,
            "AVG" => AggExpr::Avg,
            _ => return Ok(None),
        };
        let arg_expr = match arg {
            Some(FunctionArg::Unnamed(FunctionArgExpr::Expr(e))) => {
                self.bind_expr(e, scope, outer)?
            }
            Some(FunctionArg::Unnamed(FunctionArgExpr::Wildcard)) if fname == "COUNT" => {
                // COUNT(*) counts rows; a constant argument does the same.
                Expr::Literal(LiteralValue::Int64(1))
            }
            _ => {
                return Err(ShardqError::validation(format!(
                    "{fname}() requires exactly one argument"
                )))
            }
        };
        Ok(Some(ctor(arg_expr)))
    }

    /// Bind one scalar expression against the local scope, falling back to
    /// the enclosing scope for names the local one cannot resolve.
    pub fn bind_expr(&self, e: &SqlExpr, scope: &Scope, outer: Option<&Scope>) -> Result<Expr> {
        match e {
            SqlExpr::Identifier(id) => self.bind_column(&id.value, scope, outer),
            SqlExpr::CompoundIdentifier(parts) => {
                self.bind_column(&compound_name(parts), scope, outer)
            }
            SqlExpr::Value(v) => Ok(Expr::Literal(bind_literal(v)?)),
            SqlExpr::Nested(inner) => self.bind_expr(inner, scope, outer),
            SqlExpr::BinaryOp { left, op, right } => {
                if *op == SqlBinaryOp::And {
                    return Ok(Expr::And(
                        Box::new(self.bind_expr(left, scope, outer)?),
                        Box::new(self.bind_expr(right, scope, outer)?),
                    ));
                }
                if *op == SqlBinaryOp::Or {
                    return Ok(Expr::Or(
                        Box::new(self.bind_expr(left, scope, outer)?),
                        Box::new(self.bind_expr(right, scope, outer)?),
                    ));
                }
                let bop = bind_binop(op)?;
                let l = self.bind_expr(left, scope, outer)?;
                let r = self.bind_expr(right, scope, outer)?;
                check_operand_types(bop, &l, &r)?;
                Ok(Expr::BinaryOp {
                    left: Box::new(l),
                    op: bop,
                    right: Box::new(r),
                })
            }
            SqlExpr::UnaryOp {
                op: UnaryOperator::Not,
                expr,
            } => Ok(Expr::Not(Box::new(self.bind_expr(expr, scope, outer)?))),
            SqlExpr::Cast {
                expr, data_type, ..
            } => Ok(Expr::Cast {
                expr: Box::new(self.bind_expr(expr, scope, outer)?),
                to_type: bind_data_type(data_type)?,
            }),
            other => Err(ShardqError::Unsupported(format!(
                "unsupported SQL expression: {other}"
            ))),
        }
    }

    fn bind_column(&self, name: &str, scope: &Scope, outer: Option<&Scope>) -> Result<Expr> {
        if let Some((index, data_type)) = scope.resolve(name) {
            return Ok(Expr::Column {
                name: scope.columns[index].name.clone(),
                index,
                data_type,
            });
        }
        // A locally-known qualifier with an unknown column is an error here,
        // not an outer reference.
        if let Some((qualifier, _)) = name.split_once('.') {
            if scope.has_source(qualifier) {
                return Err(ShardqError::NameNotFound(name.to_string()));
            }
        }
        if let Some(outer_scope) = outer {
            if let Some((index, data_type)) = outer_scope.resolve(name) {
                return Ok(Expr::OuterColumn {
                    name: outer_scope.columns[index].name.clone(),
                    index,
                    data_type,
                });
            }
        }
        Err(ShardqError::NameNotFound(name.to_string()))
    }
}

/// Rewrite every subquery-filter node in `plan` into a semi/anti join and
/// erase all outer-column references.
///
/// `IN` adds the probe expression and the subquery's first output column as
/// a join key pair; correlated equality conjuncts found inside the subquery
/// are stripped and added as further key pairs. A correlated predicate that
/// is not a plain column equality fails with [`ShardqError::Unsupported`].
pub fn decorrelate(plan: LogicalPlan) -> Result<LogicalPlan> {
    match plan {
        LogicalPlan::InSubqueryFilter {
            input,
            expr,
            subquery,
            negated,
        } => {
            let left = decorrelate(*input)?;
            let sub = decorrelate(*subquery)?;
            let (mut sub, mut pairs) = strip_correlated_predicates(sub)?;
            let probe = match &expr {
                Expr::Column { name, .. } => name.clone(),
                other => {
                    return Err(ShardqError::Unsupported(format!(
                        "IN probe must be a plain column, got {other}"
                    )))
                }
            };
            let sub_type = sub.row_type();
            let first_out = sub_type
                .fields()
                .first()
                .ok_or_else(|| {
                    ShardqError::Internal("IN subquery produces no columns".to_string())
                })?
                .name()
                .clone();
            pairs.insert(0, (probe, first_out));
            sub = ensure_output_columns(sub, &pairs)?;
            Ok(LogicalPlan::Join {
                left: Box::new(left),
                right: Box::new(sub),
                on: pairs,
                join_type: if negated {
                    JoinType::LeftAnti
                } else {
                    JoinType::LeftSemi
                },
            })
        }
        LogicalPlan::ExistsSubqueryFilter {
            input,
            subquery,
            negated,
        } => {
            let left = decorrelate(*input)?;
            let sub = decorrelate(*subquery)?;
            let (sub, pairs) = strip_correlated_predicates(sub)?;
            // A key-less semi join cannot be executed; uncorrelated EXISTS
            // would need a cross-product style rewrite instead.
            if pairs.is_empty() {
                return Err(ShardqError::Unsupported(
                    "EXISTS without a correlating equality predicate is not compiled".to_string(),
                ));
            }
            let sub = ensure_output_columns(sub, &pairs)?;
            Ok(LogicalPlan::Join {
                left: Box::new(left),
                right: Box::new(sub),
                on: pairs,
                join_type: if negated {
                    JoinType::LeftAnti
                } else {
                    JoinType::LeftSemi
                },
            })
        }
        LogicalPlan::Filter { predicate, input } => Ok(LogicalPlan::Filter {
            predicate,
            input: Box::new(decorrelate(*input)?),
        }),
        LogicalPlan::Project { exprs, input } => Ok(LogicalPlan::Project {
            exprs,
            input: Box::new(decorrelate(*input)?),
        }),
        LogicalPlan::Join {
            left,
            right,
            on,
            join_type,
        } => Ok(LogicalPlan::Join {
            left: Box::new(decorrelate(*left)?),
            right: Box::new(decorrelate(*right)?),
            on,
            join_type,
        }),
        LogicalPlan::Aggregate {
            group_exprs,
            aggr_exprs,
            input,
        } => Ok(LogicalPlan::Aggregate {
            group_exprs,
            aggr_exprs,
            input: Box::new(decorrelate(*input)?),
        }),
        LogicalPlan::Sort { keys, input } => Ok(LogicalPlan::Sort {
            keys,
            input: Box::new(decorrelate(*input)?),
        }),
        LogicalPlan::Limit { n, input } => Ok(LogicalPlan::Limit {
            n,
            input: Box::new(decorrelate(*input)?),
        }),
        leaf @ (LogicalPlan::Scan { .. } | LogicalPlan::Values { .. }) => Ok(leaf),
    }
}

/// Remove correlated equality conjuncts from filters inside a subquery plan
/// and return them as `(outer_column, inner_column)` join key pairs.
fn strip_correlated_predicates(plan: LogicalPlan) -> Result<(LogicalPlan, Vec<(String, String)>)> {
    match plan {
        LogicalPlan::Filter { predicate, input } => {
            let (input, mut pairs) = strip_correlated_predicates(*input)?;
            let mut kept: Vec<Expr> = vec![];
            for conjunct in predicate.split_conjuncts() {
                if !conjunct.has_outer_refs() {
                    kept.push(conjunct);
                    continue;
                }
                pairs.push(correlated_equi_pair(&conjunct)?);
            }
            let plan = match Expr::conjoin(kept) {
                Some(predicate) => LogicalPlan::Filter {
                    predicate,
                    input: Box::new(input),
                },
                None => input,
            };
            Ok((plan, pairs))
        }
        LogicalPlan::Project { exprs, input } => {
            let (input, pairs) = strip_correlated_predicates(*input)?;
            Ok((
                LogicalPlan::Project {
                    exprs,
                    input: Box::new(input),
                },
                pairs,
            ))
        }
        other => {
            if other.has_outer_refs() {
                return Err(ShardqError::Unsupported(
                    "correlated references below aggregates or joins are not decorrelated"
                        .to_string(),
                ));
            }
            Ok((other, vec![]))
        }
    }
}

/// `inner = outer` (either side) becomes an `(outer, inner)` key pair.
fn correlated_equi_pair(conjunct: &Expr) -> Result<(String, String)> {
    if let Expr::BinaryOp { left, op, right } = conjunct {
        if *op == BinaryOp::Eq {
            match (left.as_ref(), right.as_ref()) {
                (Expr::Column { name: inner, .. }, Expr::OuterColumn { name: outer, .. })
                | (Expr::OuterColumn { name: outer, .. }, Expr::Column { name: inner, .. }) => {
                    return Ok((outer.clone(), inner.clone()))
                }
                _ => {}
            }
        }
    }
    Err(ShardqError::Unsupported(format!(
        "correlated predicate must be a column equality, got {conjunct}"
    )))
}

/// Make sure every inner join key survives to the subquery's output, so the
/// join built from the pairs can reference it by name.
fn ensure_output_columns(plan: LogicalPlan, pairs: &[(String, String)]) -> Result<LogicalPlan> {
    let row_type = plan.row_type();
    let missing: Vec<&String> = pairs
        .iter()
        .map(|(_, inner)| inner)
        .filter(|inner| row_type.field_with_name(inner).is_err())
        .collect();
    if missing.is_empty() {
        return Ok(plan);
    }
    match plan {
        LogicalPlan::Project { mut exprs, input } => {
            let input_scope = Scope::from_schema(&input.row_type());
            for name in missing {
                let (index, data_type) = input_scope
                    .resolve(name)
                    .ok_or_else(|| ShardqError::NameNotFound(name.clone()))?;
                exprs.push((
                    Expr::Column {
                        name: name.clone(),
                        index,
                        data_type,
                    },
                    name.clone(),
                ));
            }
            Ok(LogicalPlan::Project { exprs, input })
        }
        // A non-project root exposes its full input row, so a missing key
        // there is a binding bug.
        _ => Err(ShardqError::Internal(format!(
            "join key {} missing from subquery output",
            missing[0]
        ))),
    }
}

/// Turn an ON constraint into `(left_column, right_column)` equi-join pairs.
///
/// Each conjunct must be an equality between one column of each side; the
/// pair is oriented left-first regardless of how the SQL wrote it.
fn join_on_pairs(
    constraint: &JoinConstraint,
    left_scope: &Scope,
    right_scope: &Scope,
) -> Result<Vec<(String, String)>> {
    let on = match constraint {
        JoinConstraint::On(e) => e,
        other => {
            return Err(ShardqError::Unsupported(format!(
                "only ON equi-join constraints are compiled, got {other:?}"
            )))
        }
    };
    let mut pairs = vec![];
    for conjunct in sql_conjuncts(on) {
        let (a, b) = match conjunct {
            SqlExpr::BinaryOp { left, op, right } if *op == SqlBinaryOp::Eq => {
                (join_key_name(left)?, join_key_name(right)?)
            }
            other => {
                return Err(ShardqError::Unsupported(format!(
                    "join conditions must be column equalities, got {other}"
                )))
            }
        };
        let pair = match (left_scope.resolve(&a), right_scope.resolve(&b)) {
            (Some((ai, _)), Some((bi, _))) => (
                left_scope.columns[ai].name.clone(),
                right_scope.columns[bi].name.clone(),
            ),
            _ => match (left_scope.resolve(&b), right_scope.resolve(&a)) {
                (Some((bi, _)), Some((ai, _))) => (
                    left_scope.columns[bi].name.clone(),
                    right_scope.columns[ai].name.clone(),
                ),
                _ => {
                    return Err(ShardqError::NameNotFound(format!(
                        "join keys {a} = {b} do not resolve one column per side"
                    )))
                }
            },
        };
        pairs.push(pair);
    }
    if pairs.is_empty() {
        return Err(ShardqError::Unsupported(
            "joins without equi-join keys are not compiled".to_string(),
        ));
    }
    Ok(pairs)
}

fn join_key_name(e: &SqlExpr) -> Result<String> {
    match e {
        SqlExpr::Identifier(id) => Ok(id.value.clone()),
        SqlExpr::CompoundIdentifier(parts) => Ok(compound_name(parts)),
        other => Err(ShardqError::Unsupported(format!(
            "join keys must be plain columns, got {other}"
        ))),
    }
}

fn bind_values(values: &sqlparser::ast::Values) -> Result<LogicalPlan> {
    let mut rows: Vec<Vec<LiteralValue>> = vec![];
    for row in &values.rows {
        let mut out = vec![];
        for cell in row {
            match cell {
                SqlExpr::Value(v) => out.push(bind_literal(v)?),
                other => {
                    return Err(ShardqError::Unsupported(format!(
                        "VALUES cells must be literals, got {other}"
                    )))
                }
            }
        }
        rows.push(out);
    }
    let first = rows
        .first()
        .ok_or_else(|| ShardqError::validation("VALUES requires at least one row"))?;
    let fields: Vec<Field> = first
        .iter()
        .enumerate()
        .map(|(i, v)| Field::new(format!("col{i}"), v.data_type(), true))
        .collect();
    for row in &rows {
        if row.len() != fields.len() {
            return Err(ShardqError::validation(format!(
                "VALUES rows differ in width: {} vs {}",
                fields.len(),
                row.len()
            )));
        }
    }
    Ok(LogicalPlan::Values {
        row_type: Arc::new(Schema::new(fields)),
        rows,
    })
}

fn bind_literal(v: &Value) -> Result<LiteralValue> {
    match v {
        Value::Number(s, _) => {
            if s.contains('.') || s.contains('e') || s.contains('E') {
                s.parse::<f64>()
                    .map(LiteralValue::Float64)
                    .map_err(|_| ShardqError::validation(format!("bad numeric literal: {s}")))
            } else {
                s.parse::<i64>()
                    .map(LiteralValue::Int64)
                    .map_err(|_| ShardqError::validation(format!("bad integer literal: {s}")))
            }
        }
        Value::SingleQuotedString(s) => Ok(LiteralValue::Utf8(s.clone())),
        Value::Boolean(b) => Ok(LiteralValue::Boolean(*b)),
        Value::Null => Ok(LiteralValue::Null),
        other => Err(ShardqError::Unsupported(format!(
            "unsupported SQL literal: {other}"
        ))),
    }
}

fn bind_limit(e: &SqlExpr) -> Result<usize> {
    match e {
        SqlExpr::Value(Value::Number(s, _)) => {
            let n: i64 = s
                .parse()
                .map_err(|_| ShardqError::validation(format!("bad LIMIT value: {s}")))?;
            if n < 0 {
                return Err(ShardqError::validation("LIMIT must be non-negative"));
            }
            Ok(n as usize)
        }
        other => Err(ShardqError::Unsupported(format!(
            "LIMIT must be a literal integer, got {other}"
        ))),
    }
}

fn bind_binop(op: &SqlBinaryOp) -> Result<BinaryOp> {
    Ok(match op {
        SqlBinaryOp::Eq => BinaryOp::Eq,
        SqlBinaryOp::NotEq => BinaryOp::NotEq,
        SqlBinaryOp::Lt => BinaryOp::Lt,
        SqlBinaryOp::LtEq => BinaryOp::LtEq,
        SqlBinaryOp::Gt => BinaryOp::Gt,
        SqlBinaryOp::GtEq => BinaryOp::GtEq,
        SqlBinaryOp::Plus => BinaryOp::Plus,
        SqlBinaryOp::Minus => BinaryOp::Minus,
        SqlBinaryOp::Multiply => BinaryOp::Multiply,
        SqlBinaryOp::Divide => BinaryOp::Divide,
        other => {
            return Err(ShardqError::Unsupported(format!(
                "unsupported binary operator: {other}"
            )))
        }
    })
}

fn bind_data_type(dt: &SqlDataType) -> Result<DataType> {
    Ok(match dt {
        SqlDataType::TinyInt(_)
        | SqlDataType::SmallInt(_)
        | SqlDataType::Int(_)
        | SqlDataType::Integer(_)
        | SqlDataType::BigInt(_) => DataType::Int64,
        SqlDataType::Float(_) | SqlDataType::Real => DataType::Float64,
        SqlDataType::Char(_)
        | SqlDataType::Varchar(_)
        | SqlDataType::Text
        | SqlDataType::String(_) => DataType::Utf8,
        SqlDataType::Boolean => DataType::Boolean,
        other => {
            return Err(ShardqError::Unsupported(format!(
                "unsupported CAST target type: {other}"
            )))
        }
    })
}

/// Comparisons need same-type or both-numeric operands; arithmetic needs
/// both-numeric. Null literals compare with anything.
fn check_operand_types(op: BinaryOp, l: &Expr, r: &Expr) -> Result<()> {
    let (lt, rt) = (l.data_type(), r.data_type());
    if lt == DataType::Null || rt == DataType::Null {
        return Ok(());
    }
    let numeric = |t: &DataType| matches!(t, DataType::Int64 | DataType::Float64);
    let compatible = lt == rt || (numeric(&lt) && numeric(&rt));
    if op.is_comparison() {
        if compatible {
            return Ok(());
        }
    } else if numeric(&lt) && numeric(&rt) {
        return Ok(());
    }
    Err(ShardqError::validation(format!(
        "type mismatch: ({l}) {op} ({r}) over {lt:?} and {rt:?}"
    )))
}

/// Flatten a SQL boolean expression into its top-level AND conjuncts.
fn sql_conjuncts(e: &SqlExpr) -> Vec<&SqlExpr> {
    match e {
        SqlExpr::BinaryOp { left, op, right } if *op == SqlBinaryOp::And => {
            let mut out = sql_conjuncts(left);
            out.extend(sql_conjuncts(right));
            out
        }
        SqlExpr::Nested(inner) => sql_conjuncts(inner),
        other => vec![other],
    }
}

fn object_name_string(n: &ObjectName) -> String {
    n.0.iter()
        .map(|i| i.value.clone())
        .collect::<Vec<_>>()
        .join(".")
}

fn compound_name(parts: &[Ident]) -> String {
    parts
        .iter()
        .map(|i| i.value.clone())
        .collect::<Vec<_>>()
        .join(".")
}

fn output_name(sql_expr: &SqlExpr, bound: &Expr) -> String {
    match bound {
        Expr::Column { name, .. } => name.clone(),
        _ => format!("{sql_expr}"),
    }
}
