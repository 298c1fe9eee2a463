use std::fmt;
use std::sync::Arc;

use arrow_schema::{DataType, Field, Fields, Schema, SchemaRef};
use serde::{Deserialize, Serialize};
use shardq_catalog::Distribution;

/// Scalar literal carried by plan expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LiteralValue {
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Boolean(bool),
    Null,
}

impl LiteralValue {
    /// Arrow type of this literal.
    pub fn data_type(&self) -> DataType {
        match self {
            LiteralValue::Int64(_) => DataType::Int64,
            LiteralValue::Float64(_) => DataType::Float64,
            LiteralValue::Utf8(_) => DataType::Utf8,
            LiteralValue::Boolean(_) => DataType::Boolean,
            LiteralValue::Null => DataType::Null,
        }
    }
}

impl fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralValue::Int64(v) => write!(f, "{v}"),
            LiteralValue::Float64(v) => write!(f, "{v:?}"),
            LiteralValue::Utf8(v) => write!(f, "'{v}'"),
            LiteralValue::Boolean(v) => write!(f, "{v}"),
            LiteralValue::Null => write!(f, "NULL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Multiply,
    Divide,
}

impl BinaryOp {
    /// True for operators producing a boolean result.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::LtEq
                | BinaryOp::Gt
                | BinaryOp::GtEq
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
        };
        f.write_str(s)
    }
}

/// Resolved scalar expression.
///
/// Column references are resolved against the producing child's row type at
/// conversion time; no name lookups happen after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Reference into the input row type.
    Column {
        name: String,
        index: usize,
        data_type: DataType,
    },
    /// Reference to a column of an enclosing query.
    ///
    /// Only exists between conversion and decorrelation; a converted plan
    /// handed to the optimizer never contains one.
    OuterColumn {
        name: String,
        index: usize,
        data_type: DataType,
    },
    Literal(LiteralValue),
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Cast {
        expr: Box<Expr>,
        to_type: DataType,
    },
}

impl Expr {
    /// Output type, derivable without external lookups.
    pub fn data_type(&self) -> DataType {
        match self {
            Expr::Column { data_type, .. } | Expr::OuterColumn { data_type, .. } => {
                data_type.clone()
            }
            Expr::Literal(v) => v.data_type(),
            Expr::BinaryOp { left, op, .. } => {
                if op.is_comparison() {
                    DataType::Boolean
                } else {
                    left.data_type()
                }
            }
            Expr::And(_, _) | Expr::Or(_, _) | Expr::Not(_) => DataType::Boolean,
            Expr::Cast { to_type, .. } => to_type.clone(),
        }
    }

    /// True when any [`Expr::OuterColumn`] occurs in this expression.
    pub fn has_outer_refs(&self) -> bool {
        match self {
            Expr::OuterColumn { .. } => true,
            Expr::Column { .. } | Expr::Literal(_) => false,
            Expr::BinaryOp { left, right, .. } => left.has_outer_refs() || right.has_outer_refs(),
            Expr::And(a, b) | Expr::Or(a, b) => a.has_outer_refs() || b.has_outer_refs(),
            Expr::Not(x) => x.has_outer_refs(),
            Expr::Cast { expr, .. } => expr.has_outer_refs(),
        }
    }

    /// Split a conjunction into its conjuncts.
    pub fn split_conjuncts(self) -> Vec<Expr> {
        match self {
            Expr::And(a, b) => {
                let mut out = a.split_conjuncts();
                out.extend(b.split_conjuncts());
                out
            }
            other => vec![other],
        }
    }

    /// Rebuild a conjunction from conjuncts; `None` when the list is empty.
    pub fn conjoin(conjuncts: Vec<Expr>) -> Option<Expr> {
        conjuncts
            .into_iter()
            .reduce(|acc, e| Expr::And(Box::new(acc), Box::new(e)))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column { name, index, .. } => write!(f, "{name}#{index}"),
            Expr::OuterColumn { name, index, .. } => write!(f, "$outer.{name}#{index}"),
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::BinaryOp { left, op, right } => write!(f, "({left}) {op} ({right})"),
            Expr::And(a, b) => write!(f, "({a}) AND ({b})"),
            Expr::Or(a, b) => write!(f, "({a}) OR ({b})"),
            Expr::Not(x) => write!(f, "NOT ({x})"),
            Expr::Cast { expr, to_type } => write!(f, "CAST({expr} AS {to_type:?})"),
        }
    }
}

/// Aggregate call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AggExpr {
    Count(Expr),
    Sum(Expr),
    Min(Expr),
    Max(Expr),
    Avg(Expr),
}

impl AggExpr {
    /// Output type of the aggregate.
    pub fn data_type(&self) -> DataType {
        match self {
            AggExpr::Count(_) => DataType::Int64,
            AggExpr::Sum(e) | AggExpr::Min(e) | AggExpr::Max(e) => e.data_type(),
            AggExpr::Avg(_) => DataType::Float64,
        }
    }
}

impl fmt::Display for AggExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggExpr::Count(e) => write!(f, "COUNT({e})"),
            AggExpr::Sum(e) => write!(f, "SUM({e})"),
            AggExpr::Min(e) => write!(f, "MIN({e})"),
            AggExpr::Max(e) => write!(f, "MAX({e})"),
            AggExpr::Avg(e) => write!(f, "AVG({e})"),
        }
    }
}

/// Sort key over an output column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    /// Output column name.
    pub column: String,
    /// Descending order when set.
    pub descending: bool,
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.column,
            if self.descending { "DESC" } else { "ASC" }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    /// Keeps left rows with at least one match; decorrelation target for IN/EXISTS.
    LeftSemi,
    /// Keeps left rows with no match; decorrelation target for NOT IN/NOT EXISTS.
    LeftAnti,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JoinType::Inner => "inner",
            JoinType::LeftSemi => "left_semi",
            JoinType::LeftAnti => "left_anti",
        };
        f.write_str(s)
    }
}

/// Relational-algebra operator tree produced by the converter.
///
/// Invariant: every node's row type is derivable solely from its children's
/// row types and its own attributes ([`LogicalPlan::row_type`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogicalPlan {
    /// Base-table scan; the row type is already flattened by the converter.
    Scan {
        schema_name: String,
        table: String,
        row_type: SchemaRef,
        distribution: Distribution,
        row_count: Option<u64>,
    },
    Filter {
        predicate: Expr,
        input: Box<LogicalPlan>,
    },
    Project {
        /// `(expr, output_name)` in output order.
        exprs: Vec<(Expr, String)>,
        input: Box<LogicalPlan>,
    },
    Join {
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
        /// Equi-join key pairs `(left_column, right_column)`.
        on: Vec<(String, String)>,
        join_type: JoinType,
    },
    Aggregate {
        /// Group keys; restricted to plain column references.
        group_exprs: Vec<Expr>,
        /// Aggregate calls and output aliases.
        aggr_exprs: Vec<(AggExpr, String)>,
        input: Box<LogicalPlan>,
    },
    /// Inline literal rows; a leaf.
    Values {
        row_type: SchemaRef,
        rows: Vec<Vec<LiteralValue>>,
    },
    Sort {
        keys: Vec<SortKey>,
        input: Box<LogicalPlan>,
    },
    Limit {
        n: usize,
        input: Box<LogicalPlan>,
    },
    /// `expr IN (subquery)` filter.
    ///
    /// Exists only between conversion and decorrelation; the decorrelation
    /// pass rewrites it into a semi/anti join.
    InSubqueryFilter {
        input: Box<LogicalPlan>,
        expr: Expr,
        subquery: Box<LogicalPlan>,
        negated: bool,
    },
    /// `EXISTS (subquery)` filter; same lifetime as [`LogicalPlan::InSubqueryFilter`].
    ExistsSubqueryFilter {
        input: Box<LogicalPlan>,
        subquery: Box<LogicalPlan>,
        negated: bool,
    },
}

impl LogicalPlan {
    /// Direct child plans in order.
    pub fn children(&self) -> Vec<&LogicalPlan> {
        match self {
            LogicalPlan::Scan { .. } | LogicalPlan::Values { .. } => vec![],
            LogicalPlan::Filter { input, .. }
            | LogicalPlan::Project { input, .. }
            | LogicalPlan::Aggregate { input, .. }
            | LogicalPlan::Sort { input, .. }
            | LogicalPlan::Limit { input, .. } => vec![input.as_ref()],
            LogicalPlan::Join { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            LogicalPlan::InSubqueryFilter {
                input, subquery, ..
            }
            | LogicalPlan::ExistsSubqueryFilter {
                input, subquery, ..
            } => vec![input.as_ref(), subquery.as_ref()],
        }
    }

    /// Output row type, derived from children and node attributes only.
    pub fn row_type(&self) -> SchemaRef {
        match self {
            LogicalPlan::Scan { row_type, .. } | LogicalPlan::Values { row_type, .. } => {
                Arc::clone(row_type)
            }
            LogicalPlan::Filter { input, .. }
            | LogicalPlan::Sort { input, .. }
            | LogicalPlan::Limit { input, .. } => input.row_type(),
            LogicalPlan::Project { exprs, .. } => Arc::new(Schema::new(
                exprs
                    .iter()
                    .map(|(e, name)| Field::new(name, e.data_type(), true))
                    .collect::<Fields>(),
            )),
            LogicalPlan::Join {
                left,
                right,
                join_type,
                ..
            } => match join_type {
                // Semi/anti joins only emit left-side rows.
                JoinType::LeftSemi | JoinType::LeftAnti => left.row_type(),
                JoinType::Inner => {
                    let mut fields: Vec<Field> = vec![];
                    for f in left.row_type().fields() {
                        fields.push(f.as_ref().clone());
                    }
                    for f in right.row_type().fields() {
                        fields.push(f.as_ref().clone());
                    }
                    Arc::new(Schema::new(fields))
                }
            },
            LogicalPlan::Aggregate {
                group_exprs,
                aggr_exprs,
                ..
            } => {
                let mut fields: Vec<Field> = vec![];
                for g in group_exprs {
                    let name = match g {
                        Expr::Column { name, .. } => name.clone(),
                        other => format!("{other}"),
                    };
                    fields.push(Field::new(name, g.data_type(), true));
                }
                for (agg, name) in aggr_exprs {
                    fields.push(Field::new(name, agg.data_type(), true));
                }
                Arc::new(Schema::new(fields))
            }
            LogicalPlan::InSubqueryFilter { input, .. }
            | LogicalPlan::ExistsSubqueryFilter { input, .. } => input.row_type(),
        }
    }

    /// True when any expression in the tree references an outer scope.
    ///
    /// A fully decorrelated plan returns `false`.
    pub fn has_outer_refs(&self) -> bool {
        let own = match self {
            LogicalPlan::Filter { predicate, .. } => predicate.has_outer_refs(),
            LogicalPlan::Project { exprs, .. } => exprs.iter().any(|(e, _)| e.has_outer_refs()),
            LogicalPlan::Aggregate {
                group_exprs,
                aggr_exprs,
                ..
            } => {
                group_exprs.iter().any(Expr::has_outer_refs)
                    || aggr_exprs.iter().any(|(a, _)| match a {
                        AggExpr::Count(e)
                        | AggExpr::Sum(e)
                        | AggExpr::Min(e)
                        | AggExpr::Max(e)
                        | AggExpr::Avg(e) => e.has_outer_refs(),
                    })
            }
            LogicalPlan::InSubqueryFilter { expr, .. } => expr.has_outer_refs(),
            _ => false,
        };
        own || self.children().iter().any(|c| c.has_outer_refs())
    }

    /// True while un-decorrelated subquery filters remain in the tree.
    pub fn has_subquery_filters(&self) -> bool {
        matches!(
            self,
            LogicalPlan::InSubqueryFilter { .. } | LogicalPlan::ExistsSubqueryFilter { .. }
        ) || self.children().iter().any(|c| c.has_subquery_filters())
    }
}

/// Expand composite (struct) columns into scalar columns with dotted names.
///
/// Applied once at scan/values construction so all mid-tree row types are
/// flat; nested structs flatten recursively.
pub fn flatten_schema(schema: &Schema) -> Schema {
    fn push_field(prefix: &str, field: &Field, out: &mut Vec<Field>) {
        match field.data_type() {
            DataType::Struct(children) => {
                for child in children {
                    let name = format!("{prefix}{}.", field.name());
                    push_field(&name, child, out);
                }
            }
            _ => out.push(Field::new(
                format!("{prefix}{}", field.name()),
                field.data_type().clone(),
                field.is_nullable(),
            )),
        }
    }

    let mut fields: Vec<Field> = vec![];
    for f in schema.fields() {
        push_field("", f, &mut fields);
    }
    Schema::new(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_expands_struct_columns() {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new(
                "addr",
                DataType::Struct(Fields::from(vec![
                    Field::new("city", DataType::Utf8, true),
                    Field::new("zip", DataType::Utf8, true),
                ])),
                true,
            ),
        ]);
        let flat = flatten_schema(&schema);
        let names: Vec<&str> = flat.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, vec!["id", "addr.city", "addr.zip"]);
        assert!(flat
            .fields()
            .iter()
            .all(|f| !matches!(f.data_type(), DataType::Struct(_))));
    }

    #[test]
    fn semi_join_row_type_is_left_side_only() {
        let left = LogicalPlan::Values {
            row_type: Arc::new(Schema::new(vec![Field::new("a", DataType::Int64, true)])),
            rows: vec![],
        };
        let right = LogicalPlan::Values {
            row_type: Arc::new(Schema::new(vec![Field::new("b", DataType::Int64, true)])),
            rows: vec![],
        };
        let join = LogicalPlan::Join {
            left: Box::new(left),
            right: Box::new(right),
            on: vec![("a".to_string(), "b".to_string())],
            join_type: JoinType::LeftSemi,
        };
        let rt = join.row_type();
        assert_eq!(rt.fields().len(), 1);
        assert_eq!(rt.field(0).name(), "a");
    }

    #[test]
    fn conjunct_split_and_rebuild() {
        let a = Expr::Literal(LiteralValue::Boolean(true));
        let b = Expr::Literal(LiteralValue::Boolean(false));
        let and = Expr::And(Box::new(a.clone()), Box::new(b.clone()));
        let parts = and.split_conjuncts();
        assert_eq!(parts.len(), 2);
        let back = Expr::conjoin(parts).unwrap();
        assert_eq!(back, Expr::And(Box::new(a), Box::new(b)));
        assert!(Expr::conjoin(vec![]).is_none());
    }
}
