use std::sync::Arc;

use arrow_schema::SchemaRef;
use shardq_catalog::Distribution;
use shardq_planner::{
    AggExpr, DistributionTrait, Expr, JoinStrategy, JoinType, LiteralValue, SortKey,
};

/// Hash-join build side chosen at lowering time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildSide {
    Left,
    Right,
}

/// Shard-backed table scan.
#[derive(Debug, Clone)]
pub struct ScanExec {
    pub schema_name: String,
    pub table: String,
    pub schema: SchemaRef,
    pub distribution: Distribution,
}

/// Inline literal rows.
#[derive(Debug, Clone)]
pub struct ValuesExec {
    pub schema: SchemaRef,
    pub rows: Vec<Vec<LiteralValue>>,
}

#[derive(Debug, Clone)]
pub struct FilterExec {
    pub predicate: Expr,
    pub input: Box<ExecNode>,
}

#[derive(Debug, Clone)]
pub struct ProjectExec {
    pub exprs: Vec<(Expr, String)>,
    pub schema: SchemaRef,
    pub input: Box<ExecNode>,
}

/// Hash join over already-exchanged inputs; the movement shape is decided
/// by the optimizer and realized by exchange nodes below this one.
#[derive(Debug, Clone)]
pub struct HashJoinExec {
    pub on: Vec<(String, String)>,
    pub join_type: JoinType,
    pub strategy: JoinStrategy,
    pub build_side: BuildSide,
    pub schema: SchemaRef,
    pub left: Box<ExecNode>,
    pub right: Box<ExecNode>,
}

#[derive(Debug, Clone)]
pub struct HashAggregateExec {
    pub group_exprs: Vec<Expr>,
    pub aggr_exprs: Vec<(AggExpr, String)>,
    pub schema: SchemaRef,
    pub input: Box<ExecNode>,
}

#[derive(Debug, Clone)]
pub struct SortExec {
    pub keys: Vec<SortKey>,
    pub input: Box<ExecNode>,
}

#[derive(Debug, Clone)]
pub struct LimitExec {
    pub n: usize,
    pub input: Box<ExecNode>,
}

/// Data-movement boundary realized by the middleware transport.
#[derive(Debug, Clone)]
pub struct ExchangeExec {
    pub distribution: DistributionTrait,
    pub input: Box<ExecNode>,
}

/// Executable plan node produced by lowering a physical plan.
///
/// This is the shape handed to the middleware's runtime; the compiler's
/// responsibility ends here.
#[derive(Debug, Clone)]
pub enum ExecNode {
    Scan(ScanExec),
    Values(ValuesExec),
    Filter(FilterExec),
    Project(ProjectExec),
    HashJoin(HashJoinExec),
    HashAggregate(HashAggregateExec),
    Sort(SortExec),
    Limit(LimitExec),
    Exchange(ExchangeExec),
}

impl ExecNode {
    pub fn name(&self) -> &'static str {
        match self {
            ExecNode::Scan(_) => "ScanExec",
            ExecNode::Values(_) => "ValuesExec",
            ExecNode::Filter(_) => "FilterExec",
            ExecNode::Project(_) => "ProjectExec",
            ExecNode::HashJoin(_) => "HashJoinExec",
            ExecNode::HashAggregate(_) => "HashAggregateExec",
            ExecNode::Sort(_) => "SortExec",
            ExecNode::Limit(_) => "LimitExec",
            ExecNode::Exchange(_) => "ExchangeExec",
        }
    }

    /// Output row type of this node.
    pub fn schema(&self) -> SchemaRef {
        match self {
            ExecNode::Scan(s) => Arc::clone(&s.schema),
            ExecNode::Values(v) => Arc::clone(&v.schema),
            ExecNode::Project(p) => Arc::clone(&p.schema),
            ExecNode::HashJoin(j) => Arc::clone(&j.schema),
            ExecNode::HashAggregate(a) => Arc::clone(&a.schema),
            ExecNode::Filter(f) => f.input.schema(),
            ExecNode::Sort(s) => s.input.schema(),
            ExecNode::Limit(l) => l.input.schema(),
            ExecNode::Exchange(e) => e.input.schema(),
        }
    }

    pub fn children(&self) -> Vec<&ExecNode> {
        match self {
            ExecNode::Scan(_) | ExecNode::Values(_) => vec![],
            ExecNode::Filter(f) => vec![&f.input],
            ExecNode::Project(p) => vec![&p.input],
            ExecNode::HashJoin(j) => vec![&j.left, &j.right],
            ExecNode::HashAggregate(a) => vec![&a.input],
            ExecNode::Sort(s) => vec![&s.input],
            ExecNode::Limit(l) => vec![&l.input],
            ExecNode::Exchange(e) => vec![&e.input],
        }
    }
}
