use std::fmt;
use std::sync::Arc;

use arrow_schema::SchemaRef;
use serde::{Deserialize, Serialize};
use shardq_catalog::Distribution;
use shardq_common::{Result, ShardqError};

use crate::explain::{fmt_list, fmt_on, ExplainWriter};
use crate::logical_plan::{AggExpr, Expr, JoinType, LiteralValue, LogicalPlan, SortKey};

/// Physical-execution family a plan node declares membership in.
///
/// The default optimizer configuration requires the whole tree to land in
/// [`Convention::Distributable`]; `Local` exists for coordinator-side-only
/// operators and for tests exercising unsatisfiable requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Convention {
    /// Eligible for shard-local or coordinator-side distributed execution.
    Distributable,
    /// Must run inside the coordinator process.
    Local,
}

impl fmt::Display for Convention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Convention::Distributable => f.write_str("distributable"),
            Convention::Local => f.write_str("local"),
        }
    }
}

/// Data-placement property of a physical node's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistributionTrait {
    /// No placement guarantee.
    Any,
    /// Hash-partitioned on the named columns.
    Hashed(Vec<String>),
    /// Replicated to every shard.
    Broadcast,
    /// Single stream on the coordinator.
    Singleton,
}

impl fmt::Display for DistributionTrait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistributionTrait::Any => f.write_str("any"),
            DistributionTrait::Hashed(keys) => write!(f, "hashed{}", fmt_list(keys)),
            DistributionTrait::Broadcast => f.write_str("broadcast"),
            DistributionTrait::Singleton => f.write_str("singleton"),
        }
    }
}

/// Physical property dimensions the planner search engine tracks.
///
/// Registered at `ready()`; a trait dimension that is not registered is
/// ignored by [`TraitSet::satisfies`], mirroring how the collation trait is
/// optional in the default definition set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraitDef {
    Convention,
    Collation,
    Distribution,
}

/// Default trait definitions: convention plus collation.
pub fn default_trait_defs() -> Vec<TraitDef> {
    vec![TraitDef::Convention, TraitDef::Collation]
}

/// The fixed collection of physical properties a plan node satisfies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraitSet {
    /// Execution convention.
    pub convention: Convention,
    /// Output sort order; empty means unsorted.
    pub collation: Vec<SortKey>,
    /// Output data placement.
    pub distribution: DistributionTrait,
}

impl TraitSet {
    /// Traits required by the default optimizer configuration.
    pub fn distributable() -> Self {
        Self {
            convention: Convention::Distributable,
            collation: vec![],
            distribution: DistributionTrait::Any,
        }
    }

    /// Coordinator-local traits.
    pub fn local() -> Self {
        Self {
            convention: Convention::Local,
            collation: vec![],
            distribution: DistributionTrait::Any,
        }
    }

    pub fn with_collation(mut self, collation: Vec<SortKey>) -> Self {
        self.collation = collation;
        self
    }

    pub fn with_distribution(mut self, distribution: DistributionTrait) -> Self {
        self.distribution = distribution;
        self
    }

    /// Whether this trait set satisfies `required` under the registered
    /// trait definitions.
    ///
    /// Per dimension: conventions must match exactly; a collation is
    /// satisfied by any set whose collation starts with the required prefix;
    /// `Any` distribution is satisfied by everything.
    pub fn satisfies(&self, required: &TraitSet, defs: &[TraitDef]) -> bool {
        for def in defs {
            let ok = match def {
                TraitDef::Convention => self.convention == required.convention,
                TraitDef::Collation => {
                    required.collation.is_empty() || self.collation.starts_with(&required.collation)
                }
                TraitDef::Distribution => {
                    required.distribution == DistributionTrait::Any
                        || self.distribution == required.distribution
                }
            };
            if !ok {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for TraitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}",
            self.convention,
            fmt_list(&self.collation),
            self.distribution
        )
    }
}

/// Data-movement shape chosen for a physical join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinStrategy {
    /// Not yet decided; only valid on logical members.
    Auto,
    /// Replicate the left side, keep the right in place.
    BroadcastLeft,
    /// Replicate the right side, keep the left in place.
    BroadcastRight,
    /// Repartition both sides by the join keys.
    Shuffle,
}

impl fmt::Display for JoinStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JoinStrategy::Auto => "auto",
            JoinStrategy::BroadcastLeft => "broadcast_left",
            JoinStrategy::BroadcastRight => "broadcast_right",
            JoinStrategy::Shuffle => "shuffle",
        };
        f.write_str(s)
    }
}

/// Operator payload shared by memo members and physical plan nodes: the
/// operator kind with its kind-specific attributes, without child links.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PlanOp {
    /// Base-table scan; a leaf.
    Scan {
        schema_name: String,
        table: String,
        row_type: SchemaRef,
        distribution: Distribution,
        row_count: Option<u64>,
    },
    Filter {
        predicate: Expr,
    },
    Project {
        exprs: Vec<(Expr, String)>,
    },
    Join {
        on: Vec<(String, String)>,
        join_type: JoinType,
        strategy: JoinStrategy,
    },
    Aggregate {
        group_exprs: Vec<Expr>,
        aggr_exprs: Vec<(AggExpr, String)>,
    },
    /// Inline literal rows; a leaf.
    Values {
        row_type: SchemaRef,
        rows: Vec<Vec<LiteralValue>>,
    },
    Sort {
        keys: Vec<SortKey>,
    },
    Limit {
        n: usize,
    },
    /// Data-movement boundary; physical-only, inserted by plan finalization.
    Exchange {
        distribution: DistributionTrait,
    },
}

impl PlanOp {
    /// Operator kind name used in logical explain output and errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            PlanOp::Scan { .. } => "Scan",
            PlanOp::Filter { .. } => "Filter",
            PlanOp::Project { .. } => "Project",
            PlanOp::Join { .. } => "Join",
            PlanOp::Aggregate { .. } => "Aggregate",
            PlanOp::Values { .. } => "Values",
            PlanOp::Sort { .. } => "Sort",
            PlanOp::Limit { .. } => "Limit",
            PlanOp::Exchange { .. } => "Exchange",
        }
    }

    /// Node name in the distributable convention, used by physical explain.
    pub fn physical_name(&self) -> &'static str {
        match self {
            PlanOp::Scan { .. } => "ShardScan",
            PlanOp::Filter { .. } => "ShardFilter",
            PlanOp::Project { .. } => "ShardProject",
            PlanOp::Join { .. } => "ShardJoin",
            PlanOp::Aggregate { .. } => "ShardAggregate",
            PlanOp::Values { .. } => "ShardValues",
            PlanOp::Sort { .. } => "ShardSort",
            PlanOp::Limit { .. } => "ShardLimit",
            PlanOp::Exchange { .. } => "ShardExchange",
        }
    }

    /// Fixed child count of this operator kind.
    pub fn arity(&self) -> usize {
        match self {
            PlanOp::Scan { .. } | PlanOp::Values { .. } => 0,
            PlanOp::Filter { .. }
            | PlanOp::Project { .. }
            | PlanOp::Aggregate { .. }
            | PlanOp::Sort { .. }
            | PlanOp::Limit { .. }
            | PlanOp::Exchange { .. } => 1,
            PlanOp::Join { .. } => 2,
        }
    }

    /// Output row type given the children's row types.
    pub fn derive_row_type(&self, children: &[SchemaRef]) -> SchemaRef {
        use arrow_schema::{Field, Schema};
        match self {
            PlanOp::Scan { row_type, .. } | PlanOp::Values { row_type, .. } => {
                Arc::clone(row_type)
            }
            PlanOp::Filter { .. }
            | PlanOp::Sort { .. }
            | PlanOp::Limit { .. }
            | PlanOp::Exchange { .. } => Arc::clone(&children[0]),
            PlanOp::Project { exprs } => Arc::new(Schema::new(
                exprs
                    .iter()
                    .map(|(e, name)| Field::new(name, e.data_type(), true))
                    .collect::<Vec<_>>(),
            )),
            PlanOp::Join { join_type, .. } => match join_type {
                JoinType::LeftSemi | JoinType::LeftAnti => Arc::clone(&children[0]),
                JoinType::Inner => {
                    let mut fields: Vec<Field> = vec![];
                    for f in children[0].fields() {
                        fields.push(f.as_ref().clone());
                    }
                    for f in children[1].fields() {
                        fields.push(f.as_ref().clone());
                    }
                    Arc::new(Schema::new(fields))
                }
            },
            PlanOp::Aggregate {
                group_exprs,
                aggr_exprs,
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
        }
    }

    fn explain_items(&self, w: &mut ExplainWriter) {
        match self {
            PlanOp::Scan {
                schema_name,
                table,
                distribution,
                ..
            } => {
                w.item("table", format!("{schema_name}.{table}"))
                    .item("distribution", format!("{distribution:?}"));
            }
            PlanOp::Filter { predicate } => {
                w.item("condition", predicate);
            }
            PlanOp::Project { exprs } => {
                for (e, alias) in exprs {
                    w.item(alias, e);
                }
            }
            PlanOp::Join {
                on,
                join_type,
                strategy,
            } => {
                w.item("type", join_type)
                    .item("on", fmt_on(on))
                    .item("strategy", strategy);
            }
            PlanOp::Aggregate {
                group_exprs,
                aggr_exprs,
            } => {
                w.item("group", fmt_list(group_exprs));
                for (agg, alias) in aggr_exprs {
                    w.item(alias, agg);
                }
            }
            PlanOp::Values { row_type, rows } => {
                w.item("columns", row_type.fields().len())
                    .item("rows", rows.len());
            }
            PlanOp::Sort { keys } => {
                w.item("keys", fmt_list(keys));
            }
            PlanOp::Limit { n } => {
                w.item("n", n);
            }
            PlanOp::Exchange { distribution } => {
                w.item("distribution", distribution);
            }
        }
    }
}

/// One node of a selected physical plan.
///
/// Immutable after construction; children are shared by `Arc` and a
/// structural rewrite always produces a new node via [`PhysicalNode::copy`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicalNode {
    /// Operator kind and attributes.
    pub op: PlanOp,
    /// Physical properties this node satisfies.
    pub traits: TraitSet,
    /// Child nodes in operator order.
    pub children: Vec<Arc<PhysicalNode>>,
}

impl PhysicalNode {
    /// Build a node, checking the child list against the operator's arity.
    pub fn new(
        op: PlanOp,
        traits: TraitSet,
        children: Vec<Arc<PhysicalNode>>,
    ) -> Result<Arc<Self>> {
        if children.len() != op.arity() {
            return Err(ShardqError::ArityMismatch {
                operator: op.physical_name().to_string(),
                expected: op.arity(),
                actual: children.len(),
            });
        }
        Ok(Arc::new(Self {
            op,
            traits,
            children,
        }))
    }

    /// Structurally-new node with substituted traits and children.
    ///
    /// Operator-specific attributes are preserved; a wrong-length child list
    /// fails with [`ShardqError::ArityMismatch`] and is never truncated or
    /// padded.
    pub fn copy(
        &self,
        new_traits: TraitSet,
        new_children: Vec<Arc<PhysicalNode>>,
    ) -> Result<Arc<Self>> {
        PhysicalNode::new(self.op.clone(), new_traits, new_children)
    }

    /// Output row type, derived from children and attributes.
    pub fn row_type(&self) -> SchemaRef {
        let child_types: Vec<SchemaRef> = self.children.iter().map(|c| c.row_type()).collect();
        self.op.derive_row_type(&child_types)
    }

    /// Append this node and its subtree to an explain sink.
    pub fn explain<'w>(&self, w: &'w mut ExplainWriter) -> &'w mut ExplainWriter {
        w.name(self.op.physical_name());
        self.op.explain_items(w);
        w.item("traits", &self.traits);
        if self.children.is_empty() {
            w.ret()
        } else {
            w.into_children();
            for child in &self.children {
                child.explain(w);
            }
            w.ret()
        }
    }

    /// Render the subtree as stable multiline text.
    pub fn explain_to_string(&self) -> String {
        let mut w = ExplainWriter::new();
        self.explain(&mut w);
        w.finish()
    }

    /// Double-dispatch lowering: the node calls back into the visitor with
    /// itself so the visitor picks the constructor for this concrete kind.
    pub fn implement<I: ExecutorImplementor>(&self, implementor: &mut I) -> Result<I::Exec> {
        match &self.op {
            PlanOp::Scan { .. } => implementor.implement_scan(self),
            PlanOp::Filter { .. } => implementor.implement_filter(self),
            PlanOp::Project { .. } => implementor.implement_project(self),
            PlanOp::Join { .. } => implementor.implement_join(self),
            PlanOp::Aggregate { .. } => implementor.implement_aggregate(self),
            PlanOp::Values { .. } => implementor.implement_values(self),
            PlanOp::Sort { .. } => implementor.implement_sort(self),
            PlanOp::Limit { .. } => implementor.implement_limit(self),
            PlanOp::Exchange { .. } => implementor.implement_exchange(self),
        }
    }

    /// Recursively collect the subtree in depth-first pre-order.
    pub fn iter(&self) -> Vec<&PhysicalNode> {
        let mut out = vec![self];
        for c in &self.children {
            out.extend(c.iter());
        }
        out
    }
}

/// Lowering visitor with one handling method per physical operator kind.
///
/// Dispatch goes through [`PhysicalNode::implement`], so adding a kind means
/// adding a method here, not editing a type switch. Every method defaults to
/// [`ShardqError::UnsupportedOperator`]: an implementor that misses a kind
/// reachable from its plans has a configuration bug, and the error says so.
///
/// Handlers must lower children first (depth-first, post-order) and only then
/// build their own executable node.
pub trait ExecutorImplementor {
    /// Executable node type produced by this implementor.
    type Exec;

    fn implement_scan(&mut self, node: &PhysicalNode) -> Result<Self::Exec> {
        Err(unsupported(node))
    }
    fn implement_filter(&mut self, node: &PhysicalNode) -> Result<Self::Exec> {
        Err(unsupported(node))
    }
    fn implement_project(&mut self, node: &PhysicalNode) -> Result<Self::Exec> {
        Err(unsupported(node))
    }
    fn implement_join(&mut self, node: &PhysicalNode) -> Result<Self::Exec> {
        Err(unsupported(node))
    }
    fn implement_aggregate(&mut self, node: &PhysicalNode) -> Result<Self::Exec> {
        Err(unsupported(node))
    }
    fn implement_values(&mut self, node: &PhysicalNode) -> Result<Self::Exec> {
        Err(unsupported(node))
    }
    fn implement_sort(&mut self, node: &PhysicalNode) -> Result<Self::Exec> {
        Err(unsupported(node))
    }
    fn implement_limit(&mut self, node: &PhysicalNode) -> Result<Self::Exec> {
        Err(unsupported(node))
    }
    fn implement_exchange(&mut self, node: &PhysicalNode) -> Result<Self::Exec> {
        Err(unsupported(node))
    }
}

fn unsupported(node: &PhysicalNode) -> ShardqError {
    ShardqError::UnsupportedOperator(node.op.physical_name().to_string())
}

/// Convert a logical operator into its operator payload plus child plans.
///
/// Subquery-filter nodes have no operator payload; they must be decorrelated
/// before the plan reaches the optimizer.
pub fn logical_op(plan: &LogicalPlan) -> Result<(PlanOp, Vec<&LogicalPlan>)> {
    let op = match plan {
        LogicalPlan::Scan {
            schema_name,
            table,
            row_type,
            distribution,
            row_count,
        } => PlanOp::Scan {
            schema_name: schema_name.clone(),
            table: table.clone(),
            row_type: Arc::clone(row_type),
            distribution: distribution.clone(),
            row_count: *row_count,
        },
        LogicalPlan::Filter { predicate, .. } => PlanOp::Filter {
            predicate: predicate.clone(),
        },
        LogicalPlan::Project { exprs, .. } => PlanOp::Project {
            exprs: exprs.clone(),
        },
        LogicalPlan::Join { on, join_type, .. } => PlanOp::Join {
            on: on.clone(),
            join_type: *join_type,
            strategy: JoinStrategy::Auto,
        },
        LogicalPlan::Aggregate {
            group_exprs,
            aggr_exprs,
            ..
        } => PlanOp::Aggregate {
            group_exprs: group_exprs.clone(),
            aggr_exprs: aggr_exprs.clone(),
        },
        LogicalPlan::Values { row_type, rows } => PlanOp::Values {
            row_type: Arc::clone(row_type),
            rows: rows.clone(),
        },
        LogicalPlan::Sort { keys, .. } => PlanOp::Sort { keys: keys.clone() },
        LogicalPlan::Limit { n, .. } => PlanOp::Limit { n: *n },
        LogicalPlan::InSubqueryFilter { .. } | LogicalPlan::ExistsSubqueryFilter { .. } => {
            return Err(ShardqError::Internal(
                "subquery filter reached the optimizer without decorrelation".to_string(),
            ))
        }
    };
    Ok((op, plan.children()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_schema::{DataType, Field, Schema};

    fn values_node() -> Arc<PhysicalNode> {
        PhysicalNode::new(
            PlanOp::Values {
                row_type: Arc::new(Schema::new(vec![Field::new("a", DataType::Int64, true)])),
                rows: vec![vec![LiteralValue::Int64(1)]],
            },
            TraitSet::distributable(),
            vec![],
        )
        .expect("leaf node")
    }

    #[test]
    fn copy_rejects_wrong_child_count() {
        let leaf = values_node();
        // Values is a leaf; handing it a child must fail, never truncate.
        match leaf.copy(TraitSet::distributable(), vec![Arc::clone(&leaf)]) {
            Err(ShardqError::ArityMismatch {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 0);
                assert_eq!(actual, 1);
            }
            other => panic!("expected arity mismatch, got {other:?}"),
        }

        let filter = PhysicalNode::new(
            PlanOp::Filter {
                predicate: Expr::Literal(LiteralValue::Boolean(true)),
            },
            TraitSet::distributable(),
            vec![Arc::clone(&leaf)],
        )
        .expect("filter node");
        match filter.copy(TraitSet::distributable(), vec![]) {
            Err(ShardqError::ArityMismatch {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 0);
            }
            other => panic!("expected arity mismatch, got {other:?}"),
        }
    }

    #[test]
    fn copy_preserves_attributes() {
        let leaf = values_node();
        let copied = leaf
            .copy(
                TraitSet::distributable().with_distribution(DistributionTrait::Singleton),
                vec![],
            )
            .expect("copy");
        match &copied.op {
            PlanOp::Values { rows, .. } => assert_eq!(rows.len(), 1),
            other => panic!("expected values op, got {other:?}"),
        }
        assert_eq!(copied.traits.distribution, DistributionTrait::Singleton);
    }

    #[test]
    fn satisfies_ignores_unregistered_dimensions() {
        let hashed = TraitSet::distributable()
            .with_distribution(DistributionTrait::Hashed(vec!["k".to_string()]));
        let singleton =
            TraitSet::distributable().with_distribution(DistributionTrait::Singleton);
        // Distribution is not in the default defs, so any placement passes.
        assert!(hashed.satisfies(&singleton, &default_trait_defs()));
        assert!(!hashed.satisfies(
            &singleton,
            &[TraitDef::Convention, TraitDef::Distribution]
        ));
        assert!(!TraitSet::local().satisfies(&TraitSet::distributable(), &default_trait_defs()));
    }

    #[test]
    fn collation_prefix_satisfaction() {
        let key = |c: &str| SortKey {
            column: c.to_string(),
            descending: false,
        };
        let sorted = TraitSet::distributable().with_collation(vec![key("a"), key("b")]);
        let want_a = TraitSet::distributable().with_collation(vec![key("a")]);
        let want_b = TraitSet::distributable().with_collation(vec![key("b")]);
        let defs = default_trait_defs();
        assert!(sorted.satisfies(&want_a, &defs));
        assert!(!sorted.satisfies(&want_b, &defs));
    }

    #[test]
    fn explain_output_is_stable() {
        let filter = PhysicalNode::new(
            PlanOp::Filter {
                predicate: Expr::Literal(LiteralValue::Boolean(true)),
            },
            TraitSet::distributable(),
            vec![values_node()],
        )
        .expect("filter node");
        let first = filter.explain_to_string();
        let second = filter.explain_to_string();
        assert_eq!(first, second);
        assert!(first.starts_with("ShardFilter(condition=true"), "{first}");
        assert!(first.contains("  ShardValues"), "{first}");
    }
}
