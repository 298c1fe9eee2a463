//! Built-in rule set registered at `ready()`.
//!
//! One implementation rule per operator kind turns logical members into
//! distributable-convention physical members; the join rule emits one member
//! per viable movement strategy and lets the coster pick; the filter-merge
//! rule is a logical-to-logical rewrite collapsing stacked filters.

use std::sync::Arc;

use shardq_common::Result;

use crate::logical_plan::Expr;
use crate::optimizer::{scan_distribution, Memo, MemoExpr, OptimizeContext, OptimizerRule};
use crate::physical_plan::{DistributionTrait, JoinStrategy, PlanOp, TraitSet};

/// Implementation rule for every single-variant operator kind: mark the
/// member distributable, deriving the placement trait where the operator
/// determines it.
pub struct ImplementationRule;

impl OptimizerRule for ImplementationRule {
    fn name(&self) -> &str {
        "implementation"
    }

    fn apply(
        &self,
        expr: &MemoExpr,
        _memo: &Memo,
        _ctx: &OptimizeContext,
    ) -> Result<Vec<MemoExpr>> {
        if expr.is_physical() {
            return Ok(vec![]);
        }
        let traits = match &expr.op {
            // The join rule owns joins; strategy choice is a costed decision.
            PlanOp::Join { .. } => return Ok(vec![]),
            PlanOp::Scan { distribution, .. } => {
                TraitSet::distributable().with_distribution(scan_distribution(distribution))
            }
            PlanOp::Values { .. } => {
                TraitSet::distributable().with_distribution(DistributionTrait::Singleton)
            }
            PlanOp::Sort { keys } => TraitSet::distributable()
                .with_collation(keys.clone())
                .with_distribution(DistributionTrait::Singleton),
            // Row-local operators keep their input's placement.
            PlanOp::Limit { .. }
            | PlanOp::Aggregate { .. }
            | PlanOp::Filter { .. }
            | PlanOp::Project { .. }
            | PlanOp::Exchange { .. } => TraitSet::distributable(),
        };
        Ok(vec![MemoExpr {
            op: expr.op.clone(),
            children: expr.children.clone(),
            traits: Some(traits),
        }])
    }
}

/// Join implementation: one physical member per movement strategy.
///
/// Broadcast variants are emitted only when the broadcast side's estimate is
/// under the configured threshold; the shuffle variant is always emitted so
/// a satisfying member exists for every join.
pub struct JoinRule;

impl OptimizerRule for JoinRule {
    fn name(&self) -> &str {
        "join"
    }

    fn apply(&self, expr: &MemoExpr, memo: &Memo, ctx: &OptimizeContext) -> Result<Vec<MemoExpr>> {
        if expr.is_physical() {
            return Ok(vec![]);
        }
        let (on, join_type) = match &expr.op {
            PlanOp::Join { on, join_type, .. } => (on.clone(), *join_type),
            _ => return Ok(vec![]),
        };

        let threshold = ctx.config.broadcast_threshold_rows as f64;
        let left_rows = memo.group(expr.children[0]).estimate;
        let right_rows = memo.group(expr.children[1]).estimate;

        let mut strategies = vec![];
        if left_rows <= threshold {
            strategies.push(JoinStrategy::BroadcastLeft);
        }
        if right_rows <= threshold {
            strategies.push(JoinStrategy::BroadcastRight);
        }
        strategies.push(JoinStrategy::Shuffle);

        Ok(strategies
            .into_iter()
            .map(|strategy| MemoExpr {
                op: PlanOp::Join {
                    on: on.clone(),
                    join_type,
                    strategy,
                },
                children: expr.children.clone(),
                traits: Some(TraitSet::distributable()),
            })
            .collect())
    }
}

/// Collapse `Filter(Filter(x))` into one filter with a conjoined predicate.
///
/// Logical-to-logical: the merged member lands in the outer filter's group
/// with the inner filter's input as its child, and the implementation rule
/// picks it up on the next pass.
pub struct MergeFilterRule;

impl OptimizerRule for MergeFilterRule {
    fn name(&self) -> &str {
        "merge-filter"
    }

    fn apply(&self, expr: &MemoExpr, memo: &Memo, _ctx: &OptimizeContext) -> Result<Vec<MemoExpr>> {
        if expr.is_physical() {
            return Ok(vec![]);
        }
        let outer = match &expr.op {
            PlanOp::Filter { predicate } => predicate.clone(),
            _ => return Ok(vec![]),
        };
        let mut out = vec![];
        for child in memo.group(expr.children[0]).exprs.iter() {
            if child.is_physical() {
                continue;
            }
            if let PlanOp::Filter { predicate: inner } = &child.op {
                out.push(MemoExpr {
                    op: PlanOp::Filter {
                        predicate: Expr::And(
                            Box::new(inner.clone()),
                            Box::new(outer.clone()),
                        ),
                    },
                    children: child.children.clone(),
                    traits: None,
                });
            }
        }
        Ok(out)
    }
}

/// Rule set registered by `ready()` when the caller supplies none.
pub fn default_rules() -> Vec<Arc<dyn OptimizerRule>> {
    vec![
        Arc::new(ImplementationRule),
        Arc::new(JoinRule),
        Arc::new(MergeFilterRule),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logical_plan::{JoinType, LiteralValue, LogicalPlan};
    use crate::optimizer::Optimizer;
    use crate::physical_plan::{default_trait_defs, PhysicalNode};
    use arrow_schema::{DataType, Field, Schema};
    use shardq_catalog::Distribution;
    use shardq_common::{CompilerConfig, ShardqError};

    fn scan(table: &str, rows: u64, distribution: Distribution) -> LogicalPlan {
        LogicalPlan::Scan {
            schema_name: "db1".to_string(),
            table: table.to_string(),
            row_type: Arc::new(Schema::new(vec![Field::new(
                format!("{table}_id"),
                DataType::Int64,
                false,
            )])),
            distribution,
            row_count: Some(rows),
        }
    }

    fn optimizer() -> Optimizer {
        Optimizer::new(
            default_rules(),
            default_trait_defs(),
            CompilerConfig::default(),
        )
    }

    fn join_strategy(node: &PhysicalNode) -> Option<JoinStrategy> {
        if let PlanOp::Join { strategy, .. } = &node.op {
            return Some(*strategy);
        }
        node.children.iter().find_map(|c| join_strategy(c))
    }

    #[test]
    fn small_side_join_broadcasts() {
        let plan = LogicalPlan::Join {
            left: Box::new(scan(
                "big",
                10_000_000,
                Distribution::Sharded {
                    key: "big_id".to_string(),
                    shard_count: 8,
                },
            )),
            right: Box::new(scan("small", 50, Distribution::Singleton)),
            on: vec![("big_id".to_string(), "small_id".to_string())],
            join_type: JoinType::Inner,
        };
        let (root, cost) = optimizer()
            .optimize(&plan, &TraitSet::distributable())
            .expect("optimize");
        assert_eq!(join_strategy(&root), Some(JoinStrategy::BroadcastRight));
        assert!(cost > 0.0);
    }

    fn scan2(table: &str, rows: u64, shard_key: &str) -> LogicalPlan {
        LogicalPlan::Scan {
            schema_name: "db1".to_string(),
            table: table.to_string(),
            row_type: Arc::new(Schema::new(vec![
                Field::new(format!("{table}_id"), DataType::Int64, false),
                Field::new(format!("{table}_val"), DataType::Int64, true),
            ])),
            distribution: Distribution::Sharded {
                key: shard_key.to_string(),
                shard_count: 8,
            },
            row_count: Some(rows),
        }
    }

    fn exchanges(node: &PhysicalNode) -> usize {
        let own = usize::from(matches!(node.op, PlanOp::Exchange { .. }));
        own + node.children.iter().map(|c| exchanges(c)).sum::<usize>()
    }

    #[test]
    fn both_sides_large_shuffles() {
        // Join keys differ from the sharding keys, so both sides move.
        let plan = LogicalPlan::Join {
            left: Box::new(scan2("l", 10_000_000, "l_id")),
            right: Box::new(scan2("r", 20_000_000, "r_id")),
            on: vec![("l_val".to_string(), "r_val".to_string())],
            join_type: JoinType::Inner,
        };
        let (root, _) = optimizer()
            .optimize(&plan, &TraitSet::distributable())
            .expect("optimize");
        assert_eq!(join_strategy(&root), Some(JoinStrategy::Shuffle));
        assert_eq!(exchanges(&root), 2);
    }

    #[test]
    fn prepartitioned_join_moves_nothing() {
        // Both scans are already hashed on their join key.
        let plan = LogicalPlan::Join {
            left: Box::new(scan2("l", 10_000_000, "l_id")),
            right: Box::new(scan2("r", 20_000_000, "r_id")),
            on: vec![("l_id".to_string(), "r_id".to_string())],
            join_type: JoinType::Inner,
        };
        let (root, _) = optimizer()
            .optimize(&plan, &TraitSet::distributable())
            .expect("optimize");
        assert_eq!(join_strategy(&root), Some(JoinStrategy::Shuffle));
        assert_eq!(exchanges(&root), 0);
    }

    #[test]
    fn limit_over_sort_merges_once() {
        let plan = LogicalPlan::Limit {
            n: 10,
            input: Box::new(LogicalPlan::Sort {
                keys: vec![crate::logical_plan::SortKey {
                    column: "l_id".to_string(),
                    descending: false,
                }],
                input: Box::new(scan2("l", 1_000_000, "l_id")),
            }),
        };
        let (root, _) = optimizer()
            .optimize(&plan, &TraitSet::distributable())
            .expect("optimize");
        // One merge below the sort; the limit reuses the sort's single
        // stream instead of wrapping it again.
        assert_eq!(exchanges(&root), 1);
    }

    #[test]
    fn local_convention_is_unsatisfiable() {
        let plan = LogicalPlan::Values {
            row_type: Arc::new(Schema::new(vec![Field::new("a", DataType::Int64, true)])),
            rows: vec![vec![LiteralValue::Int64(1)]],
        };
        match optimizer().optimize(&plan, &TraitSet::local()) {
            Err(ShardqError::NoPhysicalPlanFound { .. }) => {}
            other => panic!("expected no physical plan, got {other:?}"),
        }
    }

    #[test]
    fn empty_rule_set_finds_no_plan() {
        let plan = LogicalPlan::Values {
            row_type: Arc::new(Schema::new(vec![Field::new("a", DataType::Int64, true)])),
            rows: vec![],
        };
        let optimizer = Optimizer::new(vec![], default_trait_defs(), CompilerConfig::default());
        match optimizer.optimize(&plan, &TraitSet::distributable()) {
            Err(ShardqError::NoPhysicalPlanFound { .. }) => {}
            other => panic!("expected no physical plan, got {other:?}"),
        }
    }

    #[test]
    fn optimization_is_deterministic() {
        let plan = LogicalPlan::Filter {
            predicate: Expr::Literal(LiteralValue::Boolean(true)),
            input: Box::new(LogicalPlan::Filter {
                predicate: Expr::Literal(LiteralValue::Boolean(false)),
                input: Box::new(scan("t", 100, Distribution::Singleton)),
            }),
        };
        let opt = optimizer();
        let (a, ca) = opt.optimize(&plan, &TraitSet::distributable()).expect("a");
        let (b, cb) = opt.optimize(&plan, &TraitSet::distributable()).expect("b");
        assert_eq!(a.explain_to_string(), b.explain_to_string());
        assert_eq!(ca, cb);
    }
}
