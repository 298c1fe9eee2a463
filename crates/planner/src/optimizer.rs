//! Cost-based search over equivalence classes of plan subtrees.
//!
//! Volcano-style: the logical plan is loaded into a memo of groups, rules
//! generate alternative members until fixpoint or budget exhaustion, and
//! extraction walks the memo picking the cheapest member per group under the
//! required trait set. Data-movement boundaries are inserted in a finalize
//! pass over the extracted tree.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use arrow_schema::SchemaRef;
use shardq_catalog::Distribution;
use shardq_common::{CompilerConfig, Result, ShardqError};

use crate::logical_plan::LogicalPlan;
use crate::physical_plan::{
    logical_op, DistributionTrait, JoinStrategy, PhysicalNode, PlanOp, TraitDef, TraitSet,
};

/// Identifier of one equivalence class in the memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub usize);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// One alternative inside an equivalence class: an operator whose children
/// are whole classes rather than concrete nodes.
///
/// `traits: None` marks a logical member (rule input); `Some` marks a
/// physical member eligible for extraction.
#[derive(Debug, Clone)]
pub struct MemoExpr {
    pub op: PlanOp,
    pub children: Vec<GroupId>,
    pub traits: Option<TraitSet>,
}

impl MemoExpr {
    pub fn is_physical(&self) -> bool {
        self.traits.is_some()
    }
}

/// Equivalence class: members producing the same logical output.
#[derive(Debug)]
pub struct Group {
    pub exprs: Vec<MemoExpr>,
    /// Shared output row type of every member.
    pub row_type: SchemaRef,
    /// Estimated output row count, used by the cost model.
    pub estimate: f64,
}

/// Search state private to one `optimize` call.
#[derive(Debug, Default)]
pub struct Memo {
    groups: Vec<Group>,
    seen: HashSet<String>,
}

impl Memo {
    pub fn group(&self, id: GroupId) -> &Group {
        &self.groups[id.0]
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Load a logical plan, one group per node, and return the root group.
    pub fn insert_plan(&mut self, plan: &LogicalPlan) -> Result<GroupId> {
        let (op, children) = logical_op(plan)?;
        let child_ids = children
            .into_iter()
            .map(|c| self.insert_plan(c))
            .collect::<Result<Vec<_>>>()?;
        let estimate = estimate_rows(&op, &child_ids, self);
        let id = GroupId(self.groups.len());
        self.groups.push(Group {
            exprs: vec![],
            row_type: plan.row_type(),
            estimate,
        });
        let inserted = self.add_expr(
            id,
            MemoExpr {
                op,
                children: child_ids,
                traits: None,
            },
        );
        debug_assert!(inserted);
        Ok(id)
    }

    /// Add a member to a group unless an identical one is already present.
    pub fn add_expr(&mut self, id: GroupId, expr: MemoExpr) -> bool {
        let key = format!("{id}:{expr:?}");
        if !self.seen.insert(key) {
            return false;
        }
        self.groups[id.0].exprs.push(expr);
        true
    }
}

/// Output row estimates per operator kind; selectivities are fixed.
fn estimate_rows(op: &PlanOp, children: &[GroupId], memo: &Memo) -> f64 {
    let child = |i: usize| memo.group(children[i]).estimate;
    match op {
        PlanOp::Scan { row_count, .. } => row_count.unwrap_or(1000) as f64,
        PlanOp::Values { rows, .. } => rows.len() as f64,
        PlanOp::Filter { .. } => child(0) * 0.5,
        PlanOp::Project { .. } | PlanOp::Exchange { .. } | PlanOp::Sort { .. } => child(0),
        PlanOp::Aggregate { group_exprs, .. } => {
            if group_exprs.is_empty() {
                1.0
            } else {
                (child(0) * 0.1).max(1.0)
            }
        }
        PlanOp::Limit { n } => child(0).min(*n as f64),
        PlanOp::Join { join_type, .. } => match join_type {
            crate::logical_plan::JoinType::Inner => (child(0) * child(1)).sqrt().max(1.0),
            _ => child(0) * 0.5,
        },
    }
}

/// Read-only inputs shared by every rule application in one run.
#[derive(Debug, Clone)]
pub struct OptimizeContext {
    pub config: CompilerConfig,
    pub trait_defs: Vec<TraitDef>,
}

/// A transformation producing alternative members for a memo expression.
///
/// Rules are pure: they never mutate existing members, only return new ones
/// referencing unchanged child groups.
pub trait OptimizerRule: Send + Sync {
    /// Stable name used for dedup of rule applications.
    fn name(&self) -> &str;

    /// Produce alternatives for `expr`, or an empty vec when the rule does
    /// not apply.
    fn apply(&self, expr: &MemoExpr, memo: &Memo, ctx: &OptimizeContext) -> Result<Vec<MemoExpr>>;
}

/// The search engine: rule registry plus trait definitions, write-once at
/// construction and read-only afterwards.
pub struct Optimizer {
    rules: Vec<Arc<dyn OptimizerRule>>,
    ctx: OptimizeContext,
}

impl fmt::Debug for Optimizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Optimizer")
            .field("rules", &self.rules.len())
            .field("ctx", &self.ctx)
            .finish()
    }
}

impl Optimizer {
    pub fn new(
        rules: Vec<Arc<dyn OptimizerRule>>,
        trait_defs: Vec<TraitDef>,
        config: CompilerConfig,
    ) -> Self {
        Self {
            rules,
            ctx: OptimizeContext { config, trait_defs },
        }
    }

    pub fn context(&self) -> &OptimizeContext {
        &self.ctx
    }

    /// Find the cheapest physical plan satisfying `required`.
    ///
    /// Returns the extracted tree, with exchanges inserted, and its total
    /// cost. Fails with [`ShardqError::NoPhysicalPlanFound`] when some group
    /// has no member in the required convention, or when a rule application
    /// fails mid-search.
    pub fn optimize(
        &self,
        plan: &LogicalPlan,
        required: &TraitSet,
    ) -> Result<(Arc<PhysicalNode>, f64)> {
        let mut memo = Memo::default();
        let root = memo.insert_plan(plan)?;
        self.explore(&mut memo)?;

        let mut coster = Coster {
            memo: &memo,
            ctx: &self.ctx,
            cache: HashMap::new(),
        };
        let (cost, _) = coster.best(root, required)?;
        let extracted = coster.extract(root, required)?;
        let finalized = insert_exchanges(&extracted)?;
        tracing::debug!(groups = memo.group_count(), cost, "optimization finished");
        Ok((finalized, cost))
    }

    /// Apply rules to every member of every group until no application adds
    /// a member, or the configured budget runs out.
    fn explore(&self, memo: &mut Memo) -> Result<()> {
        let mut budget = self.ctx.config.rule_budget;
        let mut applied: HashSet<String> = HashSet::new();
        loop {
            let mut changed = false;
            for gid in 0..memo.group_count() {
                let gid = GroupId(gid);
                let mut idx = 0;
                while idx < memo.group(gid).exprs.len() {
                    for rule in &self.rules {
                        let expr = &memo.group(gid).exprs[idx];
                        let key = format!("{}:{gid}:{:?}", rule.name(), expr);
                        if applied.contains(&key) {
                            continue;
                        }
                        if budget == 0 {
                            tracing::debug!("rule budget exhausted, stopping exploration");
                            return Ok(());
                        }
                        budget -= 1;
                        let alternatives =
                            rule.apply(expr, memo, &self.ctx).map_err(|e| {
                                ShardqError::NoPhysicalPlanFound {
                                    message: format!("rule {} failed", rule.name()),
                                    source: Some(Box::new(e)),
                                }
                            })?;
                        applied.insert(key);
                        for alt in alternatives {
                            if memo.add_expr(gid, alt) {
                                changed = true;
                            }
                        }
                    }
                    idx += 1;
                }
            }
            if !changed {
                return Ok(());
            }
        }
    }
}

/// Trait requirement propagated from a member to its children: same
/// convention, no collation or placement constraint. Placement is resolved
/// by the exchange-insertion pass, not by the search.
fn child_required(required: &TraitSet) -> TraitSet {
    TraitSet {
        convention: required.convention,
        collation: vec![],
        distribution: DistributionTrait::Any,
    }
}

/// Memoized winner selection per `(group, required traits)`.
struct Coster<'a> {
    memo: &'a Memo,
    ctx: &'a OptimizeContext,
    cache: HashMap<(GroupId, String), (f64, usize)>,
}

impl<'a> Coster<'a> {
    /// Cheapest satisfying member of `group` and its total cost.
    ///
    /// Ties keep the earlier member, so output is reproducible for
    /// identical input trees.
    fn best(&mut self, group: GroupId, required: &TraitSet) -> Result<(f64, usize)> {
        let key = (group, format!("{required:?}"));
        if let Some(hit) = self.cache.get(&key) {
            return Ok(*hit);
        }

        let mut winner: Option<(f64, usize)> = None;
        for (idx, expr) in self.memo.group(group).exprs.iter().enumerate() {
            match &expr.traits {
                Some(t) if t.satisfies(required, &self.ctx.trait_defs) => {}
                _ => continue,
            }
            let child_req = child_required(required);
            let mut total = self.member_cost(expr);
            let mut feasible = true;
            for child in &expr.children {
                match self.best(*child, &child_req) {
                    Ok((c, _)) => total += c,
                    Err(_) => {
                        feasible = false;
                        break;
                    }
                }
            }
            if !feasible {
                continue;
            }
            // Strict less-than keeps the first (insertion-order) winner.
            match winner {
                Some((best_cost, _)) if total >= best_cost => {}
                _ => winner = Some((total, idx)),
            }
        }

        let result = winner.ok_or_else(|| ShardqError::NoPhysicalPlanFound {
            message: format!(
                "group {group} ({}) has no member satisfying traits {required}",
                self.memo.group(group).exprs[0].op.kind_name()
            ),
            source: None,
        })?;
        self.cache.insert(key, result);
        Ok(result)
    }

    /// Plan-local cost of one member, excluding children.
    fn member_cost(&self, expr: &MemoExpr) -> f64 {
        let shard_count = self.ctx.config.default_shard_count as f64;
        let child = |i: usize| self.memo.group(expr.children[i]).estimate;
        match &expr.op {
            PlanOp::Scan { row_count, .. } => row_count.unwrap_or(1000) as f64,
            PlanOp::Values { rows, .. } => rows.len() as f64,
            PlanOp::Filter { .. } => child(0),
            PlanOp::Project { .. } => child(0) * 0.1,
            PlanOp::Aggregate { .. } => child(0),
            PlanOp::Sort { .. } => {
                let rows = child(0);
                rows * (rows + 2.0).log2()
            }
            PlanOp::Limit { .. } => child(0),
            PlanOp::Exchange { distribution } => match distribution {
                DistributionTrait::Broadcast => child(0) * shard_count,
                _ => child(0),
            },
            PlanOp::Join { strategy, .. } => {
                let (l, r) = (child(0), child(1));
                match strategy {
                    JoinStrategy::BroadcastLeft => l * shard_count + r,
                    JoinStrategy::BroadcastRight => r * shard_count + l,
                    JoinStrategy::Shuffle | JoinStrategy::Auto => 2.0 * (l + r),
                }
            }
        }
    }

    /// Build the physical tree for the memoized winners.
    fn extract(&mut self, group: GroupId, required: &TraitSet) -> Result<Arc<PhysicalNode>> {
        let (_, idx) = self.best(group, required)?;
        let expr = &self.memo.group(group).exprs[idx];
        let traits = expr
            .traits
            .clone()
            .ok_or_else(|| ShardqError::Internal("extracted a logical member".to_string()))?;
        let child_req = child_required(required);
        let children = expr
            .children
            .clone()
            .into_iter()
            .map(|c| self.extract(c, &child_req))
            .collect::<Result<Vec<_>>>()?;
        PhysicalNode::new(expr.op.clone(), traits, children)
    }
}

/// Finalize pass: wrap operator inputs that need repartitioned or merged
/// data in explicit exchange nodes.
///
/// Joins get their strategy's movement shape, aggregates repartition on the
/// group keys (or merge to a single stream for global aggregates), and sort
/// and limit merge to the coordinator. An input that is already an exchange,
/// or whose placement already matches the target, is left alone.
pub fn insert_exchanges(node: &Arc<PhysicalNode>) -> Result<Arc<PhysicalNode>> {
    let children: Vec<Arc<PhysicalNode>> = node
        .children
        .iter()
        .map(insert_exchanges)
        .collect::<Result<Vec<_>>>()?;

    let children = match &node.op {
        PlanOp::Join { on, strategy, .. } => {
            let left_keys: Vec<String> = on.iter().map(|(l, _)| l.clone()).collect();
            let right_keys: Vec<String> = on.iter().map(|(_, r)| r.clone()).collect();
            let (left, right) = (children[0].clone(), children[1].clone());
            let (left, right) = match strategy {
                JoinStrategy::BroadcastLeft => {
                    (exchange(left, DistributionTrait::Broadcast)?, right)
                }
                JoinStrategy::BroadcastRight => {
                    (left, exchange(right, DistributionTrait::Broadcast)?)
                }
                JoinStrategy::Shuffle => (
                    exchange(left, DistributionTrait::Hashed(left_keys))?,
                    exchange(right, DistributionTrait::Hashed(right_keys))?,
                ),
                JoinStrategy::Auto => {
                    return Err(ShardqError::Internal(
                        "extracted join carries an undecided strategy".to_string(),
                    ))
                }
            };
            vec![left, right]
        }
        PlanOp::Aggregate { group_exprs, .. } => {
            let target = if group_exprs.is_empty() {
                DistributionTrait::Singleton
            } else {
                let keys = group_exprs
                    .iter()
                    .map(|g| match g {
                        crate::logical_plan::Expr::Column { name, .. } => Ok(name.clone()),
                        other => Err(ShardqError::Internal(format!(
                            "aggregate group key is not a column: {other}"
                        ))),
                    })
                    .collect::<Result<Vec<_>>>()?;
                DistributionTrait::Hashed(keys)
            };
            vec![exchange(children[0].clone(), target)?]
        }
        PlanOp::Sort { .. } | PlanOp::Limit { .. } => {
            vec![exchange(children[0].clone(), DistributionTrait::Singleton)?]
        }
        _ => children,
    };

    node.copy(node.traits.clone(), children)
}

fn exchange(input: Arc<PhysicalNode>, target: DistributionTrait) -> Result<Arc<PhysicalNode>> {
    if matches!(input.op, PlanOp::Exchange { .. }) || input.traits.distribution == target {
        return Ok(input);
    }
    let traits = TraitSet {
        distribution: target.clone(),
        ..input.traits.clone()
    };
    PhysicalNode::new(
        PlanOp::Exchange {
            distribution: target,
        },
        traits,
        vec![input],
    )
}

/// Distribution trait implied by a table's catalog metadata.
pub fn scan_distribution(distribution: &Distribution) -> DistributionTrait {
    match distribution {
        Distribution::Sharded { key, .. } => DistributionTrait::Hashed(vec![key.clone()]),
        Distribution::Broadcast => DistributionTrait::Broadcast,
        Distribution::Singleton => DistributionTrait::Singleton,
    }
}
