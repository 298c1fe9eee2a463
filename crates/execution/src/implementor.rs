//! Lowering from physical plans to executable nodes.
//!
//! Dispatch is double: [`shardq_planner::PhysicalNode::implement`] calls back
//! into the visitor with the concrete node, and each handler here lowers the
//! node's children before constructing its own executable node.

use shardq_common::{Result, ShardqError};
use shardq_planner::{ExecutorImplementor, JoinStrategy, PhysicalNode, PlanOp};

use crate::exec_node::{
    BuildSide, ExchangeExec, ExecNode, FilterExec, HashAggregateExec, HashJoinExec, LimitExec,
    ProjectExec, ScanExec, SortExec, ValuesExec,
};

/// Default lowering visitor with a handler for every built-in operator kind.
#[derive(Debug, Default)]
pub struct ExecutorBuilder;

impl ExecutorBuilder {
    fn lower_child(&mut self, node: &PhysicalNode, idx: usize) -> Result<Box<ExecNode>> {
        Ok(Box::new(node.children[idx].implement(self)?))
    }
}

fn wrong_handler(node: &PhysicalNode) -> ShardqError {
    ShardqError::Internal(format!(
        "{} dispatched to the wrong lowering handler",
        node.op.kind_name()
    ))
}

impl ExecutorImplementor for ExecutorBuilder {
    type Exec = ExecNode;

    fn implement_scan(&mut self, node: &PhysicalNode) -> Result<ExecNode> {
        let PlanOp::Scan {
            schema_name,
            table,
            row_type,
            distribution,
            ..
        } = &node.op
        else {
            return Err(wrong_handler(node));
        };
        Ok(ExecNode::Scan(ScanExec {
            schema_name: schema_name.clone(),
            table: table.clone(),
            schema: row_type.clone(),
            distribution: distribution.clone(),
        }))
    }

    fn implement_values(&mut self, node: &PhysicalNode) -> Result<ExecNode> {
        let PlanOp::Values { row_type, rows } = &node.op else {
            return Err(wrong_handler(node));
        };
        Ok(ExecNode::Values(ValuesExec {
            schema: row_type.clone(),
            rows: rows.clone(),
        }))
    }

    fn implement_filter(&mut self, node: &PhysicalNode) -> Result<ExecNode> {
        let PlanOp::Filter { predicate } = &node.op else {
            return Err(wrong_handler(node));
        };
        let input = self.lower_child(node, 0)?;
        Ok(ExecNode::Filter(FilterExec {
            predicate: predicate.clone(),
            input,
        }))
    }

    fn implement_project(&mut self, node: &PhysicalNode) -> Result<ExecNode> {
        let PlanOp::Project { exprs } = &node.op else {
            return Err(wrong_handler(node));
        };
        let schema = node.row_type();
        let input = self.lower_child(node, 0)?;
        Ok(ExecNode::Project(ProjectExec {
            exprs: exprs.clone(),
            schema,
            input,
        }))
    }

    fn implement_join(&mut self, node: &PhysicalNode) -> Result<ExecNode> {
        let PlanOp::Join {
            on,
            join_type,
            strategy,
        } = &node.op
        else {
            return Err(wrong_handler(node));
        };
        let schema = node.row_type();
        let left = self.lower_child(node, 0)?;
        let right = self.lower_child(node, 1)?;
        // Build over the replicated side; shuffle defaults to the right.
        let build_side = match strategy {
            JoinStrategy::BroadcastLeft => BuildSide::Left,
            _ => BuildSide::Right,
        };
        Ok(ExecNode::HashJoin(HashJoinExec {
            on: on.clone(),
            join_type: *join_type,
            strategy: *strategy,
            build_side,
            schema,
            left,
            right,
        }))
    }

    fn implement_aggregate(&mut self, node: &PhysicalNode) -> Result<ExecNode> {
        let PlanOp::Aggregate {
            group_exprs,
            aggr_exprs,
        } = &node.op
        else {
            return Err(wrong_handler(node));
        };
        let schema = node.row_type();
        let input = self.lower_child(node, 0)?;
        Ok(ExecNode::HashAggregate(HashAggregateExec {
            group_exprs: group_exprs.clone(),
            aggr_exprs: aggr_exprs.clone(),
            schema,
            input,
        }))
    }

    fn implement_sort(&mut self, node: &PhysicalNode) -> Result<ExecNode> {
        let PlanOp::Sort { keys } = &node.op else {
            return Err(wrong_handler(node));
        };
        let input = self.lower_child(node, 0)?;
        Ok(ExecNode::Sort(SortExec {
            keys: keys.clone(),
            input,
        }))
    }

    fn implement_limit(&mut self, node: &PhysicalNode) -> Result<ExecNode> {
        let PlanOp::Limit { n } = &node.op else {
            return Err(wrong_handler(node));
        };
        let input = self.lower_child(node, 0)?;
        Ok(ExecNode::Limit(LimitExec { n: *n, input }))
    }

    fn implement_exchange(&mut self, node: &PhysicalNode) -> Result<ExecNode> {
        let PlanOp::Exchange { distribution } = &node.op else {
            return Err(wrong_handler(node));
        };
        let input = self.lower_child(node, 0)?;
        Ok(ExecNode::Exchange(ExchangeExec {
            distribution: distribution.clone(),
            input,
        }))
    }
}
