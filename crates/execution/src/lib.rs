//! Executable-node model and plan lowering for shardq.
//!
//! Architecture role:
//! - the executable node shapes handed to the middleware runtime
//! - the default lowering visitor from physical plans
//! - the end-to-end `compile` convenience entry point
//!
//! Key modules:
//! - [`exec_node`]
//! - [`implementor`]

pub mod exec_node;
pub mod implementor;

pub use exec_node::{
    BuildSide, ExchangeExec, ExecNode, FilterExec, HashAggregateExec, HashJoinExec, LimitExec,
    ProjectExec, ScanExec, SortExec, ValuesExec,
};
pub use implementor::ExecutorBuilder;

use std::sync::Arc;

use shardq_catalog::RootSchema;
use shardq_common::{CompilerConfig, Result};
use shardq_planner::{CompilationUnit, PhysicalNode, TraitSet};

/// A fully compiled statement: the executable tree plus the physical plan
/// it was lowered from.
#[derive(Debug)]
pub struct CompiledStatement {
    pub exec: ExecNode,
    pub physical: Arc<PhysicalNode>,
    /// Optimizer cost of the selected plan.
    pub cost: Option<f64>,
}

/// Run the whole pipeline over one SQL string: parse, validate, convert,
/// optimize under the distributable convention, and lower.
pub fn compile(
    sql: &str,
    root: Arc<RootSchema>,
    config: Arc<CompilerConfig>,
) -> Result<CompiledStatement> {
    let mut unit = CompilationUnit::new(root, config);
    unit.parse(sql)?;
    unit.validate()?;
    let plan = unit.convert()?;
    let physical = unit.optimize(&plan, &TraitSet::distributable())?;
    let exec = physical.implement(&mut ExecutorBuilder)?;
    tracing::debug!(unit = %unit.id(), root = exec.name(), "statement compiled");
    Ok(CompiledStatement {
        exec,
        physical,
        cost: unit.last_cost(),
    })
}
