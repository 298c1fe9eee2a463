//! Staged compilation state machine.
//!
//! One [`CompilationUnit`] carries a single SQL statement through
//! `Closed -> Reset -> Ready -> Parsed -> Validated -> Converted`, then
//! serves `optimize` calls over the converted plan. Units are single-threaded
//! and built per statement from shared read-only configuration; the
//! root schema, rule set, and trait definitions are shared by `Arc`.

use std::sync::Arc;

use arrow_schema::SchemaRef;
use shardq_catalog::{CatalogReader, RootSchema};
use shardq_common::{CompilerConfig, Result, ShardqError, StatementId};
use sqlparser::ast::Statement;

use crate::converter::RelationalConverter;
use crate::logical_plan::LogicalPlan;
use crate::optimizer::{Optimizer, OptimizerRule};
use crate::physical_plan::{default_trait_defs, PhysicalNode, TraitDef, TraitSet};
use crate::rules::default_rules;
use crate::validator::{ValidatedStatement, Validator};

/// Compilation stages in strict forward order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PlannerState {
    Closed,
    Reset,
    Ready,
    Parsed,
    Validated,
    Converted,
}

impl PlannerState {
    pub fn name(&self) -> &'static str {
        match self {
            PlannerState::Closed => "Closed",
            PlannerState::Reset => "Reset",
            PlannerState::Ready => "Ready",
            PlannerState::Parsed => "Parsed",
            PlannerState::Validated => "Validated",
            PlannerState::Converted => "Converted",
        }
    }

    fn next(&self) -> Option<PlannerState> {
        match self {
            PlannerState::Closed => Some(PlannerState::Reset),
            PlannerState::Reset => Some(PlannerState::Ready),
            PlannerState::Ready => Some(PlannerState::Parsed),
            PlannerState::Parsed => Some(PlannerState::Validated),
            PlannerState::Validated => Some(PlannerState::Converted),
            PlannerState::Converted => None,
        }
    }
}

/// Intermediate stages to pass through when an operation requiring
/// `required` is invoked while the unit sits at `current`.
///
/// Only `Reset` and `Ready` can be created without caller input; a gap that
/// needs `Parsed` or later, and any backward move, fails with
/// [`ShardqError::InvalidLifecycleState`].
pub fn auto_advance_steps(
    current: PlannerState,
    required: PlannerState,
) -> Result<Vec<PlannerState>> {
    if current == required {
        return Ok(vec![]);
    }
    if current > required {
        return Err(ShardqError::InvalidLifecycleState {
            current: current.name().to_string(),
            required: required.name().to_string(),
        });
    }
    let mut steps = vec![];
    let mut state = current;
    while state < required {
        let Some(next) = state.next() else {
            return Err(ShardqError::Internal(format!(
                "no stage follows {}",
                state.name()
            )));
        };
        if !matches!(next, PlannerState::Reset | PlannerState::Ready) {
            return Err(ShardqError::InvalidLifecycleState {
                current: current.name().to_string(),
                required: required.name().to_string(),
            });
        }
        steps.push(next);
        state = next;
    }
    Ok(steps)
}

/// One statement's journey through the compiler.
pub struct CompilationUnit {
    id: StatementId,
    state: PlannerState,
    config: Arc<CompilerConfig>,
    root: Arc<RootSchema>,
    parsed: Option<Statement>,
    validated: Option<ValidatedStatement>,
    converted: Option<LogicalPlan>,
    optimizer: Option<Optimizer>,
    last_cost: Option<f64>,
}

impl std::fmt::Debug for CompilationUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilationUnit")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish()
    }
}

impl CompilationUnit {
    /// New unit in `Closed` over shared read-only configuration.
    pub fn new(root: Arc<RootSchema>, config: Arc<CompilerConfig>) -> Self {
        Self {
            id: StatementId::next(),
            state: PlannerState::Closed,
            config,
            root,
            parsed: None,
            validated: None,
            converted: None,
            optimizer: None,
            last_cost: None,
        }
    }

    pub fn id(&self) -> StatementId {
        self.id
    }

    pub fn state(&self) -> PlannerState {
        self.state
    }

    /// Total cost of the last successful `optimize` call.
    pub fn last_cost(&self) -> Option<f64> {
        self.last_cost
    }

    /// Discard planner resources and return to `Closed`. Always legal,
    /// idempotent.
    pub fn close(&mut self) {
        self.parsed = None;
        self.validated = None;
        self.converted = None;
        self.optimizer = None;
        self.last_cost = None;
        self.transition(PlannerState::Closed);
    }

    /// Reinitialize; legal only from `Closed`.
    pub fn reset(&mut self) -> Result<()> {
        if self.state != PlannerState::Closed {
            return Err(ShardqError::InvalidLifecycleState {
                current: self.state.name().to_string(),
                required: PlannerState::Closed.name().to_string(),
            });
        }
        self.transition(PlannerState::Reset);
        Ok(())
    }

    /// Construct the search engine with the built-in trait definitions and
    /// rule set.
    pub fn ready(&mut self) -> Result<()> {
        self.ready_with(default_trait_defs(), default_rules())
    }

    /// Construct the search engine with caller-supplied trait definitions
    /// and rules. The registry is write-once; changing it means closing and
    /// re-readying the unit.
    pub fn ready_with(
        &mut self,
        trait_defs: Vec<TraitDef>,
        rules: Vec<Arc<dyn OptimizerRule>>,
    ) -> Result<()> {
        self.ensure(PlannerState::Reset)?;
        self.optimizer = Some(Optimizer::new(rules, trait_defs, (*self.config).clone()));
        self.transition(PlannerState::Ready);
        Ok(())
    }

    /// Parse SQL text into the unit's statement slot.
    pub fn parse(&mut self, sql: &str) -> Result<()> {
        self.ensure(PlannerState::Ready)?;
        let stmt = shardq_sql::parse_statement(sql)?;
        self.parsed = Some(stmt);
        self.transition(PlannerState::Parsed);
        Ok(())
    }

    /// Accept an already-parsed statement in place of SQL text.
    pub fn parse_ast(&mut self, stmt: Statement) -> Result<()> {
        self.ensure(PlannerState::Ready)?;
        self.parsed = Some(stmt);
        self.transition(PlannerState::Parsed);
        Ok(())
    }

    /// Resolve and type-check the parsed statement; returns its output row
    /// type.
    pub fn validate(&mut self) -> Result<SchemaRef> {
        self.ensure(PlannerState::Parsed)?;
        let stmt = self
            .parsed
            .take()
            .ok_or_else(|| ShardqError::Internal("parsed statement missing".to_string()))?;
        let reader = self.catalog_reader();
        let validated = Validator::new(&reader).validate(stmt)?;
        let row_type = Arc::clone(&validated.row_type);
        self.validated = Some(validated);
        self.transition(PlannerState::Validated);
        Ok(row_type)
    }

    /// Validate a caller-supplied AST, auto-advancing through `Reset` and
    /// `Ready` when needed.
    pub fn validate_ast(&mut self, stmt: Statement) -> Result<SchemaRef> {
        self.ensure(PlannerState::Ready)?;
        self.parsed = Some(stmt);
        self.transition(PlannerState::Parsed);
        self.validate()
    }

    /// Validate a statement and hand back the checked AST with its derived
    /// row type, for callers that inspect types before converting.
    pub fn validate_and_type(&mut self, stmt: Statement) -> Result<(Statement, SchemaRef)> {
        let row_type = self.validate_ast(stmt)?;
        let validated = self
            .validated
            .as_ref()
            .ok_or_else(|| ShardqError::Internal("validated statement missing".to_string()))?;
        Ok((validated.statement.clone(), row_type))
    }

    /// Run the relational converter, including decorrelation, over the
    /// validated statement.
    ///
    /// Not idempotent: the validated node is consumed and a second call
    /// fails with [`ShardqError::InvalidLifecycleState`].
    pub fn convert(&mut self) -> Result<LogicalPlan> {
        self.ensure(PlannerState::Validated)?;
        let validated = self.validated.take().ok_or_else(|| {
            ShardqError::InvalidLifecycleState {
                current: self.state.name().to_string(),
                required: PlannerState::Validated.name().to_string(),
            }
        })?;
        let reader = self.catalog_reader();
        let plan = RelationalConverter::new(&reader).convert(&validated.statement)?;
        self.converted = Some(plan.clone());
        self.transition(PlannerState::Converted);
        Ok(plan)
    }

    /// The plan produced by [`CompilationUnit::convert`], if any.
    pub fn converted(&self) -> Option<&LogicalPlan> {
        self.converted.as_ref()
    }

    /// Search for the cheapest physical plan satisfying `required`, using
    /// the rule registry installed at `ready()`.
    ///
    /// Requires a converted unit; optimizing straight from `Ready` fails
    /// with [`ShardqError::InvalidLifecycleState`].
    pub fn optimize(
        &mut self,
        plan: &LogicalPlan,
        required: &TraitSet,
    ) -> Result<Arc<PhysicalNode>> {
        self.ensure(PlannerState::Converted)?;
        let optimizer = self.optimizer.as_ref().ok_or_else(|| {
            ShardqError::InvalidLifecycleState {
                current: self.state.name().to_string(),
                required: PlannerState::Ready.name().to_string(),
            }
        })?;
        let (root, cost) = optimizer.optimize(plan, required)?;
        self.last_cost = Some(cost);
        Ok(root)
    }

    /// Optimize with a one-off rule set instead of the installed registry.
    /// Gated on `Converted` like [`CompilationUnit::optimize`].
    pub fn optimize_with(
        &mut self,
        rules: Vec<Arc<dyn OptimizerRule>>,
        plan: &LogicalPlan,
        required: &TraitSet,
    ) -> Result<Arc<PhysicalNode>> {
        self.ensure(PlannerState::Converted)?;
        let trait_defs = match &self.optimizer {
            Some(o) => o.context().trait_defs.clone(),
            None => default_trait_defs(),
        };
        let optimizer = Optimizer::new(rules, trait_defs, (*self.config).clone());
        let (root, cost) = optimizer.optimize(plan, required)?;
        self.last_cost = Some(cost);
        Ok(root)
    }

    /// Expand a view body through the recursive compile pipeline, scoped to
    /// the view's own search path.
    pub fn expand_view(&self, sql: &str, search_path: &[String]) -> Result<LogicalPlan> {
        let reader = self.catalog_reader();
        RelationalConverter::new(&reader).expand_view(sql, search_path)
    }

    fn catalog_reader(&self) -> CatalogReader {
        let search_path = self
            .config
            .default_schema
            .iter()
            .cloned()
            .collect::<Vec<_>>();
        CatalogReader::new(Arc::clone(&self.root), search_path)
    }

    /// Auto-advance to `required` through auto-creatable stages.
    fn ensure(&mut self, required: PlannerState) -> Result<()> {
        for step in auto_advance_steps(self.state, required)? {
            match step {
                PlannerState::Reset => self.reset()?,
                PlannerState::Ready => self.ready()?,
                other => {
                    return Err(ShardqError::Internal(format!(
                        "stage {} is not auto-creatable",
                        other.name()
                    )))
                }
            }
        }
        Ok(())
    }

    fn transition(&mut self, to: PlannerState) {
        tracing::debug!(unit = %self.id, from = self.state.name(), to = to.name(), "lifecycle transition");
        self.state = to;
    }
}
