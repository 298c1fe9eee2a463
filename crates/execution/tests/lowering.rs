//! Lowering tests: the end-to-end `compile` entry point and the
//! double-dispatch contract for partial implementors.

use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema};
use shardq_catalog::{Distribution, RootSchema, TableDef};
use shardq_common::{CompilerConfig, Result, ShardqError};
use shardq_execution::{compile, ExecNode, ExecutorBuilder, ScanExec};
use shardq_planner::{
    BinaryOp, Expr, ExecutorImplementor, LiteralValue, PhysicalNode, PlanOp, TraitSet,
};

fn root() -> Arc<RootSchema> {
    let mut root = RootSchema::new();
    root.add_table(
        "db1",
        TableDef {
            name: "events".to_string(),
            schema: Schema::new(vec![
                Field::new("event_id", DataType::Int64, false),
                Field::new("user_id", DataType::Int64, false),
            ]),
            distribution: Distribution::Sharded {
                key: "event_id".to_string(),
                shard_count: 4,
            },
            row_count: Some(1_000_000),
            view: None,
        },
    );
    root.add_table(
        "db1",
        TableDef {
            name: "users".to_string(),
            schema: Schema::new(vec![
                Field::new("user_id", DataType::Int64, false),
                Field::new("name", DataType::Utf8, true),
            ]),
            distribution: Distribution::Broadcast,
            row_count: Some(100),
            view: None,
        },
    );
    Arc::new(root)
}

fn config() -> Arc<CompilerConfig> {
    Arc::new(CompilerConfig {
        default_schema: Some("db1".to_string()),
        ..CompilerConfig::default()
    })
}

#[test]
fn compile_produces_an_executable_tree() {
    let compiled = compile(
        "SELECT event_id FROM events WHERE user_id = 3",
        root(),
        config(),
    )
    .expect("compile");
    assert!(compiled.cost.is_some());

    let ExecNode::Project(project) = &compiled.exec else {
        panic!("expected a project root, got {}", compiled.exec.name());
    };
    assert_eq!(project.schema.field(0).name(), "event_id");
    let ExecNode::Filter(filter) = project.input.as_ref() else {
        panic!("expected a filter input");
    };
    let ExecNode::Scan(scan) = filter.input.as_ref() else {
        panic!("expected a scan leaf");
    };
    assert_eq!(scan.table, "events");
    assert_eq!(scan.schema_name, "db1");
}

#[test]
fn compile_lowers_joins_with_a_build_side() {
    let compiled = compile(
        "SELECT event_id, name FROM events \
         JOIN users ON events.user_id = users.user_id",
        root(),
        config(),
    )
    .expect("compile");

    fn find_join(node: &ExecNode) -> Option<&shardq_execution::HashJoinExec> {
        if let ExecNode::HashJoin(j) = node {
            return Some(j);
        }
        node.children().into_iter().find_map(find_join)
    }
    let join = find_join(&compiled.exec).expect("a hash join somewhere in the tree");
    assert_eq!(join.on, vec![("user_id".to_string(), "user_id".to_string())]);
    // The exec schema mirrors the physical plan's row type.
    assert_eq!(
        compiled.exec.schema().fields().len(),
        compiled.physical.row_type().fields().len()
    );
}

#[test]
fn exec_schema_delegation_matches_lowered_shapes() {
    let compiled = compile(
        "SELECT user_id, COUNT(event_id) AS n FROM events GROUP BY user_id ORDER BY n DESC LIMIT 10",
        root(),
        config(),
    )
    .expect("compile");

    fn names(node: &ExecNode, out: &mut Vec<&'static str>) {
        out.push(node.name());
        for c in node.children() {
            names(c, out);
        }
    }
    let mut seen = vec![];
    names(&compiled.exec, &mut seen);
    assert!(seen.contains(&"HashAggregateExec"), "{seen:?}");
    assert!(seen.contains(&"SortExec"), "{seen:?}");
    assert!(seen.contains(&"LimitExec"), "{seen:?}");
    assert!(seen.contains(&"ExchangeExec"), "{seen:?}");
    // Sort and limit pass their input schema through unchanged.
    assert_eq!(compiled.exec.schema().field(1).name(), "n");
}

/// Implementor that only knows how to lower scans.
#[derive(Debug, Default)]
struct ScanOnly;

impl ExecutorImplementor for ScanOnly {
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
            return Err(ShardqError::Internal("not a scan".to_string()));
        };
        Ok(ExecNode::Scan(ScanExec {
            schema_name: schema_name.clone(),
            table: table.clone(),
            schema: row_type.clone(),
            distribution: distribution.clone(),
        }))
    }
}

#[test]
fn partial_implementor_rejects_unhandled_operators() {
    let scan = PhysicalNode::new(
        PlanOp::Scan {
            schema_name: "db1".to_string(),
            table: "events".to_string(),
            row_type: Arc::new(Schema::new(vec![Field::new(
                "event_id",
                DataType::Int64,
                false,
            )])),
            distribution: Distribution::Broadcast,
            row_count: Some(10),
        },
        TraitSet::distributable(),
        vec![],
    )
    .expect("scan node");

    assert!(scan.implement(&mut ScanOnly).is_ok());

    let filter = PhysicalNode::new(
        PlanOp::Filter {
            predicate: Expr::BinaryOp {
                op: BinaryOp::Eq,
                left: Box::new(Expr::Column {
                    name: "event_id".to_string(),
                    index: 0,
                    data_type: DataType::Int64,
                }),
                right: Box::new(Expr::Literal(LiteralValue::Int64(1))),
            },
        },
        TraitSet::distributable(),
        vec![scan],
    )
    .expect("filter node");

    match filter.implement(&mut ScanOnly) {
        Err(ShardqError::UnsupportedOperator(name)) => assert_eq!(name, "ShardFilter"),
        other => panic!("expected unsupported operator, got {other:?}"),
    }
}

#[test]
fn default_builder_lowers_every_operator_kind() {
    let compiled = compile(
        "SELECT event_id FROM events WHERE user_id IN \
         (SELECT user_id FROM users WHERE users.user_id = events.event_id)",
        root(),
        config(),
    )
    .expect("compile");
    // Semi joins survive lowering like any other join.
    fn has_join(node: &ExecNode) -> bool {
        matches!(node, ExecNode::HashJoin(_)) || node.children().into_iter().any(has_join)
    }
    assert!(has_join(&compiled.exec));
    let wrapped = PhysicalNode::new(
        PlanOp::Limit { n: 1 },
        TraitSet::distributable(),
        vec![Arc::clone(&compiled.physical)],
    )
    .expect("limit wrapper");
    assert!(wrapped.implement(&mut ExecutorBuilder).is_ok());
}
