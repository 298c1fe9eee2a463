//! End-to-end compilation scenarios through the lifecycle state machine.

use std::sync::Arc;

use arrow_schema::{DataType, Field, Fields, Schema};
use shardq_catalog::{Distribution, RootSchema, TableDef, ViewDef};
use shardq_common::{CompilerConfig, ShardqError};
use shardq_planner::{CompilationUnit, JoinType, LogicalPlan, PlannerState, TraitSet};

fn root() -> Arc<RootSchema> {
    let mut root = RootSchema::new();
    root.add_table(
        "db1",
        TableDef {
            name: "orders".to_string(),
            schema: Schema::new(vec![
                Field::new("order_id", DataType::Int64, false),
                Field::new("customer_id", DataType::Int64, false),
                Field::new("amount", DataType::Float64, true),
            ]),
            distribution: Distribution::Sharded {
                key: "order_id".to_string(),
                shard_count: 8,
            },
            row_count: Some(5_000_000),
            view: None,
        },
    );
    root.add_table(
        "db1",
        TableDef {
            name: "customers".to_string(),
            schema: Schema::new(vec![
                Field::new("customer_id", DataType::Int64, false),
                Field::new("region", DataType::Utf8, true),
                Field::new(
                    "addr",
                    DataType::Struct(Fields::from(vec![
                        Field::new("city", DataType::Utf8, true),
                        Field::new("zip", DataType::Utf8, true),
                    ])),
                    true,
                ),
            ]),
            distribution: Distribution::Broadcast,
            row_count: Some(2_000),
            view: None,
        },
    );
    root.add_table(
        "db1",
        TableDef {
            name: "big_orders".to_string(),
            schema: Schema::new(vec![Field::new("order_id", DataType::Int64, false)]),
            distribution: Distribution::Singleton,
            row_count: None,
            view: Some(ViewDef {
                sql: "SELECT order_id FROM orders WHERE amount > 100.0".to_string(),
                search_path: vec!["db1".to_string()],
            }),
        },
    );
    Arc::new(root)
}

fn unit() -> CompilationUnit {
    let config = CompilerConfig {
        default_schema: Some("db1".to_string()),
        ..CompilerConfig::default()
    };
    CompilationUnit::new(root(), Arc::new(config))
}

#[test]
fn full_pipeline_produces_distributable_plan() {
    let mut unit = unit();
    unit.parse("SELECT order_id FROM orders WHERE customer_id = 7")
        .expect("parse");
    let row_type = unit.validate().expect("validate");
    assert_eq!(row_type.fields().len(), 1);
    assert_eq!(row_type.field(0).name(), "order_id");
    assert_eq!(row_type.field(0).data_type(), &DataType::Int64);

    let plan = unit.convert().expect("convert");
    assert_eq!(unit.state(), PlannerState::Converted);

    let physical = unit
        .optimize(&plan, &TraitSet::distributable())
        .expect("optimize");
    let text = physical.explain_to_string();
    assert!(text.contains("ShardProject"), "{text}");
    assert!(text.contains("ShardFilter"), "{text}");
    assert!(text.contains("ShardScan"), "{text}");
    assert!(unit.last_cost().is_some());
    assert_eq!(physical.row_type().field(0).name(), "order_id");
}

#[test]
fn physical_explain_is_deterministic() {
    let mut unit = unit();
    unit.parse("SELECT region, COUNT(customer_id) AS n FROM customers GROUP BY region")
        .expect("parse");
    unit.validate().expect("validate");
    let plan = unit.convert().expect("convert");
    let a = unit
        .optimize(&plan, &TraitSet::distributable())
        .expect("first");
    let b = unit
        .optimize(&plan, &TraitSet::distributable())
        .expect("second");
    assert_eq!(a.explain_to_string(), b.explain_to_string());
}

#[test]
fn correlated_in_subquery_leaves_no_outer_refs() {
    let mut unit = unit();
    unit.parse(
        "SELECT order_id FROM orders WHERE customer_id IN \
         (SELECT customer_id FROM customers WHERE customers.customer_id = orders.order_id)",
    )
    .expect("parse");
    unit.validate().expect("validate");
    let plan = unit.convert().expect("convert");
    assert!(!plan.has_outer_refs());
    assert!(!plan.has_subquery_filters());

    fn semi_join(plan: &LogicalPlan) -> bool {
        if let LogicalPlan::Join { join_type, .. } = plan {
            if *join_type == JoinType::LeftSemi {
                return true;
            }
        }
        plan.children().iter().any(|c| semi_join(c))
    }
    assert!(semi_join(&plan));

    // The decorrelated plan optimizes end to end.
    unit.optimize(&plan, &TraitSet::distributable())
        .expect("optimize");
}

#[test]
fn struct_columns_are_flattened_at_scan() {
    let mut unit = unit();
    unit.parse("SELECT addr.city FROM customers").expect("parse");
    let row_type = unit.validate().expect("validate");
    assert_eq!(row_type.field(0).name(), "addr.city");
    assert_eq!(row_type.field(0).data_type(), &DataType::Utf8);

    let plan = unit.convert().expect("convert");
    fn scan_is_flat(plan: &LogicalPlan) -> bool {
        if let LogicalPlan::Scan { row_type, .. } = plan {
            return row_type
                .fields()
                .iter()
                .all(|f| !matches!(f.data_type(), DataType::Struct(_)));
        }
        plan.children().iter().all(|c| scan_is_flat(c))
    }
    assert!(scan_is_flat(&plan));
}

#[test]
fn view_expands_through_the_pipeline() {
    let mut unit = unit();
    unit.parse("SELECT order_id FROM big_orders LIMIT 5")
        .expect("parse");
    unit.validate().expect("validate");
    let plan = unit.convert().expect("convert");

    fn scanned_tables(plan: &LogicalPlan, out: &mut Vec<String>) {
        if let LogicalPlan::Scan { table, .. } = plan {
            out.push(table.clone());
        }
        for c in plan.children() {
            scanned_tables(c, out);
        }
    }
    let mut tables = vec![];
    scanned_tables(&plan, &mut tables);
    assert_eq!(tables, vec!["orders".to_string()]);

    unit.optimize(&plan, &TraitSet::distributable())
        .expect("optimize");
}

#[test]
fn join_compiles_with_broadcast_of_small_side() {
    let mut unit = unit();
    unit.parse(
        "SELECT order_id, region FROM orders \
         JOIN customers ON orders.customer_id = customers.customer_id",
    )
    .expect("parse");
    unit.validate().expect("validate");
    let plan = unit.convert().expect("convert");
    let physical = unit
        .optimize(&plan, &TraitSet::distributable())
        .expect("optimize");
    let text = physical.explain_to_string();
    assert!(text.contains("ShardJoin"), "{text}");
    assert!(text.contains("broadcast"), "{text}");
}

#[test]
fn local_convention_yields_no_physical_plan() {
    let mut unit = unit();
    unit.parse("SELECT order_id FROM orders").expect("parse");
    unit.validate().expect("validate");
    let plan = unit.convert().expect("convert");
    match unit.optimize(&plan, &TraitSet::local()) {
        Err(ShardqError::NoPhysicalPlanFound { message, .. }) => {
            assert!(message.contains("local"), "{message}");
        }
        other => panic!("expected no physical plan, got {other:?}"),
    }
}

#[test]
fn validation_failures_are_user_errors() {
    let mut unit = unit();
    unit.parse("SELECT no_such_column FROM orders").expect("parse");
    let err = unit.validate().expect_err("must fail");
    assert!(err.is_user_error());
    assert!(matches!(err, ShardqError::Validation { .. }));
}
