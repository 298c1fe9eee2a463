use std::fmt::Display;

use crate::logical_plan::LogicalPlan;

/// Plan-serialization sink shared by logical and physical explain paths.
///
/// Protocol per node: `name`, zero or more `item`s, then either `ret` for a
/// leaf or `into_children` / recurse / `ret`. Output is deterministic and
/// line-oriented (`Name(k1=v1, k2=v2)` with two-space child indentation),
/// stable enough for golden-file assertions.
#[derive(Debug, Default)]
pub struct ExplainWriter {
    out: String,
    indent: usize,
    current: Option<(String, Vec<String>)>,
}

impl ExplainWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a node line.
    pub fn name(&mut self, name: &str) -> &mut Self {
        self.flush();
        self.current = Some((name.to_string(), vec![]));
        self
    }

    /// Append one `key=value` attribute to the current node line.
    ///
    /// Items render in call order, which must match the operator's declared
    /// attribute order.
    pub fn item(&mut self, key: &str, value: impl Display) -> &mut Self {
        if let Some((_, items)) = &mut self.current {
            items.push(format!("{key}={value}"));
        }
        self
    }

    /// Close the current line and descend one level for children.
    pub fn into_children(&mut self) -> &mut Self {
        self.flush();
        self.indent += 1;
        self
    }

    /// Ascend one level after children are written.
    pub fn ret(&mut self) -> &mut Self {
        self.flush();
        self.indent = self.indent.saturating_sub(1);
        self
    }

    /// Consume the writer and return the rendered text.
    pub fn finish(mut self) -> String {
        self.flush();
        self.out
    }

    fn flush(&mut self) {
        if let Some((name, items)) = self.current.take() {
            let pad = "  ".repeat(self.indent);
            if items.is_empty() {
                self.out.push_str(&format!("{pad}{name}\n"));
            } else {
                self.out
                    .push_str(&format!("{pad}{name}({})\n", items.join(", ")));
            }
        }
    }
}

/// Render a logical plan as human-readable multiline text.
pub fn explain_logical(plan: &LogicalPlan) -> String {
    let mut w = ExplainWriter::new();
    write_logical(plan, &mut w);
    w.finish()
}

fn write_logical(plan: &LogicalPlan, w: &mut ExplainWriter) {
    match plan {
        LogicalPlan::Scan {
            schema_name,
            table,
            distribution,
            ..
        } => {
            w.name("Scan")
                .item("table", format!("{schema_name}.{table}"))
                .item("distribution", format!("{distribution:?}"))
                .ret();
        }
        LogicalPlan::Filter { predicate, input } => {
            w.name("Filter").item("condition", predicate).into_children();
            write_logical(input, w);
            w.ret();
        }
        LogicalPlan::Project { exprs, input } => {
            w.name("Project");
            for (e, alias) in exprs {
                w.item(alias, e);
            }
            w.into_children();
            write_logical(input, w);
            w.ret();
        }
        LogicalPlan::Join {
            left,
            right,
            on,
            join_type,
        } => {
            w.name("Join")
                .item("type", join_type)
                .item("on", fmt_on(on))
                .into_children();
            write_logical(left, w);
            write_logical(right, w);
            w.ret();
        }
        LogicalPlan::Aggregate {
            group_exprs,
            aggr_exprs,
            input,
        } => {
            w.name("Aggregate").item("group", fmt_list(group_exprs));
            for (agg, alias) in aggr_exprs {
                w.item(alias, agg);
            }
            w.into_children();
            write_logical(input, w);
            w.ret();
        }
        LogicalPlan::Values { row_type, rows } => {
            w.name("Values")
                .item("columns", row_type.fields().len())
                .item("rows", rows.len())
                .ret();
        }
        LogicalPlan::Sort { keys, input } => {
            w.name("Sort").item("keys", fmt_list(keys)).into_children();
            write_logical(input, w);
            w.ret();
        }
        LogicalPlan::Limit { n, input } => {
            w.name("Limit").item("n", n).into_children();
            write_logical(input, w);
            w.ret();
        }
        LogicalPlan::InSubqueryFilter {
            input,
            expr,
            subquery,
            negated,
        } => {
            w.name("InSubqueryFilter")
                .item("expr", expr)
                .item("negated", negated)
                .into_children();
            write_logical(input, w);
            write_logical(subquery, w);
            w.ret();
        }
        LogicalPlan::ExistsSubqueryFilter {
            input,
            subquery,
            negated,
        } => {
            w.name("ExistsSubqueryFilter")
                .item("negated", negated)
                .into_children();
            write_logical(input, w);
            write_logical(subquery, w);
            w.ret();
        }
    }
}

pub(crate) fn fmt_on(on: &[(String, String)]) -> String {
    let pairs: Vec<String> = on.iter().map(|(l, r)| format!("{l}={r}")).collect();
    format!("[{}]", pairs.join(", "))
}

pub(crate) fn fmt_list<T: Display>(items: &[T]) -> String {
    let parts: Vec<String> = items.iter().map(|i| format!("{i}")).collect();
    format!("[{}]", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logical_plan::{Expr, LiteralValue};
    use arrow_schema::{DataType, Field, Schema};
    use std::sync::Arc;

    fn values_leaf() -> LogicalPlan {
        LogicalPlan::Values {
            row_type: Arc::new(Schema::new(vec![Field::new("a", DataType::Int64, true)])),
            rows: vec![vec![LiteralValue::Int64(1)]],
        }
    }

    #[test]
    fn writer_renders_nested_nodes() {
        let plan = LogicalPlan::Filter {
            predicate: Expr::Literal(LiteralValue::Boolean(true)),
            input: Box::new(values_leaf()),
        };
        let text = explain_logical(&plan);
        assert_eq!(text, "Filter(condition=true)\n  Values(columns=1, rows=1)\n");
    }

    #[test]
    fn explain_is_idempotent() {
        let plan = LogicalPlan::Limit {
            n: 3,
            input: Box::new(values_leaf()),
        };
        assert_eq!(explain_logical(&plan), explain_logical(&plan));
    }
}
