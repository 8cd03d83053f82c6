#![allow(dead_code)]

use std::sync::Arc;

use query_analyzer::analyzer::{Analyzer, AnalyzerBuilder, QueryFlags, Scope};
use query_analyzer::catalog::{ColumnDef, IndexDef, IndexOrder, InMemoryCatalog, Table};
use query_analyzer::context::Context;
use query_analyzer::plan::{
    inspect, Expr, IndexAccess, IndexedTableAccess, JoinNode, PlanNode, PlanNodeRef, TableNode,
};

/// `a(id, v)` with a primary key, and `b(id, a_id, w)` with a primary key and an index on
/// `a_id`.
pub fn catalog() -> InMemoryCatalog {
    let mut catalog = InMemoryCatalog::new();
    catalog.add_table(
        Table::new("db", "a", vec![ColumnDef::new("id", false), ColumnDef::new("v", true)])
            .with_index(IndexDef::new("primary", &["id"], true, IndexOrder::Ordered)),
    );
    catalog.add_table(
        Table::new(
            "db",
            "b",
            vec![
                ColumnDef::new("id", false),
                ColumnDef::new("a_id", false),
                ColumnDef::new("w", true),
            ],
        )
        .with_index(IndexDef::new("primary", &["id"], true, IndexOrder::Ordered))
        .with_index(IndexDef::new("b_a_id", &["a_id"], false, IndexOrder::Ordered)),
    );
    catalog
}

/// Binds `name` from `catalog` as relation `id`.
pub fn scan(catalog: &InMemoryCatalog, name: &str, id: u32) -> PlanNodeRef {
    use query_analyzer::catalog::Catalog;
    let table = catalog.table_schema("db", "", name).expect("table exists");
    PlanNode::ResolvedTable(TableNode::bind(table, id, id * 100)).into_ref()
}

pub fn col(node: &PlanNodeRef, name: &str) -> Expr {
    let column = node.table_node().and_then(|t| t.column(name)).cloned();
    Expr::Column(column.expect("column exists"))
}

pub fn join(j: JoinNode) -> PlanNodeRef {
    PlanNode::Join(j).into_ref()
}

pub fn analyzer(catalog: InMemoryCatalog) -> Analyzer {
    AnalyzerBuilder::new(Arc::new(catalog)).build().expect("valid analyzer")
}

/// Runs the full analysis, returning the plan and the memos the join planner recorded.
pub fn analyze(
    analyzer: &Analyzer,
    ctx: &Context,
    plan: &PlanNodeRef,
) -> (PlanNodeRef, Vec<String>) {
    let scope = Scope::new();
    let out = analyzer
        .analyze(ctx, plan, &scope, &QueryFlags::new())
        .unwrap_or_else(|f| panic!("analysis failed: {}", f.error));
    (out, scope.join_trees())
}

pub fn joins(plan: &PlanNodeRef) -> Vec<JoinNode> {
    let mut out = vec![];
    inspect(plan, &mut |n| {
        if let PlanNode::Join(j) = n {
            out.push(j.clone());
        }
        false
    });
    out
}

pub fn lookups(plan: &PlanNodeRef) -> Vec<IndexedTableAccess> {
    let mut out = vec![];
    inspect(plan, &mut |n| {
        if let PlanNode::IndexedTableAccess(ita) = n {
            if matches!(ita.access, IndexAccess::Lookup(_)) {
                out.push(ita.clone());
            }
        }
        false
    });
    out
}
