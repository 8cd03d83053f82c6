mod common;

use common::*;
use query_analyzer::analyzer::{QueryFlags, Scope};
use query_analyzer::context::Context;
use query_analyzer::error::AnalyzerError;
use query_analyzer::plan::{
    inspect_expressions, ColumnId, ColumnRef, Expr, JoinKind, JoinNode, PlanNode, PlanNodeRef,
    Subquery, TableId,
};

fn nested_derived_tables(levels: u32) -> PlanNodeRef {
    let mut plan = PlanNode::UnresolvedTable {
        database: "db".to_string(),
        name: "missing".to_string(),
    }
    .into_ref();
    for level in 0..levels {
        plan = PlanNode::SubqueryAlias {
            name: format!("dt{level}"),
            id: TableId(1000 + level),
            columns: vec![],
            child: plan,
            lateral: false,
        }
        .into_ref();
    }
    plan
}

#[test]
fn test_deeply_nested_subqueries_hit_recursion_limit() {
    let analyzer = analyzer(catalog());
    let plan = nested_derived_tables(101);
    let failure = analyzer
        .analyze(&Context::new("select"), &plan, &Scope::new(), &QueryFlags::new())
        .unwrap_err();
    match failure.error {
        AnalyzerError::RecursionLimit { depth, limit } => {
            assert_eq!(depth, 101);
            assert_eq!(limit, 100);
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn test_nesting_at_the_limit_reaches_validation() {
    let analyzer = analyzer(catalog());
    let plan = nested_derived_tables(100);
    let failure = analyzer
        .analyze(&Context::new("select"), &plan, &Scope::new(), &QueryFlags::new())
        .unwrap_err();
    assert!(
        matches!(failure.error, AnalyzerError::UnresolvedNode(_)),
        "unexpected error {}",
        failure.error
    );
}

#[test]
fn test_external_procedure_call_resolves() {
    let mut catalog = catalog();
    catalog.add_external_procedure("memory_stats", 1);
    let plan = PlanNode::Call {
        name: "memory_stats".to_string(),
        args: vec![Expr::int(1)],
        procedure: None,
        external: false,
    }
    .into_ref();

    let (out, trees) = analyze(&analyzer(catalog), &Context::new("call memory_stats(1)"), &plan);
    assert!(trees.is_empty());
    assert!(matches!(out.as_ref(), PlanNode::Call { external: true, .. }));
}

#[test]
fn test_unknown_procedure_is_reported_with_arity() {
    let plan = PlanNode::Call {
        name: "nope".to_string(),
        args: vec![Expr::int(1), Expr::int(2)],
        procedure: None,
        external: false,
    }
    .into_ref();
    let failure = analyzer(catalog())
        .analyze(&Context::new("call nope(1, 2)"), &plan, &Scope::new(), &QueryFlags::new())
        .unwrap_err();
    match failure.error {
        AnalyzerError::ProcedureNotFound { name, arity } => {
            assert_eq!(name, "nope");
            assert_eq!(arity, 2);
        }
        other => panic!("unexpected error {other}"),
    }
}

/// Correlated columns of every expression subquery in `plan`.
fn correlations(plan: &PlanNodeRef) -> Vec<Vec<ColumnId>> {
    let mut out = vec![];
    inspect_expressions(plan, &mut |e| {
        if let Expr::Subquery(sq) = e {
            out.push(sq.correlated.clone());
        }
        false
    });
    out
}

fn id_of(node: &PlanNodeRef, name: &str) -> ColumnId {
    match col(node, name) {
        Expr::Column(c) => c.id,
        other => panic!("not a column: {other}"),
    }
}

#[test]
fn test_subquery_reading_outer_row_is_correlated() {
    let catalog = catalog();
    let a = scan(&catalog, "a", 1);
    let b = scan(&catalog, "b", 2);
    // select * from a where a.v = (select b.w from b where b.a_id = a.id)
    let subquery = PlanNode::Project {
        exprs: vec![col(&b, "w")],
        child: PlanNode::Filter {
            predicate: Expr::eq(col(&b, "a_id"), col(&a, "id")),
            child: b.clone(),
        }
        .into_ref(),
    }
    .into_ref();
    let plan = PlanNode::Filter {
        predicate: Expr::eq(
            col(&a, "v"),
            Expr::Subquery(Subquery {
                plan: subquery,
                correlated: vec![],
            }),
        ),
        child: a.clone(),
    }
    .into_ref();

    let (out, _) = analyze(&analyzer(catalog), &Context::new("select"), &plan);
    assert_eq!(correlations(&out), vec![vec![id_of(&a, "id")]]);
}

#[test]
fn test_lateral_derived_table_sees_left_columns() {
    let catalog = catalog();
    let a = scan(&catalog, "a", 1);
    let b = scan(&catalog, "b", 2);
    // select * from a, lateral (select * from b where b.w = (select a.v)) dt
    let inner = PlanNode::Filter {
        predicate: Expr::eq(
            col(&b, "w"),
            Expr::Subquery(Subquery {
                plan: PlanNode::Project {
                    exprs: vec![col(&a, "v")],
                    child: PlanNode::Values {
                        rows: vec![vec![Expr::int(1)]],
                    }
                    .into_ref(),
                }
                .into_ref(),
                correlated: vec![],
            }),
        ),
        child: b.clone(),
    }
    .into_ref();
    let derived = PlanNode::SubqueryAlias {
        name: "dt".to_string(),
        id: TableId(50),
        columns: vec![
            ColumnRef::new(500, 50, "id", false),
            ColumnRef::new(501, 50, "a_id", false),
            ColumnRef::new(502, 50, "w", true),
        ],
        child: inner,
        lateral: true,
    }
    .into_ref();
    let join = JoinNode::new(JoinKind::LateralCross, a.clone(), derived, vec![]);
    let plan = PlanNode::Join(join).into_ref();

    let (out, _) = analyze(&analyzer(catalog), &Context::new("select"), &plan);
    assert_eq!(correlations(&out), vec![vec![id_of(&a, "v")]]);
}

#[test]
fn test_subquery_may_not_modify_data() {
    let catalog = catalog();
    let a = scan(&catalog, "a", 1);
    let b = scan(&catalog, "b", 2);
    let plan = PlanNode::Filter {
        predicate: Expr::IsNotNull(Box::new(Expr::Subquery(Subquery {
            plan: PlanNode::Delete { child: b }.into_ref(),
            correlated: vec![],
        }))),
        child: a,
    }
    .into_ref();

    let failure = analyzer(catalog)
        .analyze(&Context::new("select"), &plan, &Scope::new(), &QueryFlags::new())
        .unwrap_err();
    match failure.error {
        AnalyzerError::Validation(message) => assert!(message.contains("read-only"), "{message}"),
        other => panic!("unexpected error {other}"),
    }
}
