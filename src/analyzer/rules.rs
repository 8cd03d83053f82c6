//! Built-in rules that drive the batch sequence end to end.
//!
//! Rules that re-enter the analyzer (subqueries, unions, triggers, procedures) stop their own
//! walk at the node they hand to the nested analysis, so every subtree is analyzed by exactly one
//! level and the recursion depth grows by one per nesting level.

use std::collections::BTreeSet;
use std::sync::Arc;

use log::debug;

use crate::analyzer::{
    nested_result, Analyzer, QueryFlag, QueryFlags, RuleSelector, Scope, DEFAULT_RULES, ONCE_AFTER,
};
use crate::context::Context;
use crate::error::{AnalyzerError, OptResult};
use crate::plan::{
    inspect, inspect_expressions, transform_children, transform_up, ColumnId, Expr, JoinKind,
    JoinNode, JoinStrategy, PlanNode, PlanNodeRef, Subquery, TableId, TransformResult,
    TreeIdentity,
};

fn same(node: &PlanNodeRef) -> TransformResult {
    Ok((node.clone(), TreeIdentity::SameTree))
}

pub fn flag_query_shape(
    _ctx: &Context,
    _a: &Analyzer,
    node: &PlanNodeRef,
    _scope: &Scope,
    _sel: &RuleSelector,
    qflags: &QueryFlags,
) -> TransformResult {
    inspect(node, &mut |n| {
        let flag = match n {
            PlanNode::GroupBy { .. } => Some(QueryFlag::Aggregation),
            PlanNode::InsertInto { .. } => Some(QueryFlag::Insert),
            PlanNode::Update { .. } => Some(QueryFlag::Update),
            PlanNode::Delete { .. } => Some(QueryFlag::Delete),
            PlanNode::Join(_) => Some(QueryFlag::Join),
            PlanNode::SubqueryAlias { .. } => Some(QueryFlag::Subquery),
            PlanNode::SetOp { .. } => Some(QueryFlag::Union),
            PlanNode::Sort { .. } | PlanNode::TopN { .. } => Some(QueryFlag::Sort),
            PlanNode::Limit { .. } => Some(QueryFlag::Limit),
            PlanNode::Trigger { .. } => Some(QueryFlag::Trigger),
            PlanNode::Call { .. } | PlanNode::Procedure { .. } => Some(QueryFlag::Procedure),
            PlanNode::Transaction(_) => Some(QueryFlag::Transaction),
            _ => None,
        };
        if let Some(flag) = flag {
            qflags.set(flag);
        }
        false
    });
    if inspect_expressions(node, &mut |e| matches!(e, Expr::Subquery(_))) {
        qflags.set(QueryFlag::Subquery);
    }
    same(node)
}

/// Binds `CALL` statements to procedures from the scope cache, then to external procedures.
pub fn resolve_procedure_calls(
    _ctx: &Context,
    a: &Analyzer,
    node: &PlanNodeRef,
    scope: &Scope,
    _sel: &RuleSelector,
    _qflags: &QueryFlags,
) -> TransformResult {
    transform_up(node, &mut |n| match n.as_ref() {
        PlanNode::Call {
            name,
            args,
            procedure: None,
            external: false,
        } => {
            if let Some(p) = scope.procedures().and_then(|c| c.get(name, args.len())) {
                return Ok((
                    PlanNode::Call {
                        name: name.clone(),
                        args: args.clone(),
                        procedure: Some(p),
                        external: false,
                    }
                    .into_ref(),
                    TreeIdentity::NewTree,
                ));
            }
            match a.catalog().external_stored_procedure(name, args.len())? {
                Some(_) => Ok((
                    PlanNode::Call {
                        name: name.clone(),
                        args: args.clone(),
                        procedure: None,
                        external: true,
                    }
                    .into_ref(),
                    TreeIdentity::NewTree,
                )),
                None => Err(AnalyzerError::ProcedureNotFound {
                    name: name.clone(),
                    arity: args.len(),
                }),
            }
        }
        _ => same(n),
    })
}

fn output_tables(node: &PlanNode) -> BTreeSet<TableId> {
    node.schema().iter().map(|c| c.table).collect()
}

fn filter_over(conjuncts: Vec<Expr>, child: PlanNodeRef) -> PlanNodeRef {
    match Expr::join_and(conjuncts) {
        Some(predicate) => PlanNode::Filter { predicate, child }.into_ref(),
        None => child,
    }
}

/// Moves conjuncts of a filter above a join to the side that provides all their columns, or into
/// the join condition when they need both sides.
pub fn pushdown_filters(
    _ctx: &Context,
    _a: &Analyzer,
    node: &PlanNodeRef,
    _scope: &Scope,
    _sel: &RuleSelector,
    _qflags: &QueryFlags,
) -> TransformResult {
    transform_up(node, &mut |n| {
        let (predicate, join) = match n.as_ref() {
            PlanNode::Filter { predicate, child } => match child.as_ref() {
                PlanNode::Join(j) if j.strategy == JoinStrategy::NestedLoop => (predicate, j),
                _ => return same(n),
            },
            _ => return same(n),
        };

        let to_left = matches!(
            join.kind,
            JoinKind::Inner | JoinKind::Cross | JoinKind::Left | JoinKind::Semi | JoinKind::Anti
        );
        let inner = matches!(join.kind, JoinKind::Inner | JoinKind::Cross);
        let left_tables = output_tables(&join.left);
        let right_tables = output_tables(&join.right);
        let both: BTreeSet<TableId> = left_tables.union(&right_tables).copied().collect();

        let (mut left, mut right, mut on, mut kept) = (vec![], vec![], vec![], vec![]);
        for conjunct in predicate.split_conjunction() {
            let tables = conjunct.table_ids();
            let has_subquery = conjunct.inspect(&mut |e| matches!(e, Expr::Subquery(_)));
            if tables.is_empty() || has_subquery {
                kept.push(conjunct);
            } else if to_left && conjunct.satisfies_refs(&left_tables) {
                left.push(conjunct);
            } else if inner && conjunct.satisfies_refs(&right_tables) {
                right.push(conjunct);
            } else if inner && conjunct.satisfies_refs(&both) {
                on.push(conjunct);
            } else {
                kept.push(conjunct);
            }
        }

        if left.is_empty() && right.is_empty() && on.is_empty() {
            return same(n);
        }
        debug!(
            "pushing {} filters below {} join",
            left.len() + right.len() + on.len(),
            join.kind
        );

        let mut filter = join.filter.clone();
        filter.append(&mut on);
        let kind = if join.kind == JoinKind::Cross && !filter.is_empty() {
            JoinKind::Inner
        } else {
            join.kind
        };
        let new_join = PlanNode::Join(JoinNode {
            kind,
            left: filter_over(left, join.left.clone()),
            right: filter_over(right, join.right.clone()),
            filter,
            strategy: join.strategy.clone(),
            comment: join.comment.clone(),
        })
        .into_ref();
        Ok((filter_over(kept, new_join), TreeIdentity::NewTree))
    })
}

/// Rewrites the subqueries inside `node`'s own expressions with `f`.
fn rewrite_subquery_exprs<F>(node: &PlanNodeRef, f: &mut F) -> TransformResult
where
    F: FnMut(&Subquery) -> OptResult<Option<Subquery>>,
{
    let exprs = node.expressions();
    if !exprs
        .iter()
        .any(|e| e.inspect(&mut |e| matches!(e, Expr::Subquery(_))))
    {
        return same(node);
    }

    let mut identity = TreeIdentity::SameTree;
    let mut rewritten = Vec::with_capacity(exprs.len());
    for e in exprs {
        let (ne, s) = e.transform_up(&mut |e| match e {
            Expr::Subquery(sq) => Ok(f(sq)?.map(Expr::Subquery)),
            _ => Ok(None),
        })?;
        identity = identity.and(s);
        rewritten.push(ne);
    }
    if identity.is_same() {
        same(node)
    } else {
        Ok((node.with_expressions(rewritten)?.into_ref(), TreeIdentity::NewTree))
    }
}

/// Outer columns `plan` reads: the columns of `scope`'s enclosing nodes referenced by its
/// expressions.
fn correlated_columns(plan: &PlanNodeRef, scope: &Scope) -> Vec<ColumnId> {
    let outer: BTreeSet<ColumnId> = scope.outer_schema().iter().map(|c| c.id).collect();
    let mut found = BTreeSet::new();
    inspect_expressions(plan, &mut |e| {
        if let Expr::Column(c) = e {
            if outer.contains(&c.id) {
                found.insert(c.id);
            }
        }
        false
    });
    found.into_iter().collect()
}

/// Scope the children of `node` are analyzed in. Below a join every subtree is inside a
/// join; the right side of a lateral join hangs off the join itself so that it can read the
/// left side's columns.
fn child_scope(scope: &Scope, node: &PlanNodeRef, child: &PlanNodeRef) -> Scope {
    match node.as_ref() {
        PlanNode::Join(j) if j.kind.is_lateral() && Arc::ptr_eq(child, &j.right) => {
            scope.nested(node).with_in_join(true).with_in_lateral(true)
        }
        PlanNode::Join(_) => scope.with_in_join(true),
        _ => scope.clone(),
    }
}

/// Scope a derived table is analyzed in. The right side of a lateral join already got its
/// level from [`child_scope`].
fn derived_table_scope(scope: &Scope, node: &PlanNodeRef) -> Scope {
    if scope.in_lateral() {
        scope.with_in_lateral(false)
    } else {
        scope.nested(node)
    }
}

/// Analyzes unresolved derived tables and expression subqueries through `default-rules`, and
/// records which outer columns each expression subquery reads. Expression subqueries may not
/// modify data.
pub fn resolve_subqueries(
    ctx: &Context,
    a: &Analyzer,
    node: &PlanNodeRef,
    scope: &Scope,
    sel: &RuleSelector,
    qflags: &QueryFlags,
) -> TransformResult {
    if let PlanNode::SubqueryAlias { child, .. } = node.as_ref() {
        if child.is_resolved() {
            return same(node);
        }
        let analyzed = nested_result(a.analyze_through_batch(
            ctx,
            child,
            &derived_table_scope(scope, node),
            DEFAULT_RULES,
            sel,
            qflags,
        ))?;
        if analyzed == *child {
            return same(node);
        }
        return Ok((node.with_children(vec![analyzed])?.into_ref(), TreeIdentity::NewTree));
    }

    let (with_children, s1) = transform_children(node, &mut |c| {
        resolve_subqueries(ctx, a, c, &child_scope(scope, node, c), sel, qflags)
    })?;
    let outer = scope.nested(&with_children).with_read_only();
    let (rewritten, s2) = rewrite_subquery_exprs(&with_children, &mut |sq| {
        let plan = if sq.plan.is_resolved() {
            sq.plan.clone()
        } else {
            let analyzed =
                a.analyze_through_batch(ctx, &sq.plan, &outer, DEFAULT_RULES, sel, qflags);
            nested_result(analyzed)?
        };
        let correlated = correlated_columns(&plan, &outer);
        if plan == sq.plan && correlated == sq.correlated {
            return Ok(None);
        }
        Ok(Some(Subquery { plan, correlated }))
    })?;
    Ok((rewritten, s1.and(s2)))
}

/// Analyzes the unresolved sides of set operations through `default-rules`.
pub fn resolve_unions(
    ctx: &Context,
    a: &Analyzer,
    node: &PlanNodeRef,
    scope: &Scope,
    sel: &RuleSelector,
    qflags: &QueryFlags,
) -> TransformResult {
    match node.as_ref() {
        PlanNode::SetOp { left, right, .. } => {
            let inner = scope.nested(node);
            let mut identity = TreeIdentity::SameTree;
            let mut sides = Vec::with_capacity(2);
            for side in [left, right] {
                if side.is_resolved() {
                    sides.push(side.clone());
                    continue;
                }
                let analyzed = nested_result(
                    a.analyze_through_batch(ctx, side, &inner, DEFAULT_RULES, sel, qflags),
                )?;
                if analyzed != *side {
                    identity = TreeIdentity::NewTree;
                }
                sides.push(analyzed);
            }
            if identity.is_same() {
                same(node)
            } else {
                Ok((node.with_children(sides)?.into_ref(), identity))
            }
        }
        PlanNode::SubqueryAlias { .. } => same(node),
        _ => transform_children(node, &mut |c| resolve_unions(ctx, a, c, scope, sel, qflags)),
    }
}

/// Analyzes trigger bodies from `default-rules` onward, with the triggering rows in scope.
pub fn analyze_triggers(
    ctx: &Context,
    a: &Analyzer,
    node: &PlanNodeRef,
    scope: &Scope,
    sel: &RuleSelector,
    qflags: &QueryFlags,
) -> TransformResult {
    match node.as_ref() {
        PlanNode::Trigger { name, child, body } => {
            let (child_out, s1) = analyze_triggers(ctx, a, child, scope, sel, qflags)?;
            debug!("analyzing body of trigger {}", name);
            let body_out = nested_result(a.analyze_starting_at_batch(
                ctx,
                body,
                &scope.nested(node),
                DEFAULT_RULES,
                sel,
                qflags,
            ))?;
            if s1.is_same() && body_out == *body {
                return same(node);
            }
            Ok((
                PlanNode::Trigger {
                    name: name.clone(),
                    child: child_out,
                    body: body_out,
                }
                .into_ref(),
                TreeIdentity::NewTree,
            ))
        }
        PlanNode::SubqueryAlias { .. } | PlanNode::Procedure { .. } | PlanNode::Call { .. } => {
            same(node)
        }
        _ => transform_children(node, &mut |c| analyze_triggers(ctx, a, c, scope, sel, qflags)),
    }
}

/// Analyzes the statements of called procedures through `once-after`, sharing the procedure
/// cache. A procedure already being analyzed further up the scope is left alone.
pub fn analyze_procedures(
    ctx: &Context,
    a: &Analyzer,
    node: &PlanNodeRef,
    scope: &Scope,
    sel: &RuleSelector,
    qflags: &QueryFlags,
) -> TransformResult {
    match node.as_ref() {
        PlanNode::Call {
            name,
            args,
            procedure: Some(procedure),
            external,
        } => {
            let recursive = scope.encloses(&mut |n| {
                matches!(n, PlanNode::Call { name: outer, .. } if outer.eq_ignore_ascii_case(name))
            });
            if recursive {
                return same(node);
            }
            let body_scope = match scope.procedures() {
                Some(cache) => scope.nested(node).with_procedures(cache.clone()),
                None => scope.nested(node),
            };

            let mut identity = TreeIdentity::SameTree;
            let mut body = vec![];
            for statement in procedure.children() {
                let analyzed = nested_result(a.analyze_through_batch(
                    ctx,
                    &statement,
                    &body_scope,
                    ONCE_AFTER,
                    sel,
                    qflags,
                ))?;
                if analyzed != statement {
                    identity = TreeIdentity::NewTree;
                }
                body.push(analyzed);
            }
            if identity.is_same() {
                return same(node);
            }
            Ok((
                PlanNode::Call {
                    name: name.clone(),
                    args: args.clone(),
                    procedure: Some(procedure.with_children(body)?.into_ref()),
                    external: *external,
                }
                .into_ref(),
                TreeIdentity::NewTree,
            ))
        }
        PlanNode::SubqueryAlias { .. } | PlanNode::Trigger { .. } => same(node),
        _ => transform_children(node, &mut |c| analyze_procedures(ctx, a, c, scope, sel, qflags)),
    }
}

pub fn validate_resolved(
    _ctx: &Context,
    _a: &Analyzer,
    node: &PlanNodeRef,
    scope: &Scope,
    _sel: &RuleSelector,
    _qflags: &QueryFlags,
) -> TransformResult {
    if scope.enforce_read_only()
        && inspect(node, &mut |n| {
            matches!(
                n,
                PlanNode::InsertInto { .. } | PlanNode::Update { .. } | PlanNode::Delete { .. }
            )
        })
    {
        return Err(AnalyzerError::Validation(
            "cannot modify data in a read-only context".to_string(),
        ));
    }

    if node.is_resolved() {
        return same(node);
    }
    let mut culprit = None;
    inspect(node, &mut |n| {
        let own_unresolved = matches!(n, PlanNode::UnresolvedTable { .. })
            || matches!(n, PlanNode::Call { procedure: None, external: false, .. })
            || n.expressions().iter().any(|e| !e.is_resolved());
        if own_unresolved {
            culprit = Some(n.describe());
        }
        own_unresolved
    });
    Err(AnalyzerError::UnresolvedNode(
        culprit.unwrap_or_else(|| node.describe()),
    ))
}

/// Runs the remaining batches over every derived table and expression subquery, innermost
/// first. The nested analyses do not finalize their own subqueries again.
pub fn finalize_subqueries(
    ctx: &Context,
    a: &Analyzer,
    node: &PlanNodeRef,
    scope: &Scope,
    sel: &RuleSelector,
    qflags: &QueryFlags,
) -> TransformResult {
    let finalize_sel = sel.finalize_subquery();
    finalize_rec(ctx, a, node, scope, &finalize_sel, qflags)
}

fn finalize_rec(
    ctx: &Context,
    a: &Analyzer,
    node: &PlanNodeRef,
    scope: &Scope,
    sel: &RuleSelector,
    qflags: &QueryFlags,
) -> TransformResult {
    match node.as_ref() {
        PlanNode::SubqueryAlias { child, .. } => {
            let inner = derived_table_scope(scope, node);
            let (finalized_inner, s) = finalize_rec(ctx, a, child, &inner, sel, qflags)?;
            let analyzed = nested_result(a.analyze_starting_at_batch(
                ctx,
                &finalized_inner,
                &inner,
                DEFAULT_RULES,
                sel,
                qflags,
            ))?;
            if s.is_same() && analyzed == *child {
                return same(node);
            }
            Ok((node.with_children(vec![analyzed])?.into_ref(), TreeIdentity::NewTree))
        }
        PlanNode::Trigger { name, child, body } => {
            let (child_out, s) = finalize_rec(ctx, a, child, scope, sel, qflags)?;
            if s.is_same() {
                return same(node);
            }
            Ok((
                PlanNode::Trigger {
                    name: name.clone(),
                    child: child_out,
                    body: body.clone(),
                }
                .into_ref(),
                TreeIdentity::NewTree,
            ))
        }
        PlanNode::Call { .. } | PlanNode::Procedure { .. } => same(node),
        _ => {
            let (with_children, s1) = transform_children(node, &mut |c| {
                finalize_rec(ctx, a, c, &child_scope(scope, node, c), sel, qflags)
            })?;
            let outer = scope.nested(&with_children).with_read_only();
            let (rewritten, s2) = rewrite_subquery_exprs(&with_children, &mut |sq| {
                let (inner, _) = finalize_rec(ctx, a, &sq.plan, &outer, sel, qflags)?;
                let analyzed = nested_result(a.analyze_starting_at_batch(
                    ctx,
                    &inner,
                    &outer,
                    DEFAULT_RULES,
                    sel,
                    qflags,
                ))?;
                let correlated = correlated_columns(&analyzed, &outer);
                if analyzed == sq.plan && correlated == sq.correlated {
                    return Ok(None);
                }
                Ok(Some(Subquery {
                    plan: analyzed,
                    correlated,
                }))
            })?;
            Ok((rewritten, s1.and(s2)))
        }
    }
}
