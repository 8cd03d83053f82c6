//! Cost based join planning, run once per query after the default rules.
//!
//! Every join tree that is still planned as nested loops is handed to a fresh [`Memo`]:
//! [`JoinOrderBuilder`] enumerates join orders, the passes add index scans, lookup, merge,
//! hash and range heap joins, and the cheapest alternative that honours the query's hints is
//! materialized back into a plan. Queries without a join to plan only get their filtered
//! table reads turned into index accesses.

mod costed_index_scan;
mod keys;
mod passes;

use log::{debug, warn};

use crate::analyzer::{Analyzer, QueryFlag, QueryFlags, RuleSelector, Scope};
use crate::context::{Context, DISABLE_MERGE_JOIN, JOIN_HINTS};
use crate::error::OptResult;
use crate::memo::{Hint, JoinOrderBuilder, Memo};
use crate::plan::{
    inspect, transform_down_until, Expr, JoinStrategy, PlanNode, PlanNodeRef, TransformResult,
    TreeIdentity,
};

use costed_index_scan::costed_index_scans;
use passes::*;

/// Plans the joins of `node`. Nodes that are not resolved yet are left alone.
pub fn optimize_joins(
    ctx: &Context,
    a: &Analyzer,
    node: &PlanNodeRef,
    scope: &Scope,
    _sel: &RuleSelector,
    qflags: &QueryFlags,
) -> TransformResult {
    if !node.is_resolved() {
        return Ok((node.clone(), TreeIdentity::SameTree));
    }
    let is_update = matches!(node.as_ref(), PlanNode::Update { .. });
    let (planned, same) = in_order_replan(ctx, a, node, scope, qflags, is_update)?;
    if same.is_same() {
        return costed_index_scans(a.catalog(), node, scope, qflags);
    }
    Ok((planned, same))
}

/// Replans the topmost unplanned joins. Derived tables and procedures were planned by their
/// own analysis and are skipped; a trigger only has its source plan replanned.
fn in_order_replan(
    ctx: &Context,
    a: &Analyzer,
    node: &PlanNodeRef,
    scope: &Scope,
    qflags: &QueryFlags,
    is_update: bool,
) -> TransformResult {
    transform_down_until(node, &mut |n| match n.as_ref() {
        PlanNode::SubqueryAlias { .. } | PlanNode::Call { .. } | PlanNode::Procedure { .. } => {
            Ok(Some((n.clone(), TreeIdentity::SameTree)))
        }
        PlanNode::Trigger { name, child, body } => {
            let (child, same) = in_order_replan(ctx, a, child, scope, qflags, is_update)?;
            if same.is_same() {
                return Ok(Some((n.clone(), same)));
            }
            let trigger = PlanNode::Trigger {
                name: name.clone(),
                child,
                body: body.clone(),
            };
            Ok(Some((trigger.into_ref(), TreeIdentity::NewTree)))
        }
        PlanNode::Join(j) if j.strategy != JoinStrategy::NestedLoop => {
            Ok(Some((n.clone(), TreeIdentity::SameTree)))
        }
        PlanNode::Join(j) => {
            let scope = scope.with_in_join(true);
            let planned = match replan_join(ctx, a, n, &scope, qflags)? {
                Some(p) => p,
                None => return Ok(Some((n.clone(), TreeIdentity::SameTree))),
            };
            let schema = n.schema();
            let reordered = planned.schema().iter().map(|c| c.id).ne(schema.iter().map(|c| c.id));
            // updates bind their SET columns by position
            let planned = if is_update || reordered {
                PlanNode::Project {
                    exprs: schema.iter().map(Expr::col).collect(),
                    child: planned,
                }
                .into_ref()
            } else {
                planned
            };
            Ok(Some((planned, TreeIdentity::NewTree)))
        }
        _ => Ok(None),
    })
}

/// Runs the memo over one join tree. Returns `None` when the tree has a shape the join
/// planner does not handle.
fn replan_join(
    ctx: &Context,
    a: &Analyzer,
    node: &PlanNodeRef,
    scope: &Scope,
    qflags: &QueryFlags,
) -> OptResult<Option<PlanNodeRef>> {
    let mut memo = Memo::new(a.catalog(), a.coster(), a.carder());
    let limit = a.config().max_enumerated_relations;
    match JoinOrderBuilder::new(&mut memo, limit).reorder_join(node) {
        Ok(_) => {}
        Err(e) if e.is_unsupported_reorder() => {
            warn!("join planning skipped: {}", e);
            return Ok(None);
        }
        Err(e) => return Err(e),
    }
    qflags.set(QueryFlag::Join);
    memo.add_hints(join_hints(ctx, node));
    explore(&mut memo)?;

    memo.optimize_root()?;
    if a.config().debug && a.config().verbose {
        debug!("join memo:\n{}", memo.format_table());
    }
    scope.record_join_tree(memo.to_string());
    Ok(Some(memo.best_root_plan()?))
}

/// Adds every physical alternative the passes know of to a freshly reordered memo.
fn explore(memo: &mut Memo<'_>) -> OptResult<()> {
    add_index_scans(memo)?;
    convert_semi_to_inner(memo)?;
    convert_anti_to_left(memo)?;
    add_right_semi_joins(memo)?;
    add_lookup_joins(memo)?;
    if !memo.has_hint(&Hint::NoMergeJoin) {
        add_merge_joins(memo)?;
    }
    memo.card_memo_groups()?;
    add_cross_hash_joins(memo)?;
    add_hash_joins(memo)?;
    add_range_heap_joins(memo)
}

/// Hints from join comments, the `join_hints` session variable and `disable_merge_join`.
fn join_hints(ctx: &Context, node: &PlanNodeRef) -> Vec<Hint> {
    let mut hints = vec![];
    inspect(node, &mut |n| {
        match n {
            PlanNode::Join(j) if !j.comment.is_empty() => hints.extend(Hint::parse(&j.comment)),
            _ => {}
        }
        false
    });
    if let Some(text) = ctx.session_var(JOIN_HINTS) {
        hints.extend(Hint::parse(text));
    }
    if ctx.session_flag(DISABLE_MERGE_JOIN) {
        hints.push(Hint::NoMergeJoin);
    }
    hints
}
