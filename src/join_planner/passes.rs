//! Memo exploration passes. Each pass walks the groups reachable from the root once and adds
//! alternatives; nothing a pass adds is revisited by that same pass.

use std::collections::BTreeSet;

use itertools::Itertools;
use log::trace;

use crate::error::OptResult;
use crate::join_planner::costed_index_scan::best_index_scan;
use crate::join_planner::keys::{
    combine_into_tuple, filter_columns, fold_constants, is_weakly_monotonic, key_exprs_for_index,
    lookup_candidate, make_index_scan, matched_filters_for_left_index, range_filters,
    right_index_matches_filters, sorted_index_scans, MergeFilter,
};
use crate::memo::{
    DistinctOp, GroupId, Index, IndexScan, JoinOp, JoinRel, Lookup, Memo, RangeHeap, RelExpr,
};
use crate::plan::{ColumnId, Expr, JoinKind, PlanNode, TableId};

/// Nested loop join alternative of `expr`, if it is one of `kinds`.
fn nested_loop_join(expr: &RelExpr, kinds: &[JoinKind]) -> Option<JoinRel> {
    match expr {
        RelExpr::Join(j) if j.op == JoinOp::NestedLoop && kinds.contains(&j.kind) => {
            Some(j.clone())
        }
        _ => None,
    }
}

fn output_exprs(m: &Memo<'_>, group: GroupId) -> OptResult<Vec<Expr>> {
    Ok(m.props(group)?.output_cols.iter().map(Expr::col).collect())
}

fn output_tables(m: &Memo<'_>, group: GroupId) -> OptResult<BTreeSet<TableId>> {
    Ok(m.props(group)?.output_tables.clone())
}

fn constant_cols(m: &Memo<'_>, group: GroupId) -> OptResult<BTreeSet<ColumnId>> {
    Ok(m.props(group)?.constants.keys().copied().collect())
}

/// Replaces filtered table reads with the cheapest static index scan.
pub(crate) fn add_index_scans(m: &mut Memo<'_>) -> OptResult<()> {
    m.dfs_rel(|m, group, expr| {
        let (child, filters) = match expr {
            RelExpr::Filter { child, filters } => (*child, filters),
            _ => return Ok(()),
        };
        let source = match m.group(child)?.first() {
            e if e.is_table() => e.source().cloned(),
            _ => None,
        };
        let source = match source {
            Some(s) => s,
            None => return Ok(()),
        };
        let (scan, residual) = match best_index_scan(m.catalog(), &source, filters)? {
            Some(best) => best,
            None => return Ok(()),
        };
        trace!("index scan {} for group {}", scan.index.def.id, group);
        if residual.is_empty() {
            m.add(group, RelExpr::IndexScan(scan))
        } else {
            let scan_group = m.memoize_leaf(RelExpr::IndexScan(scan))?;
            m.add(
                group,
                RelExpr::Filter {
                    child: scan_group,
                    filters: residual,
                },
            )
        }
    })
}

/// `a SEMI JOIN b` becomes an inner join against the distinct right columns the filter reads,
/// projected back to the left columns.
pub(crate) fn convert_semi_to_inner(m: &mut Memo<'_>) -> OptResult<()> {
    m.dfs_rel(|m, group, expr| {
        let semi = match nested_loop_join(expr, &[JoinKind::Semi]) {
            Some(j) => j,
            None => return Ok(()),
        };
        let right_tables = output_tables(m, semi.right)?;
        let mut cols = match filter_columns(&semi.filter, &right_tables) {
            Some(cols) => cols,
            None => return Ok(()),
        };
        if cols.is_empty() {
            cols.push(Expr::int(1));
        }

        let project = m.memoize_project(semi.right, cols)?;
        let right = if matches!(m.group(semi.right)?.first(), RelExpr::Distinct { .. }) {
            project
        } else {
            m.memoize_distinct(project)?
        };
        let inner = m.memoize_join(JoinKind::Inner, semi.left, right, semi.filter.clone())?;
        m.add(
            inner,
            RelExpr::Join(JoinRel::new(JoinKind::Inner, right, semi.left, semi.filter.clone())),
        )?;
        let exprs = output_exprs(m, semi.left)?;
        m.add(group, RelExpr::Project { child: inner, exprs })
    })
}

/// `a ANTI JOIN b` becomes a left join that keeps the rows where every right column the filter
/// reads came back null.
pub(crate) fn convert_anti_to_left(m: &mut Memo<'_>) -> OptResult<()> {
    m.dfs_rel(|m, group, expr| {
        let anti = match nested_loop_join(expr, &[JoinKind::Anti]) {
            Some(j) => j,
            None => return Ok(()),
        };
        // a disjunct may match with the right columns null
        if anti.filter.iter().any(|f| f.inspect(&mut |e| matches!(e, Expr::Or(..)))) {
            return Ok(());
        }
        let right_tables = output_tables(m, anti.right)?;
        let cols = match filter_columns(&anti.filter, &right_tables) {
            Some(cols) => cols,
            None => return Ok(()),
        };

        let (projections, null_checked) = if cols.is_empty() {
            let table = right_tables.iter().next().copied().unwrap_or_default();
            let placeholder = m.fresh_column(table, "__placeholder__");
            let alias = Expr::Alias {
                expr: Box::new(Expr::int(1)),
                column: placeholder.clone(),
            };
            (vec![alias], vec![Expr::col(&placeholder)])
        } else {
            (cols.clone(), cols)
        };

        let project = m.memoize_project(anti.right, projections)?;
        let left = m.memoize_join(JoinKind::Left, anti.left, project, anti.filter.clone())?;
        let nulls = null_checked.into_iter().map(|c| Expr::IsNull(Box::new(c))).collect();
        let filter = m.memoize_filter(left, nulls)?;
        let exprs = output_exprs(m, anti.left)?;
        m.add(group, RelExpr::Project { child: filter, exprs })
    })
}

/// Drives a semi join from the distinct right rows, probing a strict key index of the left
/// table.
pub(crate) fn add_right_semi_joins(m: &mut Memo<'_>) -> OptResult<()> {
    m.dfs_rel(|m, group, expr| {
        let semi = match nested_loop_join(expr, &[JoinKind::Semi]) {
            Some(j) if !j.filter.is_empty() => j,
            _ => return Ok(()),
        };
        let left_tables = output_tables(m, semi.left)?;
        let right_tables = output_tables(m, semi.right)?;
        // each left row must pin the right columns it is compared with
        let pinned = semi.filter.iter().all(|f| match f.as_equality() {
            Some((l, r, _)) => [(l, r), (r, l)].iter().any(|(c, other)| {
                matches!(c, Expr::Column(c) if right_tables.contains(&c.table))
                    && other.satisfies_refs(&left_tables)
            }),
            None => false,
        });
        if !pinned {
            return Ok(());
        }
        let candidate = match lookup_candidate(m, semi.left, false)? {
            Some(c) => c,
            None => return Ok(()),
        };
        let table = match candidate.table_id() {
            Some(t) => t,
            None => return Ok(()),
        };
        let cols = match filter_columns(&semi.filter, &right_tables) {
            Some(cols) if !cols.is_empty() => cols,
            _ => return Ok(()),
        };

        let left_props = m.props(semi.left)?.clone();
        let mut filters = semi.filter.clone();
        filters.extend(candidate.filters.iter().cloned());
        let mut distinct_right = None;
        for index in candidate.indexes() {
            if !left_props.cols_are_strict_key(&index.col_set()) {
                continue;
            }
            let (key, _) = match key_exprs_for_index(&index, table, &filters) {
                Some(k) => k,
                None => continue,
            };
            let right = match distinct_right {
                Some(g) => g,
                None => {
                    let g = m.memoize_project(semi.right, cols.clone())?;
                    let props = &mut m.group_mut(g)?.props;
                    props.distinct = DistinctOp::HashDistinct;
                    let all = props.output_cols.iter().map(|c| c.id).collect();
                    props.strict_keys.push(all);
                    distinct_right = Some(g);
                    g
                }
            };
            let lookup = Lookup {
                source: candidate.source.clone(),
                index,
                key,
            };
            let join = JoinRel::new(JoinKind::Inner, right, semi.left, semi.filter.clone())
                .with_op(JoinOp::Lookup(lookup));
            let inner = m.memoize(RelExpr::Join(join))?;
            let exprs = output_exprs(m, semi.left)?;
            m.add(group, RelExpr::Project { child: inner, exprs })?;
        }
        Ok(())
    })
}

/// Adds index lookups into the right side of inner, left and semi joins. A filter that is a
/// single OR becomes one lookup per disjunct.
pub(crate) fn add_lookup_joins(m: &mut Memo<'_>) -> OptResult<()> {
    m.dfs_rel(|m, group, expr| {
        let kinds = [JoinKind::Inner, JoinKind::Left, JoinKind::Semi];
        let join = match nested_loop_join(expr, &kinds) {
            Some(j) if !j.filter.is_empty() => j,
            _ => return Ok(()),
        };
        let right = match lookup_candidate(m, join.right, false)? {
            Some(c) => c,
            None => return Ok(()),
        };
        let table = match right.table_id() {
            Some(t) => t,
            None => return Ok(()),
        };
        let indexes = right.indexes();
        let constants = m.props(join.left)?.constants.clone();

        if let [disjunction @ Expr::Or(..)] = join.filter.as_slice() {
            let mut lookups = vec![];
            for disjunct in disjunction.split_disjunction() {
                let mut filters = disjunct.split_conjunction();
                filters.extend(right.filters.iter().cloned());
                let found = indexes.iter().find_map(|index| {
                    key_exprs_for_index(index, table, &filters).map(|(key, _)| (index, key))
                });
                match found {
                    Some((index, key)) => lookups.push(Lookup {
                        source: right.source.clone(),
                        index: index.clone(),
                        key: fold_constants(key, &constants),
                    }),
                    None => return Ok(()),
                }
            }
            return m.add(group, RelExpr::Join(join.with_op(JoinOp::ConcatLookup(lookups))));
        }

        let mut filters = join.filter.clone();
        filters.extend(right.filters.iter().cloned());
        for index in indexes {
            let (key, _) = match key_exprs_for_index(&index, table, &filters) {
                Some(k) => k,
                None => continue,
            };
            let lookup = Lookup {
                source: right.source.clone(),
                index,
                key: fold_constants(key, &constants),
            };
            m.add(group, RelExpr::Join(join.with_op(JoinOp::Lookup(lookup))))?;
        }
        Ok(())
    })
}

/// Adds merge joins over pairs of ordered indexes that return both sides sorted on the join's
/// equality columns.
pub(crate) fn add_merge_joins(m: &mut Memo<'_>) -> OptResult<()> {
    m.dfs_rel(|m, group, expr| {
        let join = match nested_loop_join(expr, &[JoinKind::Inner, JoinKind::Left]) {
            Some(j) if !j.filter.is_empty() => j,
            _ => return Ok(()),
        };
        let (left, right) = match (
            lookup_candidate(m, join.left, true)?,
            lookup_candidate(m, join.right, true)?,
        ) {
            (Some(l), Some(r)) => (l, r),
            _ => return Ok(()),
        };
        let left_tables = output_tables(m, join.left)?;
        let right_tables = output_tables(m, join.right)?;

        let mut eligible = vec![];
        for (pos, f) in join.filter.iter().enumerate() {
            let (l, r, _) = match f.as_equality() {
                Some(eq) => eq,
                None => continue,
            };
            let sortable = |e: &Expr| e.references_one_column() && is_weakly_monotonic(e);
            if !(sortable(l) && sortable(r)) {
                continue;
            }
            let filter = if l.satisfies_refs(&left_tables) && r.satisfies_refs(&right_tables) {
                f.clone()
            } else if l.satisfies_refs(&right_tables) && r.satisfies_refs(&left_tables) {
                match f.swap_equality() {
                    Some(swapped) => swapped,
                    None => continue,
                }
            } else {
                continue;
            };
            eligible.push(MergeFilter { filter, pos });
        }
        if eligible.is_empty() {
            return Ok(());
        }

        let left_constants = constant_cols(m, join.left)?;
        let right_constants = constant_cols(m, join.right)?;
        for left_index in left.indexes().iter().filter(|i| i.is_ordered()) {
            let mut matched =
                matched_filters_for_left_index(left_index, &left_constants, &eligible);
            while !matched.is_empty() {
                let (left_col, right_col) = match (matched[0].left_col(), matched[0].right_col()) {
                    (Some(l), Some(r)) => (l, r),
                    _ => break,
                };
                for right_index in right.indexes().iter().filter(|i| i.is_ordered()) {
                    if !right_index_matches_filters(right_index, &right_constants, &matched) {
                        continue;
                    }
                    let left_scan =
                        make_index_scan(m, &left.source, left_index, left_col, &left.filters)?;
                    let right_scan =
                        make_index_scan(m, &right.source, right_index, right_col, &right.filters)?;
                    let (left_scan, right_scan) = match (left_scan, right_scan) {
                        (Some(l), Some(r)) => (l, r),
                        _ => continue,
                    };

                    let compare = match matched.as_slice() {
                        [single] => single.filter.clone(),
                        several => combine_into_tuple(several),
                    };
                    let used: BTreeSet<usize> = matched.iter().map(|f| f.pos).collect();
                    let mut filter = vec![compare];
                    filter.extend(
                        join.filter
                            .iter()
                            .enumerate()
                            .filter(|(i, _)| !used.contains(i))
                            .map(|(_, f)| f.clone()),
                    );
                    let merge = JoinRel {
                        left: strip_distinct(m, join.left, left_index)?,
                        right: strip_distinct(m, join.right, right_index)?,
                        filter,
                        ..join.with_op(JoinOp::Merge { left_scan, right_scan })
                    };
                    m.add(group, RelExpr::Join(merge))?;
                }
                matched.pop();
            }
        }
        Ok(())
    })
}

/// The input of a `Distinct` group when `index` is a strict key of it, otherwise `group`.
fn strip_distinct(m: &Memo<'_>, group: GroupId, index: &Index) -> OptResult<GroupId> {
    if !index.is_unique() {
        return Ok(group);
    }
    match m.group(group)?.original() {
        RelExpr::Distinct { child } if m.props(*child)?.cols_are_strict_key(&index.col_set()) => {
            Ok(*child)
        }
        _ => Ok(group),
    }
}

/// Hash joins for filterless cross joins over derived tables, so the derived table is
/// materialized once.
pub(crate) fn add_cross_hash_joins(m: &mut Memo<'_>) -> OptResult<()> {
    m.dfs_rel(|m, group, expr| {
        let join = match nested_loop_join(expr, &[JoinKind::Cross]) {
            Some(j) if j.filter.is_empty() => j,
            _ => return Ok(()),
        };
        let reads_derived = m
            .props(group)?
            .table_nodes
            .iter()
            .any(|n| matches!(n.as_ref(), PlanNode::SubqueryAlias { .. }));
        if !reads_derived {
            return Ok(());
        }
        let op = JoinOp::Hash {
            left_keys: vec![],
            right_keys: vec![],
        };
        m.add(group, RelExpr::Join(join.with_op(op)))
    })
}

/// Hash joins for inner and left joins whose filter is made of equalities between the sides.
pub(crate) fn add_hash_joins(m: &mut Memo<'_>) -> OptResult<()> {
    m.dfs_rel(|m, group, expr| {
        let join = match nested_loop_join(expr, &[JoinKind::Inner, JoinKind::Left]) {
            Some(j) if !j.filter.is_empty() => j,
            _ => return Ok(()),
        };
        if m
            .group(join.right)?
            .exprs
            .iter()
            .any(|e| matches!(e, RelExpr::RecursiveTable { .. }))
        {
            return Ok(());
        }
        let left_tables = output_tables(m, join.left)?;
        let right_tables = output_tables(m, join.right)?;

        let mut left_keys = vec![];
        let mut right_keys = vec![];
        for f in &join.filter {
            match f.as_equality() {
                Some((l, r, false))
                    if l.satisfies_refs(&left_tables) && r.satisfies_refs(&right_tables) =>
                {
                    left_keys.push(l.clone());
                    right_keys.push(r.clone());
                }
                Some((l, r, false))
                    if l.satisfies_refs(&right_tables) && r.satisfies_refs(&left_tables) =>
                {
                    left_keys.push(r.clone());
                    right_keys.push(l.clone());
                }
                _ => return Ok(()),
            }
        }
        m.add(group, RelExpr::Join(join.with_op(JoinOp::Hash { left_keys, right_keys })))
    })
}

/// Range heap joins for filters of the form `right.min < left.value < right.max`.
pub(crate) fn add_range_heap_joins(m: &mut Memo<'_>) -> OptResult<()> {
    m.dfs_rel(|m, group, expr| {
        let join = match nested_loop_join(expr, &[JoinKind::Inner, JoinKind::Left]) {
            Some(j) if !j.filter.is_empty() => j,
            _ => return Ok(()),
        };
        if !matches!(
            m.group(join.right)?.first(),
            RelExpr::TableScan { .. } | RelExpr::TableAlias { .. } | RelExpr::SubqueryAlias { .. }
        ) {
            return Ok(());
        }
        let left_tables = output_tables(m, join.left)?;
        let right_tables = output_tables(m, join.right)?;

        for range in range_filters(&join.filter) {
            let (value, min) = match (&range.value, &range.min, &range.max) {
                (Expr::Column(v), Expr::Column(lo), Expr::Column(_)) => (v, lo),
                _ => continue,
            };
            let sides_match = range.value.satisfies_refs(&left_tables)
                && range.min.satisfies_refs(&right_tables)
                && range.max.satisfies_refs(&right_tables);
            if !sides_match {
                continue;
            }

            let value_scans = sorted_scans(m, join.left, value.id)?;
            let min_scans = sorted_scans(m, join.right, min.id)?;
            for (value_scan, min_scan) in value_scans.iter().cartesian_product(min_scans.iter()) {
                let heap = RangeHeap {
                    value: range.value.clone(),
                    min: range.min.clone(),
                    max: range.max.clone(),
                    closed_min: range.closed_min,
                    closed_max: range.closed_max,
                    value_scan: value_scan.clone(),
                    min_scan: min_scan.clone(),
                };
                m.add(group, RelExpr::Join(join.with_op(JoinOp::RangeHeap(Box::new(heap)))))?;
            }
        }
        Ok(())
    })
}

/// Index scans returning `group` sorted on `col`, or a single `None` when the side must be
/// sorted instead.
fn sorted_scans(m: &Memo<'_>, group: GroupId, col: ColumnId) -> OptResult<Vec<Option<IndexScan>>> {
    let scans = match lookup_candidate(m, group, true)? {
        Some(candidate) => sorted_index_scans(m, &candidate, col, &constant_cols(m, group)?)?,
        None => vec![],
    };
    if scans.is_empty() {
        return Ok(vec![None]);
    }
    Ok(scans.into_iter().map(Some).collect())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::*;
    use crate::catalog::{ColumnDef, IndexDef, IndexOrder, InMemoryCatalog, Table};
    use crate::cost::{DefaultCarder, DefaultCoster};
    use crate::memo::{Hint, HintOp};
    use crate::plan::{
        projected_column, BinaryOp, IndexAccess, IndexedTableAccess, JoinNode, JoinStrategy,
        Literal, PlanNodeRef, TableNode,
    };

    fn table(name: &str, id: u32, indexes: &[(&str, &[&str], bool)]) -> PlanNodeRef {
        let mut t = Table::new(
            "db",
            name,
            vec![
                ColumnDef::new("id", false),
                ColumnDef::new("x", false),
                ColumnDef::new("y", true),
            ],
        );
        for (idx, cols, unique) in indexes {
            t = t.with_index(IndexDef::new(*idx, cols, *unique, IndexOrder::Ordered));
        }
        PlanNode::ResolvedTable(TableNode::bind(Arc::new(t), id, id * 10)).into_ref()
    }

    fn col(node: &PlanNodeRef, name: &str) -> Expr {
        let c = node.table_node().and_then(|t| t.column(name)).cloned();
        Expr::Column(c.expect("column exists"))
    }

    fn joined(
        m: &mut Memo<'_>,
        kind: JoinKind,
        left: &PlanNodeRef,
        right: &PlanNodeRef,
        filter: Vec<Expr>,
    ) -> GroupId {
        let l = m.memoize_leaf(RelExpr::TableScan { source: left.clone() }).unwrap();
        let r = m.memoize_leaf(RelExpr::TableScan { source: right.clone() }).unwrap();
        let j = m.memoize_join(kind, l, r, filter).unwrap();
        m.set_root(j);
        j
    }

    fn ops(m: &Memo<'_>, group: GroupId) -> Vec<&'static str> {
        m.group(group)
            .unwrap()
            .exprs
            .iter()
            .filter_map(|e| e.as_join().map(|j| j.op.name()))
            .collect()
    }

    #[test]
    fn test_lookup_join_uses_right_primary_key() {
        let catalog = InMemoryCatalog::new();
        let a = table("a", 1, &[]);
        let b = table("b", 2, &[("primary", &["id"], true)]);
        let mut m = Memo::new(&catalog, &DefaultCoster, &DefaultCarder);
        let filter = vec![Expr::eq(col(&a, "x"), col(&b, "id"))];
        let root = joined(&mut m, JoinKind::Inner, &a, &b, filter);

        add_lookup_joins(&mut m).unwrap();
        let lookup = m.group(root).unwrap().exprs.iter().find_map(|e| match e {
            RelExpr::Join(JoinRel {
                op: JoinOp::Lookup(l), ..
            }) => Some(l.clone()),
            _ => None,
        });
        let lookup = lookup.expect("lookup alternative");
        assert_eq!(lookup.key.keys, vec![col(&a, "x")]);
        assert!(lookup.is_unique_seek());
    }

    #[test]
    fn test_concat_lookup_needs_every_disjunct() {
        let catalog = InMemoryCatalog::new();
        let a = table("a", 1, &[]);
        let b = table("b", 2, &[("primary", &["id"], true), ("bx", &["x"], false)]);
        let mut m = Memo::new(&catalog, &DefaultCoster, &DefaultCarder);
        let covered = Expr::or(
            Expr::eq(col(&a, "x"), col(&b, "id")),
            Expr::eq(col(&a, "y"), col(&b, "x")),
        );
        let root = joined(&mut m, JoinKind::Inner, &a, &b, vec![covered]);
        add_lookup_joins(&mut m).unwrap();
        assert_eq!(ops(&m, root), vec!["concatlookup", "nestedloop"]);

        let mut m = Memo::new(&catalog, &DefaultCoster, &DefaultCarder);
        let uncovered = Expr::or(
            Expr::eq(col(&a, "x"), col(&b, "id")),
            Expr::eq(col(&a, "y"), col(&b, "y")),
        );
        let root = joined(&mut m, JoinKind::Inner, &a, &b, vec![uncovered]);
        add_lookup_joins(&mut m).unwrap();
        assert_eq!(ops(&m, root), vec!["nestedloop"]);
    }

    #[test]
    fn test_hash_join_requires_plain_equalities() {
        let catalog = InMemoryCatalog::new();
        let a = table("a", 1, &[]);
        let b = table("b", 2, &[]);
        let mut m = Memo::new(&catalog, &DefaultCoster, &DefaultCarder);
        let filter = vec![Expr::eq(col(&b, "x"), col(&a, "x"))];
        let root = joined(&mut m, JoinKind::Inner, &a, &b, filter);
        add_hash_joins(&mut m).unwrap();
        let hash = m.group(root).unwrap().first().as_join().cloned().unwrap();
        assert_eq!(
            hash.op,
            JoinOp::Hash {
                left_keys: vec![col(&a, "x")],
                right_keys: vec![col(&b, "x")],
            }
        );

        let mut m = Memo::new(&catalog, &DefaultCoster, &DefaultCarder);
        let null_safe = Expr::binary(BinaryOp::NullSafeEq, col(&a, "x"), col(&b, "x"));
        let root = joined(&mut m, JoinKind::Inner, &a, &b, vec![null_safe]);
        add_hash_joins(&mut m).unwrap();
        assert_eq!(ops(&m, root), vec!["nestedloop"]);
    }

    #[test]
    fn test_merge_join_over_ordered_indexes() {
        let catalog = InMemoryCatalog::new();
        let a = table("a", 1, &[("ax", &["x"], false)]);
        let b = table("b", 2, &[("by", &["y"], false)]);
        let mut m = Memo::new(&catalog, &DefaultCoster, &DefaultCarder);
        let filter = vec![Expr::eq(col(&b, "y"), col(&a, "x"))];
        let root = joined(&mut m, JoinKind::Inner, &a, &b, filter);
        add_merge_joins(&mut m).unwrap();
        let merge = m.group(root).unwrap().first().as_join().cloned().unwrap();
        assert_eq!(merge.filter, vec![Expr::eq(col(&a, "x"), col(&b, "y"))]);
        match merge.op {
            JoinOp::Merge { left_scan, right_scan } => {
                assert_eq!(left_scan.index.def.id, "ax");
                assert_eq!(right_scan.index.def.id, "by");
            }
            other => panic!("expected merge, got {}", other.name()),
        }
    }

    #[test]
    fn test_semi_join_gets_inner_alternative() {
        let catalog = InMemoryCatalog::new();
        let a = table("a", 1, &[]);
        let b = table("b", 2, &[]);
        let mut m = Memo::new(&catalog, &DefaultCoster, &DefaultCarder);
        let filter = vec![Expr::eq(col(&a, "x"), col(&b, "x"))];
        let root = joined(&mut m, JoinKind::Semi, &a, &b, filter);
        convert_semi_to_inner(&mut m).unwrap();

        let project = m.group(root).unwrap().first().clone();
        let inner = match project {
            RelExpr::Project { child, exprs } => {
                assert_eq!(exprs.len(), 3);
                child
            }
            other => panic!("expected project, got {other}"),
        };
        let kinds: Vec<JoinKind> = m
            .group(inner)
            .unwrap()
            .exprs
            .iter()
            .filter_map(|e| e.as_join().map(|j| j.kind))
            .collect();
        assert_eq!(kinds, vec![JoinKind::Inner, JoinKind::Inner]);
    }

    #[test]
    fn test_anti_join_without_right_columns_uses_placeholder() {
        let catalog = InMemoryCatalog::new();
        let a = table("a", 1, &[]);
        let b = table("b", 2, &[]);
        let mut m = Memo::new(&catalog, &DefaultCoster, &DefaultCarder);
        let filter = vec![Expr::eq(col(&a, "x"), Expr::int(1))];
        let root = joined(&mut m, JoinKind::Anti, &a, &b, filter);
        convert_anti_to_left(&mut m).unwrap();

        let filter = match m.group(root).unwrap().first() {
            RelExpr::Project { child, .. } => *child,
            other => panic!("expected project, got {other}"),
        };
        match m.group(filter).unwrap().first() {
            RelExpr::Filter { filters, .. } => {
                let placeholder = match &filters[..] {
                    [Expr::IsNull(c)] => {
                        matches!(c.as_ref(), Expr::Column(c) if c.name == "__placeholder__")
                    }
                    _ => false,
                };
                assert!(placeholder, "unexpected filters {filters:?}");
            }
            other => panic!("expected filter, got {other}"),
        }
    }

    #[test]
    fn test_range_heap_sorts_sides_without_indexes() {
        let catalog = InMemoryCatalog::new();
        let a = table("a", 1, &[]);
        let b = table("b", 2, &[("bx", &["x"], false)]);
        let mut m = Memo::new(&catalog, &DefaultCoster, &DefaultCarder);
        let filter = vec![
            Expr::binary(BinaryOp::LtEq, col(&b, "x"), col(&a, "id")),
            Expr::binary(BinaryOp::Lt, col(&a, "id"), col(&b, "y")),
        ];
        let root = joined(&mut m, JoinKind::Inner, &a, &b, filter);
        add_range_heap_joins(&mut m).unwrap();
        match &m.group(root).unwrap().first().as_join().unwrap().op {
            JoinOp::RangeHeap(heap) => {
                assert!(heap.value_scan.is_none());
                assert_eq!(heap.min_scan.as_ref().map(|s| s.index.def.id.as_str()), Some("bx"));
                assert!(heap.closed_min && !heap.closed_max);
            }
            other => panic!("expected range heap, got {}", other.name()),
        }
    }

    #[test]
    fn test_lookup_keeps_filters_absorbed_by_an_index_scan() {
        let catalog = InMemoryCatalog::new();
        let a = table("a", 1, &[]);
        let b = table("b", 2, &[("bx", &["x"], false), ("by", &["y"], false)]);
        let pinned = Expr::eq(col(&b, "y"), Expr::int(7));
        let mut m = Memo::new(&catalog, &DefaultCoster, &DefaultCarder);
        let la = m.memoize_leaf(RelExpr::TableScan { source: a.clone() }).unwrap();
        let lb = m.memoize_leaf(RelExpr::TableScan { source: b.clone() }).unwrap();
        let fb = m.memoize_filter(lb, vec![pinned.clone()]).unwrap();
        let root = m
            .memoize_join(JoinKind::Inner, la, fb, vec![Expr::eq(col(&a, "x"), col(&b, "x"))])
            .unwrap();
        m.set_root(root);
        m.add_hints(vec![Hint::JoinOp {
            op: HintOp::Lookup,
            left: "a".to_string(),
            right: "b".to_string(),
        }]);

        add_index_scans(&mut m).unwrap();
        add_lookup_joins(&mut m).unwrap();
        m.optimize_root().unwrap();
        assert!(matches!(m.group(fb).unwrap().best_expr(), Some(RelExpr::IndexScan(_))));

        let plan = m.best_root_plan().unwrap();
        let join = match plan.as_ref() {
            PlanNode::Join(j) => j,
            other => panic!("expected a join, got {}", other.describe()),
        };
        assert_eq!(join.strategy, JoinStrategy::Lookup);
        match join.right.as_ref() {
            PlanNode::Filter { predicate, child } => {
                assert_eq!(predicate, &pinned);
                assert!(matches!(
                    child.as_ref(),
                    PlanNode::IndexedTableAccess(IndexedTableAccess {
                        access: IndexAccess::Lookup(_),
                        ..
                    })
                ));
            }
            other => panic!("lookup side lost its filter: {}", other.describe()),
        }
    }

    type Row = BTreeMap<ColumnId, Option<i64>>;

    fn value(e: &Expr, row: &Row) -> Option<i64> {
        match e {
            Expr::Column(c) => row[&c.id],
            Expr::Alias { expr, .. } => value(expr, row),
            Expr::Literal(Literal::Int(i)) => Some(*i),
            Expr::Literal(Literal::Null) => None,
            other => panic!("cannot evaluate {other}"),
        }
    }

    fn truth(e: &Expr, row: &Row) -> Option<bool> {
        match e {
            Expr::Binary {
                op: BinaryOp::Eq,
                left,
                right,
            } => match (value(left, row), value(right, row)) {
                (Some(l), Some(r)) => Some(l == r),
                _ => None,
            },
            Expr::And(l, r) => match (truth(l, row), truth(r, row)) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            Expr::IsNull(e) => Some(value(e, row).is_none()),
            Expr::Literal(Literal::Bool(b)) => Some(*b),
            other => panic!("cannot evaluate {other}"),
        }
    }

    /// Nested loop evaluation of a materialized plan. The physical join strategy is ignored.
    fn eval(node: &PlanNodeRef, tables: &BTreeMap<TableId, Vec<Row>>) -> Vec<Row> {
        match node.as_ref() {
            PlanNode::ResolvedTable(t) => tables[&t.id].clone(),
            PlanNode::Filter { predicate, child } => eval(child, tables)
                .into_iter()
                .filter(|r| truth(predicate, r) == Some(true))
                .collect(),
            PlanNode::Project { exprs, child } => eval(child, tables)
                .into_iter()
                .map(|r| exprs.iter().map(|e| (projected_column(e).id, value(e, &r))).collect())
                .collect(),
            PlanNode::Distinct { child } => eval(child, tables).into_iter().unique().collect(),
            PlanNode::Sort { child, .. } => eval(child, tables),
            PlanNode::Join(j) => {
                let (left, right) = (eval(&j.left, tables), eval(&j.right, tables));
                let predicate = Expr::join_and(j.filter.iter().cloned());
                let merged = |l: &Row, r: &Row| {
                    let mut row = l.clone();
                    row.extend(r.iter().map(|(k, v)| (*k, *v)));
                    row
                };
                let matches = |l: &Row, r: &Row| {
                    predicate
                        .as_ref()
                        .map_or(true, |p| truth(p, &merged(l, r)) == Some(true))
                };
                match j.kind {
                    JoinKind::Inner | JoinKind::Cross => left
                        .iter()
                        .flat_map(|l| {
                            right
                                .iter()
                                .filter(|r| matches(l, r))
                                .map(|r| merged(l, r))
                                .collect_vec()
                        })
                        .collect(),
                    JoinKind::Semi => {
                        left.into_iter().filter(|l| right.iter().any(|r| matches(l, r))).collect()
                    }
                    JoinKind::Anti => {
                        left.into_iter().filter(|l| !right.iter().any(|r| matches(l, r))).collect()
                    }
                    JoinKind::Left => {
                        let nulls: Row = j.right.schema().iter().map(|c| (c.id, None)).collect();
                        let mut out = vec![];
                        for l in &left {
                            let found = right
                                .iter()
                                .filter(|r| matches(l, r))
                                .map(|r| merged(l, r))
                                .collect_vec();
                            if found.is_empty() {
                                out.push(merged(l, &nulls));
                            } else {
                                out.extend(found);
                            }
                        }
                        out
                    }
                    other => panic!("cannot evaluate {other} join"),
                }
            }
            other => panic!("cannot evaluate {}", other.describe()),
        }
    }

    fn rows(table: &PlanNodeRef, data: &[[Option<i64>; 3]]) -> Vec<Row> {
        let ids = table.schema().iter().map(|c| c.id).collect_vec();
        data.iter()
            .map(|values| ids.iter().copied().zip(values.iter().copied()).collect())
            .collect()
    }

    /// Sorted output rows of `plan`, restricted to `cols`.
    fn output(
        plan: &PlanNodeRef,
        tables: &BTreeMap<TableId, Vec<Row>>,
        cols: &[ColumnId],
    ) -> Vec<Vec<Option<i64>>> {
        eval(plan, tables)
            .into_iter()
            .map(|r| cols.iter().map(|c| r[c]).collect_vec())
            .sorted()
            .collect()
    }

    /// Every alternative of every group must return the rows of the unplanned join.
    fn assert_alternatives_agree(
        kind: JoinKind,
        filter: impl Fn(&PlanNodeRef, &PlanNodeRef) -> Vec<Expr>,
    ) {
        let catalog = InMemoryCatalog::new();
        let a = table("a", 1, &[]);
        let b = table("b", 2, &[]);
        let mut tables = BTreeMap::new();
        tables.insert(
            TableId(1),
            rows(
                &a,
                &[
                    [Some(1), Some(1), None],
                    [Some(2), Some(2), Some(5)],
                    [Some(3), None, Some(5)],
                    [Some(4), Some(2), None],
                    [Some(5), Some(7), Some(1)],
                    [Some(5), Some(7), Some(1)],
                ],
            ),
        );
        tables.insert(
            TableId(2),
            rows(
                &b,
                &[
                    [Some(1), Some(2), None],
                    [Some(2), Some(2), Some(5)],
                    [Some(3), None, Some(1)],
                    [Some(4), Some(9), Some(5)],
                    [Some(5), Some(7), Some(1)],
                ],
            ),
        );
        let filter = filter(&a, &b);
        let unplanned =
            PlanNode::Join(JoinNode::new(kind, a.clone(), b.clone(), filter.clone())).into_ref();
        let cols = a.schema().iter().map(|c| c.id).collect_vec();
        let expected = output(&unplanned, &tables, &cols);

        let mut m = Memo::new(&catalog, &DefaultCoster, &DefaultCarder);
        joined(&mut m, kind, &a, &b, filter);
        convert_semi_to_inner(&mut m).unwrap();
        convert_anti_to_left(&mut m).unwrap();
        m.card_memo_groups().unwrap();
        add_hash_joins(&mut m).unwrap();
        m.optimize_root().unwrap();

        let mut checked = 0;
        for g in 0..m.groups().len() {
            let saved = m.group(g).unwrap().best;
            for i in 0..m.group(g).unwrap().exprs.len() {
                m.group_mut(g).unwrap().best = Some(i);
                let plan = m.best_root_plan().unwrap();
                assert_eq!(output(&plan, &tables, &cols), expected, "group {g} alternative {i}");
                checked += 1;
            }
            m.group_mut(g).unwrap().best = saved;
        }
        assert!(checked > 3, "only {checked} alternatives");
    }

    #[test]
    fn test_semi_join_rewrites_return_the_same_rows() {
        assert_alternatives_agree(JoinKind::Semi, |a, b| vec![Expr::eq(col(a, "x"), col(b, "x"))]);
        assert_alternatives_agree(JoinKind::Semi, |a, b| {
            vec![Expr::eq(col(a, "x"), col(b, "x")), Expr::eq(col(a, "y"), col(b, "y"))]
        });
        assert_alternatives_agree(JoinKind::Semi, |a, _| vec![Expr::eq(col(a, "x"), Expr::int(2))]);
    }

    #[test]
    fn test_anti_join_rewrites_return_the_same_rows() {
        assert_alternatives_agree(JoinKind::Anti, |a, b| vec![Expr::eq(col(a, "x"), col(b, "x"))]);
        assert_alternatives_agree(JoinKind::Anti, |a, b| {
            vec![Expr::eq(col(a, "x"), col(b, "x")), Expr::eq(col(a, "y"), col(b, "y"))]
        });
        assert_alternatives_agree(JoinKind::Anti, |a, _| vec![Expr::eq(col(a, "x"), Expr::int(2))]);
    }
}
