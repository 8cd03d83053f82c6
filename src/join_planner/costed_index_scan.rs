use crate::analyzer::{QueryFlag, QueryFlags, Scope};
use crate::catalog::{Catalog, ColumnRange};
use crate::cost::DEFAULT_TABLE_ROWS;
use crate::error::OptResult;
use crate::memo::{index_ranges, index_statistic, Index, IndexScan};
use crate::plan::{
    transform_up, Expr, IndexAccess, IndexedTableAccess, PlanNode, PlanNodeRef, TransformResult,
    TreeIdentity,
};

const POINT_SELECTIVITY: f64 = 0.1;
const RANGE_SELECTIVITY: f64 = 0.3;

/// Cheapest static index scan serving `filters` over `source`, with the filters it does not
/// absorb.
pub(crate) fn best_index_scan(
    catalog: &dyn Catalog,
    source: &PlanNodeRef,
    filters: &[Expr],
) -> OptResult<Option<(IndexScan, Vec<Expr>)>> {
    let table = match source.table_node() {
        Some(t) => t,
        None => return Ok(None),
    };
    let table_rows = catalog
        .row_count(&table.database, &table.name)?
        .map_or(DEFAULT_TABLE_ROWS, |r| r as f64);

    let mut best: Option<(f64, IndexScan, Vec<Expr>)> = None;
    for index in Index::for_table(table) {
        let (ranges, used) = match index_ranges(&index, filters) {
            Some(r) => r,
            None => continue,
        };
        let stats = index_statistic(catalog, source, &index)?;
        let scan = IndexScan {
            source: source.clone(),
            index,
            ranges,
            stats,
        };
        let rows = estimated_rows(&scan, table_rows);
        if best.as_ref().map_or(true, |(r, ..)| rows < *r) {
            let residual = filters.iter().filter(|f| !used.contains(f)).cloned().collect();
            best = Some((rows, scan, residual));
        }
    }
    Ok(best.map(|(_, scan, residual)| (scan, residual)))
}

fn estimated_rows(scan: &IndexScan, table_rows: f64) -> f64 {
    if scan.is_point() {
        if scan.index.is_unique() {
            return 1.0;
        }
        if let Some(stat) = &scan.stats {
            return stat.rows_per_key();
        }
    }
    let points = scan.ranges.iter().filter(|r| r.is_point()).count();
    let mut rows = table_rows * POINT_SELECTIVITY.powi(points as i32);
    if scan.ranges.iter().any(|r| matches!(r, ColumnRange::Range { .. })) {
        rows *= RANGE_SELECTIVITY;
    }
    rows.max(1.0)
}

/// Turns filters directly over a table into static index accesses, for plans without a join to
/// reorder. A unique point read marks the query as returning at most one row, unless the plan
/// is part of a join or the query has joins or subqueries elsewhere.
pub(crate) fn costed_index_scans(
    catalog: &dyn Catalog,
    node: &PlanNodeRef,
    scope: &Scope,
    qflags: &QueryFlags,
) -> TransformResult {
    transform_up(node, &mut |n| {
        let (predicate, child) = match n.as_ref() {
            PlanNode::Filter { predicate, child } => (predicate, child),
            _ => return Ok((n.clone(), TreeIdentity::SameTree)),
        };
        let reads_table = match child.as_ref() {
            PlanNode::ResolvedTable(_) => true,
            PlanNode::TableAlias { child, .. } => {
                matches!(child.as_ref(), PlanNode::ResolvedTable(_))
            }
            _ => false,
        };
        if !reads_table {
            return Ok((n.clone(), TreeIdentity::SameTree));
        }

        let filters = predicate.split_conjunction();
        let (scan, residual) = match best_index_scan(catalog, child, &filters)? {
            Some(best) => best,
            None => return Ok((n.clone(), TreeIdentity::SameTree)),
        };
        if scan.index.is_unique()
            && scan.is_point()
            && !scope.in_join()
            && !qflags.is_set(QueryFlag::Join)
            && !qflags.is_set(QueryFlag::Subquery)
        {
            qflags.set(QueryFlag::Max1Row);
        }

        let access = PlanNode::IndexedTableAccess(IndexedTableAccess {
            source: child.clone(),
            index: scan.index.def.clone(),
            access: IndexAccess::Static(scan.ranges),
        })
        .into_ref();
        let out = match Expr::join_and(residual) {
            Some(predicate) => PlanNode::Filter {
                predicate,
                child: access,
            }
            .into_ref(),
            None => access,
        };
        Ok((out, TreeIdentity::NewTree))
    })
}
