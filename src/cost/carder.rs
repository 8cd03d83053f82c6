use crate::catalog::ColumnRange;
use crate::error::OptResult;
use crate::memo::{GroupId, JoinOp, Memo, RelExpr};
use crate::plan::{Expr, JoinKind, Literal, PlanNode};

/// Rows assumed for relations without statistics.
pub const DEFAULT_TABLE_ROWS: f64 = 1000.0;
const EQ_SELECTIVITY: f64 = 0.1;
const RANGE_SELECTIVITY: f64 = 0.3;
const OTHER_SELECTIVITY: f64 = 0.5;

/// Row count estimates for memo groups.
pub trait Carder: Send + Sync {
    /// Estimated rows of `group`, from its original alternative. Child cardinalities are
    /// available through [`Memo::card`].
    fn card_group(&self, memo: &Memo<'_>, group: GroupId) -> OptResult<f64>;
}

#[derive(Copy, Clone, Debug, Default)]
pub struct DefaultCarder;

impl Carder for DefaultCarder {
    fn card_group(&self, memo: &Memo<'_>, group: GroupId) -> OptResult<f64> {
        let g = memo.group(group)?;
        let mut rows = match g.original() {
            RelExpr::TableScan { source } | RelExpr::TableAlias { source } => {
                match source.table_node() {
                    Some(t) => memo
                        .catalog()
                        .row_count(&t.database, &t.name)?
                        .map_or(DEFAULT_TABLE_ROWS, |r| r as f64),
                    None => DEFAULT_TABLE_ROWS,
                }
            }
            RelExpr::SubqueryAlias { .. } | RelExpr::RecursiveTable { .. } => DEFAULT_TABLE_ROWS,
            RelExpr::Opaque { source } => match source.as_ref() {
                PlanNode::Values { rows } => rows.len() as f64,
                _ => DEFAULT_TABLE_ROWS,
            },
            RelExpr::IndexScan(scan) => {
                let table_rows = match scan.source.table_node() {
                    Some(t) => memo
                        .catalog()
                        .row_count(&t.database, &t.name)?
                        .map_or(DEFAULT_TABLE_ROWS, |r| r as f64),
                    None => DEFAULT_TABLE_ROWS,
                };
                if scan.is_point() && scan.index.is_unique() {
                    1.0
                } else if let (true, Some(stat)) = (scan.is_point(), &scan.stats) {
                    stat.rows_per_key()
                } else {
                    let restricted = scan.ranges.iter().filter(|r| **r != ColumnRange::All).count();
                    table_rows * EQ_SELECTIVITY.powi(restricted as i32)
                }
            }
            RelExpr::Project { child, .. } => memo.card(*child)?,
            RelExpr::Distinct { child } => memo.card(*child)?,
            RelExpr::Filter { child, filters } => {
                let child_props = &memo.group(*child)?.props;
                let input = memo.card(*child)?;
                let pinned = &g.props.constants;
                let ids = pinned.keys().copied().collect();
                if child_props.cols_are_strict_key(&ids) && !pinned.is_empty() {
                    1.0
                } else {
                    input * filters.iter().map(selectivity).product::<f64>()
                }
            }
            RelExpr::Join(j) => {
                let l = memo.card(j.left)?;
                let r = memo.card(j.right)?;
                let equi = j.filter.iter().any(|f| f.as_equality().is_some())
                    || !matches!(j.op, JoinOp::NestedLoop | JoinOp::RangeHeap(_));
                match j.kind {
                    JoinKind::Semi => l * 0.5,
                    JoinKind::Anti => l * 0.5,
                    JoinKind::RightSemi => r * 0.5,
                    JoinKind::Cross | JoinKind::LateralCross if j.filter.is_empty() => l * r,
                    JoinKind::Left | JoinKind::LateralLeft if equi => l.max(r),
                    JoinKind::FullOuter if equi => l + r,
                    _ if equi => l.max(r),
                    JoinKind::Left | JoinKind::LateralLeft => (l * r * RANGE_SELECTIVITY).max(l),
                    _ => l * r * RANGE_SELECTIVITY,
                }
            }
        };
        if let Some(Expr::Literal(Literal::Int(n))) = &g.props.limit {
            rows = rows.min(*n as f64);
        }
        Ok(rows.max(1.0))
    }
}

fn selectivity(filter: &Expr) -> f64 {
    match filter {
        Expr::Binary { op, .. } if op.is_equality() => EQ_SELECTIVITY,
        Expr::Binary { op, .. } if !op.is_arithmetic() => RANGE_SELECTIVITY,
        Expr::Between { .. } => RANGE_SELECTIVITY * RANGE_SELECTIVITY,
        Expr::Or(l, r) => (selectivity(l) + selectivity(r)).min(1.0),
        _ => OTHER_SELECTIVITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ColumnRef;

    #[test]
    fn test_selectivity_orders_predicates() {
        let a = Expr::Column(ColumnRef::new(1, 1, "a", false));
        let eq = Expr::eq(a.clone(), Expr::int(1));
        let lt = Expr::binary(crate::plan::BinaryOp::Lt, a.clone(), Expr::int(1));
        assert!(selectivity(&eq) < selectivity(&lt));
        assert!(selectivity(&Expr::IsNull(Box::new(a))) > selectivity(&lt));
    }
}
