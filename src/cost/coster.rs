use crate::error::OptResult;
use crate::memo::{GroupId, JoinOp, Lookup, Memo, RelExpr};

/// Cost of reading one row sequentially.
pub const SEQ_IO_COST: f64 = 1.0;
/// Cost of one random index seek.
pub const RAND_IO_COST: f64 = 1.3;
/// Cost of evaluating an expression against one row.
pub const CPU_COST: f64 = 0.1;
/// Cost of holding one row in memory.
pub const MEM_COST: f64 = 0.2;

/// Local cost of one alternative, excluding its children.
pub trait Coster: Send + Sync {
    fn cost_rel(&self, memo: &Memo<'_>, group: GroupId, expr: &RelExpr) -> OptResult<f64>;
}

#[derive(Copy, Clone, Debug, Default)]
pub struct DefaultCoster;

impl DefaultCoster {
    fn lookup_cost(
        memo: &Memo<'_>,
        outer_rows: f64,
        right: GroupId,
        lookup: &Lookup,
    ) -> OptResult<f64> {
        let right_rows = memo.card(right)?;
        let matches = if lookup.is_unique_seek() {
            1.0
        } else {
            match memo.index_stats(&lookup.source, &lookup.index)? {
                Some(stat) => stat.rows_per_key(),
                None => (right_rows * 0.1).max(1.0),
            }
        };
        Ok(outer_rows * (RAND_IO_COST + matches * SEQ_IO_COST))
    }
}

impl Coster for DefaultCoster {
    fn cost_rel(&self, memo: &Memo<'_>, group: GroupId, expr: &RelExpr) -> OptResult<f64> {
        let out = memo.card(group)?;
        match expr {
            RelExpr::TableScan { .. }
            | RelExpr::TableAlias { .. }
            | RelExpr::SubqueryAlias { .. }
            | RelExpr::RecursiveTable { .. }
            | RelExpr::Opaque { .. } => Ok(out * SEQ_IO_COST),
            RelExpr::IndexScan(_) => Ok(RAND_IO_COST + out * SEQ_IO_COST),
            RelExpr::Project { child, .. } | RelExpr::Filter { child, .. } => {
                Ok(memo.card(*child)? * CPU_COST)
            }
            RelExpr::Distinct { child } => Ok(memo.card(*child)? * (CPU_COST + MEM_COST)),
            RelExpr::Join(j) => {
                let l = memo.card(j.left)?;
                let r = memo.card(j.right)?;
                let emit = out * CPU_COST;
                match &j.op {
                    JoinOp::NestedLoop => Ok(l * r * CPU_COST + emit),
                    JoinOp::Lookup(lookup) => {
                        Ok(Self::lookup_cost(memo, l, j.right, lookup)? + emit)
                    }
                    JoinOp::ConcatLookup(lookups) => {
                        let mut total = emit;
                        for lookup in lookups {
                            total += Self::lookup_cost(memo, l, j.right, lookup)?;
                        }
                        Ok(total)
                    }
                    JoinOp::Hash { .. } => Ok((l + r) * CPU_COST + r * MEM_COST + emit),
                    JoinOp::Merge { .. } => Ok((l + r) * CPU_COST + emit),
                    JoinOp::RangeHeap(rh) => {
                        let mut cost = (l + r) * CPU_COST + r * MEM_COST + emit;
                        if rh.value_scan.is_none() {
                            cost += sort_cost(l);
                        }
                        if rh.min_scan.is_none() {
                            cost += sort_cost(r);
                        }
                        Ok(cost)
                    }
                }
            }
        }
    }
}

fn sort_cost(rows: f64) -> f64 {
    if rows > 1.0 {
        rows * rows.log2() * CPU_COST
    } else {
        CPU_COST
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_cost_grows_superlinearly() {
        assert!(sort_cost(1000.0) > 10.0 * sort_cost(100.0));
        assert_eq!(sort_cost(0.0), CPU_COST);
    }
}
