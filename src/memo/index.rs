use std::collections::BTreeSet;
use std::ops::Bound;

use crate::catalog::{Catalog, ColumnRange, IndexDef, IndexOrder, StatQualifier, Statistic};
use crate::error::OptResult;
use crate::plan::{BinaryOp, ColumnId, Expr, Literal, PlanNodeRef, TableId, TableNode};

/// An index of one relation, with its columns bound to column ids.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct Index {
    pub def: IndexDef,
    pub table: TableId,
    pub cols: Vec<ColumnId>,
}

impl Index {
    /// Indexes of `table`. Indexes naming unknown columns are skipped.
    pub fn for_table(table: &TableNode) -> Vec<Index> {
        table
            .table
            .indexes
            .iter()
            .filter_map(|def| {
                let cols = def
                    .columns
                    .iter()
                    .map(|name| table.column(name).map(|c| c.id))
                    .collect::<Option<Vec<_>>>()?;
                Some(Index {
                    def: def.clone(),
                    table: table.id,
                    cols,
                })
            })
            .collect()
    }

    pub fn is_ordered(&self) -> bool {
        self.def.order == IndexOrder::Ordered
    }

    pub fn is_unique(&self) -> bool {
        self.def.unique
    }

    pub fn col_set(&self) -> BTreeSet<ColumnId> {
        self.cols.iter().copied().collect()
    }

    pub fn position(&self, col: ColumnId) -> Option<usize> {
        self.cols.iter().position(|c| *c == col)
    }
}

/// Statistics of `index` on the table read by `source`.
pub fn index_statistic(
    catalog: &dyn Catalog,
    source: &PlanNodeRef,
    index: &Index,
) -> OptResult<Option<Statistic>> {
    let table = match source.table_node() {
        Some(t) => t,
        None => return Ok(None),
    };
    let qualifier = StatQualifier::new(&table.database, "", &table.name, &index.def.id);
    Ok(catalog.get_stats(&qualifier, &index.def.columns)?)
}

/// Literal a filter pins `col` to, from `col = lit` or `lit = col`.
pub fn literal_for_column(filters: &[Expr], col: ColumnId) -> Option<Literal> {
    filters.iter().find_map(|f| match f.as_equality() {
        Some((Expr::Column(c), Expr::Literal(l), false)) if c.id == col => Some(l.clone()),
        Some((Expr::Literal(l), Expr::Column(c), false)) if c.id == col => Some(l.clone()),
        _ => None,
    })
}

/// Ranges for the longest index prefix `filters` restrict, plus the filters used.
///
/// Equalities against literals pin columns one at a time; the first column restricted by
/// a range ends the prefix. Returns `None` when no column is restricted or the index cannot
/// serve the ranges.
pub fn index_ranges(index: &Index, filters: &[Expr]) -> Option<(Vec<ColumnRange>, Vec<Expr>)> {
    let mut ranges = Vec::with_capacity(index.cols.len());
    let mut used = vec![];
    for col in &index.cols {
        if let Some((lit, f)) = point_filter(filters, *col) {
            ranges.push(ColumnRange::Point(lit));
            used.push(f.clone());
            continue;
        }
        if let Some((range, fs)) = range_filter(filters, *col) {
            ranges.push(range);
            used.extend(fs);
        }
        break;
    }
    if ranges.is_empty() {
        return None;
    }
    ranges.resize(index.cols.len(), ColumnRange::All);
    if !index.def.can_support(&ranges) {
        return None;
    }
    Some((ranges, used))
}

fn point_filter(filters: &[Expr], col: ColumnId) -> Option<(Literal, &Expr)> {
    filters.iter().find_map(|f| {
        literal_for_column(std::slice::from_ref(f), col)
            .filter(|l| *l != Literal::Null)
            .map(|l| (l, f))
    })
}

fn range_filter(filters: &[Expr], col: ColumnId) -> Option<(ColumnRange, Vec<Expr>)> {
    let mut lower = Bound::Unbounded;
    let mut upper = Bound::Unbounded;
    let mut used = vec![];
    for f in filters {
        match f {
            Expr::Between { value, low, high } => {
                if let (Expr::Column(c), Expr::Literal(lo), Expr::Literal(hi)) =
                    (value.as_ref(), low.as_ref(), high.as_ref())
                {
                    let unbounded =
                        matches!(lower, Bound::Unbounded) && matches!(upper, Bound::Unbounded);
                    if c.id == col && unbounded {
                        lower = Bound::Included(lo.clone());
                        upper = Bound::Included(hi.clone());
                        used.push(f.clone());
                    }
                }
            }
            Expr::Binary { op, left, right } => {
                let (op, lit) = match (left.as_ref(), right.as_ref()) {
                    (Expr::Column(c), Expr::Literal(l)) if c.id == col => (*op, l),
                    (Expr::Literal(l), Expr::Column(c)) if c.id == col => match flip(*op) {
                        Some(op) => (op, l),
                        None => continue,
                    },
                    _ => continue,
                };
                let bound = match op {
                    BinaryOp::Gt => (&mut lower, Bound::Excluded(lit.clone())),
                    BinaryOp::GtEq => (&mut lower, Bound::Included(lit.clone())),
                    BinaryOp::Lt => (&mut upper, Bound::Excluded(lit.clone())),
                    BinaryOp::LtEq => (&mut upper, Bound::Included(lit.clone())),
                    _ => continue,
                };
                if matches!(bound.0, Bound::Unbounded) {
                    *bound.0 = bound.1;
                    used.push(f.clone());
                }
            }
            _ => {}
        }
    }
    if used.is_empty() {
        return None;
    }
    Some((ColumnRange::Range { lower, upper }, used))
}

/// Comparison with its operands exchanged.
pub fn flip(op: BinaryOp) -> Option<BinaryOp> {
    match op {
        BinaryOp::Lt => Some(BinaryOp::Gt),
        BinaryOp::LtEq => Some(BinaryOp::GtEq),
        BinaryOp::Gt => Some(BinaryOp::Lt),
        BinaryOp::GtEq => Some(BinaryOp::LtEq),
        BinaryOp::Eq | BinaryOp::NullSafeEq | BinaryOp::NotEq => Some(op),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::catalog::{ColumnDef, Table};
    use crate::plan::ColumnRef;

    fn table() -> TableNode {
        let t = Table::new(
            "db",
            "t",
            vec![
                ColumnDef::new("a", false),
                ColumnDef::new("b", false),
                ColumnDef::new("c", true),
            ],
        )
        .with_index(IndexDef::new("ab", &["a", "b"], true, IndexOrder::Ordered))
        .with_index(IndexDef::new("missing", &["z"], false, IndexOrder::Ordered));
        TableNode::bind(Arc::new(t), 1, 1)
    }

    fn col(t: &TableNode, name: &str) -> Expr {
        Expr::Column(t.column(name).cloned().unwrap_or_else(|| ColumnRef::new(0, 0, name, true)))
    }

    #[test]
    fn test_indexes_bind_column_ids() {
        let t = table();
        let idx = Index::for_table(&t);
        assert_eq!(idx.len(), 1);
        assert_eq!(idx[0].cols, vec![ColumnId(1), ColumnId(2)]);
        assert_eq!(idx[0].position(ColumnId(2)), Some(1));
    }

    #[test]
    fn test_index_ranges_pin_prefix_then_range() {
        let t = table();
        let idx = &Index::for_table(&t)[0];
        let filters = vec![
            Expr::eq(Expr::int(3), col(&t, "a")),
            Expr::binary(BinaryOp::Gt, col(&t, "b"), Expr::int(1)),
            Expr::binary(BinaryOp::LtEq, col(&t, "b"), Expr::int(9)),
            Expr::eq(col(&t, "c"), Expr::int(0)),
        ];
        let (ranges, used) = index_ranges(idx, &filters).unwrap();
        assert_eq!(ranges[0], ColumnRange::Point(Literal::Int(3)));
        assert_eq!(
            ranges[1],
            ColumnRange::Range {
                lower: Bound::Excluded(Literal::Int(1)),
                upper: Bound::Included(Literal::Int(9)),
            }
        );
        assert_eq!(used.len(), 3);

        let none = vec![Expr::eq(col(&t, "b"), Expr::int(1))];
        assert!(index_ranges(idx, &none).is_none());
    }
}
