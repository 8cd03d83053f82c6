use std::collections::{BTreeMap, BTreeSet, HashMap};

use itertools::Itertools;

use crate::catalog::ColumnRange;
use crate::error::OptResult;
use crate::memo::{literal_for_column, GroupId, Index, IndexScan, Memo, RelExpr};
use crate::plan::{BinaryOp, ColumnId, Expr, Literal, LookupKey, PlanNodeRef, TableId, TableNode};

/// A base table a group reads, with the filters stacked between the group and the table.
#[derive(Clone, Debug)]
pub(crate) struct LookupCandidate {
    pub source: PlanNodeRef,
    pub filters: Vec<Expr>,
}

impl LookupCandidate {
    pub fn table(&self) -> Option<&TableNode> {
        self.source.table_node()
    }

    pub fn table_id(&self) -> Option<TableId> {
        self.source.table_id()
    }

    pub fn indexes(&self) -> Vec<Index> {
        self.table().map(Index::for_table).unwrap_or_default()
    }
}

/// Finds the table under `group` through filters, projections and distincts. Index scans
/// are skipped so the filters they absorbed are still collected from the plain path.
pub(crate) fn lookup_candidate(
    memo: &Memo<'_>,
    group: GroupId,
    limit_ok: bool,
) -> OptResult<Option<LookupCandidate>> {
    let g = memo.group(group)?;
    if !limit_ok && g.props.limit.is_some() {
        // a lookup through a limit changes the result
        return Ok(None);
    }
    for expr in &g.exprs {
        match expr {
            RelExpr::TableScan { source } | RelExpr::TableAlias { source } => {
                return Ok(Some(LookupCandidate {
                    source: source.clone(),
                    filters: vec![],
                }))
            }
            RelExpr::Filter { child, filters } => {
                if let Some(mut candidate) = lookup_candidate(memo, *child, limit_ok)? {
                    candidate.filters.extend(filters.iter().cloned());
                    return Ok(Some(candidate));
                }
            }
            RelExpr::Project { child, .. } | RelExpr::Distinct { child } => {
                return lookup_candidate(memo, *child, limit_ok);
            }
            _ => continue,
        }
    }
    Ok(None)
}

/// Key that satisfies `target` from an equality in `filters`, with the filter it came from
/// and whether the comparison was null safe. The key may not read `table`, and may not be a
/// correlated subquery.
pub(crate) fn key_for_expr(
    target: ColumnId,
    table: TableId,
    filters: &[Expr],
) -> Option<(Expr, Expr, bool)> {
    filters.iter().find_map(|f| {
        let (left, right, null_safe) = f.as_equality()?;
        let key = match (left, right) {
            (Expr::Column(c), other) if c.id == target => other,
            (other, Expr::Column(c)) if c.id == target => other,
            _ => return None,
        };
        if key.has_correlated_subquery() || key.references_table(table) {
            return None;
        }
        Some((key.clone(), f.clone(), null_safe))
    })
}

/// Lookup key over the longest prefix of `index` that `filters` bind, with the filters
/// used. Unordered indexes must be bound on every column.
pub(crate) fn key_exprs_for_index(
    index: &Index,
    table: TableId,
    filters: &[Expr],
) -> Option<(LookupKey, Vec<Expr>)> {
    let mut keys = vec![];
    let mut nullmask = vec![];
    let mut matched = vec![];
    for col in &index.cols {
        match key_for_expr(*col, table, filters) {
            Some((key, filter, null_safe)) => {
                keys.push(key);
                nullmask.push(null_safe);
                matched.push(filter);
            }
            None => break,
        }
    }
    if keys.is_empty() || (!index.is_ordered() && keys.len() < index.cols.len()) {
        return None;
    }
    Some((LookupKey { keys, nullmask }, matched))
}

/// Replaces key columns the outer side pins to a literal with that literal.
pub(crate) fn fold_constants(key: LookupKey, constants: &BTreeMap<ColumnId, Literal>) -> LookupKey {
    let keys = key
        .keys
        .into_iter()
        .map(|k| match &k {
            Expr::Column(c) => constants.get(&c.id).cloned().map_or(k, Expr::Literal),
            _ => k,
        })
        .collect();
    LookupKey {
        keys,
        nullmask: key.nullmask,
    }
}

/// Columns of `tables` read by `filters`, deduplicated. `None` when a filter holds an
/// expression the semi and anti join rewrites cannot carry.
pub(crate) fn filter_columns(filters: &[Expr], tables: &BTreeSet<TableId>) -> Option<Vec<Expr>> {
    let mut cols = vec![];
    for f in filters {
        let unsupported = f.inspect(&mut |e| match e {
            Expr::Column(c) => {
                if tables.contains(&c.table) {
                    cols.push(e.clone());
                }
                false
            }
            Expr::Literal(_)
            | Expr::BindVar(_)
            | Expr::And(..)
            | Expr::Or(..)
            | Expr::Tuple(_) => false,
            Expr::Binary { op, .. } => !(op.is_equality() || op.is_arithmetic()),
            _ => true,
        });
        if unsupported {
            return None;
        }
    }
    Some(cols.into_iter().unique().collect())
}

/// Whether `e` never decreases as the columns it reads increase. Subtraction is always
/// rejected, even when it would be safe.
pub(crate) fn is_weakly_monotonic(e: &Expr) -> bool {
    !e.inspect(&mut |e| match e {
        Expr::Binary { op: BinaryOp::Minus, .. } => true,
        Expr::Binary { op, .. } => !(op.is_equality() || op.is_arithmetic()),
        Expr::Literal(_)
        | Expr::Column(_)
        | Expr::Tuple(_)
        | Expr::BindVar(_)
        | Expr::IsNull(_)
        | Expr::IsNotNull(_) => false,
        _ => true,
    })
}

/// An equality filter of a merge candidate, left operand on the left side, with its position
/// in the join filter.
#[derive(Clone, Debug)]
pub(crate) struct MergeFilter {
    pub filter: Expr,
    pub pos: usize,
}

impl MergeFilter {
    pub fn left_col(&self) -> Option<ColumnId> {
        self.filter.as_equality().and_then(|(l, _, _)| l.only_column()).map(|c| c.id)
    }

    pub fn right_col(&self) -> Option<ColumnId> {
        self.filter.as_equality().and_then(|(_, r, _)| r.only_column()).map(|c| c.id)
    }
}

/// Longest run of `filters` matching the columns of `index` in order, where constant columns
/// may fill prefix slots.
pub(crate) fn matched_filters_for_left_index(
    index: &Index,
    constants: &BTreeSet<ColumnId>,
    filters: &[MergeFilter],
) -> Vec<MergeFilter> {
    let mut matched = vec![];
    for col in &index.cols {
        if constants.contains(col) {
            continue;
        }
        match filters.iter().find(|f| f.left_col() == Some(*col)) {
            Some(f) => matched.push(f.clone()),
            None => break,
        }
    }
    matched
}

/// Whether `index` has a prefix made of constants and the right columns of `filters`, in
/// filter order.
pub(crate) fn right_index_matches_filters(
    index: &Index,
    constants: &BTreeSet<ColumnId>,
    filters: &[MergeFilter],
) -> bool {
    if filters.is_empty() {
        return true;
    }
    let mut pos = 0;
    for col in &index.cols {
        let mut matched = false;
        while filters[pos].right_col() == Some(*col) {
            matched = true;
            pos += 1;
            if pos >= filters.len() {
                return true;
            }
        }
        if !matched && !constants.contains(col) {
            return false;
        }
    }
    false
}

/// Tuple equality over the operands of several merge filters.
pub(crate) fn combine_into_tuple(filters: &[MergeFilter]) -> Expr {
    let (lefts, rights): (Vec<Expr>, Vec<Expr>) = filters
        .iter()
        .filter_map(|f| f.filter.as_equality().map(|(l, r, _)| (l.clone(), r.clone())))
        .unzip();
    Expr::eq(Expr::Tuple(lefts), Expr::Tuple(rights))
}

/// Static scan of `index` sorted on `matched`, with the columns before it pinned by literal
/// equalities in `filters`. `None` when a prefix column is not pinned or the index cannot
/// serve the ranges.
pub(crate) fn make_index_scan(
    memo: &Memo<'_>,
    source: &PlanNodeRef,
    index: &Index,
    matched: ColumnId,
    filters: &[Expr],
) -> OptResult<Option<IndexScan>> {
    let mut ranges = Vec::with_capacity(index.cols.len());
    for col in &index.cols {
        if *col == matched {
            break;
        }
        match literal_for_column(filters, *col) {
            Some(lit) => ranges.push(ColumnRange::Point(lit)),
            None => return Ok(None),
        }
    }
    ranges.resize(index.cols.len(), ColumnRange::All);
    if !index.def.can_support(&ranges) {
        return Ok(None);
    }
    Ok(Some(memo.index_scan(source, index, ranges)?))
}

/// Ordered index scans of `candidate` that return its rows sorted on `target`.
pub(crate) fn sorted_index_scans(
    memo: &Memo<'_>,
    candidate: &LookupCandidate,
    target: ColumnId,
    constants: &BTreeSet<ColumnId>,
) -> OptResult<Vec<IndexScan>> {
    let mut scans = vec![];
    for index in candidate.indexes().iter().filter(|i| i.is_ordered()) {
        let prefix = index.cols.iter().find(|c| !constants.contains(c));
        if prefix != Some(&target) {
            continue;
        }
        let scan = make_index_scan(memo, &candidate.source, index, target, &candidate.filters)?;
        if let Some(scan) = scan {
            scans.push(scan);
        }
    }
    Ok(scans)
}

/// `min < value < max` restriction found in a join filter.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct RangeFilter {
    pub value: Expr,
    pub min: Expr,
    pub max: Expr,
    pub closed_min: bool,
    pub closed_max: bool,
}

/// Pairs the inequalities of `filters` that bound one expression from both sides, plus every
/// `BETWEEN`.
pub(crate) fn range_filters(filters: &[Expr]) -> Vec<RangeFilter> {
    let mut ranges = vec![];
    // expression text -> (bound, closed)
    let mut lower_to_upper: HashMap<String, Vec<(Expr, bool)>> = HashMap::new();
    let mut upper_to_lower: HashMap<String, Vec<(Expr, bool)>> = HashMap::new();

    for filter in filters {
        let (lower, upper, closed) = match filter {
            Expr::Between { value, low, high } => {
                ranges.push(RangeFilter {
                    value: (**value).clone(),
                    min: (**low).clone(),
                    max: (**high).clone(),
                    closed_min: true,
                    closed_max: true,
                });
                continue;
            }
            Expr::Binary { op, left, right } => match op {
                BinaryOp::Lt => (left, right, false),
                BinaryOp::LtEq => (left, right, true),
                BinaryOp::Gt => (right, left, false),
                BinaryOp::GtEq => (right, left, true),
                _ => continue,
            },
            _ => continue,
        };

        // `upper` is a value already known to be below some max
        for (max, closed_max) in lower_to_upper.get(&upper.to_string()).into_iter().flatten() {
            ranges.push(RangeFilter {
                value: (**upper).clone(),
                min: (**lower).clone(),
                max: max.clone(),
                closed_min: closed,
                closed_max: *closed_max,
            });
        }
        // `lower` is a value already known to be above some min
        for (min, closed_min) in upper_to_lower.get(&lower.to_string()).into_iter().flatten() {
            ranges.push(RangeFilter {
                value: (**lower).clone(),
                min: min.clone(),
                max: (**upper).clone(),
                closed_min: *closed_min,
                closed_max: closed,
            });
        }
        lower_to_upper
            .entry(lower.to_string())
            .or_default()
            .push(((**upper).clone(), closed));
        upper_to_lower
            .entry(upper.to_string())
            .or_default()
            .push(((**lower).clone(), closed));
    }
    ranges
}
