use std::collections::BTreeSet;
use std::fmt;

use itertools::Itertools;
use log::{debug, trace};
use prettytable::{Cell, Row, Table as PrettyTable};

use crate::catalog::{Catalog, ColumnRange, IndexDef, Statistic};
use crate::cost::{Carder, Coster};
use crate::error::{AnalyzerError, OptResult};
use crate::memo::{
    index_statistic, DistinctOp, Group, GroupId, Hint, Index, IndexScan, JoinOp, JoinRel, RelExpr,
    RelProps,
};
use crate::plan::{
    transform_down_until, ColumnId, ColumnRef, Expr, IndexAccess, IndexedTableAccess, JoinKind,
    JoinNode, JoinStrategy, LookupKey, PlanNode, PlanNodeRef, SortField, TableId, TreeIdentity,
};

/// Search space of one join tree: an arena of groups addressed by [`GroupId`].
pub struct Memo<'a> {
    groups: Vec<Group>,
    root: Option<GroupId>,
    catalog: &'a dyn Catalog,
    coster: &'a dyn Coster,
    carder: &'a dyn Carder,
    hints: Vec<Hint>,
    next_column: u32,
}

impl<'a> Memo<'a> {
    pub fn new(catalog: &'a dyn Catalog, coster: &'a dyn Coster, carder: &'a dyn Carder) -> Self {
        Self {
            groups: vec![],
            root: None,
            catalog,
            coster,
            carder,
            hints: vec![],
            next_column: u32::MAX / 2,
        }
    }

    pub fn catalog(&self) -> &dyn Catalog {
        self.catalog
    }

    pub fn root(&self) -> OptResult<GroupId> {
        self.root.ok_or_else(|| AnalyzerError::memo("memo has no root"))
    }

    pub fn set_root(&mut self, root: GroupId) {
        self.root = Some(root);
    }

    pub fn hints(&self) -> &[Hint] {
        &self.hints
    }

    pub fn add_hints(&mut self, hints: Vec<Hint>) {
        for hint in hints {
            if !self.hints.contains(&hint) {
                self.hints.push(hint);
            }
        }
    }

    pub fn has_hint(&self, hint: &Hint) -> bool {
        self.hints.contains(hint)
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn group(&self, id: GroupId) -> OptResult<&Group> {
        self.groups
            .get(id)
            .ok_or_else(|| AnalyzerError::memo(format!("group {id} does not exist")))
    }

    pub fn group_mut(&mut self, id: GroupId) -> OptResult<&mut Group> {
        self.groups
            .get_mut(id)
            .ok_or_else(|| AnalyzerError::memo(format!("group {id} does not exist")))
    }

    pub fn props(&self, id: GroupId) -> OptResult<&RelProps> {
        Ok(&self.group(id)?.props)
    }

    /// A column id no relation of the query uses.
    pub fn fresh_column(&mut self, table: TableId, name: &str) -> ColumnRef {
        self.next_column += 1;
        ColumnRef {
            id: ColumnId(self.next_column),
            table,
            name: name.to_string(),
            nullable: true,
        }
    }

    /// Creates a group whose first alternative is `expr`.
    pub fn memoize(&mut self, expr: RelExpr) -> OptResult<GroupId> {
        let children = expr
            .children()
            .into_iter()
            .map(|c| self.props(c))
            .collect::<OptResult<Vec<_>>>()?;
        let props = RelProps::derive(&expr, &children);
        let id = self.groups.len();
        trace!("memoized group {}: {}", id, expr);
        self.groups.push(Group::new(id, expr, props));
        Ok(id)
    }

    pub fn memoize_leaf(&mut self, expr: RelExpr) -> OptResult<GroupId> {
        self.memoize(expr)
    }

    pub fn memoize_filter(&mut self, child: GroupId, filters: Vec<Expr>) -> OptResult<GroupId> {
        self.memoize(RelExpr::Filter { child, filters })
    }

    pub fn memoize_project(&mut self, child: GroupId, exprs: Vec<Expr>) -> OptResult<GroupId> {
        self.memoize(RelExpr::Project { child, exprs })
    }

    pub fn memoize_distinct(&mut self, child: GroupId) -> OptResult<GroupId> {
        self.memoize(RelExpr::Distinct { child })
    }

    pub fn memoize_join(
        &mut self,
        kind: JoinKind,
        left: GroupId,
        right: GroupId,
        filter: Vec<Expr>,
    ) -> OptResult<GroupId> {
        self.memoize(RelExpr::Join(JoinRel::new(kind, left, right, filter)))
    }

    /// Adds `expr` as an alternative of `group`.
    pub fn add(&mut self, group: GroupId, expr: RelExpr) -> OptResult<()> {
        for child in expr.children() {
            if child == group {
                return Err(AnalyzerError::memo(format!("group {group} cannot be its own child")));
            }
            self.group(child)?;
        }
        if self.group_mut(group)?.prepend(expr) {
            trace!("added alternative to group {}", group);
        }
        Ok(())
    }

    /// Adds a join alternative to the join group at or below `group`, looking through the
    /// filters, projections and distincts stacked on top of it.
    pub fn add_join_to_group(&mut self, group: GroupId, join: JoinRel) -> OptResult<()> {
        let mut target = group;
        loop {
            match self.group(target)?.original() {
                RelExpr::Join(_) => return self.add(target, RelExpr::Join(join)),
                RelExpr::Filter { child, .. }
                | RelExpr::Project { child, .. }
                | RelExpr::Distinct { child } => target = *child,
                other => {
                    let msg = format!("no join group below {group}: {other}");
                    return Err(AnalyzerError::memo(msg));
                }
            }
        }
    }

    /// Visits every alternative reachable from the root, children before parents. Alternatives
    /// added during the walk are not visited.
    pub fn dfs_rel<F>(&mut self, mut f: F) -> OptResult<()>
    where
        F: FnMut(&mut Memo<'a>, GroupId, &RelExpr) -> OptResult<()>,
    {
        let order = self.post_order()?;
        for id in order {
            let exprs = self.group(id)?.exprs.clone();
            for expr in &exprs {
                f(self, id, expr)?;
            }
        }
        Ok(())
    }

    fn post_order(&self) -> OptResult<Vec<GroupId>> {
        let root = self.root()?;
        let mut seen = BTreeSet::new();
        let mut order = vec![];
        let mut stack = vec![(root, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            if !seen.insert(id) {
                continue;
            }
            stack.push((id, true));
            for expr in &self.group(id)?.exprs {
                for child in expr.children() {
                    if !seen.contains(&child) {
                        stack.push((child, false));
                    }
                }
            }
        }
        Ok(order)
    }

    /// Estimated rows of a group.
    pub fn card(&self, id: GroupId) -> OptResult<f64> {
        match self.group(id)?.card {
            Some(card) => Ok(card),
            None => self.carder.card_group(self, id),
        }
    }

    /// Caches the cardinality of every reachable group.
    pub fn card_memo_groups(&mut self) -> OptResult<()> {
        for id in self.post_order()? {
            if self.group(id)?.card.is_none() {
                let card = self.carder.card_group(self, id)?;
                self.group_mut(id)?.card = Some(card);
            }
        }
        Ok(())
    }

    /// Statistics of `index` on the table read by `source`.
    pub fn index_stats(&self, source: &PlanNodeRef, index: &Index) -> OptResult<Option<Statistic>> {
        index_statistic(self.catalog, source, index)
    }

    /// Builds a static index scan over `source`.
    pub fn index_scan(
        &self,
        source: &PlanNodeRef,
        index: &Index,
        ranges: Vec<ColumnRange>,
    ) -> OptResult<IndexScan> {
        Ok(IndexScan {
            source: source.clone(),
            index: index.clone(),
            ranges,
            stats: self.index_stats(source, index)?,
        })
    }

    /// Costs every reachable alternative and picks a winner per group, honoring hints.
    pub fn optimize_root(&mut self) -> OptResult<()> {
        self.card_memo_groups()?;
        for id in self.post_order()? {
            self.optimize_group(id)?;
        }
        Ok(())
    }

    fn optimize_group(&mut self, id: GroupId) -> OptResult<()> {
        let group = self.group(id)?;
        if group.done {
            return Ok(());
        }
        let relations = group.props.relation_names();
        let hints: Vec<&Hint> = self.hints.iter().filter(|h| h.applies_to(&relations)).collect();

        let mut costs = Vec::with_capacity(group.exprs.len());
        let mut best: Option<(usize, f64)> = None;
        let mut best_hinted: Option<(usize, f64)> = None;
        for (i, expr) in group.exprs.iter().enumerate() {
            let mut cost = self.coster.cost_rel(self, id, expr)?;
            for child in self.costed_children(expr) {
                cost += self.group(child)?.best_cost().ok_or_else(|| {
                    AnalyzerError::memo(format!("group {child} optimized after its parent {id}"))
                })?;
            }
            costs.push(cost);
            if best.map_or(true, |(_, c)| cost < c) {
                best = Some((i, cost));
            }
            if self.satisfies_hints(expr, &hints)? && best_hinted.map_or(true, |(_, c)| cost < c) {
                best_hinted = Some((i, cost));
            }
        }

        let (winner, _) = best_hinted
            .or(best)
            .ok_or_else(|| AnalyzerError::memo(format!("group {id} has no alternatives")))?;
        let group = self.group_mut(id)?;
        group.costs = costs;
        group.best = Some(winner);
        group.done = true;
        Ok(())
    }

    /// Child groups whose rows an alternative reads. Lookup joins seek into an index instead
    /// of reading their right group.
    fn costed_children(&self, expr: &RelExpr) -> Vec<GroupId> {
        match expr {
            RelExpr::Join(j) if matches!(j.op, JoinOp::Lookup(_) | JoinOp::ConcatLookup(_)) => {
                vec![j.left]
            }
            other => other.children().to_vec(),
        }
    }

    /// Whether `expr` honours `hints`. Filters, projections and distincts are judged by the
    /// winner of the group they read, so a rewrite of a join into a projection over another
    /// join kind cannot slip past a join hint.
    fn satisfies_hints(&self, expr: &RelExpr, hints: &[&Hint]) -> OptResult<bool> {
        match expr {
            RelExpr::Join(join) => {
                let (left, right) = (self.props(join.left)?, self.props(join.right)?);
                let no_merge =
                    self.has_hint(&Hint::NoMergeJoin) && matches!(join.op, JoinOp::Merge { .. });
                Ok(!no_merge && hints.iter().all(|h| h.satisfied_by(join, left, right)))
            }
            RelExpr::Project { child, .. }
            | RelExpr::Filter { child, .. }
            | RelExpr::Distinct { child } => match self.group(*child)?.best_expr() {
                Some(best) => self.satisfies_hints(best, hints),
                None => Ok(true),
            },
            _ => Ok(true),
        }
    }

    /// Materializes the winning alternative of every group from the root down.
    pub fn best_root_plan(&self) -> OptResult<PlanNodeRef> {
        self.build_group(self.root()?, false)
    }

    /// Builds `id` from its winner, or from the alternative it was created with when
    /// `original` is set. A side whose table read is swapped for an index access is built from
    /// originals: a winning index scan there may have absorbed filters the swap would drop.
    fn build_group(&self, id: GroupId, original: bool) -> OptResult<PlanNodeRef> {
        let group = self.group(id)?;
        let expr = if original {
            group.original()
        } else {
            group
                .best_expr()
                .ok_or_else(|| AnalyzerError::memo(format!("group {id} was not optimized")))?
        };
        let mut node = self.build_expr(expr, original)?;
        if group.props.distinct == DistinctOp::HashDistinct {
            node = PlanNode::Distinct { child: node }.into_ref();
        }
        if !group.props.sort.is_empty() {
            node = PlanNode::Sort {
                fields: group.props.sort.clone(),
                child: node,
            }
            .into_ref();
        }
        if let Some(count) = &group.props.limit {
            node = PlanNode::Limit {
                count: count.clone(),
                child: node,
            }
            .into_ref();
        }
        Ok(node)
    }

    fn build_expr(&self, expr: &RelExpr, original: bool) -> OptResult<PlanNodeRef> {
        match expr {
            RelExpr::TableScan { source }
            | RelExpr::TableAlias { source }
            | RelExpr::SubqueryAlias { source }
            | RelExpr::RecursiveTable { source }
            | RelExpr::Opaque { source } => Ok(source.clone()),
            RelExpr::IndexScan(scan) => Ok(static_access(scan)),
            RelExpr::Project { child, exprs } => Ok(PlanNode::Project {
                exprs: exprs.clone(),
                child: self.build_group(*child, original)?,
            }
            .into_ref()),
            RelExpr::Filter { child, filters } => {
                let child = self.build_group(*child, original)?;
                Ok(match Expr::join_and(filters.iter().cloned()) {
                    Some(predicate) => PlanNode::Filter { predicate, child }.into_ref(),
                    None => child,
                })
            }
            RelExpr::Distinct { child } => Ok(PlanNode::Distinct {
                child: self.build_group(*child, original)?,
            }
            .into_ref()),
            RelExpr::Join(j) => self.build_join(j, original),
        }
    }

    fn build_join(&self, j: &JoinRel, original: bool) -> OptResult<PlanNodeRef> {
        let (left_replaced, right_replaced) = match &j.op {
            JoinOp::Lookup(_) | JoinOp::ConcatLookup(_) => (false, true),
            JoinOp::Merge { .. } => (true, true),
            JoinOp::RangeHeap(rh) => (rh.value_scan.is_some(), rh.min_scan.is_some()),
            JoinOp::NestedLoop | JoinOp::Hash { .. } => (false, false),
        };
        let mut left = self.build_group(j.left, original || left_replaced)?;
        let mut right = self.build_group(j.right, original || right_replaced)?;
        let strategy = match &j.op {
            JoinOp::NestedLoop => JoinStrategy::NestedLoop,
            JoinOp::Lookup(lookup) => {
                let access = lookup_access(&lookup.source, &lookup.index.def, lookup.key.clone());
                right = replace_table(&right, &lookup.source, access)?;
                JoinStrategy::Lookup
            }
            JoinOp::ConcatLookup(lookups) => {
                let access = lookups
                    .iter()
                    .map(|l| lookup_access(&l.source, &l.index.def, l.key.clone()))
                    .reduce(|acc, next| PlanNode::Concat { left: acc, right: next }.into_ref())
                    .ok_or_else(|| AnalyzerError::memo("concat lookup without lookups"))?;
                if let Some(first) = lookups.first() {
                    right = replace_table(&right, &first.source, access)?;
                }
                JoinStrategy::Lookup
            }
            JoinOp::Hash { left_keys, right_keys } => JoinStrategy::Hash {
                left_keys: left_keys.clone(),
                right_keys: right_keys.clone(),
            },
            JoinOp::Merge { left_scan, right_scan } => {
                left = replace_table(&left, &left_scan.source, static_access(left_scan))?;
                right = replace_table(&right, &right_scan.source, static_access(right_scan))?;
                JoinStrategy::Merge
            }
            JoinOp::RangeHeap(rh) => {
                left = match &rh.value_scan {
                    Some(scan) => replace_table(&left, &scan.source, static_access(scan))?,
                    None => sorted(left, &rh.value),
                };
                right = match &rh.min_scan {
                    Some(scan) => replace_table(&right, &scan.source, static_access(scan))?,
                    None => sorted(right, &rh.min),
                };
                JoinStrategy::RangeHeap {
                    value: rh.value.clone(),
                    min: rh.min.clone(),
                    max: rh.max.clone(),
                    closed_min: rh.closed_min,
                    closed_max: rh.closed_max,
                }
            }
        };
        let mut join = JoinNode::new(j.kind, left, right, j.filter.clone());
        join.strategy = strategy;
        Ok(PlanNode::Join(join).into_ref())
    }

    /// Renders the memo as a table, one row per group after the header. Only used for verbose
    /// debug logging; [`Display`](fmt::Display) is the compact form recorded per query.
    pub fn format_table(&self) -> PrettyTable {
        let mut table = PrettyTable::new();
        table.add_row(row!["group", "rows", "cost", "best", "alternatives"]);
        for group in &self.groups {
            let alternatives = group
                .exprs
                .iter()
                .enumerate()
                .map(|(i, e)| match group.costs.get(i) {
                    Some(c) => format!("{e} ({c:.1})"),
                    None => e.to_string(),
                })
                .join("\n");
            table.add_row(Row::new(vec![
                Cell::new(&group.id.to_string()),
                Cell::new(&group.card.map_or("-".to_string(), |c| format!("{c:.1}"))),
                Cell::new(&group.best_cost().map_or("-".to_string(), |c| format!("{c:.1}"))),
                Cell::new(&group.best_expr().map_or("-".to_string(), |e| e.to_string())),
                Cell::new(&alternatives),
            ]));
        }
        table
    }
}

/// One line per group: `G<id> rows=<card> best=<winner>: <alternative> (<cost>) | ...`.
impl fmt::Display for Memo<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(root) = self.root {
            writeln!(f, "root: G{root}")?;
        }
        for group in &self.groups {
            let alternatives = group
                .exprs
                .iter()
                .enumerate()
                .map(|(i, e)| match group.costs.get(i) {
                    Some(c) => format!("{e} ({c:.1})"),
                    None => e.to_string(),
                })
                .join(" | ");
            let rows = group.card.map_or("-".to_string(), |c| format!("{c:.1}"));
            let best = group.best.map_or("-".to_string(), |b| b.to_string());
            writeln!(f, "G{} rows={} best={}: {}", group.id, rows, best, alternatives)?;
        }
        Ok(())
    }
}

fn static_access(scan: &IndexScan) -> PlanNodeRef {
    PlanNode::IndexedTableAccess(IndexedTableAccess {
        source: scan.source.clone(),
        index: scan.index.def.clone(),
        access: IndexAccess::Static(scan.ranges.clone()),
    })
    .into_ref()
}

fn lookup_access(source: &PlanNodeRef, index: &IndexDef, key: LookupKey) -> PlanNodeRef {
    PlanNode::IndexedTableAccess(IndexedTableAccess {
        source: source.clone(),
        index: index.clone(),
        access: IndexAccess::Lookup(key),
    })
    .into_ref()
}

fn sorted(node: PlanNodeRef, by: &Expr) -> PlanNodeRef {
    PlanNode::Sort {
        fields: vec![SortField {
            expr: by.clone(),
            ascending: true,
        }],
        child: node,
    }
    .into_ref()
}

/// Swaps the first read of `source` in `tree` for `access`.
fn replace_table(
    tree: &PlanNodeRef,
    source: &PlanNodeRef,
    access: PlanNodeRef,
) -> OptResult<PlanNodeRef> {
    let id = source.table_id();
    let mut access = Some(access);
    let (out, same) = transform_down_until(tree, &mut |n| {
        let is_read = matches!(
            n.as_ref(),
            PlanNode::ResolvedTable(_)
                | PlanNode::TableAlias { .. }
                | PlanNode::IndexedTableAccess(_)
        );
        if is_read && n.table_id() == id {
            return Ok(access.take().map(|a| (a, TreeIdentity::NewTree)));
        }
        Ok(None)
    })?;
    if same.is_same() {
        debug!("no read of {} below {}", source.describe(), tree.describe());
        return Err(AnalyzerError::memo(format!("no read of {} to replace", source.describe())));
    }
    Ok(out)
}

/// Leaf alternative reading `node`, for the relations the optimizer does not look into.
pub(crate) fn leaf_for(node: &PlanNodeRef) -> Option<RelExpr> {
    let source = node.clone();
    match node.as_ref() {
        PlanNode::ResolvedTable(_) => Some(RelExpr::TableScan { source }),
        PlanNode::TableAlias { child, .. }
            if matches!(child.as_ref(), PlanNode::ResolvedTable(_)) =>
        {
            Some(RelExpr::TableAlias { source })
        }
        PlanNode::SubqueryAlias { lateral: false, .. } => Some(RelExpr::SubqueryAlias { source }),
        PlanNode::RecursiveTable { .. } => Some(RelExpr::RecursiveTable { source }),
        PlanNode::Values { .. } | PlanNode::SetOp { .. } => Some(RelExpr::Opaque { source }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::catalog::{ColumnDef, InMemoryCatalog, Table};
    use crate::cost::{DefaultCarder, DefaultCoster};
    use crate::memo::HintOp;
    use crate::plan::TableNode;

    fn table(name: &str, id: u32) -> PlanNodeRef {
        let columns = vec![ColumnDef::new("id", false), ColumnDef::new("x", false)];
        let t = Table::new("db", name, columns);
        PlanNode::ResolvedTable(TableNode::bind(Arc::new(t), id, id * 10)).into_ref()
    }

    fn col(node: &PlanNodeRef, name: &str) -> Expr {
        let c = node.table_node().and_then(|t| t.column(name)).cloned();
        Expr::Column(c.expect("column exists"))
    }

    fn catalog() -> InMemoryCatalog {
        let mut catalog = InMemoryCatalog::new();
        catalog.set_row_count("db", "a", 1000);
        catalog.set_row_count("db", "b", 1000);
        catalog
    }

    fn hash(a: &PlanNodeRef, b: &PlanNodeRef) -> JoinOp {
        JoinOp::Hash {
            left_keys: vec![col(a, "x")],
            right_keys: vec![col(b, "x")],
        }
    }

    /// A semi join of `a` and `b`, plus a projection over a hash inner join of the same rows.
    fn semi_with_inner_rewrite(m: &mut Memo<'_>, a: &PlanNodeRef, b: &PlanNodeRef) -> GroupId {
        let filter = vec![Expr::eq(col(a, "x"), col(b, "x"))];
        let la = m.memoize_leaf(RelExpr::TableScan { source: a.clone() }).unwrap();
        let lb = m.memoize_leaf(RelExpr::TableScan { source: b.clone() }).unwrap();
        let semi = m.memoize_join(JoinKind::Semi, la, lb, filter.clone()).unwrap();
        let inner = m.memoize_join(JoinKind::Inner, la, lb, filter.clone()).unwrap();
        let hash_join = JoinRel::new(JoinKind::Inner, la, lb, filter).with_op(hash(a, b));
        m.add(inner, RelExpr::Join(hash_join)).unwrap();
        let exprs = vec![col(a, "id"), col(a, "x")];
        m.add(semi, RelExpr::Project { child: inner, exprs }).unwrap();
        m.set_root(semi);
        semi
    }

    #[test]
    fn test_display_lists_alternatives_per_group() {
        let catalog = catalog();
        let (a, b) = (table("a", 1), table("b", 2));
        let mut m = Memo::new(&catalog, &DefaultCoster, &DefaultCarder);
        let la = m.memoize_leaf(RelExpr::TableScan { source: a.clone() }).unwrap();
        let lb = m.memoize_leaf(RelExpr::TableScan { source: b.clone() }).unwrap();
        let filter = vec![Expr::eq(col(&a, "x"), col(&b, "x"))];
        let j = m.memoize_join(JoinKind::Inner, la, lb, filter).unwrap();
        let hash_join = m.group(j).unwrap().original().as_join().unwrap().with_op(hash(&a, &b));
        m.add(j, RelExpr::Join(hash_join)).unwrap();
        m.set_root(j);
        m.optimize_root().unwrap();

        let text = m.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "root: G2");
        assert!(lines[3].starts_with("G2 rows=1000.0 best=0: innerhash 0 1"));
        assert!(lines[3].contains(" | innernestedloop 0 1"));

        // header plus one row per group
        assert_eq!(m.format_table().len(), 4);
    }

    #[test]
    fn test_join_hint_rejects_projection_over_other_join_kind() {
        let catalog = catalog();
        let (a, b) = (table("a", 1), table("b", 2));

        let mut m = Memo::new(&catalog, &DefaultCoster, &DefaultCarder);
        let semi = semi_with_inner_rewrite(&mut m, &a, &b);
        m.optimize_root().unwrap();
        assert!(matches!(m.group(semi).unwrap().best_expr(), Some(RelExpr::Project { .. })));

        let mut m = Memo::new(&catalog, &DefaultCoster, &DefaultCarder);
        let semi = semi_with_inner_rewrite(&mut m, &a, &b);
        m.add_hints(vec![Hint::JoinOp {
            op: HintOp::Semi,
            left: "a".to_string(),
            right: "b".to_string(),
        }]);
        m.optimize_root().unwrap();
        match m.group(semi).unwrap().best_expr() {
            Some(RelExpr::Join(j)) => assert_eq!(j.kind, JoinKind::Semi),
            other => panic!("expected the semi join to win, got {other:?}"),
        }
    }

    #[test]
    fn test_unsatisfiable_hint_keeps_cheapest_alternative() {
        let catalog = catalog();
        let (a, b) = (table("a", 1), table("b", 2));
        let mut m = Memo::new(&catalog, &DefaultCoster, &DefaultCarder);
        let semi = semi_with_inner_rewrite(&mut m, &a, &b);
        m.add_hints(vec![Hint::JoinOrder(vec!["b".to_string(), "a".to_string()])]);
        m.optimize_root().unwrap();
        // neither the semi join nor the projected inner join reads b first
        assert!(matches!(m.group(semi).unwrap().best_expr(), Some(RelExpr::Project { .. })));
    }
}
