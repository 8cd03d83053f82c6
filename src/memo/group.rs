use std::collections::{BTreeMap, BTreeSet};

use crate::memo::{Index, RelExpr};
use crate::plan::{
    join_schema, projected_column, ColumnId, ColumnRef, Expr, JoinKind, Literal, PlanNodeRef,
    SortField, TableId,
};

pub type GroupId = usize;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DistinctOp {
    NoDistinct,
    /// Rows are deduplicated with a hash set when the group is materialized.
    HashDistinct,
}

/// Logical properties shared by every alternative of a group.
#[derive(Clone, Debug)]
pub struct RelProps {
    pub output_cols: Vec<ColumnRef>,
    pub output_tables: BTreeSet<TableId>,
    /// Leaf relations below the group.
    pub table_nodes: Vec<PlanNodeRef>,
    /// Columns fixed to a literal by an equality filter.
    pub constants: BTreeMap<ColumnId, Literal>,
    /// Column sets that identify a row.
    pub strict_keys: Vec<BTreeSet<ColumnId>>,
    pub limit: Option<Expr>,
    pub sort: Vec<SortField>,
    pub distinct: DistinctOp,
}

impl Default for RelProps {
    fn default() -> Self {
        Self {
            output_cols: vec![],
            output_tables: BTreeSet::new(),
            table_nodes: vec![],
            constants: BTreeMap::new(),
            strict_keys: vec![],
            limit: None,
            sort: vec![],
            distinct: DistinctOp::NoDistinct,
        }
    }
}

impl RelProps {
    /// Properties of a leaf reading `source`.
    pub fn for_leaf(source: &PlanNodeRef) -> Self {
        let output_cols = source.schema();
        let mut output_tables: BTreeSet<TableId> = output_cols.iter().map(|c| c.table).collect();
        output_tables.extend(source.table_id());
        let strict_keys = source
            .table_node()
            .map(|t| {
                Index::for_table(t)
                    .into_iter()
                    .filter(|idx| idx.is_unique())
                    .filter(|idx| {
                        idx.cols
                            .iter()
                            .all(|c| t.column_by_id(*c).map_or(false, |c| !c.nullable))
                    })
                    .map(|idx| idx.col_set())
                    .collect()
            })
            .unwrap_or_default();
        Self {
            output_cols,
            output_tables,
            table_nodes: vec![source.clone()],
            strict_keys,
            ..Default::default()
        }
    }

    /// Properties of a group whose first alternative is `expr` over `children`.
    pub fn derive(expr: &RelExpr, children: &[&RelProps]) -> Self {
        match (expr, children) {
            (RelExpr::IndexScan(scan), _) => RelProps::for_leaf(&scan.source),
            (RelExpr::Project { exprs, .. }, [child]) => {
                let output_cols: Vec<ColumnRef> = exprs.iter().map(projected_column).collect();
                let ids: BTreeSet<ColumnId> = exprs
                    .iter()
                    .filter_map(|e| match e {
                        Expr::Column(c) => Some(c.id),
                        _ => None,
                    })
                    .collect();
                Self {
                    output_cols,
                    output_tables: child.output_tables.clone(),
                    table_nodes: child.table_nodes.clone(),
                    constants: child
                        .constants
                        .iter()
                        .filter(|(c, _)| ids.contains(c))
                        .map(|(c, l)| (*c, l.clone()))
                        .collect(),
                    strict_keys: child
                        .strict_keys
                        .iter()
                        .filter(|k| k.is_subset(&ids))
                        .cloned()
                        .collect(),
                    ..Default::default()
                }
            }
            (RelExpr::Filter { filters, .. }, [child]) => {
                let mut props = RelProps {
                    limit: None,
                    sort: vec![],
                    distinct: DistinctOp::NoDistinct,
                    ..(*child).clone()
                };
                for f in filters {
                    match f.as_equality() {
                        Some((Expr::Column(c), Expr::Literal(l), _))
                        | Some((Expr::Literal(l), Expr::Column(c), _))
                            if *l != Literal::Null =>
                        {
                            props.constants.insert(c.id, l.clone());
                        }
                        _ => {}
                    }
                }
                props
            }
            (RelExpr::Distinct { .. }, [child]) => {
                let mut props = RelProps {
                    limit: None,
                    sort: vec![],
                    distinct: DistinctOp::NoDistinct,
                    ..(*child).clone()
                };
                let all: BTreeSet<ColumnId> = props.output_cols.iter().map(|c| c.id).collect();
                props.strict_keys.push(all);
                props
            }
            (RelExpr::Join(j), [left, right]) => {
                let output_cols = join_schema(j.kind, &left.output_cols, &right.output_cols);
                let partial = matches!(j.kind, JoinKind::Semi | JoinKind::Anti);
                let mut output_tables = left.output_tables.clone();
                let mut table_nodes = left.table_nodes.clone();
                let mut constants = left.constants.clone();
                let strict_keys = if partial {
                    left.strict_keys.clone()
                } else {
                    output_tables.extend(right.output_tables.iter().copied());
                    table_nodes.extend(right.table_nodes.iter().cloned());
                    if j.kind.is_inner() {
                        constants.extend(right.constants.iter().map(|(c, l)| (*c, l.clone())));
                    }
                    left.strict_keys
                        .iter()
                        .flat_map(|l| {
                            right.strict_keys.iter().map(move |r| l.union(r).copied().collect())
                        })
                        .collect()
                };
                Self {
                    output_cols,
                    output_tables,
                    table_nodes,
                    constants,
                    strict_keys,
                    ..Default::default()
                }
            }
            (other, _) => other.source().map(RelProps::for_leaf).unwrap_or_default(),
        }
    }

    /// Whether `cols`, together with the constant columns, contain a strict key.
    pub fn cols_are_strict_key(&self, cols: &BTreeSet<ColumnId>) -> bool {
        self.strict_keys
            .iter()
            .any(|k| k.iter().all(|c| cols.contains(c) || self.constants.contains_key(c)))
    }

    /// Lowercase names the query uses for the leaf relations.
    pub fn relation_names(&self) -> BTreeSet<String> {
        self.table_nodes.iter().filter_map(|n| n.relation_name()).collect()
    }
}

/// An equivalence class of alternatives.
#[derive(Clone, Debug)]
pub struct Group {
    pub id: GroupId,
    /// Alternatives, newest first. The last one is the shape the group was created with.
    pub exprs: Vec<RelExpr>,
    pub props: RelProps,
    pub card: Option<f64>,
    /// Total cost of each alternative, parallel to `exprs`, set by optimization.
    pub costs: Vec<f64>,
    pub best: Option<usize>,
    pub done: bool,
}

impl Group {
    pub fn new(id: GroupId, expr: RelExpr, props: RelProps) -> Self {
        Self {
            id,
            exprs: vec![expr],
            props,
            card: None,
            costs: vec![],
            best: None,
            done: false,
        }
    }

    pub fn first(&self) -> &RelExpr {
        &self.exprs[0]
    }

    /// The alternative the group was created with.
    pub fn original(&self) -> &RelExpr {
        &self.exprs[self.exprs.len() - 1]
    }

    /// Adds `expr` in front unless an equal alternative exists. Returns whether it was added.
    pub fn prepend(&mut self, expr: RelExpr) -> bool {
        if self.exprs.contains(&expr) {
            return false;
        }
        self.exprs.insert(0, expr);
        self.done = false;
        true
    }

    pub fn best_expr(&self) -> Option<&RelExpr> {
        self.best.and_then(|i| self.exprs.get(i))
    }

    pub fn best_cost(&self) -> Option<f64> {
        self.best.and_then(|i| self.costs.get(i).copied())
    }

    pub fn is_join(&self) -> bool {
        matches!(self.original(), RelExpr::Join(_))
    }
}
