use std::fmt;
use std::sync::Arc;

use enum_as_inner::EnumAsInner;
use itertools::Itertools;
use strum_macros::Display;

use crate::catalog::{ColumnRange, IndexDef, Table};
use crate::error::{AnalyzerError, OptResult};
use crate::plan::{ColumnId, ColumnRef, Expr, TableId};

pub type PlanNodeRef = Arc<PlanNode>;

/// A bound base table. Every occurrence of a table in a query gets its own [`TableId`], so a
/// self join sees two distinct relations sharing one [`Table`].
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct TableNode {
    pub id: TableId,
    pub name: String,
    pub database: String,
    pub columns: Vec<ColumnRef>,
    pub table: Arc<Table>,
}

impl TableNode {
    /// Binds `table` as relation `id`, numbering its columns from `first_column`.
    pub fn bind(table: Arc<Table>, id: u32, first_column: u32) -> Self {
        let columns = table
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| ColumnRef::new(first_column + i as u32, id, c.name.clone(), c.nullable))
            .collect();
        Self {
            id: TableId(id),
            name: table.name.clone(),
            database: table.database.clone(),
            columns,
            table,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnRef> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_by_id(&self, id: ColumnId) -> Option<&ColumnRef> {
        self.columns.iter().find(|c| c.id == id)
    }
}

#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Display)]
pub enum JoinKind {
    Inner,
    Cross,
    #[strum(serialize = "LeftOuter")]
    Left,
    FullOuter,
    Semi,
    Anti,
    RightSemi,
    LateralInner,
    LateralCross,
    LateralLeft,
}

impl JoinKind {
    /// Joins that only return rows of one side.
    pub fn is_partial(&self) -> bool {
        matches!(self, JoinKind::Semi | JoinKind::Anti | JoinKind::RightSemi)
    }

    pub fn is_lateral(&self) -> bool {
        matches!(
            self,
            JoinKind::LateralInner | JoinKind::LateralCross | JoinKind::LateralLeft
        )
    }

    pub fn is_left_outer(&self) -> bool {
        matches!(self, JoinKind::Left | JoinKind::LateralLeft)
    }

    pub fn is_inner(&self) -> bool {
        matches!(
            self,
            JoinKind::Inner | JoinKind::Cross | JoinKind::LateralInner | JoinKind::LateralCross
        )
    }
}

/// Physical algorithm chosen for a join.
#[derive(Clone, Debug, Hash, Eq, PartialEq, EnumAsInner)]
pub enum JoinStrategy {
    NestedLoop,
    /// Right side is an [`PlanNode::IndexedTableAccess`] lookup, or a [`PlanNode::Concat`] of them.
    Lookup,
    Hash {
        left_keys: Vec<Expr>,
        right_keys: Vec<Expr>,
    },
    /// Both sides are sorted index scans; the first filter is the merge comparison.
    Merge,
    RangeHeap {
        value: Expr,
        min: Expr,
        max: Expr,
        closed_min: bool,
        closed_max: bool,
    },
}

impl fmt::Display for JoinStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinStrategy::NestedLoop => write!(f, "NestedLoop"),
            JoinStrategy::Lookup => write!(f, "Lookup"),
            JoinStrategy::Hash { .. } => write!(f, "Hash"),
            JoinStrategy::Merge => write!(f, "Merge"),
            JoinStrategy::RangeHeap { .. } => write!(f, "RangeHeap"),
        }
    }
}

#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct JoinNode {
    pub kind: JoinKind,
    pub left: PlanNodeRef,
    pub right: PlanNodeRef,
    pub filter: Vec<Expr>,
    pub strategy: JoinStrategy,
    /// Raw comment attached to the join, may carry `/*+ ... */` hints.
    pub comment: String,
}

impl JoinNode {
    pub fn new(kind: JoinKind, left: PlanNodeRef, right: PlanNodeRef, filter: Vec<Expr>) -> Self {
        Self {
            kind,
            left,
            right,
            filter,
            strategy: JoinStrategy::NestedLoop,
            comment: String::new(),
        }
    }

    pub fn with_comment<S: Into<String>>(mut self, comment: S) -> Self {
        self.comment = comment.into();
        self
    }
}

/// Lookup keys evaluated per outer row.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct LookupKey {
    pub keys: Vec<Expr>,
    /// `true` where the key came from a null-safe comparison.
    pub nullmask: Vec<bool>,
}

#[derive(Clone, Debug, Hash, Eq, PartialEq, EnumAsInner)]
pub enum IndexAccess {
    /// Fixed ranges, one per index column.
    Static(Vec<ColumnRange>),
    Lookup(LookupKey),
}

#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct IndexedTableAccess {
    /// A [`PlanNode::ResolvedTable`] or [`PlanNode::TableAlias`].
    pub source: PlanNodeRef,
    pub index: IndexDef,
    pub access: IndexAccess,
}

#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Display)]
pub enum SetOpKind {
    Union,
    Intersect,
    Except,
}

#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Display)]
pub enum TransactionControl {
    Begin,
    Commit,
    Rollback,
}

#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct SortField {
    pub expr: Expr,
    pub ascending: bool,
}

/// Relational operator tree.
#[derive(Clone, Debug, Hash, Eq, PartialEq, EnumAsInner)]
pub enum PlanNode {
    ResolvedTable(TableNode),
    UnresolvedTable {
        database: String,
        name: String,
    },
    TableAlias {
        alias: String,
        child: PlanNodeRef,
    },
    /// Derived table.
    SubqueryAlias {
        name: String,
        id: TableId,
        columns: Vec<ColumnRef>,
        child: PlanNodeRef,
        lateral: bool,
    },
    /// Self reference inside a recursive CTE.
    RecursiveTable {
        name: String,
        id: TableId,
        columns: Vec<ColumnRef>,
    },
    Values {
        rows: Vec<Vec<Expr>>,
    },
    Filter {
        predicate: Expr,
        child: PlanNodeRef,
    },
    Project {
        exprs: Vec<Expr>,
        child: PlanNodeRef,
    },
    GroupBy {
        group_by: Vec<Expr>,
        aggregates: Vec<Expr>,
        child: PlanNodeRef,
    },
    Distinct {
        child: PlanNodeRef,
    },
    Sort {
        fields: Vec<SortField>,
        child: PlanNodeRef,
    },
    Limit {
        count: Expr,
        child: PlanNodeRef,
    },
    Offset {
        count: Expr,
        child: PlanNodeRef,
    },
    TopN {
        count: Expr,
        fields: Vec<SortField>,
        child: PlanNodeRef,
    },
    Join(JoinNode),
    SetOp {
        kind: SetOpKind,
        distinct: bool,
        left: PlanNodeRef,
        right: PlanNodeRef,
    },
    IndexedTableAccess(IndexedTableAccess),
    /// Rows of `left` followed by rows of `right`.
    Concat {
        left: PlanNodeRef,
        right: PlanNodeRef,
    },
    InsertInto {
        destination: PlanNodeRef,
        source: PlanNodeRef,
    },
    Update {
        set: Vec<(ColumnRef, Expr)>,
        child: PlanNodeRef,
    },
    Delete {
        child: PlanNodeRef,
    },
    Transaction(TransactionControl),
    /// Executes `body` for the rows produced by `child`.
    Trigger {
        name: String,
        child: PlanNodeRef,
        body: PlanNodeRef,
    },
    Procedure {
        name: String,
        params: Vec<String>,
        body: Vec<PlanNodeRef>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
        /// Bound [`PlanNode::Procedure`], once resolved.
        procedure: Option<PlanNodeRef>,
        external: bool,
    },
}

impl PlanNode {
    pub fn into_ref(self) -> PlanNodeRef {
        Arc::new(self)
    }

    pub fn children(&self) -> Vec<PlanNodeRef> {
        use PlanNode::*;
        match self {
            ResolvedTable(_)
            | UnresolvedTable { .. }
            | RecursiveTable { .. }
            | Values { .. }
            | Transaction(_) => vec![],
            TableAlias { child, .. }
            | SubqueryAlias { child, .. }
            | Filter { child, .. }
            | Project { child, .. }
            | GroupBy { child, .. }
            | Distinct { child }
            | Sort { child, .. }
            | Limit { child, .. }
            | Offset { child, .. }
            | TopN { child, .. }
            | Update { child, .. }
            | Delete { child } => vec![child.clone()],
            Join(j) => vec![j.left.clone(), j.right.clone()],
            SetOp { left, right, .. } | Concat { left, right } => vec![left.clone(), right.clone()],
            IndexedTableAccess(ita) => vec![ita.source.clone()],
            InsertInto {
                destination,
                source,
            } => vec![destination.clone(), source.clone()],
            Trigger { child, body, .. } => vec![child.clone(), body.clone()],
            Procedure { body, .. } => body.clone(),
            Call { procedure, .. } => procedure.iter().cloned().collect(),
        }
    }

    /// Copy of this node over new children. The child count must match [`PlanNode::children`].
    pub fn with_children(&self, mut children: Vec<PlanNodeRef>) -> OptResult<PlanNode> {
        use PlanNode::*;
        let expected = self.children().len();
        if children.len() != expected {
            return Err(AnalyzerError::Validation(format!(
                "{} expects {} children, got {}",
                self.describe(),
                expected,
                children.len()
            )));
        }
        let mut node = self.clone();
        match &mut node {
            ResolvedTable(_)
            | UnresolvedTable { .. }
            | RecursiveTable { .. }
            | Values { .. }
            | Transaction(_) => {}
            TableAlias { child, .. }
            | SubqueryAlias { child, .. }
            | Filter { child, .. }
            | Project { child, .. }
            | GroupBy { child, .. }
            | Distinct { child }
            | Sort { child, .. }
            | Limit { child, .. }
            | Offset { child, .. }
            | TopN { child, .. }
            | Update { child, .. }
            | Delete { child } => *child = children.remove(0),
            Join(j) => {
                j.right = children.remove(1);
                j.left = children.remove(0);
            }
            SetOp { left, right, .. } | Concat { left, right } => {
                *right = children.remove(1);
                *left = children.remove(0);
            }
            IndexedTableAccess(ita) => ita.source = children.remove(0),
            InsertInto {
                destination,
                source,
            } => {
                *source = children.remove(1);
                *destination = children.remove(0);
            }
            Trigger { child, body, .. } => {
                *body = children.remove(1);
                *child = children.remove(0);
            }
            Procedure { body, .. } => *body = children,
            Call { procedure, .. } => *procedure = children.pop(),
        }
        Ok(node)
    }

    /// Scalar expressions owned directly by this node.
    pub fn expressions(&self) -> Vec<&Expr> {
        use PlanNode::*;
        match self {
            Values { rows } => rows.iter().flatten().collect(),
            Filter { predicate, .. } => vec![predicate],
            Project { exprs, .. } => exprs.iter().collect(),
            GroupBy {
                group_by,
                aggregates,
                ..
            } => group_by.iter().chain(aggregates.iter()).collect(),
            Sort { fields, .. } => fields.iter().map(|f| &f.expr).collect(),
            Limit { count, .. } | Offset { count, .. } => vec![count],
            TopN { count, fields, .. } => std::iter::once(count)
                .chain(fields.iter().map(|f| &f.expr))
                .collect(),
            Join(j) => j.filter.iter().collect(),
            Update { set, .. } => set.iter().map(|(_, e)| e).collect(),
            Call { args, .. } => args.iter().collect(),
            _ => vec![],
        }
    }

    /// Copy of this node with its expressions replaced, in [`PlanNode::expressions`] order.
    pub fn with_expressions(&self, exprs: Vec<Expr>) -> OptResult<PlanNode> {
        use PlanNode::*;
        if exprs.len() != self.expressions().len() {
            return Err(AnalyzerError::Validation(format!(
                "{} expects {} expressions, got {}",
                self.describe(),
                self.expressions().len(),
                exprs.len()
            )));
        }
        let mut it = exprs.into_iter();
        let mut node = self.clone();
        match &mut node {
            Values { rows } => rows
                .iter_mut()
                .flatten()
                .for_each(|e| *e = it.next().unwrap_or_else(|| e.clone())),
            Filter { predicate, .. } => *predicate = it.next().unwrap_or_else(|| predicate.clone()),
            Project { exprs, .. } => *exprs = it.collect(),
            GroupBy {
                group_by,
                aggregates,
                ..
            } => {
                *group_by = it.by_ref().take(group_by.len()).collect();
                *aggregates = it.collect();
            }
            Sort { fields, .. } => fields
                .iter_mut()
                .zip(it)
                .for_each(|(f, e)| f.expr = e),
            Limit { count, .. } | Offset { count, .. } => {
                *count = it.next().unwrap_or_else(|| count.clone())
            }
            TopN { count, fields, .. } => {
                *count = it.next().unwrap_or_else(|| count.clone());
                fields.iter_mut().zip(it).for_each(|(f, e)| f.expr = e);
            }
            Join(j) => j.filter = it.collect(),
            Update { set, .. } => set.iter_mut().zip(it).for_each(|(s, e)| s.1 = e),
            Call { args, .. } => *args = it.collect(),
            _ => {}
        }
        Ok(node)
    }

    /// True iff every table, column and procedure below this node is bound.
    pub fn is_resolved(&self) -> bool {
        let own = match self {
            PlanNode::UnresolvedTable { .. } => false,
            PlanNode::Call {
                procedure,
                external,
                ..
            } => procedure.is_some() || *external,
            _ => true,
        };
        own && self.expressions().iter().all(|e| e.is_resolved())
            && self.children().iter().all(|c| c.is_resolved())
    }

    /// Output columns.
    pub fn schema(&self) -> Vec<ColumnRef> {
        use PlanNode::*;
        match self {
            ResolvedTable(t) => t.columns.clone(),
            SubqueryAlias { columns, .. } | RecursiveTable { columns, .. } => columns.clone(),
            UnresolvedTable { .. } | Values { .. } | Transaction(_) | Call { .. } => vec![],
            TableAlias { child, .. }
            | Filter { child, .. }
            | Distinct { child }
            | Sort { child, .. }
            | Limit { child, .. }
            | Offset { child, .. }
            | TopN { child, .. }
            | Update { child, .. }
            | Delete { child }
            | Trigger { child, .. } => child.schema(),
            Project { exprs, .. } => exprs.iter().map(projected_column).collect(),
            GroupBy {
                group_by,
                aggregates,
                ..
            } => group_by
                .iter()
                .chain(aggregates.iter())
                .map(projected_column)
                .collect(),
            Join(j) => join_schema(j.kind, &j.left.schema(), &j.right.schema()),
            SetOp { left, .. } | Concat { left, .. } => left.schema(),
            IndexedTableAccess(ita) => ita.source.schema(),
            InsertInto { destination, .. } => destination.schema(),
            Procedure { body, .. } => body.last().map(|b| b.schema()).unwrap_or_default(),
        }
    }

    /// Relation ids this node exposes.
    pub fn table_id(&self) -> Option<TableId> {
        match self {
            PlanNode::ResolvedTable(t) => Some(t.id),
            PlanNode::TableAlias { child, .. } => child.table_id(),
            PlanNode::SubqueryAlias { id, .. } | PlanNode::RecursiveTable { id, .. } => Some(*id),
            PlanNode::IndexedTableAccess(ita) => ita.source.table_id(),
            _ => None,
        }
    }

    /// Base table under an alias or indexed access.
    pub fn table_node(&self) -> Option<&TableNode> {
        match self {
            PlanNode::ResolvedTable(t) => Some(t),
            PlanNode::TableAlias { child, .. } => child.table_node(),
            PlanNode::IndexedTableAccess(ita) => ita.source.table_node(),
            _ => None,
        }
    }

    /// Name a query refers to this relation by.
    pub fn relation_name(&self) -> Option<String> {
        match self {
            PlanNode::ResolvedTable(t) => Some(t.name.to_lowercase()),
            PlanNode::TableAlias { alias, .. } => Some(alias.to_lowercase()),
            PlanNode::SubqueryAlias { name, .. } | PlanNode::RecursiveTable { name, .. } => {
                Some(name.to_lowercase())
            }
            PlanNode::IndexedTableAccess(ita) => ita.source.relation_name(),
            _ => None,
        }
    }

    /// One line summary of the node, without children.
    pub fn describe(&self) -> String {
        use PlanNode::*;
        match self {
            ResolvedTable(t) => format!("Table({} as {})", t.name, t.id),
            UnresolvedTable { database, name } => format!("UnresolvedTable({database}.{name})"),
            TableAlias { alias, .. } => format!("TableAlias({alias})"),
            SubqueryAlias { name, lateral, .. } => {
                format!("SubqueryAlias({name}{})", if *lateral { ", lateral" } else { "" })
            }
            RecursiveTable { name, .. } => format!("RecursiveTable({name})"),
            Values { rows } => format!("Values({} rows)", rows.len()),
            Filter { predicate, .. } => format!("Filter({predicate})"),
            Project { exprs, .. } => format!("Project({})", exprs.iter().join(", ")),
            GroupBy {
                group_by,
                aggregates,
                ..
            } => format!(
                "GroupBy([{}], [{}])",
                group_by.iter().join(", "),
                aggregates.iter().join(", ")
            ),
            Distinct { .. } => "Distinct".to_string(),
            Sort { fields, .. } => format!(
                "Sort({})",
                fields
                    .iter()
                    .map(|f| format!("{} {}", f.expr, if f.ascending { "ASC" } else { "DESC" }))
                    .join(", ")
            ),
            Limit { count, .. } => format!("Limit({count})"),
            Offset { count, .. } => format!("Offset({count})"),
            TopN { count, .. } => format!("TopN({count})"),
            Join(j) => format!(
                "{}Join[{}]({})",
                j.kind,
                j.strategy,
                j.filter.iter().join(" AND ")
            ),
            SetOp { kind, distinct, .. } => {
                format!("{kind}{}", if *distinct { " DISTINCT" } else { " ALL" })
            }
            IndexedTableAccess(ita) => match &ita.access {
                IndexAccess::Static(ranges) => {
                    format!("IndexedTableAccess({}, {})", ita.index.id, ranges.iter().join(" "))
                }
                IndexAccess::Lookup(key) => format!(
                    "IndexedTableAccess({}, keys=[{}])",
                    ita.index.id,
                    key.keys.iter().join(", ")
                ),
            },
            Concat { .. } => "Concat".to_string(),
            InsertInto { .. } => "InsertInto".to_string(),
            Update { .. } => "Update".to_string(),
            Delete { .. } => "Delete".to_string(),
            Transaction(tc) => format!("Transaction({tc})"),
            Trigger { name, .. } => format!("Trigger({name})"),
            Procedure { name, .. } => format!("Procedure({name})"),
            Call { name, args, .. } => format!("Call({name}, {})", args.iter().join(", ")),
        }
    }

    fn fmt_tree(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        writeln!(f, "{:indent$}{}", "", self.describe(), indent = depth * 2)?;
        for child in self.children() {
            child.fmt_tree(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for PlanNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_tree(f, 0)
    }
}

/// Column produced by a projection item. Computed items get an anonymous nullable column.
pub fn projected_column(expr: &Expr) -> ColumnRef {
    match expr {
        Expr::Column(c) => c.clone(),
        Expr::Alias { column, .. } => column.clone(),
        other => ColumnRef {
            id: ColumnId::default(),
            table: TableId::default(),
            name: other.to_string(),
            nullable: true,
        },
    }
}

/// Output schema of a join of the given kind.
pub fn join_schema(kind: JoinKind, left: &[ColumnRef], right: &[ColumnRef]) -> Vec<ColumnRef> {
    match kind {
        JoinKind::Semi | JoinKind::Anti => left.to_vec(),
        JoinKind::RightSemi => right.to_vec(),
        JoinKind::Left | JoinKind::LateralLeft => left
            .iter()
            .cloned()
            .chain(right.iter().map(|c| ColumnRef {
                nullable: true,
                ..c.clone()
            }))
            .collect(),
        JoinKind::FullOuter => left
            .iter()
            .chain(right.iter())
            .map(|c| ColumnRef {
                nullable: true,
                ..c.clone()
            })
            .collect(),
        _ => left.iter().chain(right.iter()).cloned().collect(),
    }
}
