use std::fmt;

use itertools::Itertools;
use smallvec::{smallvec, SmallVec};

use crate::catalog::{ColumnRange, Statistic};
use crate::memo::{GroupId, Index};
use crate::plan::{Expr, JoinKind, LookupKey, PlanNodeRef};

/// A static scan over an index.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexScan {
    /// The table or alias scanned.
    pub source: PlanNodeRef,
    pub index: Index,
    /// One entry per index column.
    pub ranges: Vec<ColumnRange>,
    pub stats: Option<Statistic>,
}

impl IndexScan {
    /// Whether every index column is pinned to one value.
    pub fn is_point(&self) -> bool {
        self.ranges.iter().all(ColumnRange::is_point)
    }
}

/// Per-row seek into `index` with `key`.
#[derive(Clone, Debug, PartialEq)]
pub struct Lookup {
    pub source: PlanNodeRef,
    pub index: Index,
    pub key: LookupKey,
}

impl Lookup {
    /// Whether every key column of a unique index is bound, so each seek returns at most a row.
    pub fn is_unique_seek(&self) -> bool {
        self.index.is_unique() && self.key.keys.len() == self.index.cols.len()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RangeHeap {
    pub value: Expr,
    pub min: Expr,
    pub max: Expr,
    pub closed_min: bool,
    pub closed_max: bool,
    /// Sorted access for the left side, `None` when it must be sorted.
    pub value_scan: Option<IndexScan>,
    pub min_scan: Option<IndexScan>,
}

/// Physical operator of a join alternative.
#[derive(Clone, Debug, PartialEq)]
pub enum JoinOp {
    NestedLoop,
    Lookup(Lookup),
    /// One lookup per disjunct of an OR filter, results concatenated.
    ConcatLookup(Vec<Lookup>),
    Hash {
        left_keys: Vec<Expr>,
        right_keys: Vec<Expr>,
    },
    Merge {
        left_scan: IndexScan,
        right_scan: IndexScan,
    },
    RangeHeap(Box<RangeHeap>),
}

impl JoinOp {
    pub fn name(&self) -> &'static str {
        match self {
            JoinOp::NestedLoop => "nestedloop",
            JoinOp::Lookup(_) => "lookup",
            JoinOp::ConcatLookup(_) => "concatlookup",
            JoinOp::Hash { .. } => "hash",
            JoinOp::Merge { .. } => "merge",
            JoinOp::RangeHeap(_) => "rangeheap",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct JoinRel {
    pub kind: JoinKind,
    pub left: GroupId,
    pub right: GroupId,
    pub filter: Vec<Expr>,
    pub op: JoinOp,
}

impl JoinRel {
    pub fn new(kind: JoinKind, left: GroupId, right: GroupId, filter: Vec<Expr>) -> Self {
        Self {
            kind,
            left,
            right,
            filter,
            op: JoinOp::NestedLoop,
        }
    }

    pub fn with_op(&self, op: JoinOp) -> Self {
        Self {
            op,
            ..self.clone()
        }
    }
}

/// One alternative inside a memo group.
#[derive(Clone, Debug, PartialEq)]
pub enum RelExpr {
    TableScan { source: PlanNodeRef },
    TableAlias { source: PlanNodeRef },
    SubqueryAlias { source: PlanNodeRef },
    RecursiveTable { source: PlanNodeRef },
    /// Leaves the optimizer does not look into, such as VALUES or set operations.
    Opaque { source: PlanNodeRef },
    IndexScan(IndexScan),
    Project { child: GroupId, exprs: Vec<Expr> },
    Filter { child: GroupId, filters: Vec<Expr> },
    Distinct { child: GroupId },
    Join(JoinRel),
}

impl RelExpr {
    pub fn children(&self) -> SmallVec<[GroupId; 2]> {
        match self {
            RelExpr::Project { child, .. }
            | RelExpr::Filter { child, .. }
            | RelExpr::Distinct { child } => smallvec![*child],
            RelExpr::Join(j) => smallvec![j.left, j.right],
            _ => SmallVec::new(),
        }
    }

    /// Plan node a leaf alternative reads.
    pub fn source(&self) -> Option<&PlanNodeRef> {
        match self {
            RelExpr::TableScan { source }
            | RelExpr::TableAlias { source }
            | RelExpr::SubqueryAlias { source }
            | RelExpr::RecursiveTable { source }
            | RelExpr::Opaque { source } => Some(source),
            RelExpr::IndexScan(scan) => Some(&scan.source),
            _ => None,
        }
    }

    pub fn as_join(&self) -> Option<&JoinRel> {
        match self {
            RelExpr::Join(j) => Some(j),
            _ => None,
        }
    }

    pub fn is_table(&self) -> bool {
        matches!(self, RelExpr::TableScan { .. } | RelExpr::TableAlias { .. })
    }
}

impl fmt::Display for RelExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelExpr::TableScan { source } => write!(f, "tablescan: {}", source.describe()),
            RelExpr::TableAlias { source } => write!(f, "tablealias: {}", source.describe()),
            RelExpr::SubqueryAlias { source } => write!(f, "subqueryalias: {}", source.describe()),
            RelExpr::RecursiveTable { source } => {
                write!(f, "recursivetable: {}", source.describe())
            }
            RelExpr::Opaque { source } => write!(f, "opaque: {}", source.describe()),
            RelExpr::IndexScan(scan) => write!(
                f,
                "indexscan: {} {}",
                scan.index.def.id,
                scan.ranges.iter().join(" ")
            ),
            RelExpr::Project { child, exprs } => {
                write!(f, "project: {} [{}]", child, exprs.iter().join(", "))
            }
            RelExpr::Filter { child, filters } => {
                write!(f, "filter: {} [{}]", child, filters.iter().join(" AND "))
            }
            RelExpr::Distinct { child } => write!(f, "distinct: {child}"),
            RelExpr::Join(j) => {
                let kind = j.kind.to_string().to_lowercase();
                write!(f, "{}{} {} {}", kind, j.op.name(), j.left, j.right)?;
                match &j.op {
                    JoinOp::Lookup(l) => {
                        write!(f, " on {}({})", l.index.def.id, l.key.keys.iter().join(", "))?
                    }
                    JoinOp::ConcatLookup(ls) => {
                        write!(f, " on {}", ls.iter().map(|l| l.index.def.id.as_str()).join("|"))?
                    }
                    JoinOp::Merge { left_scan, right_scan } => {
                        write!(f, " on {}/{}", left_scan.index.def.id, right_scan.index.def.id)?
                    }
                    _ => {}
                }
                if !j.filter.is_empty() {
                    write!(f, " [{}]", j.filter.iter().join(" AND "))?;
                }
                Ok(())
            }
        }
    }
}
