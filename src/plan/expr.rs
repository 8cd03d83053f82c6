use std::collections::BTreeSet;
use std::fmt;

use derive_more::{Display, From};
use itertools::Itertools;
use strum_macros::Display as StrumDisplay;

use crate::error::OptResult;
use crate::plan::{PlanNodeRef, TreeIdentity};

#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Display, From)]
#[display(fmt = "t{}", _0)]
pub struct TableId(pub u32);

#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Display, From)]
#[display(fmt = "c{}", _0)]
pub struct ColumnId(pub u32);

#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "NULL"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Int(i) => write!(f, "{i}"),
            Literal::Str(s) => write!(f, "'{s}'"),
        }
    }
}

/// A column bound to its owning relation.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct ColumnRef {
    pub id: ColumnId,
    pub table: TableId,
    pub name: String,
    pub nullable: bool,
}

impl ColumnRef {
    pub fn new<S: Into<String>>(id: u32, table: u32, name: S, nullable: bool) -> Self {
        Self {
            id: ColumnId(id),
            table: TableId(table),
            name: name.into(),
            nullable,
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.name)
    }
}

#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, StrumDisplay)]
pub enum BinaryOp {
    #[strum(serialize = "=")]
    Eq,
    #[strum(serialize = "<=>")]
    NullSafeEq,
    #[strum(serialize = "!=")]
    NotEq,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    LtEq,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    GtEq,
    #[strum(serialize = "+")]
    Plus,
    #[strum(serialize = "-")]
    Minus,
    #[strum(serialize = "*")]
    Mult,
    #[strum(serialize = "/")]
    Div,
}

impl BinaryOp {
    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Plus | BinaryOp::Minus | BinaryOp::Mult | BinaryOp::Div
        )
    }

    pub fn is_equality(&self) -> bool {
        matches!(self, BinaryOp::Eq | BinaryOp::NullSafeEq)
    }
}

#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct Subquery {
    pub plan: PlanNodeRef,
    /// Outer-scope columns referenced by the subquery.
    pub correlated: Vec<ColumnId>,
}

/// Scalar expression tree.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Column(ColumnRef),
    UnresolvedColumn(String),
    BindVar(String),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    IsNull(Box<Expr>),
    IsNotNull(Box<Expr>),
    Between {
        value: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
    },
    Tuple(Vec<Expr>),
    Function {
        name: String,
        args: Vec<Expr>,
    },
    Subquery(Subquery),
    /// `expr` exposed under a new column identity.
    Alias {
        expr: Box<Expr>,
        column: ColumnRef,
    },
}

impl Expr {
    pub fn col(column: &ColumnRef) -> Expr {
        Expr::Column(column.clone())
    }

    pub fn int(v: i64) -> Expr {
        Expr::Literal(Literal::Int(v))
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinaryOp::Eq, left, right)
    }

    pub fn and(left: Expr, right: Expr) -> Expr {
        Expr::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: Expr, right: Expr) -> Expr {
        Expr::Or(Box::new(left), Box::new(right))
    }

    /// Folds conjuncts back into a left-deep AND tree.
    pub fn join_and<I: IntoIterator<Item = Expr>>(exprs: I) -> Option<Expr> {
        exprs.into_iter().reduce(Expr::and)
    }

    pub fn split_conjunction(&self) -> Vec<Expr> {
        match self {
            Expr::And(l, r) => {
                let mut out = l.split_conjunction();
                out.extend(r.split_conjunction());
                out
            }
            other => vec![other.clone()],
        }
    }

    pub fn split_disjunction(&self) -> Vec<Expr> {
        match self {
            Expr::Or(l, r) => {
                let mut out = l.split_disjunction();
                out.extend(r.split_disjunction());
                out
            }
            other => vec![other.clone()],
        }
    }

    /// Operands of `=` or `<=>`, and whether the comparison is null safe.
    pub fn as_equality(&self) -> Option<(&Expr, &Expr, bool)> {
        match self {
            Expr::Binary { op, left, right } if op.is_equality() => {
                Some((left, right, *op == BinaryOp::NullSafeEq))
            }
            _ => None,
        }
    }

    /// Equality with its operands exchanged.
    pub fn swap_equality(&self) -> Option<Expr> {
        match self {
            Expr::Binary { op, left, right } if op.is_equality() => Some(Expr::Binary {
                op: *op,
                left: right.clone(),
                right: left.clone(),
            }),
            _ => None,
        }
    }

    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Literal(_)
            | Expr::Column(_)
            | Expr::UnresolvedColumn(_)
            | Expr::BindVar(_)
            | Expr::Subquery(_) => vec![],
            Expr::Binary { left, right, .. } => vec![left, right],
            Expr::And(l, r) | Expr::Or(l, r) => vec![l, r],
            Expr::Not(e) | Expr::IsNull(e) | Expr::IsNotNull(e) => vec![e],
            Expr::Alias { expr, .. } => vec![expr],
            Expr::Between { value, low, high } => vec![value, low, high],
            Expr::Tuple(exprs) => exprs.iter().collect(),
            Expr::Function { args, .. } => args.iter().collect(),
        }
    }

    /// Pre-order walk that stops as soon as `f` returns true. Returns whether it stopped.
    pub fn inspect<F: FnMut(&Expr) -> bool>(&self, f: &mut F) -> bool {
        if f(self) {
            return true;
        }
        self.children().into_iter().any(|c| c.inspect(f))
    }

    pub fn column_refs(&self) -> Vec<&ColumnRef> {
        let mut out = vec![];
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        if let Expr::Column(c) = self {
            out.push(c);
        }
        for child in self.children() {
            child.collect_columns(out);
        }
    }

    pub fn table_ids(&self) -> BTreeSet<TableId> {
        self.column_refs().into_iter().map(|c| c.table).collect()
    }

    pub fn references_table(&self, table: TableId) -> bool {
        self.inspect(&mut |e| matches!(e, Expr::Column(c) if c.table == table))
    }

    /// True iff every column referenced is provided by `tables`.
    pub fn satisfies_refs(&self, tables: &BTreeSet<TableId>) -> bool {
        !self.inspect(&mut |e| matches!(e, Expr::Column(c) if !tables.contains(&c.table)))
    }

    pub fn references_one_column(&self) -> bool {
        self.column_refs().len() == 1
    }

    pub fn only_column(&self) -> Option<&ColumnRef> {
        let cols = self.column_refs();
        match cols.as_slice() {
            [c] => Some(*c),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !self.inspect(&mut |e| match e {
            Expr::UnresolvedColumn(_) => true,
            Expr::Subquery(sq) => !sq.plan.is_resolved(),
            _ => false,
        })
    }

    pub fn has_correlated_subquery(&self) -> bool {
        self.inspect(&mut |e| matches!(e, Expr::Subquery(sq) if !sq.correlated.is_empty()))
    }

    /// Rewrites bottom up. `f` returns `None` to keep a node.
    pub fn transform_up<F>(&self, f: &mut F) -> OptResult<(Expr, TreeIdentity)>
    where
        F: FnMut(&Expr) -> OptResult<Option<Expr>>,
    {
        let mut same = TreeIdentity::SameTree;
        let rebuilt = match self {
            Expr::Binary { op, left, right } => {
                let (l, s1) = left.transform_up(f)?;
                let (r, s2) = right.transform_up(f)?;
                same = s1.and(s2);
                Expr::binary(*op, l, r)
            }
            Expr::And(l, r) | Expr::Or(l, r) => {
                let (nl, s1) = l.transform_up(f)?;
                let (nr, s2) = r.transform_up(f)?;
                same = s1.and(s2);
                if matches!(self, Expr::And(..)) {
                    Expr::and(nl, nr)
                } else {
                    Expr::or(nl, nr)
                }
            }
            Expr::Not(e) | Expr::IsNull(e) | Expr::IsNotNull(e) => {
                let (ne, s) = e.transform_up(f)?;
                same = s;
                match self {
                    Expr::Not(_) => Expr::Not(Box::new(ne)),
                    Expr::IsNull(_) => Expr::IsNull(Box::new(ne)),
                    _ => Expr::IsNotNull(Box::new(ne)),
                }
            }
            Expr::Between { value, low, high } => {
                let (v, s1) = value.transform_up(f)?;
                let (l, s2) = low.transform_up(f)?;
                let (h, s3) = high.transform_up(f)?;
                same = s1.and(s2).and(s3);
                Expr::Between {
                    value: Box::new(v),
                    low: Box::new(l),
                    high: Box::new(h),
                }
            }
            Expr::Alias { expr, column } => {
                let (ne, s) = expr.transform_up(f)?;
                same = s;
                Expr::Alias {
                    expr: Box::new(ne),
                    column: column.clone(),
                }
            }
            Expr::Tuple(exprs) => {
                let (exprs, s) = transform_all(exprs, f)?;
                same = s;
                Expr::Tuple(exprs)
            }
            Expr::Function { name, args } => {
                let (args, s) = transform_all(args, f)?;
                same = s;
                Expr::Function {
                    name: name.clone(),
                    args,
                }
            }
            leaf => leaf.clone(),
        };

        match f(&rebuilt)? {
            Some(e) => Ok((e, TreeIdentity::NewTree)),
            None => Ok((rebuilt, same)),
        }
    }
}

fn transform_all<F>(exprs: &[Expr], f: &mut F) -> OptResult<(Vec<Expr>, TreeIdentity)>
where
    F: FnMut(&Expr) -> OptResult<Option<Expr>>,
{
    let mut same = TreeIdentity::SameTree;
    let mut out = Vec::with_capacity(exprs.len());
    for e in exprs {
        let (ne, s) = e.transform_up(f)?;
        same = same.and(s);
        out.push(ne);
    }
    Ok((out, same))
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(l) => write!(f, "{l}"),
            Expr::Column(c) => write!(f, "{c}"),
            Expr::UnresolvedColumn(n) => write!(f, "?{n}"),
            Expr::BindVar(n) => write!(f, ":{n}"),
            Expr::Binary { op, left, right } => write!(f, "({left} {op} {right})"),
            Expr::And(l, r) => write!(f, "({l} AND {r})"),
            Expr::Or(l, r) => write!(f, "({l} OR {r})"),
            Expr::Not(e) => write!(f, "(NOT {e})"),
            Expr::IsNull(e) => write!(f, "({e} IS NULL)"),
            Expr::IsNotNull(e) => write!(f, "({e} IS NOT NULL)"),
            Expr::Between { value, low, high } => {
                write!(f, "({value} BETWEEN {low} AND {high})")
            }
            Expr::Tuple(exprs) => write!(f, "({})", exprs.iter().join(", ")),
            Expr::Function { name, args } => write!(f, "{}({})", name, args.iter().join(", ")),
            Expr::Subquery(sq) => write!(f, "(subquery {})", sq.plan.describe()),
            Expr::Alias { expr, column } => write!(f, "{expr} as {}", column.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(id: u32, table: u32, name: &str) -> Expr {
        Expr::Column(ColumnRef::new(id, table, name, false))
    }

    #[test]
    fn test_split_conjunction_flattens_nested_and() {
        let e = Expr::and(
            Expr::eq(col(1, 1, "a"), Expr::int(1)),
            Expr::and(
                Expr::eq(col(2, 1, "b"), Expr::int(2)),
                Expr::eq(col(3, 2, "c"), Expr::int(3)),
            ),
        );
        assert_eq!(e.split_conjunction().len(), 3);
        let rejoined = Expr::join_and(e.split_conjunction());
        assert_eq!(rejoined.map(|e| e.split_conjunction().len()), Some(3));
    }

    #[test]
    fn test_satisfies_refs() {
        let e = Expr::eq(col(1, 1, "a"), col(5, 2, "x"));
        let both: BTreeSet<TableId> = [TableId(1), TableId(2)].into_iter().collect();
        let one: BTreeSet<TableId> = [TableId(1)].into_iter().collect();
        assert!(e.satisfies_refs(&both));
        assert!(!e.satisfies_refs(&one));
        assert!(Expr::int(1).satisfies_refs(&one));
    }

    #[test]
    fn test_transform_up_reports_identity() {
        let e = Expr::eq(col(1, 1, "a"), Expr::int(1));
        let (same, id) = e.transform_up(&mut |_| Ok(None)).unwrap();
        assert_eq!(same, e);
        assert_eq!(id, TreeIdentity::SameTree);

        let (rewritten, id) = e
            .transform_up(&mut |e| match e {
                Expr::Literal(Literal::Int(1)) => Ok(Some(Expr::int(2))),
                _ => Ok(None),
            })
            .unwrap();
        assert_eq!(id, TreeIdentity::NewTree);
        assert_eq!(rewritten.to_string(), "(t1.a = 2)");
    }
}
