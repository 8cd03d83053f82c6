use crate::error::OptResult;
use crate::plan::{Expr, PlanNode, PlanNodeRef};

/// Whether a rewrite produced a different tree.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TreeIdentity {
    SameTree,
    NewTree,
}

impl TreeIdentity {
    /// `SameTree` only if both are.
    pub fn and(self, other: TreeIdentity) -> TreeIdentity {
        match (self, other) {
            (TreeIdentity::SameTree, TreeIdentity::SameTree) => TreeIdentity::SameTree,
            _ => TreeIdentity::NewTree,
        }
    }

    pub fn is_same(&self) -> bool {
        *self == TreeIdentity::SameTree
    }
}

pub type TransformResult = OptResult<(PlanNodeRef, TreeIdentity)>;

/// Rebuilds `node` over children produced by `f`, reusing `node` when nothing changed.
pub fn transform_children<F>(node: &PlanNodeRef, f: &mut F) -> TransformResult
where
    F: FnMut(&PlanNodeRef) -> TransformResult,
{
    let children = node.children();
    if children.is_empty() {
        return Ok((node.clone(), TreeIdentity::SameTree));
    }

    let mut same = TreeIdentity::SameTree;
    let mut new_children = Vec::with_capacity(children.len());
    for child in &children {
        let (c, s) = f(child)?;
        same = same.and(s);
        new_children.push(c);
    }

    if same.is_same() {
        Ok((node.clone(), same))
    } else {
        Ok((node.with_children(new_children)?.into_ref(), TreeIdentity::NewTree))
    }
}

/// Post-order rewrite: children first, then `f` on the rebuilt node.
pub fn transform_up<F>(node: &PlanNodeRef, f: &mut F) -> TransformResult
where
    F: FnMut(&PlanNodeRef) -> TransformResult,
{
    let (with_children, same) = transform_children(node, &mut |c| transform_up(c, f))?;
    let (result, s) = f(&with_children)?;
    Ok((result, same.and(s)))
}

/// Pre-order rewrite. When `f` returns `Some` the replacement is kept and its subtree is not
/// visited; otherwise the walk continues into the children.
pub fn transform_down_until<F>(node: &PlanNodeRef, f: &mut F) -> TransformResult
where
    F: FnMut(&PlanNodeRef) -> OptResult<Option<(PlanNodeRef, TreeIdentity)>>,
{
    if let Some(replaced) = f(node)? {
        return Ok(replaced);
    }
    transform_children(node, &mut |c| transform_down_until(c, f))
}

/// Applies `f` bottom up to every expression of every node.
pub fn transform_expressions_up<F>(node: &PlanNodeRef, f: &mut F) -> TransformResult
where
    F: FnMut(&Expr) -> OptResult<Option<Expr>>,
{
    transform_up(node, &mut |n| {
        let exprs = n.expressions();
        if exprs.is_empty() {
            return Ok((n.clone(), TreeIdentity::SameTree));
        }
        let mut same = TreeIdentity::SameTree;
        let mut rewritten = Vec::with_capacity(exprs.len());
        for e in exprs {
            let (ne, s) = e.transform_up(f)?;
            same = same.and(s);
            rewritten.push(ne);
        }
        if same.is_same() {
            Ok((n.clone(), same))
        } else {
            Ok((n.with_expressions(rewritten)?.into_ref(), TreeIdentity::NewTree))
        }
    })
}

/// Pre-order walk that stops once `f` returns true. Returns whether it stopped.
pub fn inspect<F>(node: &PlanNode, f: &mut F) -> bool
where
    F: FnMut(&PlanNode) -> bool,
{
    if f(node) {
        return true;
    }
    node.children().iter().any(|c| inspect(c, f))
}

/// Like [`inspect`], over every expression of every node.
pub fn inspect_expressions<F>(node: &PlanNode, f: &mut F) -> bool
where
    F: FnMut(&Expr) -> bool,
{
    inspect(node, &mut |n| n.expressions().into_iter().any(|e| e.inspect(f)))
}
