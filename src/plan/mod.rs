//! Plan and scalar expression trees.
//!
//! Both trees are immutable. A rewrite either returns the input node together with
//! [`TreeIdentity::SameTree`] or a freshly built node with [`TreeIdentity::NewTree`]; unchanged
//! subtrees are shared through [`PlanNodeRef`].

mod expr;
mod node;
mod transform;

pub use expr::*;
pub use node::*;
pub use transform::*;
