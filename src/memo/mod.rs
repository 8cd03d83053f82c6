//! Cost based join planning.
//!
//! A [`Memo`] holds every join order and physical join algorithm considered for one join tree.
//! Groups are equivalence classes of alternatives producing the same rows; alternatives point
//! at child groups rather than child plans, so one group is shared by every parent that reads
//! it. [`JoinOrderBuilder`] fills the memo with join orders, the passes of
//! [`join_planner`](crate::join_planner) add physical alternatives, and
//! [`Memo::optimize_root`] picks the cheapest alternative per group.

mod group;
mod hints;
mod index;
mod join_order;
#[allow(clippy::module_inception)]
mod memo;
mod rel_expr;

pub use group::*;
pub use hints::*;
pub use index::*;
pub use join_order::*;
pub use memo::*;
pub use rel_expr::*;

pub(crate) use memo::leaf_for;
