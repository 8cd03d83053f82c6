//! ## Background
//!
//! A query analyzer takes the plan a parser and binder produce and returns a plan ready to be
//! executed. It works in two flavors. Rule based rewriting applies named rules in ordered
//! batches, repeating a batch until the plan stops changing or an iteration cap is hit. Cost based
//! planning searches the space of join orders and join algorithms for the cheapest one.
//!
//! ## Design
//!
//! ### Analyzer
//!
//! The [`Analyzer`](analyzer::Analyzer) runs nine batches in a fixed order: `pre-analyze`,
//! `once-before`, `default-rules` (run to a fix point), `once-after`, `post-analyze`,
//! `pre-validation`, `validation`, `post-validation` and `after-all`. Some statements, such as
//! procedure definitions or transaction control, run a reduced sequence. Rules can be selected
//! or skipped through a [`RuleSelector`](analyzer::RuleSelector), and nested queries
//! (subqueries, unions, trigger and procedure bodies) re-enter the analyzer with a deeper
//! [`Scope`](analyzer::Scope).
//!
//! ### Join planner
//!
//! Joins are planned once, after the default rules, by [`join_planner::optimize_joins`]. Each
//! join tree is loaded into a [`Memo`](memo::Memo), where
//! [`JoinOrderBuilder`](memo::JoinOrderBuilder) enumerates join orders, exploration passes add
//! physical alternatives, and the cheapest alternative per group, according to a
//! [`Coster`](cost::Coster) and a [`Carder`](cost::Carder), is materialized back into a plan.
//!
//! ## Reference
//!
//! 1. Selinger, P. Griffiths, et al. "Access path selection in a relational database management
//! system." Readings in Artificial Intelligence and Databases. Morgan Kaufmann, 1989. 511-522.
//! 2. Moerkotte, G. and Neumann, T., 2008. Dynamic programming strikes back. SIGMOD '08,
//! pp.539-552.

#[macro_use]
extern crate prettytable;
#[macro_use]
extern crate lazy_static;

pub mod analyzer;
pub mod catalog;
pub mod config;
pub mod context;
pub mod cost;
pub mod error;
pub mod join_planner;
pub mod memo;
pub mod plan;
