//! Rule batch analyzer.
//!
//! An [`Analyzer`] runs an ordered list of [`Batch`]es over a plan. Most batches apply their
//! rules once; `default-rules` repeats until a pass leaves the plan unchanged and reports
//! [`AnalyzerError::IterationsExhausted`](crate::error::AnalyzerError::IterationsExhausted) if it
//! never settles. Rules may call back into the analyzer for subqueries, unions, trigger and
//! procedure bodies, restricting the nested run with a derived [`RuleSelector`] and a start or
//! stop batch. Every nested call goes through [`Scope::nested`], which bounds the recursion.

mod batch;
mod driver;
mod flags;
mod rule;
pub mod rules;
mod scope;

pub use batch::*;
pub use driver::*;
pub use flags::*;
pub use rule::*;
pub use scope::*;
