//! Cost and cardinality models.
//!
//! The memo asks a [`Carder`] for the row count of every group and a [`Coster`] for the local
//! cost of every alternative. The cost of an alternative is its local cost plus the best cost
//! of each child group it reads; lookup joins do not read their right group, they seek into the
//! index instead. Both models are pluggable through the
//! [`AnalyzerBuilder`](crate::analyzer::AnalyzerBuilder).

mod carder;
mod coster;

pub use carder::*;
pub use coster::*;
