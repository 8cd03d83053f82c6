use thiserror::Error;

use crate::analyzer::RuleId;
use crate::plan::PlanNodeRef;

pub type OptResult<T> = Result<T, AnalyzerError>;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    /// A batch kept changing the tree after its last allowed iteration.
    #[error("batch '{batch}' exceeded max analysis iterations ({limit})")]
    IterationsExhausted { batch: String, limit: usize },
    #[error("exceeded max analysis recursion depth ({depth} > {limit})")]
    RecursionLimit { depth: usize, limit: usize },
    #[error("rule {0} registered more than once")]
    DuplicateRule(RuleId),
    #[error("unknown batch: {0}")]
    UnknownBatch(String),
    #[error("invalid query: {0}")]
    Validation(String),
    #[error("plan is not resolved: {0}")]
    UnresolvedNode(String),
    #[error("stored procedure {name} with {arity} arguments not found")]
    ProcedureNotFound { name: String, arity: usize },
    #[error("unsupported join reorder node: {0}")]
    UnsupportedReorder(String),
    #[error("memo error: {0}")]
    Memo(String),
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl AnalyzerError {
    pub fn memo<S: Into<String>>(msg: S) -> Self {
        AnalyzerError::Memo(msg.into())
    }

    pub fn is_unsupported_reorder(&self) -> bool {
        matches!(self, AnalyzerError::UnsupportedReorder(_))
    }
}

/// Failed analysis together with the last tree that was successfully
/// transformed before the error.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct AnalysisFailure {
    pub partial: PlanNodeRef,
    #[source]
    pub error: AnalyzerError,
}

impl AnalysisFailure {
    pub fn new(partial: PlanNodeRef, error: AnalyzerError) -> Self {
        Self { partial, error }
    }

    pub fn into_error(self) -> AnalyzerError {
        self.error
    }
}
