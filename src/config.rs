/// Tunables of one [`Analyzer`](crate::analyzer::Analyzer).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnalyzerConfig {
    /// Iteration cap of the `default-rules` batch.
    pub max_default_iterations: usize,
    /// Ceiling of nested re-entrant analysis.
    pub max_recursion_depth: usize,
    /// Above this many relations the join enumerator keeps the original join shape only.
    pub max_enumerated_relations: usize,
    pub debug: bool,
    /// With `debug`, also render every memo.
    pub verbose: bool,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            max_default_iterations: 8,
            max_recursion_depth: 100,
            max_enumerated_relations: 12,
            debug: false,
            verbose: false,
        }
    }
}

impl AnalyzerConfig {
    pub fn with_debug(mut self, debug: bool, verbose: bool) -> Self {
        self.debug = debug;
        self.verbose = verbose;
        self
    }
}
