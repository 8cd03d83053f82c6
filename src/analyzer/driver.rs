use std::collections::BTreeSet;
use std::sync::Arc;

use log::debug;

use crate::analyzer::rules::*;
use crate::analyzer::{Batch, QueryFlags, Rule, RuleId, RuleSelector, Scope};
use crate::catalog::Catalog;
use crate::config::AnalyzerConfig;
use crate::context::Context;
use crate::cost::{Carder, Coster, DefaultCarder, DefaultCoster};
use crate::error::{AnalysisFailure, AnalyzerError, OptResult};
use crate::join_planner::optimize_joins;
use crate::plan::{inspect, inspect_expressions, Expr, PlanNode, PlanNodeRef};

pub const PRE_ANALYZE: &str = "pre-analyze";
pub const ONCE_BEFORE: &str = "once-before";
pub const DEFAULT_RULES: &str = "default-rules";
pub const ONCE_AFTER: &str = "once-after";
pub const POST_ANALYZE: &str = "post-analyze";
pub const PRE_VALIDATION: &str = "pre-validation";
pub const VALIDATION: &str = "validation";
pub const POST_VALIDATION: &str = "post-validation";
pub const AFTER_ALL: &str = "after-all";

/// Batch names in execution order.
pub const BATCH_ORDER: [&str; 9] = [
    PRE_ANALYZE,
    ONCE_BEFORE,
    DEFAULT_RULES,
    ONCE_AFTER,
    POST_ANALYZE,
    PRE_VALIDATION,
    VALIDATION,
    POST_VALIDATION,
    AFTER_ALL,
];

lazy_static! {
    static ref ONCE_BEFORE_RULES: Vec<Rule> = vec![
        Rule::new(RuleId::FlagQueryShape, flag_query_shape),
        Rule::new(RuleId::ResolveProcedureCalls, resolve_procedure_calls),
    ];
    static ref DEFAULT_RULES_RULES: Vec<Rule> = vec![
        Rule::new(RuleId::ResolveSubqueries, resolve_subqueries),
        Rule::new(RuleId::ResolveUnions, resolve_unions),
        Rule::new(RuleId::PushdownFilters, pushdown_filters),
    ];
    static ref ONCE_AFTER_RULES: Vec<Rule> = vec![
        Rule::new(RuleId::OptimizeJoins, optimize_joins),
        Rule::new(RuleId::AnalyzeTriggers, analyze_triggers),
        Rule::new(RuleId::AnalyzeProcedures, analyze_procedures),
    ];
    static ref VALIDATION_RULES: Vec<Rule> =
        vec![Rule::new(RuleId::ValidateResolved, validate_resolved)];
    static ref AFTER_ALL_RULES: Vec<Rule> =
        vec![Rule::new(RuleId::FinalizeSubqueries, finalize_subqueries)];
}

/// Assembles an [`Analyzer`] from the built-in batches plus embedder rules.
pub struct AnalyzerBuilder {
    catalog: Arc<dyn Catalog>,
    config: AnalyzerConfig,
    coster: Arc<dyn Coster>,
    carder: Arc<dyn Carder>,
    batches: Vec<(&'static str, Vec<Rule>)>,
}

impl AnalyzerBuilder {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        let batches = BATCH_ORDER
            .iter()
            .map(|name| {
                let rules = match *name {
                    ONCE_BEFORE => ONCE_BEFORE_RULES.clone(),
                    DEFAULT_RULES => DEFAULT_RULES_RULES.clone(),
                    ONCE_AFTER => ONCE_AFTER_RULES.clone(),
                    VALIDATION => VALIDATION_RULES.clone(),
                    AFTER_ALL => AFTER_ALL_RULES.clone(),
                    _ => vec![],
                };
                (*name, rules)
            })
            .collect();

        Self {
            catalog,
            config: AnalyzerConfig::default(),
            coster: Arc::new(DefaultCoster),
            carder: Arc::new(DefaultCarder),
            batches,
        }
    }

    pub fn with_config(mut self, config: AnalyzerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_coster(mut self, coster: Arc<dyn Coster>) -> Self {
        self.coster = coster;
        self
    }

    pub fn with_carder(mut self, carder: Arc<dyn Carder>) -> Self {
        self.carder = carder;
        self
    }

    fn add_rule(mut self, batch: &str, rule: Rule) -> Self {
        if let Some((_, rules)) = self.batches.iter_mut().find(|(name, _)| *name == batch) {
            rules.push(rule);
        }
        self
    }

    pub fn add_pre_analyze_rule(self, rule: Rule) -> Self {
        self.add_rule(PRE_ANALYZE, rule)
    }

    pub fn add_once_before_rule(self, rule: Rule) -> Self {
        self.add_rule(ONCE_BEFORE, rule)
    }

    pub fn add_default_rule(self, rule: Rule) -> Self {
        self.add_rule(DEFAULT_RULES, rule)
    }

    pub fn add_once_after_rule(self, rule: Rule) -> Self {
        self.add_rule(ONCE_AFTER, rule)
    }

    pub fn add_validation_rule(self, rule: Rule) -> Self {
        self.add_rule(VALIDATION, rule)
    }

    pub fn add_post_validation_rule(self, rule: Rule) -> Self {
        self.add_rule(POST_VALIDATION, rule)
    }

    pub fn add_after_all_rule(self, rule: Rule) -> Self {
        self.add_rule(AFTER_ALL, rule)
    }

    /// Drops rule `id` from every batch.
    pub fn remove_rule(mut self, id: RuleId) -> Self {
        for (_, rules) in &mut self.batches {
            rules.retain(|r| r.id != id);
        }
        self
    }

    pub fn build(self) -> OptResult<Analyzer> {
        let mut seen = BTreeSet::new();
        for rule in self.batches.iter().flat_map(|(_, rules)| rules) {
            if !seen.insert(rule.id) {
                return Err(AnalyzerError::DuplicateRule(rule.id));
            }
        }

        let max_default_iterations = self.config.max_default_iterations;
        let batches = self
            .batches
            .into_iter()
            .map(|(name, rules)| {
                let iterations = if name == DEFAULT_RULES {
                    max_default_iterations
                } else {
                    1
                };
                Batch::new(name, iterations, rules)
            })
            .collect();

        Ok(Analyzer {
            config: self.config,
            catalog: self.catalog,
            coster: self.coster,
            carder: self.carder,
            batches,
        })
    }
}

/// Drives the batch sequence over a plan.
pub struct Analyzer {
    config: AnalyzerConfig,
    catalog: Arc<dyn Catalog>,
    coster: Arc<dyn Coster>,
    carder: Arc<dyn Carder>,
    batches: Vec<Batch>,
}

pub type AnalyzeResult = Result<PlanNodeRef, AnalysisFailure>;

impl Analyzer {
    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn catalog(&self) -> &dyn Catalog {
        self.catalog.as_ref()
    }

    pub fn coster(&self) -> &dyn Coster {
        self.coster.as_ref()
    }

    pub fn carder(&self) -> &dyn Carder {
        self.carder.as_ref()
    }

    pub fn batch(&self, name: &str) -> Option<&Batch> {
        self.batches.iter().find(|b| b.name == name)
    }

    /// Runs the full batch sequence, or the abbreviated one for trivially shaped statements.
    pub fn analyze(
        &self,
        ctx: &Context,
        node: &PlanNodeRef,
        scope: &Scope,
        qflags: &QueryFlags,
    ) -> AnalyzeResult {
        self.analyze_with_selector(ctx, node, scope, &RuleSelector::all(), qflags)
    }

    pub fn analyze_with_selector(
        &self,
        ctx: &Context,
        node: &PlanNodeRef,
        scope: &Scope,
        sel: &RuleSelector,
        qflags: &QueryFlags,
    ) -> AnalyzeResult {
        match special_case_batches(node) {
            Some(names) => {
                debug!("analyzing {} with batches {:?}", node.describe(), names);
                let batches = self
                    .batches
                    .iter()
                    .filter(|b| names.contains(&b.name.as_str()));
                self.run(batches, ctx, node, scope, sel, qflags)
            }
            None => self.run(self.batches.iter(), ctx, node, scope, sel, qflags),
        }
    }

    /// Runs every batch up to and including `until`.
    pub fn analyze_through_batch(
        &self,
        ctx: &Context,
        node: &PlanNodeRef,
        scope: &Scope,
        until: &str,
        sel: &RuleSelector,
        qflags: &QueryFlags,
    ) -> AnalyzeResult {
        let end = self
            .batch_position(until)
            .map_err(|e| AnalysisFailure::new(node.clone(), e))?;
        self.run(self.batches[..=end].iter(), ctx, node, scope, sel, qflags)
    }

    /// Runs every batch from `start` onward.
    pub fn analyze_starting_at_batch(
        &self,
        ctx: &Context,
        node: &PlanNodeRef,
        scope: &Scope,
        start: &str,
        sel: &RuleSelector,
        qflags: &QueryFlags,
    ) -> AnalyzeResult {
        let begin = self
            .batch_position(start)
            .map_err(|e| AnalysisFailure::new(node.clone(), e))?;
        self.run(self.batches[begin..].iter(), ctx, node, scope, sel, qflags)
    }

    fn batch_position(&self, name: &str) -> OptResult<usize> {
        self.batches
            .iter()
            .position(|b| b.name == name)
            .ok_or_else(|| AnalyzerError::UnknownBatch(name.to_string()))
    }

    fn run<'a, I>(
        &self,
        batches: I,
        ctx: &Context,
        node: &PlanNodeRef,
        scope: &Scope,
        sel: &RuleSelector,
        qflags: &QueryFlags,
    ) -> AnalyzeResult
    where
        I: Iterator<Item = &'a Batch>,
    {
        let depth = scope.recursion_depth();
        if depth > self.config.max_recursion_depth {
            return Err(AnalysisFailure::new(
                node.clone(),
                AnalyzerError::RecursionLimit {
                    depth,
                    limit: self.config.max_recursion_depth,
                },
            ));
        }

        let mut current = node.clone();
        for batch in batches {
            let (next, _) = batch.eval(ctx, self, &current, scope, sel, qflags)?;
            current = next;
        }
        Ok(current)
    }
}

/// Abbreviated batch lists for statements that gain nothing from the full sequence.
fn special_case_batches(node: &PlanNode) -> Option<&'static [&'static str]> {
    match node {
        PlanNode::Transaction(_) => Some(&[AFTER_ALL]),
        PlanNode::InsertInto {
            destination,
            source,
        } if destination.table_node().is_some()
            && matches!(source.as_ref(), PlanNode::Values { .. }) =>
        {
            Some(&[ONCE_BEFORE, VALIDATION])
        }
        PlanNode::Update { child, .. } | PlanNode::Delete { child } if is_single_table(child) => {
            Some(&[ONCE_BEFORE, DEFAULT_RULES, ONCE_AFTER, VALIDATION])
        }
        _ => None,
    }
}

fn is_single_table(node: &PlanNode) -> bool {
    let complex = inspect(node, &mut |n| {
        matches!(
            n,
            PlanNode::Join(_)
                | PlanNode::SubqueryAlias { .. }
                | PlanNode::SetOp { .. }
                | PlanNode::Trigger { .. }
        )
    });
    !complex && !inspect_expressions(node, &mut |e| matches!(e, Expr::Subquery(_)))
}

/// Convenience for rules that only need the nested analysis result.
pub(crate) fn nested_result(result: AnalyzeResult) -> OptResult<PlanNodeRef> {
    result.map_err(AnalysisFailure::into_error)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::catalog::{ColumnDef, InMemoryCatalog, Table};
    use crate::plan::{TableNode, TransactionControl, TreeIdentity};

    fn table() -> PlanNodeRef {
        let t = Arc::new(Table::new("db", "t", vec![ColumnDef::new("id", false)]));
        PlanNode::ResolvedTable(TableNode::bind(t, 1, 1)).into_ref()
    }

    fn builder() -> AnalyzerBuilder {
        AnalyzerBuilder::new(Arc::new(InMemoryCatalog::new()))
    }

    fn counting(id: RuleId, counter: Arc<AtomicUsize>) -> Rule {
        Rule::new(id, move |_, _, n, _, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok((n.clone(), TreeIdentity::SameTree))
        })
    }

    #[test]
    fn test_default_rules_stop_after_iteration_cap() {
        let toggle = Rule::new(RuleId::Custom(1), |_, _, n, _, _, _| {
            let next = match n.as_ref() {
                PlanNode::Distinct { child } => child.clone(),
                _ => PlanNode::Distinct { child: n.clone() }.into_ref(),
            };
            Ok((next, TreeIdentity::NewTree))
        });
        let analyzer = builder().add_default_rule(toggle).build().unwrap();
        let plan = table();
        let failure = analyzer
            .analyze(&Context::new("select * from t"), &plan, &Scope::new(), &QueryFlags::new())
            .unwrap_err();
        match failure.error {
            AnalyzerError::IterationsExhausted { batch, limit } => {
                assert_eq!(batch, DEFAULT_RULES);
                assert_eq!(limit, 8);
            }
            other => panic!("unexpected error {other}"),
        }
        // eight toggles bring the plan back to where it started
        assert_eq!(failure.partial, plan);
    }

    #[test]
    fn test_selector_skips_rules() {
        let skipped = Arc::new(AtomicUsize::new(0));
        let kept = Arc::new(AtomicUsize::new(0));
        let analyzer = builder()
            .add_once_before_rule(counting(RuleId::Custom(2), skipped.clone()))
            .add_once_after_rule(counting(RuleId::Custom(3), kept.clone()))
            .build()
            .unwrap();
        let sel = RuleSelector::all().without(&[RuleId::Custom(2)]);
        analyzer
            .analyze_with_selector(
                &Context::new(""),
                &table(),
                &Scope::new(),
                &sel,
                &QueryFlags::new(),
            )
            .unwrap();
        assert_eq!(skipped.load(Ordering::SeqCst), 0);
        assert_eq!(kept.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_keeps_partial_plan() {
        let wrap = Rule::new(RuleId::Custom(4), |_, _, n, _, _, _| {
            Ok((PlanNode::Distinct { child: n.clone() }.into_ref(), TreeIdentity::NewTree))
        });
        let fail = Rule::new(RuleId::Custom(5), |_, _, _, _, _, _| {
            Err(AnalyzerError::Validation("boom".to_string()))
        });
        let analyzer = builder()
            .add_once_before_rule(wrap)
            .add_validation_rule(fail)
            .build()
            .unwrap();
        let failure = analyzer
            .analyze(&Context::new(""), &table(), &Scope::new(), &QueryFlags::new())
            .unwrap_err();
        assert!(matches!(failure.error, AnalyzerError::Validation(_)));
        assert!(matches!(failure.partial.as_ref(), PlanNode::Distinct { .. }));
    }

    #[test]
    fn test_failure_mid_batch_keeps_earlier_rule_output() {
        let unreached = Arc::new(AtomicUsize::new(0));
        let wrap = Rule::new(RuleId::Custom(12), |_, _, n, _, _, _| {
            Ok((PlanNode::Distinct { child: n.clone() }.into_ref(), TreeIdentity::NewTree))
        });
        let fail = Rule::new(RuleId::Custom(13), |_, _, _, _, _, _| {
            Err(AnalyzerError::Validation("boom".to_string()))
        });
        let analyzer = builder()
            .add_once_before_rule(wrap)
            .add_once_before_rule(fail)
            .add_once_before_rule(counting(RuleId::Custom(14), unreached.clone()))
            .build()
            .unwrap();
        let failure = analyzer
            .analyze(&Context::new(""), &table(), &Scope::new(), &QueryFlags::new())
            .unwrap_err();
        assert!(matches!(failure.error, AnalyzerError::Validation(_)));
        match failure.partial.as_ref() {
            PlanNode::Distinct { child } => assert_eq!(child, &table()),
            other => panic!("unexpected partial plan {}", other.describe()),
        }
        assert_eq!(unreached.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_insert_of_values_skips_default_rules() {
        let before = Arc::new(AtomicUsize::new(0));
        let default = Arc::new(AtomicUsize::new(0));
        let after = Arc::new(AtomicUsize::new(0));
        let validation = Arc::new(AtomicUsize::new(0));
        let analyzer = builder()
            .add_once_before_rule(counting(RuleId::Custom(15), before.clone()))
            .add_default_rule(counting(RuleId::Custom(16), default.clone()))
            .add_once_after_rule(counting(RuleId::Custom(17), after.clone()))
            .add_validation_rule(counting(RuleId::Custom(18), validation.clone()))
            .build()
            .unwrap();
        let plan = PlanNode::InsertInto {
            destination: table(),
            source: PlanNode::Values {
                rows: vec![vec![Expr::int(1)], vec![Expr::int(2)]],
            }
            .into_ref(),
        }
        .into_ref();
        analyzer
            .analyze(&Context::new("insert"), &plan, &Scope::new(), &QueryFlags::new())
            .unwrap();
        assert_eq!(before.load(Ordering::SeqCst), 1);
        assert_eq!(default.load(Ordering::SeqCst), 0);
        assert_eq!(after.load(Ordering::SeqCst), 0);
        assert_eq!(validation.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_single_table_update_and_delete_skip_final_batches() {
        let column = table().table_node().map(|t| t.columns[0].clone()).unwrap();
        let statements = vec![
            PlanNode::Update {
                set: vec![(column, Expr::int(1))],
                child: table(),
            }
            .into_ref(),
            PlanNode::Delete { child: table() }.into_ref(),
        ];
        for plan in statements {
            let default = Arc::new(AtomicUsize::new(0));
            let post_validation = Arc::new(AtomicUsize::new(0));
            let after_all = Arc::new(AtomicUsize::new(0));
            let analyzer = builder()
                .add_default_rule(counting(RuleId::Custom(19), default.clone()))
                .add_post_validation_rule(counting(RuleId::Custom(20), post_validation.clone()))
                .add_after_all_rule(counting(RuleId::Custom(21), after_all.clone()))
                .build()
                .unwrap();
            analyzer
                .analyze(&Context::new("update"), &plan, &Scope::new(), &QueryFlags::new())
                .unwrap();
            assert!(default.load(Ordering::SeqCst) >= 1, "{}", plan.describe());
            assert_eq!(post_validation.load(Ordering::SeqCst), 0, "{}", plan.describe());
            assert_eq!(after_all.load(Ordering::SeqCst), 0, "{}", plan.describe());
        }
    }

    #[test]
    fn test_duplicate_rule_is_rejected() {
        let dup = Rule::new(RuleId::PushdownFilters, |_, _, n, _, _, _| {
            Ok((n.clone(), TreeIdentity::SameTree))
        });
        let err = builder().add_after_all_rule(dup).build().err();
        assert!(matches!(err, Some(AnalyzerError::DuplicateRule(RuleId::PushdownFilters))));

        let removed = builder().remove_rule(RuleId::PushdownFilters).build().unwrap();
        let default_rules = removed.batch(DEFAULT_RULES).unwrap();
        assert!(default_rules.rules.iter().all(|r| r.id != RuleId::PushdownFilters));
    }

    #[test]
    fn test_transaction_runs_after_all_only() {
        let before = Arc::new(AtomicUsize::new(0));
        let after = Arc::new(AtomicUsize::new(0));
        let analyzer = builder()
            .add_once_before_rule(counting(RuleId::Custom(6), before.clone()))
            .add_after_all_rule(counting(RuleId::Custom(7), after.clone()))
            .build()
            .unwrap();
        let plan = PlanNode::Transaction(TransactionControl::Commit).into_ref();
        analyzer
            .analyze(&Context::new("commit"), &plan, &Scope::new(), &QueryFlags::new())
            .unwrap();
        assert_eq!(before.load(Ordering::SeqCst), 0);
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_batch_ranges() {
        let counter = Arc::new(AtomicUsize::new(0));
        let analyzer = builder()
            .add_after_all_rule(counting(RuleId::Custom(8), counter.clone()))
            .build()
            .unwrap();
        let (ctx, scope) = (Context::new(""), Scope::new());
        let (sel, qflags) = (RuleSelector::all(), QueryFlags::new());
        analyzer
            .analyze_through_batch(&ctx, &table(), &scope, DEFAULT_RULES, &sel, &qflags)
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        analyzer
            .analyze_starting_at_batch(&ctx, &table(), &scope, POST_ANALYZE, &sel, &qflags)
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let unknown = analyzer
            .analyze_through_batch(&ctx, &table(), &scope, "nope", &sel, &qflags)
            .unwrap_err();
        assert!(matches!(unknown.error, AnalyzerError::UnknownBatch(_)));
    }
}
