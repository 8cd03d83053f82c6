use log::{debug, trace};

use crate::analyzer::{Analyzer, QueryFlags, Rule, RuleSelector, Scope};
use crate::context::Context;
use crate::error::{AnalysisFailure, AnalyzerError};
use crate::plan::{PlanNodeRef, TreeIdentity};

pub type BatchResult = Result<(PlanNodeRef, TreeIdentity), AnalysisFailure>;

/// Ordered rules applied together, up to `iterations` times.
///
/// With one iteration the rules are applied once. With more, the batch repeats until a full pass
/// leaves the tree unchanged, and fails with [`AnalyzerError::IterationsExhausted`] when the last
/// allowed pass still changed it.
#[derive(Clone, Debug)]
pub struct Batch {
    pub name: String,
    pub iterations: usize,
    pub rules: Vec<Rule>,
}

impl Batch {
    pub fn new<S: Into<String>>(name: S, iterations: usize, rules: Vec<Rule>) -> Self {
        Self {
            name: name.into(),
            iterations,
            rules,
        }
    }

    pub fn eval(
        &self,
        ctx: &Context,
        a: &Analyzer,
        node: &PlanNodeRef,
        scope: &Scope,
        sel: &RuleSelector,
        qflags: &QueryFlags,
    ) -> BatchResult {
        if self.iterations == 0 || self.rules.is_empty() {
            return Ok((node.clone(), TreeIdentity::SameTree));
        }

        debug!("evaluating batch {}", self.name);
        let mut current = node.clone();
        let mut same = TreeIdentity::SameTree;
        for iteration in 0..self.iterations {
            let (next, iteration_same) = self.eval_once(ctx, a, &current, scope, sel, qflags)?;
            current = next;
            same = same.and(iteration_same);

            if iteration_same.is_same() || self.iterations == 1 {
                return Ok((current, same));
            }
            trace!("batch {} iteration {} changed the plan", self.name, iteration);
        }

        Err(AnalysisFailure::new(
            current,
            AnalyzerError::IterationsExhausted {
                batch: self.name.clone(),
                limit: self.iterations,
            },
        ))
    }

    fn eval_once(
        &self,
        ctx: &Context,
        a: &Analyzer,
        node: &PlanNodeRef,
        scope: &Scope,
        sel: &RuleSelector,
        qflags: &QueryFlags,
    ) -> BatchResult {
        let mut current = node.clone();
        let mut same = TreeIdentity::SameTree;
        for rule in &self.rules {
            if !sel.select(rule.id) {
                trace!("skipping rule {}", rule.id);
                continue;
            }

            let (next, rule_same) = (rule.apply)(ctx, a, &current, scope, sel, qflags)
                .map_err(|e| AnalysisFailure::new(current.clone(), e))?;
            if !rule_same.is_same() {
                debug!("rule {} changed the plan", rule.id);
                if a.config().debug {
                    debug!("plan after {}:\n{}", rule.id, next);
                }
            }
            current = next;
            same = same.and(rule_same);
        }
        Ok((current, same))
    }
}
