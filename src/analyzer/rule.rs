use std::fmt;
use std::sync::Arc;

use strum_macros::AsRefStr;

use crate::analyzer::{Analyzer, QueryFlags, Scope};
use crate::context::Context;
use crate::plan::{PlanNodeRef, TransformResult};

/// Stable identity of a rule. Selectors refer to rules by id.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum RuleId {
    FlagQueryShape,
    ResolveProcedureCalls,
    PushdownFilters,
    ResolveSubqueries,
    ResolveUnions,
    OptimizeJoins,
    AnalyzeTriggers,
    AnalyzeProcedures,
    ValidateResolved,
    FinalizeSubqueries,
    /// Rules registered by embedders.
    Custom(u16),
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleId::Custom(id) => write!(f, "custom_{id}"),
            other => f.write_str(other.as_ref()),
        }
    }
}

pub type RuleFn = Arc<
    dyn Fn(&Context, &Analyzer, &PlanNodeRef, &Scope, &RuleSelector, &QueryFlags) -> TransformResult
        + Send
        + Sync,
>;

#[derive(Clone)]
pub struct Rule {
    pub id: RuleId,
    pub apply: RuleFn,
}

impl Rule {
    pub fn new<F>(id: RuleId, f: F) -> Self
    where
        F: Fn(
                &Context,
                &Analyzer,
                &PlanNodeRef,
                &Scope,
                &RuleSelector,
                &QueryFlags,
            ) -> TransformResult
            + Send
            + Sync
            + 'static,
    {
        Self {
            id,
            apply: Arc::new(f),
        }
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rule({})", self.id)
    }
}

/// Predicate deciding which rules run.
#[derive(Clone)]
pub struct RuleSelector(Arc<dyn Fn(RuleId) -> bool + Send + Sync>);

impl Default for RuleSelector {
    fn default() -> Self {
        RuleSelector::all()
    }
}

impl RuleSelector {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(RuleId) -> bool + Send + Sync + 'static,
    {
        RuleSelector(Arc::new(f))
    }

    pub fn all() -> Self {
        RuleSelector::new(|_| true)
    }

    pub fn select(&self, id: RuleId) -> bool {
        (self.0)(id)
    }

    /// This selector with `ids` forced off.
    pub fn without(&self, ids: &[RuleId]) -> Self {
        let parent = self.clone();
        let ids = ids.to_vec();
        RuleSelector::new(move |id| !ids.contains(&id) && parent.select(id))
    }

    /// This selector with `id` forced to `enabled`.
    pub fn forcing(&self, id: RuleId, enabled: bool) -> Self {
        let parent = self.clone();
        RuleSelector::new(move |r| if r == id { enabled } else { parent.select(r) })
    }

    /// Used while finalizing a subquery, whose nested subqueries were already finalized.
    pub fn finalize_subquery(&self) -> Self {
        self.without(&[RuleId::FinalizeSubqueries, RuleId::ResolveSubqueries])
    }
}

impl fmt::Debug for RuleSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RuleSelector")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_selectors_compose() {
        let base = RuleSelector::all().without(&[RuleId::OptimizeJoins]);
        assert!(!base.select(RuleId::OptimizeJoins));
        assert!(base.select(RuleId::PushdownFilters));

        let forced = base.forcing(RuleId::OptimizeJoins, true);
        assert!(forced.select(RuleId::OptimizeJoins));

        let finalize = forced.finalize_subquery();
        assert!(!finalize.select(RuleId::FinalizeSubqueries));
        assert!(finalize.select(RuleId::OptimizeJoins));
    }

    #[test]
    fn test_rule_id_display() {
        assert_eq!(RuleId::OptimizeJoins.to_string(), "optimize_joins");
        assert_eq!(RuleId::Custom(7).to_string(), "custom_7");
    }
}
