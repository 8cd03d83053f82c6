use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::plan::{ColumnRef, PlanNode, PlanNodeRef};

/// Stored procedures visible to a statement, keyed by lowercase name and arity.
#[derive(Clone, Debug, Default)]
pub struct ProcedureCache {
    procedures: HashMap<(String, usize), PlanNodeRef>,
}

impl ProcedureCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a [`PlanNode::Procedure`]; other nodes are ignored.
    pub fn add(&mut self, procedure: PlanNodeRef) {
        if let PlanNode::Procedure { name, params, .. } = procedure.as_ref() {
            self.procedures
                .insert((name.to_lowercase(), params.len()), procedure.clone());
        }
    }

    pub fn get(&self, name: &str, arity: usize) -> Option<PlanNodeRef> {
        self.procedures.get(&(name.to_lowercase(), arity)).cloned()
    }
}

#[derive(Debug)]
struct ScopeFrame {
    node: Option<PlanNodeRef>,
    parent: Option<Arc<ScopeFrame>>,
    recursion_depth: usize,
    in_join: bool,
    in_lateral: bool,
    procedures: Option<Arc<ProcedureCache>>,
    enforce_read_only: bool,
}

/// Chain of enclosing query contexts.
///
/// A scope is never modified; every `with_*` call returns a new head sharing the rest of the
/// chain. The join tree log is shared by the whole chain.
#[derive(Clone, Debug)]
pub struct Scope {
    frame: Arc<ScopeFrame>,
    join_trees: Arc<Mutex<Vec<String>>>,
}

impl Default for Scope {
    fn default() -> Self {
        Self {
            frame: Arc::new(ScopeFrame {
                node: None,
                parent: None,
                recursion_depth: 0,
                in_join: false,
                in_lateral: false,
                procedures: None,
                enforce_read_only: false,
            }),
            join_trees: Arc::new(Mutex::new(vec![])),
        }
    }
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    fn derive(&self, f: impl FnOnce(&mut ScopeFrame)) -> Scope {
        let mut frame = ScopeFrame {
            node: self.frame.node.clone(),
            parent: self.frame.parent.clone(),
            recursion_depth: self.frame.recursion_depth,
            in_join: self.frame.in_join,
            in_lateral: self.frame.in_lateral,
            procedures: self.frame.procedures.clone(),
            enforce_read_only: self.frame.enforce_read_only,
        };
        f(&mut frame);
        Scope {
            frame: Arc::new(frame),
            join_trees: self.join_trees.clone(),
        }
    }

    /// Scope for a nested analysis of something inside `node`. Increments the recursion depth.
    /// The lateral flag only describes the level it was set on and is cleared.
    pub fn nested(&self, node: &PlanNodeRef) -> Scope {
        let parent = self.frame.clone();
        self.derive(|f| {
            f.node = Some(node.clone());
            f.parent = Some(parent);
            f.recursion_depth += 1;
            f.in_lateral = false;
        })
    }

    pub fn with_in_join(&self, in_join: bool) -> Scope {
        self.derive(|f| f.in_join = in_join)
    }

    pub fn with_in_lateral(&self, in_lateral: bool) -> Scope {
        self.derive(|f| f.in_lateral = in_lateral)
    }

    pub fn with_procedures(&self, procedures: Arc<ProcedureCache>) -> Scope {
        self.derive(|f| f.procedures = Some(procedures))
    }

    pub fn with_read_only(&self) -> Scope {
        self.derive(|f| f.enforce_read_only = true)
    }

    pub fn recursion_depth(&self) -> usize {
        self.frame.recursion_depth
    }

    pub fn in_join(&self) -> bool {
        self.frame.in_join
    }

    pub fn in_lateral(&self) -> bool {
        self.frame.in_lateral
    }

    pub fn enforce_read_only(&self) -> bool {
        self.frame.enforce_read_only
    }

    pub fn procedures(&self) -> Option<&Arc<ProcedureCache>> {
        self.frame.procedures.as_ref()
    }

    /// True at the top level of a statement.
    pub fn is_empty(&self) -> bool {
        self.frame.node.is_none()
    }

    /// Columns of every enclosing node, innermost first.
    pub fn outer_schema(&self) -> Vec<ColumnRef> {
        let mut out = vec![];
        let mut frame = Some(&self.frame);
        while let Some(f) = frame {
            if let Some(node) = &f.node {
                out.extend(node.schema());
            }
            frame = f.parent.as_ref();
        }
        out
    }

    /// Whether any enclosing node satisfies `f`.
    pub fn encloses<F: FnMut(&PlanNode) -> bool>(&self, f: &mut F) -> bool {
        let mut frame = Some(&self.frame);
        while let Some(fr) = frame {
            if fr.node.as_deref().map_or(false, |n| f(n)) {
                return true;
            }
            frame = fr.parent.as_ref();
        }
        false
    }

    pub fn record_join_tree(&self, tree: String) {
        if let Ok(mut trees) = self.join_trees.lock() {
            trees.push(tree);
        }
    }

    pub fn join_trees(&self) -> Vec<String> {
        self.join_trees
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }
}
