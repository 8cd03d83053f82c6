//! Join enumeration.
//!
//! [`JoinOrderBuilder`] turns a join tree into memo groups. Maximal trees of inner and cross
//! joins become regions: their inputs are vertices and their conjuncts are edges over the
//! set of vertices they reference. The original shape is memoized first, then every
//! connected split of every vertex subset joined by at least one edge adds an inner join
//! alternative (in both orders) to the group of that subset. Outer, semi and anti joins are
//! never reordered with their neighbours; each side is enumerated on its own.

use std::collections::HashMap;

use log::debug;
use petgraph::graphmap::UnGraphMap;

use crate::error::{AnalyzerError, OptResult};
use crate::memo::{leaf_for, GroupId, Index, JoinRel, Memo, RelExpr};
use crate::plan::{Expr, IndexAccess, JoinKind, JoinStrategy, PlanNode, PlanNodeRef};

/// Set of vertices of one region, one bit per vertex.
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct VertexSet(u64);

impl VertexSet {
    pub fn single(v: usize) -> Self {
        VertexSet(1 << v)
    }

    pub fn union(self, other: VertexSet) -> Self {
        VertexSet(self.0 | other.0)
    }

    pub fn is_subset_of(self, other: VertexSet) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn contains(self, v: usize) -> bool {
        self.0 & (1 << v) != 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn first(self) -> Option<usize> {
        (!self.is_empty()).then(|| self.0.trailing_zeros() as usize)
    }
}

struct Edge {
    vertices: VertexSet,
    filter: Expr,
}

enum Shape {
    Leaf(usize),
    Join(Box<Shape>, Box<Shape>),
}

/// Populates a [`Memo`] with every join order of a join tree.
pub struct JoinOrderBuilder<'m, 'a> {
    memo: &'m mut Memo<'a>,
    max_relations: usize,
}

impl<'m, 'a> JoinOrderBuilder<'m, 'a> {
    pub fn new(memo: &'m mut Memo<'a>, max_relations: usize) -> Self {
        Self {
            memo,
            max_relations: max_relations.min(63),
        }
    }

    /// Memoizes `node` and returns its group. Fails with
    /// [`AnalyzerError::UnsupportedReorder`] on shapes the builder cannot take apart.
    pub fn reorder_join(&mut self, node: &PlanNodeRef) -> OptResult<GroupId> {
        let root = self.populate(node)?;
        self.memo.set_root(root);
        Ok(root)
    }

    fn populate(&mut self, node: &PlanNodeRef) -> OptResult<GroupId> {
        if let Some(leaf) = leaf_for(node) {
            return self.memo.memoize_leaf(leaf);
        }
        match node.as_ref() {
            PlanNode::Join(j) if j.strategy != JoinStrategy::NestedLoop => Err(unsupported(node)),
            PlanNode::Join(j) if matches!(j.kind, JoinKind::Inner | JoinKind::Cross) => {
                self.populate_region(node)
            }
            PlanNode::Filter { child, .. } if is_inner_join(child) => self.populate_region(node),
            PlanNode::Join(j)
                if matches!(j.kind, JoinKind::Left | JoinKind::Semi | JoinKind::Anti) =>
            {
                let left = self.populate(&j.left)?;
                let right = self.populate(&j.right)?;
                let filter = j.filter.iter().flat_map(|f| f.split_conjunction()).collect();
                self.memo.memoize_join(j.kind, left, right, filter)
            }
            PlanNode::Filter { predicate, child } => {
                let child = self.populate(child)?;
                self.memo.memoize_filter(child, predicate.split_conjunction())
            }
            PlanNode::Project { exprs, child } => {
                let child = self.populate(child)?;
                self.memo.memoize_project(child, exprs.clone())
            }
            PlanNode::Distinct { child } => {
                let child = self.populate(child)?;
                self.memo.memoize_distinct(child)
            }
            PlanNode::Limit { count, child } => {
                let child = self.populate(child)?;
                let props = &mut self.memo.group_mut(child)?.props;
                if props.limit.is_some() {
                    return Err(unsupported(node));
                }
                props.limit = Some(count.clone());
                Ok(child)
            }
            PlanNode::Sort { fields, child } => {
                let child = self.populate(child)?;
                let props = &mut self.memo.group_mut(child)?.props;
                if props.limit.is_some() || !props.sort.is_empty() {
                    return Err(unsupported(node));
                }
                props.sort = fields.clone();
                Ok(child)
            }
            PlanNode::IndexedTableAccess(ita) => match &ita.access {
                IndexAccess::Static(ranges) => {
                    let index = ita
                        .source
                        .table_node()
                        .and_then(|t| {
                            Index::for_table(t)
                                .into_iter()
                                .find(|i| i.def == ita.index)
                        })
                        .ok_or_else(|| unsupported(node))?;
                    let scan = self.memo.index_scan(&ita.source, &index, ranges.clone())?;
                    self.memo.memoize_leaf(RelExpr::IndexScan(scan))
                }
                IndexAccess::Lookup(_) => Err(unsupported(node)),
            },
            _ => Err(unsupported(node)),
        }
    }

    fn populate_region(&mut self, node: &PlanNodeRef) -> OptResult<GroupId> {
        let mut vertices = vec![];
        let mut filters = vec![];
        let shape = self.collect(node, &mut vertices, &mut filters)?;
        if vertices.len() > 63 {
            return Err(unsupported(node));
        }

        let tables: Vec<_> = vertices
            .iter()
            .map(|v| self.memo.props(*v).map(|p| p.output_tables.clone()))
            .collect::<OptResult<_>>()?;
        let mut edges = vec![];
        let mut local: HashMap<usize, Vec<Expr>> = HashMap::new();
        for filter in filters {
            let refs = filter.table_ids();
            let set = tables
                .iter()
                .enumerate()
                .filter(|(_, t)| !t.is_disjoint(&refs))
                .fold(VertexSet::default(), |acc, (i, _)| acc.union(VertexSet::single(i)));
            if set.len() <= 1 {
                // constant or single relation conjuncts filter the vertex itself
                local.entry(set.first().unwrap_or(0)).or_default().push(filter);
            } else {
                edges.push(Edge { vertices: set, filter });
            }
        }
        for (v, filters) in local {
            vertices[v] = self.memo.memoize_filter(vertices[v], filters)?;
        }

        let mut plans: HashMap<VertexSet, GroupId> = vertices
            .iter()
            .enumerate()
            .map(|(i, g)| (VertexSet::single(i), *g))
            .collect();
        let (all, root) = self.build_shape(&shape, &vertices, &edges, &mut plans)?;

        if vertices.len() <= self.max_relations {
            self.enumerate(vertices.len(), &edges, &mut plans)?;
        } else {
            debug!(
                "{} relations exceed the enumeration limit, keeping the written join order",
                vertices.len()
            );
        }
        debug_assert_eq!(plans.get(&all), Some(&root));
        Ok(root)
    }

    /// Splits an inner join tree into vertices and conjuncts.
    fn collect(
        &mut self,
        node: &PlanNodeRef,
        vertices: &mut Vec<GroupId>,
        filters: &mut Vec<Expr>,
    ) -> OptResult<Shape> {
        match node.as_ref() {
            PlanNode::Join(j) if is_inner_join(node) => {
                filters.extend(j.filter.iter().flat_map(|f| f.split_conjunction()));
                let left = self.collect(&j.left, vertices, filters)?;
                let right = self.collect(&j.right, vertices, filters)?;
                Ok(Shape::Join(Box::new(left), Box::new(right)))
            }
            PlanNode::Filter { predicate, child } if is_inner_join(child) => {
                filters.extend(predicate.split_conjunction());
                self.collect(child, vertices, filters)
            }
            _ => {
                vertices.push(self.populate(node)?);
                Ok(Shape::Leaf(vertices.len() - 1))
            }
        }
    }

    fn build_shape(
        &mut self,
        shape: &Shape,
        vertices: &[GroupId],
        edges: &[Edge],
        plans: &mut HashMap<VertexSet, GroupId>,
    ) -> OptResult<(VertexSet, GroupId)> {
        match shape {
            Shape::Leaf(v) => Ok((VertexSet::single(*v), vertices[*v])),
            Shape::Join(l, r) => {
                let (ls, lg) = self.build_shape(l, vertices, edges, plans)?;
                let (rs, rg) = self.build_shape(r, vertices, edges, plans)?;
                let filters = applicable(edges, ls, rs);
                let kind = if filters.is_empty() { JoinKind::Cross } else { JoinKind::Inner };
                let group = self.memo.memoize_join(kind, lg, rg, filters.clone())?;
                self.memo
                    .add_join_to_group(group, JoinRel::new(kind, rg, lg, filters))?;
                plans.insert(ls.union(rs), group);
                Ok((ls.union(rs), group))
            }
        }
    }

    /// Adds an inner join for every connected split of every connected vertex subset.
    fn enumerate(
        &mut self,
        n: usize,
        edges: &[Edge],
        plans: &mut HashMap<VertexSet, GroupId>,
    ) -> OptResult<()> {
        let mut graph = UnGraphMap::<usize, ()>::new();
        for v in 0..n {
            graph.add_node(v);
        }
        for edge in edges {
            let members: Vec<usize> = (0..n).filter(|v| edge.vertices.contains(*v)).collect();
            for (i, a) in members.iter().enumerate() {
                for b in &members[i + 1..] {
                    graph.add_edge(*a, *b, ());
                }
            }
        }

        let full: u64 = if n == 64 { u64::MAX } else { (1u64 << n) - 1 };
        for bits in 1..=full {
            let subset = VertexSet(bits);
            if subset.len() < 2 || !connected(&graph, subset) {
                continue;
            }
            let mut s1 = (bits - 1) & bits;
            while s1 > 0 {
                let s2 = bits & !s1;
                if s1 < s2 {
                    self.add_plans(VertexSet(s1), VertexSet(s2), edges, plans)?;
                }
                s1 = (s1 - 1) & bits;
            }
        }
        Ok(())
    }

    fn add_plans(
        &mut self,
        s1: VertexSet,
        s2: VertexSet,
        edges: &[Edge],
        plans: &mut HashMap<VertexSet, GroupId>,
    ) -> OptResult<()> {
        let (left, right) = match (plans.get(&s1), plans.get(&s2)) {
            (Some(l), Some(r)) => (*l, *r),
            _ => return Ok(()),
        };
        let filters = applicable(edges, s1, s2);
        if filters.is_empty() {
            return Ok(());
        }
        let union = s1.union(s2);
        let group = match plans.get(&union) {
            Some(group) => {
                let join = JoinRel::new(JoinKind::Inner, left, right, filters.clone());
                self.memo.add_join_to_group(*group, join)?;
                *group
            }
            None => {
                let group = self.memo.memoize_join(JoinKind::Inner, left, right, filters.clone())?;
                plans.insert(union, group);
                group
            }
        };
        self.memo
            .add_join_to_group(group, JoinRel::new(JoinKind::Inner, right, left, filters))
    }
}

/// Conjuncts that first become evaluable when `s1` and `s2` are joined.
fn applicable(edges: &[Edge], s1: VertexSet, s2: VertexSet) -> Vec<Expr> {
    let union = s1.union(s2);
    edges
        .iter()
        .filter(|e| {
            e.vertices.is_subset_of(union)
                && !e.vertices.is_subset_of(s1)
                && !e.vertices.is_subset_of(s2)
        })
        .map(|e| e.filter.clone())
        .collect()
}

fn connected(graph: &UnGraphMap<usize, ()>, subset: VertexSet) -> bool {
    let start = match subset.first() {
        Some(v) => v,
        None => return false,
    };
    let mut reached = VertexSet::single(start);
    let mut stack = vec![start];
    while let Some(v) = stack.pop() {
        for next in graph.neighbors(v) {
            if subset.contains(next) && !reached.contains(next) {
                reached = reached.union(VertexSet::single(next));
                stack.push(next);
            }
        }
    }
    reached == subset
}

fn is_inner_join(node: &PlanNodeRef) -> bool {
    match node.as_ref() {
        PlanNode::Join(j) => {
            matches!(j.kind, JoinKind::Inner | JoinKind::Cross)
                && j.strategy == JoinStrategy::NestedLoop
        }
        _ => false,
    }
}

fn unsupported(node: &PlanNodeRef) -> AnalyzerError {
    AnalyzerError::UnsupportedReorder(node.describe())
}
