//! The dataflow graph.
//!
//! Nodes live in a `petgraph::Graph`, with an edge from every upstream node
//! to each of its dependents. Values are computed lazily and cached. When an
//! input changes, the input and everything downstream of it is marked dirty;
//! nothing is recomputed until a value is requested.
//!
//! ## Early cutoff
//!
//! Every computation records the fingerprints of the upstream values it read,
//! in read order. A dirty node first brings those upstream nodes up to date
//! and compares fingerprints; if none changed, the cached value is still
//! valid and the node's function is not called. Because reads are replayed
//! in order, a conditional whose condition is unchanged only re-checks the
//! branch it selected last time.
//!
//! ## Feedback
//!
//! `SelfRef` and `State` nodes read the committed history of their source
//! instead of its live value. The edge from the source is a feedback edge,
//! which is ignored by cycle detection and invalidation. Histories advance
//! only in [`Graph::step`].

mod history;
mod node;

use std::collections::{HashMap, HashSet};
use std::fmt;

use petgraph::Direction;
use petgraph::graph::{EdgeReference, NodeIndex};
use petgraph::visit::{Dfs, EdgeFiltered, EdgeRef};

pub(crate) use history::History;
pub use node::NodeFn;
pub(crate) use node::{Edge, Node, NodeKind};

use crate::core::Hash32;
use crate::error::FlowError;
use crate::path::PathNode;
use crate::value::Value;

/// Lightweight token pointing at a node of one [`Graph`].
///
/// Ids are only handed out by the graph that owns the node. Using an id with
/// a different graph is a logic error and may panic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) NodeIndex);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0.index()
    }
}

fn is_data(edge: EdgeReference<'_, Edge>) -> bool {
    *edge.weight() == Edge::Data
}

/// A graph of computation nodes rooted at a path.
pub struct Graph {
    root: PathNode,
    graph: petgraph::Graph<Node, Edge>,
    paths: HashMap<PathNode, NodeId>,
}

impl Graph {
    pub fn new(root: PathNode) -> Self {
        Self {
            root,
            graph: petgraph::Graph::new(),
            paths: HashMap::new(),
        }
    }

    pub fn root(&self) -> &PathNode {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn path(&self, id: NodeId) -> &PathNode {
        &self.graph[id.0].path
    }

    /// Looks a node up by its name relative to the root, e.g. `gain` or
    /// `stage/gain`.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.paths.get(&self.root.child(name)).copied()
    }

    /// Like [`Graph::find`], failing with [`FlowError::UnknownNode`].
    pub fn lookup(&self, name: &str) -> Result<NodeId, FlowError> {
        self.find(name)
            .ok_or_else(|| FlowError::UnknownNode(self.root.child(name).to_string()))
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.graph.node_indices().map(NodeId)
    }

    /// Name of the node variant, e.g. `sum` or `state`.
    pub fn kind(&self, id: NodeId) -> &'static str {
        self.graph[id.0].kind.name()
    }

    /// Upstream nodes, including feedback sources.
    pub fn dependencies(&self, id: NodeId) -> Vec<NodeId> {
        let mut deps: Vec<_> = self
            .graph
            .neighbors_directed(id.0, Direction::Incoming)
            .map(NodeId)
            .collect();
        deps.sort();
        deps.dedup();
        deps
    }

    /// Downstream nodes, including feedback targets.
    pub fn dependents(&self, id: NodeId) -> Vec<NodeId> {
        let mut deps: Vec<_> = self
            .graph
            .neighbors_directed(id.0, Direction::Outgoing)
            .map(NodeId)
            .collect();
        deps.sort();
        deps.dedup();
        deps
    }

    pub fn is_dirty(&self, id: NodeId) -> bool {
        let node = &self.graph[id.0];
        node.forced || node.dirty || node.cache.is_none()
    }

    /// How many times the node's value was actually computed.
    pub fn evaluations(&self, id: NodeId) -> usize {
        self.graph[id.0].evaluations
    }

    /// Committed values of a `State` or `SelfRef` node, seed first.
    pub fn history(&self, id: NodeId) -> Option<&[Value]> {
        self.graph[id.0].kind.history().map(History::entries)
    }

    // ******************************
    // *        Construction        *
    // ******************************

    /// Literal constant.
    pub fn value(&mut self, name: &str, value: impl Into<Value>) -> NodeId {
        self.add(name, NodeKind::Value(value.into()))
    }

    /// Settable node; reading it while unbound and without a default fails
    /// with [`FlowError::UnboundInput`].
    pub fn input(&mut self, name: &str, default: Option<Value>) -> NodeId {
        self.add(
            name,
            NodeKind::Input {
                default,
                bound: None,
            },
        )
    }

    pub fn tuple(&mut self, name: &str, deps: impl IntoIterator<Item = NodeId>) -> NodeId {
        self.add(name, NodeKind::Tuple(deps.into_iter().collect()))
    }

    /// Forwards the value of `target` without owning it.
    pub fn reference(&mut self, name: &str, target: NodeId) -> NodeId {
        self.add(name, NodeKind::Ref(target))
    }

    /// Reads the previous committed value of a target bound later with
    /// [`Graph::bind_self_ref`]. Until the first step it reads `seed`.
    pub fn self_ref(&mut self, name: &str, seed: impl Into<Value>) -> NodeId {
        self.add(
            name,
            NodeKind::SelfRef {
                target: None,
                history: History::new(seed.into()),
            },
        )
    }

    /// Value carried across iterations. It starts at `seed` and only changes
    /// when [`Graph::step`] commits the node bound with
    /// [`Graph::bind_state`].
    pub fn state(&mut self, name: &str, seed: impl Into<Value>) -> NodeId {
        self.add(
            name,
            NodeKind::State {
                update: None,
                history: History::new(seed.into()),
            },
        )
    }

    /// Evaluates `condition`, then only the selected branch: `true` selects
    /// the first branch, `false` the second, an int selects by index.
    pub fn conditional(
        &mut self,
        name: &str,
        condition: NodeId,
        branches: impl IntoIterator<Item = NodeId>,
    ) -> NodeId {
        self.add(
            name,
            NodeKind::Conditional {
                condition,
                branches: branches.into_iter().collect(),
            },
        )
    }

    pub fn sum(&mut self, name: &str, deps: impl IntoIterator<Item = NodeId>) -> NodeId {
        self.add(name, NodeKind::Sum(deps.into_iter().collect()))
    }

    pub fn squeeze(&mut self, name: &str, target: NodeId) -> NodeId {
        self.add(name, NodeKind::Squeeze(target))
    }

    /// Computation over the values of `deps`, passed in the same order.
    pub fn func<F>(&mut self, name: &str, deps: impl IntoIterator<Item = NodeId>, func: F) -> NodeId
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.add(
            name,
            NodeKind::Func {
                deps: deps.into_iter().collect(),
                func: std::sync::Arc::new(func),
            },
        )
    }

    /// # Panics
    /// If a dependency id belongs to another graph.
    fn add(&mut self, name: &str, kind: NodeKind) -> NodeId {
        let path = self.unique_path(if name.is_empty() { kind.name() } else { name });
        let dependencies = kind.dependencies();
        let id = NodeId(self.graph.add_node(Node::new(path.clone(), kind)));

        for dependency in dependencies {
            self.graph.add_edge(dependency.0, id.0, Edge::Data);
        }

        self.paths.insert(path, id);
        id
    }

    fn unique_path(&self, name: &str) -> PathNode {
        let path = self.root.child(name);
        if !self.paths.contains_key(&path) {
            return path;
        }

        (2..)
            .map(|n| self.root.child(&format!("{name}#{n}")))
            .find(|path| !self.paths.contains_key(path))
            .unwrap_or(path)
    }

    /// Declares that `downstream` also reads `upstream`.
    ///
    /// Only tuple, sum and func nodes accept extra dependencies; the new
    /// value is appended to their argument list.
    pub fn connect(&mut self, downstream: NodeId, upstream: NodeId) -> Result<(), FlowError> {
        if downstream == upstream || self.reaches(downstream, upstream) {
            return Err(FlowError::CyclicDependency(self.path(downstream).clone()));
        }

        let node = &mut self.graph[downstream.0];
        match &mut node.kind {
            NodeKind::Tuple(deps) | NodeKind::Sum(deps) | NodeKind::Func { deps, .. } => {
                deps.push(upstream)
            }
            other => {
                return Err(FlowError::Type(format!(
                    "cannot connect a dependency to the {} node '{}'",
                    other.name(),
                    node.path
                )));
            }
        }

        self.graph.add_edge(upstream.0, downstream.0, Edge::Data);
        // the recorded reads no longer cover every argument
        self.invalidate(downstream);
        Ok(())
    }

    /// Sets the node whose previous value the self-ref reads.
    pub fn bind_self_ref(&mut self, self_ref: NodeId, target: NodeId) -> Result<(), FlowError> {
        let node = &mut self.graph[self_ref.0];
        match &mut node.kind {
            NodeKind::SelfRef { target: slot, .. } => *slot = Some(target),
            other => {
                return Err(FlowError::Type(format!(
                    "'{}' is a {} node, not a self-ref",
                    node.path,
                    other.name()
                )));
            }
        }

        self.graph.add_edge(target.0, self_ref.0, Edge::Feedback);
        Ok(())
    }

    /// Sets the node committed into the state on every step.
    pub fn bind_state(&mut self, state: NodeId, update: NodeId) -> Result<(), FlowError> {
        let node = &mut self.graph[state.0];
        match &mut node.kind {
            NodeKind::State { update: slot, .. } => *slot = Some(update),
            other => {
                return Err(FlowError::Type(format!(
                    "'{}' is a {} node, not a state",
                    node.path,
                    other.name()
                )));
            }
        }

        self.graph.add_edge(update.0, state.0, Edge::Feedback);
        Ok(())
    }

    /// True when `to` is reachable from `from` over data edges.
    fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let data = EdgeFiltered::from_fn(&self.graph, is_data);
        petgraph::algo::has_path_connecting(&data, from.0, to.0, None)
    }

    /// Checks that every self-ref has a target and every cycle passes
    /// through a feedback edge.
    pub fn validate(&self) -> Result<(), FlowError> {
        if let Some(node) = self
            .graph
            .node_weights()
            .find(|node| matches!(node.kind, NodeKind::SelfRef { target: None, .. }))
        {
            return Err(FlowError::Feedback(format!(
                "self-ref '{}' was never bound to a target",
                node.path
            )));
        }

        let data = EdgeFiltered::from_fn(&self.graph, is_data);
        match petgraph::algo::toposort(&data, None) {
            Ok(_) => Ok(()),
            Err(cycle) => Err(FlowError::CyclicDependency(
                self.graph[cycle.node_id()].path.clone(),
            )),
        }
    }

    // ******************************
    // *         Evaluation         *
    // ******************************

    /// Binds a value to an input node. Returns whether the bound value
    /// changed; an equal value leaves the graph untouched.
    pub fn set_input(&mut self, id: NodeId, value: impl Into<Value>) -> Result<bool, FlowError> {
        let value = value.into();
        let node = &mut self.graph[id.0];

        match &mut node.kind {
            NodeKind::Input { bound, .. } => {
                if bound.as_ref() == Some(&value) {
                    return Ok(false);
                }
                *bound = Some(value);
            }
            other => {
                return Err(FlowError::Type(format!(
                    "cannot bind a value to the {} node '{}'",
                    other.name(),
                    node.path
                )));
            }
        }

        self.mark_dirty(id);
        Ok(true)
    }

    /// Whether an input node has a bound value or a default.
    pub fn is_bound(&self, id: NodeId) -> bool {
        match &self.graph[id.0].kind {
            NodeKind::Input { default, bound } => bound.is_some() || default.is_some(),
            _ => true,
        }
    }

    /// Forces the node to recompute on its next evaluation and marks every
    /// downstream node dirty.
    pub fn invalidate(&mut self, id: NodeId) {
        let node = &mut self.graph[id.0];
        if !node.is_constant() {
            node.forced = true;
        }
        self.mark_dirty(id);
    }

    fn mark_dirty(&mut self, id: NodeId) {
        let reached = {
            let data = EdgeFiltered::from_fn(&self.graph, is_data);
            let mut dfs = Dfs::new(&data, id.0);
            let mut reached = Vec::new();
            while let Some(index) = dfs.next(&data) {
                reached.push(index);
            }
            reached
        };

        for index in reached {
            let node = &mut self.graph[index];
            if !node.is_constant() {
                node.dirty = true;
            }
        }
    }

    /// Returns the node's value, recomputing it and its dirty upstream nodes
    /// in dependency order.
    pub fn evaluate(&mut self, id: NodeId) -> Result<Value, FlowError> {
        let mut visiting = HashSet::new();
        self.pull(id, &mut visiting)
    }

    fn pull(&mut self, id: NodeId, visiting: &mut HashSet<NodeId>) -> Result<Value, FlowError> {
        let node = &self.graph[id.0];
        if !node.dirty && !node.forced {
            if let Some(value) = &node.cache {
                return Ok(value.clone());
            }
        }

        if !visiting.insert(id) {
            return Err(FlowError::CyclicDependency(node.path.clone()));
        }

        let result = self.refresh(id, visiting);
        visiting.remove(&id);
        result
    }

    fn refresh(&mut self, id: NodeId, visiting: &mut HashSet<NodeId>) -> Result<Value, FlowError> {
        let node = &self.graph[id.0];
        if !node.forced && !node.reads.is_empty() {
            if let Some(cached) = node.cache.clone() {
                if self.reads_unchanged(id, visiting)? {
                    let node = &mut self.graph[id.0];
                    node.dirty = false;
                    tracing::trace!(node = %node.path, "inputs unchanged, keeping cached value");
                    return Ok(cached);
                }
            }
        }

        let mut reads = Vec::new();
        let value = self.compute(id, &mut reads, visiting)?;

        let node = &mut self.graph[id.0];
        node.cache = Some(value.clone());
        node.dirty = false;
        node.forced = false;
        node.reads = reads;
        node.evaluations += 1;
        tracing::debug!(node = %node.path, value = %value, "evaluated");

        Ok(value)
    }

    fn reads_unchanged(
        &mut self,
        id: NodeId,
        visiting: &mut HashSet<NodeId>,
    ) -> Result<bool, FlowError> {
        let reads = self.graph[id.0].reads.clone();
        for (dependency, fingerprint) in reads {
            let value = self.pull(dependency, visiting)?;
            if Hash32::of(&value) != fingerprint {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn read(
        &mut self,
        id: NodeId,
        reads: &mut Vec<(NodeId, Hash32)>,
        visiting: &mut HashSet<NodeId>,
    ) -> Result<Value, FlowError> {
        let value = self.pull(id, visiting)?;
        reads.push((id, Hash32::of(&value)));
        Ok(value)
    }

    fn read_all(
        &mut self,
        ids: &[NodeId],
        reads: &mut Vec<(NodeId, Hash32)>,
        visiting: &mut HashSet<NodeId>,
    ) -> Result<Vec<Value>, FlowError> {
        ids.iter()
            .map(|&id| self.read(id, reads, visiting))
            .collect()
    }

    fn compute(
        &mut self,
        id: NodeId,
        reads: &mut Vec<(NodeId, Hash32)>,
        visiting: &mut HashSet<NodeId>,
    ) -> Result<Value, FlowError> {
        let node = &self.graph[id.0];
        let path = node.path.clone();

        match &node.kind {
            NodeKind::Value(value) => Ok(value.clone()),
            NodeKind::Input { default, bound } => bound
                .as_ref()
                .or(default.as_ref())
                .cloned()
                .ok_or(FlowError::UnboundInput(path)),
            NodeKind::SelfRef { history, .. } | NodeKind::State { history, .. } => {
                Ok(history.current().clone())
            }
            NodeKind::Tuple(deps) => {
                let deps = deps.clone();
                Ok(Value::Tuple(self.read_all(&deps, reads, visiting)?))
            }
            NodeKind::Ref(target) => {
                let target = *target;
                self.read(target, reads, visiting)
            }
            NodeKind::Squeeze(target) => {
                let target = *target;
                Ok(match self.read(target, reads, visiting)? {
                    Value::Tuple(mut items) if items.len() == 1 => items.remove(0),
                    other => other,
                })
            }
            NodeKind::Sum(deps) => {
                let deps = deps.clone();
                let values = self.read_all(&deps, reads, visiting)?;
                let mut values = values.into_iter();
                match values.next() {
                    Some(first) => values.try_fold(first, |acc, value| acc.try_add(&value)),
                    None => Ok(Value::Int(0)),
                }
            }
            NodeKind::Conditional {
                condition,
                branches,
            } => {
                let (condition, branches) = (*condition, branches.clone());
                let selector = self.read(condition, reads, visiting)?;
                let index = select_branch(&path, &selector, branches.len())?;
                self.read(branches[index], reads, visiting)
            }
            NodeKind::Func { deps, func } => {
                let (deps, func) = (deps.clone(), func.clone());
                let args = self.read_all(&deps, reads, visiting)?;
                func(&args).map_err(|err| FlowError::Node(path, err))
            }
        }
    }

    // ******************************
    // *          Feedback          *
    // ******************************

    /// Commits one iteration: every bound state and self-ref appends the
    /// current value of its source. All sources are evaluated before any
    /// history changes.
    pub fn step(&mut self) -> Result<(), FlowError> {
        let sources: Vec<(NodeId, NodeId)> = self
            .graph
            .node_indices()
            .filter_map(|index| {
                self.graph[index]
                    .kind
                    .feedback_source()
                    .map(|source| (NodeId(index), source))
            })
            .collect();

        let mut commits = Vec::with_capacity(sources.len());
        for (id, source) in sources {
            commits.push((id, self.evaluate(source)?));
        }

        for (id, value) in commits {
            let changed = match self.graph[id.0].kind.history_mut() {
                Some(history) => history.commit(value),
                None => false,
            };
            if changed {
                self.invalidate(id);
            }
        }

        Ok(())
    }

    /// Rewinds every state and self-ref to its seed.
    pub fn reset_state(&mut self) {
        let indices: Vec<NodeIndex> = self.graph.node_indices().collect();
        for index in indices {
            let changed = match self.graph[index].kind.history_mut() {
                Some(history) => history.reset(),
                None => false,
            };
            if changed {
                self.invalidate(NodeId(index));
            }
        }
    }
}

fn select_branch(path: &PathNode, selector: &Value, count: usize) -> Result<usize, FlowError> {
    let index = match selector {
        Value::Bool(true) => 0,
        Value::Bool(false) => 1,
        Value::Int(index) => *index,
        other => {
            return Err(FlowError::Type(format!(
                "condition of '{path}' must be a bool or an int, got {}",
                other.type_name()
            )));
        }
    };

    match usize::try_from(index) {
        Ok(i) if i < count => Ok(i),
        _ => Err(FlowError::InvalidBranch {
            node: path.clone(),
            index,
            count,
        }),
    }
}

/// Renders the graph as a Mermaid flowchart. Feedback edges are dotted.
impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let node = &self.graph[index];
            let name = node
                .path
                .relative_to(&self.root)
                .unwrap_or_else(|| node.path.clone())
                .to_string()
                .replace('"', "\\\"");
            writeln!(
                f,
                "    {}[\"{} ({})\"]",
                index.index(),
                name,
                node.kind.name()
            )?;
        }

        for edge in self.graph.edge_references() {
            let arrow = match edge.weight() {
                Edge::Data => "-->",
                Edge::Feedback => "-.->",
            };
            writeln!(
                f,
                "    {} {} {}",
                edge.source().index(),
                arrow,
                edge.target().index()
            )?;
        }

        Ok(())
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("root", &self.root)
            .field("nodes", &self.graph.node_count())
            .field("edges", &self.graph.edge_count())
            .finish()
    }
}
