use std::sync::Arc;

use crate::core::Hash32;
use crate::graph::{History, NodeId};
use crate::path::PathNode;
use crate::value::Value;

/// User computation wrapped by a `Func` node.
pub type NodeFn = Arc<dyn Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync>;

/// Kind of dependency edge between two nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Edge {
    /// The target reads the live value of the source.
    Data,
    /// The target reads the committed history of the source, so the edge
    /// may close a cycle.
    Feedback,
}

/// The closed set of node variants. Each variant has one evaluation arm in
/// [`Graph::compute`](crate::graph::Graph).
pub(crate) enum NodeKind {
    /// Literal constant.
    Value(Value),
    /// Backing node of an input port.
    Input {
        default: Option<Value>,
        bound: Option<Value>,
    },
    Tuple(Vec<NodeId>),
    /// Non-owning alias of another node.
    Ref(NodeId),
    /// Previous committed value of `target`.
    SelfRef {
        target: Option<NodeId>,
        history: History,
    },
    /// Value carried across iterations, replaced by `update` on each step.
    State {
        update: Option<NodeId>,
        history: History,
    },
    Conditional {
        condition: NodeId,
        branches: Vec<NodeId>,
    },
    Sum(Vec<NodeId>),
    /// Unwraps a one-element tuple.
    Squeeze(NodeId),
    Func {
        deps: Vec<NodeId>,
        func: NodeFn,
    },
}

impl NodeKind {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            NodeKind::Value(_) => "value",
            NodeKind::Input { .. } => "input",
            NodeKind::Tuple(_) => "tuple",
            NodeKind::Ref(_) => "ref",
            NodeKind::SelfRef { .. } => "selfref",
            NodeKind::State { .. } => "state",
            NodeKind::Conditional { .. } => "conditional",
            NodeKind::Sum(_) => "sum",
            NodeKind::Squeeze(_) => "squeeze",
            NodeKind::Func { .. } => "func",
        }
    }

    /// Upstream nodes read through data edges.
    pub(crate) fn dependencies(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Value(_)
            | NodeKind::Input { .. }
            | NodeKind::SelfRef { .. }
            | NodeKind::State { .. } => vec![],
            NodeKind::Tuple(deps) | NodeKind::Sum(deps) | NodeKind::Func { deps, .. } => {
                deps.clone()
            }
            NodeKind::Ref(target) | NodeKind::Squeeze(target) => vec![*target],
            NodeKind::Conditional {
                condition,
                branches,
            } => std::iter::once(*condition)
                .chain(branches.iter().copied())
                .collect(),
        }
    }

    /// Node whose value a feedback node commits on each step.
    pub(crate) fn feedback_source(&self) -> Option<NodeId> {
        match self {
            NodeKind::SelfRef { target, .. } => *target,
            NodeKind::State { update, .. } => *update,
            _ => None,
        }
    }

    pub(crate) fn history_mut(&mut self) -> Option<&mut History> {
        match self {
            NodeKind::SelfRef { history, .. } | NodeKind::State { history, .. } => Some(history),
            _ => None,
        }
    }

    pub(crate) fn history(&self) -> Option<&History> {
        match self {
            NodeKind::SelfRef { history, .. } | NodeKind::State { history, .. } => Some(history),
            _ => None,
        }
    }
}

pub(crate) struct Node {
    pub path: PathNode,
    pub kind: NodeKind,
    pub cache: Option<Value>,
    /// Something upstream may have changed since `cache` was computed.
    pub dirty: bool,
    /// Explicitly invalidated, recompute even if the inputs look unchanged.
    pub forced: bool,
    /// Upstream values read by the last computation, in read order.
    pub reads: Vec<(NodeId, Hash32)>,
    pub evaluations: usize,
}

impl Node {
    pub(crate) fn new(path: PathNode, kind: NodeKind) -> Self {
        Self {
            path,
            kind,
            cache: None,
            dirty: true,
            forced: false,
            reads: Vec::new(),
            evaluations: 0,
        }
    }

    pub(crate) fn is_constant(&self) -> bool {
        matches!(self.kind, NodeKind::Value(_))
    }
}
