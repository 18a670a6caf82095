use thiserror::Error;

use crate::data::DataManager;
use crate::path::PathNode;
use crate::sweep::Coordinate;

/// Errors raised while building or evaluating a task graph, or while
/// stepping a loop strategy.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Input '{0}' is not bound to a value")]
    UnboundInput(PathNode),

    #[error("Task '{task}' has no port named '{port}'")]
    UnknownPort { task: PathNode, port: String },

    #[error("Task '{task}' is missing the required input '{port}'")]
    MissingInput { task: PathNode, port: String },

    #[error("Cyclic dependency through '{0}'; cycles must pass through a state or self-ref node")]
    CyclicDependency(PathNode),

    #[error("Invalid sweep bounds: {0}")]
    Domain(String),

    #[error("Bracket [{low}, {high}] does not straddle the bisection target")]
    Bracket { low: f64, high: f64 },

    #[error("Node '{0}' not found")]
    UnknownNode(String),

    #[error("Task '{task}' declares the port '{port}' twice")]
    DuplicatePort { task: PathNode, port: String },

    #[error("Invalid path '{0}'")]
    InvalidPath(String),

    #[error("Condition of '{node}' selected branch {index}, but only {count} exist")]
    InvalidBranch {
        node: PathNode,
        index: i64,
        count: usize,
    },

    #[error("Type mismatch: {0}")]
    Type(String),

    #[error("Loop feedback: {0}")]
    Feedback(String),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    #[error("Node '{0}':\n{1}")]
    Node(PathNode, anyhow::Error),
}

/// Errors raised by the sweep driver.
#[derive(Debug, Error)]
pub enum SweepError {
    /// The sweep could not start, e.g. a monitored name does not exist.
    #[error("Error while preparing the sweep:\n{0}")]
    Setup(#[from] FlowError),

    /// The sweep stopped at `coordinate`. Everything recorded before the
    /// failure is kept in `partial`.
    #[error("Sweep aborted at {coordinate}:\n{source}")]
    Aborted {
        coordinate: Coordinate,
        #[source]
        source: FlowError,
        partial: Box<DataManager>,
    },
}

impl SweepError {
    /// Results recorded before the sweep was aborted, if any.
    pub fn partial(&self) -> Option<&DataManager> {
        match self {
            SweepError::Setup(_) => None,
            SweepError::Aborted { partial, .. } => Some(partial),
        }
    }

    pub fn into_partial(self) -> Option<DataManager> {
        match self {
            SweepError::Setup(_) => None,
            SweepError::Aborted { partial, .. } => Some(*partial),
        }
    }
}
