//! Tasks: named computations with input and output ports.
//!
//! A [`Task`] owns a closed [`Graph`]. Its [`Input`] ports are backed by input
//! nodes that callers bind values to, its [`Output`] ports expose internal
//! nodes. Tasks are wired once through a [`TaskBuilder`] and then run any
//! number of times; a run replaces values, never structure.
//!
//! ```rust
//! use floopy::{Task, Value};
//!
//! let mut design = Task::design("amp");
//! let x = design.input("x");
//! let gain = design.input_with_default("gain", 2.0);
//! let y = design.func("y", [x, gain], |args| {
//!     let (x, gain) = (args[0].as_f64().unwrap_or_default(), args[1].as_f64().unwrap_or_default());
//!     Ok(Value::Float(x * gain))
//! });
//! design.output("y", y);
//!
//! let mut task = design.finish().unwrap();
//! let outputs = task.run([("x", 1.5)]).unwrap();
//! assert_eq!(outputs["y"], Value::Float(3.0));
//! ```

use std::collections::BTreeMap;
use std::fmt;

use crate::error::FlowError;
use crate::graph::{Graph, NodeId};
use crate::path::PathNode;
use crate::value::Value;

/// Output port name to value, as returned by [`Task::run`].
pub type Outputs = BTreeMap<String, Value>;

/// A named attachment point on a task, bound to exactly one internal node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Port {
    pub name: String,
    pub node: NodeId,
}

/// Port accepting external values.
pub type Input = Port;

/// Port exposing an internal node's value.
pub type Output = Port;

pub struct Task {
    name: String,
    path: PathNode,
    graph: Graph,
    inputs: Vec<Input>,
    outputs: Vec<Output>,
    last: Option<Outputs>,
    runs: usize,
}

impl Task {
    /// The entry point for wiring a new task.
    pub fn design(name: impl Into<String>) -> TaskBuilder {
        TaskBuilder::new(name.into(), PathNode::root())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &PathNode {
        &self.path
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    /// Number of runs that actually evaluated the graph.
    pub fn runs(&self) -> usize {
        self.runs
    }

    pub fn input(&self, name: &str) -> Option<&Input> {
        self.inputs.iter().find(|port| port.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&Output> {
        self.outputs.iter().find(|port| port.name == name)
    }

    fn input_node(&self, name: &str) -> Result<NodeId, FlowError> {
        self.input(name)
            .map(|port| port.node)
            .ok_or_else(|| FlowError::UnknownPort {
                task: self.path.clone(),
                port: name.to_string(),
            })
    }

    /// Resolves a name to an output port, an input port, or an internal
    /// node, in that order.
    pub fn resolve(&self, name: &str) -> Result<NodeId, FlowError> {
        self.output(name)
            .or_else(|| self.input(name))
            .map(|port| port.node)
            .or_else(|| self.graph.find(name))
            .ok_or_else(|| FlowError::UnknownPort {
                task: self.path.clone(),
                port: name.to_string(),
            })
    }

    /// Binds a single input. Bindings persist across runs.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<bool, FlowError> {
        let node = self.input_node(name)?;
        self.graph.set_input(node, value)
    }

    /// Binds `inputs`, evaluates the graph and returns every output port.
    ///
    /// All names are checked before anything is bound, so an unknown port
    /// leaves the task untouched. Inputs not mentioned keep their previous
    /// binding or default. When no input changed value and no output is
    /// dirty, the previous outputs are returned without touching the graph.
    pub fn run<I, K, V>(&mut self, inputs: I) -> Result<Outputs, FlowError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let bindings = inputs
            .into_iter()
            .map(|(name, value)| Ok((self.input_node(name.as_ref())?, value.into())))
            .collect::<Result<Vec<_>, FlowError>>()?;

        let mut changed = false;
        for (node, value) in bindings {
            changed |= self.graph.set_input(node, value)?;
        }

        if let Some(port) = self.inputs.iter().find(|port| !self.graph.is_bound(port.node)) {
            return Err(FlowError::MissingInput {
                task: self.path.clone(),
                port: port.name.clone(),
            });
        }

        if !changed {
            if let Some(last) = &self.last {
                if self.outputs.iter().all(|port| !self.graph.is_dirty(port.node)) {
                    tracing::trace!(task = %self.path, "inputs unchanged, reusing outputs");
                    return Ok(last.clone());
                }
            }
        }

        let mut outputs = Outputs::new();
        for port in &self.outputs {
            outputs.insert(port.name.clone(), self.graph.evaluate(port.node)?);
        }

        self.runs += 1;
        self.last = Some(outputs.clone());
        tracing::debug!(task = %self.path, run = self.runs, "task evaluated");

        Ok(outputs)
    }

    /// Current value of a port or internal node, see [`Task::resolve`].
    pub fn value(&mut self, name: &str) -> Result<Value, FlowError> {
        let node = self.resolve(name)?;
        self.graph.evaluate(node)
    }

    /// Forces a port or internal node to recompute on the next run.
    pub fn invalidate(&mut self, name: &str) -> Result<(), FlowError> {
        let node = self.resolve(name)?;
        self.graph.invalidate(node);
        Ok(())
    }

    /// Commits one iteration of every state and self-ref node.
    pub fn step(&mut self) -> Result<(), FlowError> {
        self.graph.step()
    }

    /// Rewinds every state and self-ref node to its seed.
    pub fn reset_state(&mut self) {
        self.graph.reset_state()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("path", &self.path)
            .field("inputs", &self.inputs.iter().map(|p| &p.name).collect::<Vec<_>>())
            .field("outputs", &self.outputs.iter().map(|p| &p.name).collect::<Vec<_>>())
            .field("graph", &self.graph)
            .finish()
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.graph.fmt(f)
    }
}

/// Wires the graph of a [`Task`].
///
/// Construction errors such as a duplicate port or a cyclic `connect` are
/// collected and reported by [`TaskBuilder::finish`], so the builder methods
/// can be chained without handling results at every step.
pub struct TaskBuilder {
    name: String,
    path: PathNode,
    graph: Graph,
    inputs: Vec<Input>,
    outputs: Vec<Output>,
    error: Option<FlowError>,
}

impl TaskBuilder {
    fn new(name: String, parent: PathNode) -> Self {
        let path = parent.child(&name);
        Self {
            name,
            graph: Graph::new(path.clone()),
            path,
            inputs: Vec::new(),
            outputs: Vec::new(),
            error: None,
        }
    }

    /// Places the task below `parent` instead of the root.
    pub fn under(self, parent: &PathNode) -> Self {
        Self::new(self.name, parent.clone())
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    fn fail(&mut self, error: FlowError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn declare(&mut self, is_input: bool, name: &str, node: NodeId) {
        let ports = if is_input {
            &mut self.inputs
        } else {
            &mut self.outputs
        };

        if ports.iter().any(|port| port.name == name) {
            let error = FlowError::DuplicatePort {
                task: self.path.clone(),
                port: name.to_string(),
            };
            self.fail(error);
            return;
        }

        ports.push(Port {
            name: name.to_string(),
            node,
        });
    }

    /// Required input port.
    pub fn input(&mut self, name: &str) -> NodeId {
        let node = self.graph.input(name, None);
        self.declare(true, name, node);
        node
    }

    /// Optional input port falling back to `default`.
    pub fn input_with_default(&mut self, name: &str, default: impl Into<Value>) -> NodeId {
        let node = self.graph.input(name, Some(default.into()));
        self.declare(true, name, node);
        node
    }

    /// Exposes `node` as an output port.
    pub fn output(&mut self, name: &str, node: NodeId) -> &mut Self {
        self.declare(false, name, node);
        self
    }

    pub fn constant(&mut self, name: &str, value: impl Into<Value>) -> NodeId {
        self.graph.value(name, value)
    }

    pub fn func<F>(&mut self, name: &str, deps: impl IntoIterator<Item = NodeId>, func: F) -> NodeId
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.graph.func(name, deps, func)
    }

    pub fn sum(&mut self, name: &str, deps: impl IntoIterator<Item = NodeId>) -> NodeId {
        self.graph.sum(name, deps)
    }

    pub fn tuple(&mut self, name: &str, deps: impl IntoIterator<Item = NodeId>) -> NodeId {
        self.graph.tuple(name, deps)
    }

    pub fn reference(&mut self, name: &str, target: NodeId) -> NodeId {
        self.graph.reference(name, target)
    }

    pub fn squeeze(&mut self, name: &str, target: NodeId) -> NodeId {
        self.graph.squeeze(name, target)
    }

    pub fn conditional(
        &mut self,
        name: &str,
        condition: NodeId,
        branches: impl IntoIterator<Item = NodeId>,
    ) -> NodeId {
        self.graph.conditional(name, condition, branches)
    }

    /// Previous value of a node bound later with [`TaskBuilder::feed`].
    pub fn self_ref(&mut self, name: &str, seed: impl Into<Value>) -> NodeId {
        self.graph.self_ref(name, seed)
    }

    /// Makes `self_ref` read the previous value of `target`.
    pub fn feed(&mut self, self_ref: NodeId, target: NodeId) -> &mut Self {
        if let Err(error) = self.graph.bind_self_ref(self_ref, target) {
            self.fail(error);
        }
        self
    }

    /// Value carried across loop iterations, see [`TaskBuilder::update`].
    pub fn state(&mut self, name: &str, seed: impl Into<Value>) -> NodeId {
        self.graph.state(name, seed)
    }

    /// Makes `state` take the value of `update` on every step.
    pub fn update(&mut self, state: NodeId, update: NodeId) -> &mut Self {
        if let Err(error) = self.graph.bind_state(state, update) {
            self.fail(error);
        }
        self
    }

    /// Adds `upstream` as an extra dependency of `downstream`.
    pub fn connect(&mut self, downstream: NodeId, upstream: NodeId) -> &mut Self {
        if let Err(error) = self.graph.connect(downstream, upstream) {
            self.fail(error);
        }
        self
    }

    /// Validates the wiring and returns the runnable task.
    pub fn finish(self) -> Result<Task, FlowError> {
        if let Some(error) = self.error {
            return Err(error);
        }

        self.graph.validate()?;

        tracing::debug!(
            task = %self.path,
            nodes = self.graph.len(),
            inputs = self.inputs.len(),
            outputs = self.outputs.len(),
            "task designed"
        );

        Ok(Task {
            name: self.name,
            path: self.path,
            graph: self.graph,
            inputs: self.inputs,
            outputs: self.outputs,
            last: None,
            runs: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn adder(calls: Arc<AtomicUsize>) -> Task {
        let mut design = Task::design("adder");
        let a = design.input("a");
        let b = design.input_with_default("b", 10);
        let total = design.func("total", [a, b], move |args| {
            calls.fetch_add(1, Ordering::SeqCst);
            args[0].try_add(&args[1]).map_err(anyhow::Error::from)
        });
        design.output("total", total);
        design.finish().unwrap()
    }

    #[test]
    fn test_run_binds_and_evaluates() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut task = adder(calls.clone());

        let outputs = task.run([("a", 1)]).unwrap();
        assert_eq!(outputs.get("total"), Some(&Value::Int(11)));

        let outputs = task.run([("a", 1), ("b", 5)]).unwrap();
        assert_eq!(outputs["total"], Value::Int(6));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_run_short_circuits_on_equal_inputs() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut task = adder(calls.clone());

        task.run([("a", 2)]).unwrap();
        task.run([("a", 2)]).unwrap();
        task.run(Vec::<(&str, Value)>::new()).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(task.runs(), 1);
    }

    #[test]
    fn test_run_unknown_port() {
        let mut task = adder(Arc::new(AtomicUsize::new(0)));
        let err = task.run([("a", 1), ("c", 2)]).unwrap_err();
        assert!(matches!(err, FlowError::UnknownPort { ref port, .. } if port == "c"));

        // nothing was bound
        assert!(matches!(
            task.run(Vec::<(&str, Value)>::new()),
            Err(FlowError::MissingInput { .. })
        ));
    }

    #[test]
    fn test_run_missing_input() {
        let mut task = adder(Arc::new(AtomicUsize::new(0)));
        let err = task.run([("b", 1)]).unwrap_err();
        assert!(matches!(err, FlowError::MissingInput { ref port, .. } if port == "a"));
        assert_eq!(err.to_string(), "Task 'adder' is missing the required input 'a'");
    }

    #[test]
    fn test_duplicate_port() {
        let mut design = Task::design("dup");
        design.input("x");
        design.input("x");
        assert!(matches!(design.finish(), Err(FlowError::DuplicatePort { .. })));
    }

    #[test]
    fn test_cyclic_connect_fails_at_finish() {
        let mut design = Task::design("cyclic");
        let x = design.input("x");
        let a = design.sum("a", [x]);
        let b = design.sum("b", [a]);
        design.connect(a, b);
        assert!(matches!(design.finish(), Err(FlowError::CyclicDependency(_))));
    }

    #[test]
    fn test_resolve_and_value() {
        let mut design = Task::design("resolve").under(&PathNode::root().child("bench"));
        let x = design.input("x");
        let inner = design.sum("inner", [x, x]);
        let shown = design.reference("shown", inner);
        design.output("out", shown);
        let mut task = design.finish().unwrap();

        assert_eq!(task.path().to_string(), "bench/resolve");
        task.set("x", 4).unwrap();
        assert_eq!(task.value("out").unwrap(), Value::Int(8));
        assert_eq!(task.value("inner").unwrap(), Value::Int(8));
        assert_eq!(task.value("x").unwrap(), Value::Int(4));
        assert!(matches!(task.value("nope"), Err(FlowError::UnknownPort { .. })));
    }

    #[test]
    fn test_state_and_step() {
        let mut design = Task::design("acc");
        let x = design.input("x");
        let total = design.state("total", 0);
        let next = design.sum("next", [total, x]);
        design.update(total, next).output("total", next);
        let mut task = design.finish().unwrap();

        assert_eq!(task.run([("x", 2)]).unwrap()["total"], Value::Int(2));
        task.step().unwrap();
        // same input, but the state moved on
        assert_eq!(task.run([("x", 2)]).unwrap()["total"], Value::Int(4));

        task.reset_state();
        assert_eq!(task.run([("x", 2)]).unwrap()["total"], Value::Int(2));
    }

    #[test]
    fn test_self_ref_feed() {
        let mut design = Task::design("delta");
        let x = design.input("x");
        let previous = design.self_ref("previous", 0);
        let delta = design.func("delta", [x, previous], |args| {
            args[0]
                .as_i64()
                .zip(args[1].as_i64())
                .map(|(x, prev)| Value::Int(x - prev))
                .ok_or_else(|| anyhow::anyhow!("expected ints"))
        });
        design.feed(previous, x).output("delta", delta);
        let mut task = design.finish().unwrap();

        assert_eq!(task.run([("x", 3)]).unwrap()["delta"], Value::Int(3));
        task.step().unwrap();
        assert_eq!(task.run([("x", 10)]).unwrap()["delta"], Value::Int(7));

        let mut unfed = Task::design("unfed");
        unfed.self_ref("previous", 0);
        assert!(matches!(unfed.finish(), Err(FlowError::Feedback(_))));
    }

    #[test]
    fn test_invalidate_reruns() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut task = adder(calls.clone());
        task.run([("a", 1)]).unwrap();
        task.invalidate("total").unwrap();
        task.run([("a", 1)]).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
