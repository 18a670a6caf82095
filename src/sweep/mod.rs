//! Sweep strategies.
//!
//! A strategy is a lazy, bounded sequence of coordinate values. Every
//! strategy implements [`Sequence`]; the closed [`Strategy`] enum dispatches
//! to them so strategies can be nested inside a [`ConcatLoop`] and bound to a
//! task input through a [`LoopSystem`].
//!
//! All strategies except [`LoopBisect`] are pure: their next value never
//! depends on what the task produced. Bisection reads the outputs of the
//! previous coordinate through [`Sequence::feedback`].

mod bisect;
mod concat;
mod counting;
mod linear;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use crate::sweep::bisect::{BisectTarget, LoopBisect};
pub use crate::sweep::concat::ConcatLoop;
pub use crate::sweep::counting::CountingLoop;
pub use crate::sweep::linear::{LoopLin, LoopLog};

use crate::core::Hash32;
use crate::error::FlowError;
use crate::task::Outputs;
use crate::value::Value;

/// Common contract of the loop strategies.
pub trait Sequence {
    /// Yields the next coordinate value, `None` once exhausted.
    fn advance(&mut self) -> Result<Option<Value>, FlowError>;

    /// Restarts from the initial state.
    fn reset(&mut self);

    /// Outputs of the task evaluated at the last yielded value.
    fn feedback(&mut self, _outputs: &Outputs) -> Result<(), FlowError> {
        Ok(())
    }

    /// Number of values a fresh sequence yields, if known up front.
    fn len_hint(&self) -> Option<usize> {
        None
    }

    /// Output port whose value this sequence reads back.
    fn watched(&self) -> Option<&str> {
        None
    }

    /// Binds the strategy to a task input.
    fn over(self, target: impl Into<String>) -> LoopSystem
    where
        Self: Sized + Into<Strategy>,
    {
        LoopSystem::new(target, self)
    }
}

pub enum Strategy {
    Counting(CountingLoop),
    Concat(ConcatLoop),
    Lin(LoopLin),
    Log(LoopLog),
    Bisect(LoopBisect),
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Counting(_) => "loop_count",
            Strategy::Concat(_) => "loop",
            Strategy::Lin(_) => "loop_lin",
            Strategy::Log(_) => "loop_log",
            Strategy::Bisect(_) => "loop_bisect",
        }
    }
}

impl Sequence for Strategy {
    fn advance(&mut self) -> Result<Option<Value>, FlowError> {
        match self {
            Strategy::Counting(s) => s.advance(),
            Strategy::Concat(s) => s.advance(),
            Strategy::Lin(s) => s.advance(),
            Strategy::Log(s) => s.advance(),
            Strategy::Bisect(s) => s.advance(),
        }
    }

    fn reset(&mut self) {
        match self {
            Strategy::Counting(s) => s.reset(),
            Strategy::Concat(s) => s.reset(),
            Strategy::Lin(s) => s.reset(),
            Strategy::Log(s) => s.reset(),
            Strategy::Bisect(s) => s.reset(),
        }
    }

    fn feedback(&mut self, outputs: &Outputs) -> Result<(), FlowError> {
        match self {
            Strategy::Counting(s) => s.feedback(outputs),
            Strategy::Concat(s) => s.feedback(outputs),
            Strategy::Lin(s) => s.feedback(outputs),
            Strategy::Log(s) => s.feedback(outputs),
            Strategy::Bisect(s) => s.feedback(outputs),
        }
    }

    fn len_hint(&self) -> Option<usize> {
        match self {
            Strategy::Counting(s) => s.len_hint(),
            Strategy::Concat(s) => s.len_hint(),
            Strategy::Lin(s) => s.len_hint(),
            Strategy::Log(s) => s.len_hint(),
            Strategy::Bisect(s) => s.len_hint(),
        }
    }

    fn watched(&self) -> Option<&str> {
        match self {
            Strategy::Counting(s) => s.watched(),
            Strategy::Concat(s) => s.watched(),
            Strategy::Lin(s) => s.watched(),
            Strategy::Log(s) => s.watched(),
            Strategy::Bisect(s) => s.watched(),
        }
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Strategy({})", self.name())
    }
}

impl From<CountingLoop> for Strategy {
    fn from(value: CountingLoop) -> Self {
        Strategy::Counting(value)
    }
}

impl From<ConcatLoop> for Strategy {
    fn from(value: ConcatLoop) -> Self {
        Strategy::Concat(value)
    }
}

impl From<LoopLin> for Strategy {
    fn from(value: LoopLin) -> Self {
        Strategy::Lin(value)
    }
}

impl From<LoopLog> for Strategy {
    fn from(value: LoopLog) -> Self {
        Strategy::Log(value)
    }
}

impl From<LoopBisect> for Strategy {
    fn from(value: LoopBisect) -> Self {
        Strategy::Bisect(value)
    }
}

// ******************************
// *          Factories         *
// ******************************

/// `0, 1, …, n-1`.
pub fn loop_count(n: usize) -> CountingLoop {
    CountingLoop::new(n)
}

/// Loop over explicit items.
pub fn loop_items<I, V>(items: I) -> ConcatLoop
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    ConcatLoop::items(items)
}

/// Concatenation of several strategies.
pub fn loop_concat<I, S>(sources: I) -> ConcatLoop
where
    I: IntoIterator<Item = S>,
    S: Into<Strategy>,
{
    ConcatLoop::new(sources)
}

pub fn loop_lin(start: f64, stop: f64, n: usize) -> LoopLin {
    LoopLin::new(start, stop, n)
}

pub fn loop_log(start: f64, stop: f64, n: usize) -> LoopLog {
    LoopLog::new(start, stop, n)
}

pub fn loop_bisect(low: f64, high: f64) -> LoopBisect {
    LoopBisect::new(low, high)
}

// ******************************
// *        Coordinates         *
// ******************************

/// One loop's contribution to a coordinate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    /// Input port driven by the loop.
    pub name: String,
    /// Position within the loop's sequence.
    pub index: usize,
    pub value: Value,
}

/// Position of one evaluation within a sweep, outer loop first.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Coordinate {
    axes: Vec<Axis>,
}

impl Coordinate {
    pub fn new(axes: Vec<Axis>) -> Self {
        Self { axes }
    }

    /// Builds a coordinate from `(name, value)` pairs, indices left at zero.
    ///
    /// Only the first step of each loop has index zero; use
    /// [`CoordinateFilter::Exact`](crate::CoordinateFilter::Exact) to match
    /// a point regardless of the step it was recorded at.
    pub fn of<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            axes: pairs
                .into_iter()
                .map(|(name, value)| Axis {
                    name: name.into(),
                    index: 0,
                    value: value.into(),
                })
                .collect(),
        }
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.axes
            .iter()
            .find(|axis| axis.name == name)
            .map(|axis| &axis.value)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.axes.iter().map(|axis| &axis.value)
    }

    /// Identity of the coordinate: axis names, step indices and values.
    /// Equal values yielded at distinct steps are distinct coordinates.
    pub(crate) fn key(&self) -> Hash32 {
        let axes: Vec<(&str, usize, &Value)> = self
            .axes
            .iter()
            .map(|axis| (axis.name.as_str(), axis.index, &axis.value))
            .collect();
        Hash32::of(&axes)
    }

    /// Compares axis names and values only, ignoring step indices.
    pub fn same_point(&self, other: &Coordinate) -> bool {
        self.axes.len() == other.axes.len()
            && self
                .axes
                .iter()
                .zip(&other.axes)
                .all(|(a, b)| a.name == b.name && a.value == b.value)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.axes.is_empty() {
            return write!(f, "()");
        }

        for (i, axis) in self.axes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", axis.name, axis.value)?;
        }
        Ok(())
    }
}

// ******************************
// *        Loop systems        *
// ******************************

/// A strategy bound to the task input it drives.
#[derive(Debug)]
pub struct LoopSystem {
    target: String,
    strategy: Strategy,
    position: usize,
    stopped: bool,
}

impl LoopSystem {
    pub fn new(target: impl Into<String>, strategy: impl Into<Strategy>) -> Self {
        Self {
            target: target.into(),
            strategy: strategy.into(),
            position: 0,
            stopped: false,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Number of coordinates yielded since the last reset.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Ends the loop early; the next advance reports exhaustion.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn advance(&mut self) -> Result<Option<Axis>, FlowError> {
        if self.stopped {
            return Ok(None);
        }

        let Some(value) = self.strategy.advance()? else {
            return Ok(None);
        };

        let axis = Axis {
            name: self.target.clone(),
            index: self.position,
            value,
        };
        self.position += 1;
        Ok(Some(axis))
    }

    pub fn feedback(&mut self, outputs: &Outputs) -> Result<(), FlowError> {
        self.strategy.feedback(outputs)
    }

    pub fn reset(&mut self) {
        self.strategy.reset();
        self.position = 0;
        self.stopped = false;
    }

    pub fn len_hint(&self) -> Option<usize> {
        self.strategy.len_hint()
    }

    pub fn watched(&self) -> Option<&str> {
        self.strategy.watched()
    }
}

/// Drains a pure strategy, for tests and previews.
#[cfg(test)]
pub(crate) fn collect(strategy: &mut impl Sequence) -> Result<Vec<Value>, FlowError> {
    let mut values = Vec::new();
    while let Some(value) = strategy.advance()? {
        values.push(value);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_system_axes() {
        let mut lp = loop_count(3).over("x");
        assert_eq!(lp.len_hint(), Some(3));

        let first = lp.advance().unwrap().unwrap();
        assert_eq!(first.name, "x");
        assert_eq!(first.index, 0);
        assert_eq!(first.value, Value::Int(0));

        lp.advance().unwrap();
        assert_eq!(lp.position(), 2);

        lp.stop();
        assert!(lp.advance().unwrap().is_none());

        lp.reset();
        assert!(!lp.is_stopped());
        assert_eq!(lp.advance().unwrap().unwrap().value, Value::Int(0));
    }

    #[test]
    fn test_coordinate_identity() {
        let at = |index| {
            Coordinate::new(vec![Axis {
                name: "x".into(),
                index,
                value: Value::Float(2.5),
            }])
        };
        let a = at(4);
        let b = Coordinate::of([("x", 2.5)]);
        let c = Coordinate::of([("y", 2.5)]);

        assert_ne!(a.key(), b.key());
        assert_eq!(a.key(), at(4).key());
        assert_eq!(b.key(), at(0).key());

        assert!(a.same_point(&b));
        assert!(!a.same_point(&c));
        assert!(!a.same_point(&Coordinate::default()));
        assert_eq!(a.get("x"), Some(&Value::Float(2.5)));
        assert_eq!(a.to_string(), "x=2.5");
        assert_eq!(Coordinate::default().to_string(), "()");
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(Strategy::from(loop_lin(0.0, 1.0, 2)).name(), "loop_lin");
        assert_eq!(Strategy::from(loop_items([1, 2])).name(), "loop");
    }
}
