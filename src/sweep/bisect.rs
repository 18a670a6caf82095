use std::fmt;
use std::sync::Arc;

use crate::error::FlowError;
use crate::sweep::Sequence;
use crate::task::Outputs;
use crate::value::Value;

/// What the bisection is looking for in the watched output.
#[derive(Clone)]
pub enum BisectTarget {
    /// The input where the output crosses this number.
    Value(f64),
    /// The input where the predicate flips.
    Predicate(Arc<dyn Fn(&Value) -> bool + Send + Sync>),
}

impl fmt::Debug for BisectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BisectTarget::Value(target) => f.debug_tuple("Value").field(target).finish(),
            BisectTarget::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Below,
    Above,
    Hit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Probe {
    Low,
    High,
    Mid,
}

#[derive(Clone, Copy, Debug)]
struct Pending {
    probe: Probe,
    x: f64,
    side: Option<Side>,
}

/// Bisection over a float interval, steered by the task's outputs.
///
/// The two endpoints are yielded first, then midpoints of the shrinking
/// bracket. Each yielded value must receive [`Sequence::feedback`] before
/// the next [`Sequence::advance`]; feedback repeated for the same value
/// keeps the latest outputs. The search ends once the bracket is narrower
/// than the tolerance, on an exact hit, or after `max_iterations` midpoints.
#[derive(Debug)]
pub struct LoopBisect {
    low: f64,
    high: f64,
    target: BisectTarget,
    watch: Option<String>,
    tolerance: f64,
    max_iterations: usize,
    tolerate_bracket: bool,

    lo: f64,
    hi: f64,
    lo_side: Option<Side>,
    straddled: bool,
    next: Probe,
    pending: Option<Pending>,
    midpoints: usize,
    root: Option<f64>,
    done: bool,
}

impl LoopBisect {
    pub fn new(low: f64, high: f64) -> Self {
        Self {
            low,
            high,
            target: BisectTarget::Value(0.0),
            watch: None,
            tolerance: 1e-6,
            max_iterations: 100,
            tolerate_bracket: false,
            lo: low,
            hi: high,
            lo_side: None,
            straddled: false,
            next: Probe::Low,
            pending: None,
            midpoints: 0,
            root: None,
            done: false,
        }
    }

    /// Output port read back after every evaluation. May be left unset when
    /// the task has exactly one output.
    pub fn watch(mut self, output: impl Into<String>) -> Self {
        self.watch = Some(output.into());
        self
    }

    pub fn target(mut self, target: f64) -> Self {
        self.target = BisectTarget::Value(target);
        self
    }

    pub fn predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.target = BisectTarget::Predicate(Arc::new(predicate));
        self
    }

    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// End quietly instead of failing when both endpoints fall on the same
    /// side of the target.
    pub fn tolerate_bracket(mut self, tolerate: bool) -> Self {
        self.tolerate_bracket = tolerate;
        self
    }

    /// Best guess so far: the exact hit if one was found, otherwise the
    /// middle of the current bracket. `None` until both endpoints were
    /// evaluated, and when they fell on the same side of the target.
    pub fn estimate(&self) -> Option<f64> {
        self.root
            .or_else(|| self.straddled.then(|| 0.5 * (self.lo + self.hi)))
    }

    /// Current bracket.
    pub fn bracket(&self) -> (f64, f64) {
        (self.lo, self.hi)
    }

    /// Number of midpoints yielded since the last reset.
    pub fn midpoints(&self) -> usize {
        self.midpoints
    }

    fn observe<'a>(&self, outputs: &'a Outputs) -> Result<&'a Value, FlowError> {
        if let Some(name) = &self.watch {
            return outputs.get(name).ok_or_else(|| {
                FlowError::Feedback(format!("bisection watches `{name}`, which was not produced"))
            });
        }

        let mut values = outputs.values();
        match (values.next(), values.next()) {
            (Some(value), None) => Ok(value),
            _ => Err(FlowError::Type(format!(
                "bisection needs a watched output when the task has {} outputs",
                outputs.len()
            ))),
        }
    }

    fn side(&self, value: &Value) -> Result<Side, FlowError> {
        match &self.target {
            BisectTarget::Value(target) => {
                let y = value.as_f64().ok_or_else(|| {
                    FlowError::Type(format!(
                        "bisection compares numbers, got {}",
                        value.type_name()
                    ))
                })?;
                let d = y - target;
                if d.is_nan() {
                    Err(FlowError::Domain(format!("bisection cannot compare {y} to {target}")))
                } else if d == 0.0 {
                    Ok(Side::Hit)
                } else if d > 0.0 {
                    Ok(Side::Above)
                } else {
                    Ok(Side::Below)
                }
            }
            BisectTarget::Predicate(predicate) => Ok(if predicate(value) {
                Side::Above
            } else {
                Side::Below
            }),
        }
    }

    fn settle(&mut self, probe: Probe, x: f64, side: Side) -> Result<(), FlowError> {
        match (probe, side) {
            (_, Side::Hit) => {
                self.root = Some(x);
                self.done = true;
            }
            (Probe::Low, side) => self.lo_side = Some(side),
            (Probe::High, side) => {
                self.straddled = self.lo_side != Some(side);
                if !self.straddled {
                    self.done = true;
                    if !self.tolerate_bracket {
                        return Err(FlowError::Bracket {
                            low: self.low,
                            high: self.high,
                        });
                    }
                }
            }
            (Probe::Mid, side) => {
                if self.lo_side == Some(side) {
                    self.lo = x;
                } else {
                    self.hi = x;
                }
            }
        }
        Ok(())
    }
}

impl Sequence for LoopBisect {
    fn advance(&mut self) -> Result<Option<Value>, FlowError> {
        if let Some(pending) = self.pending.take() {
            let Some(side) = pending.side else {
                self.pending = Some(pending);
                return Err(FlowError::Feedback(format!(
                    "bisection has no outputs for {} yet",
                    pending.x
                )));
            };
            self.settle(pending.probe, pending.x, side)?;
        }

        if self.done {
            return Ok(None);
        }

        if !self.low.is_finite() || !self.high.is_finite() {
            return Err(FlowError::Domain(format!(
                "bisection needs finite bounds, got {} and {}",
                self.low, self.high
            )));
        }

        let (probe, x) = match self.next {
            Probe::Low => (Probe::Low, self.low),
            Probe::High => (Probe::High, self.high),
            Probe::Mid => {
                if (self.hi - self.lo).abs() < self.tolerance
                    || self.midpoints >= self.max_iterations
                {
                    self.done = true;
                    return Ok(None);
                }
                self.midpoints += 1;
                (Probe::Mid, 0.5 * (self.lo + self.hi))
            }
        };

        self.next = match probe {
            Probe::Low => Probe::High,
            Probe::High | Probe::Mid => Probe::Mid,
        };
        self.pending = Some(Pending {
            probe,
            x,
            side: None,
        });

        tracing::trace!(x, probe = ?probe, "bisection probe");
        Ok(Some(Value::Float(x)))
    }

    fn reset(&mut self) {
        self.lo = self.low;
        self.hi = self.high;
        self.lo_side = None;
        self.straddled = false;
        self.next = Probe::Low;
        self.pending = None;
        self.midpoints = 0;
        self.root = None;
        self.done = false;
    }

    fn feedback(&mut self, outputs: &Outputs) -> Result<(), FlowError> {
        if self.pending.is_none() {
            return Ok(());
        }

        let side = self.side(self.observe(outputs)?)?;
        if let Some(pending) = self.pending.as_mut() {
            pending.side = Some(side);
        }
        Ok(())
    }

    fn watched(&self) -> Option<&str> {
        self.watch.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs(y: f64) -> Outputs {
        Outputs::from([("y".to_string(), Value::Float(y))])
    }

    fn drive(lp: &mut LoopBisect, f: impl Fn(f64) -> f64) -> Result<Vec<f64>, FlowError> {
        let mut xs = Vec::new();
        while let Some(x) = lp.advance()? {
            let x = x.as_f64().unwrap();
            xs.push(x);
            lp.feedback(&outputs(f(x)))?;
        }
        Ok(xs)
    }

    #[test]
    fn test_finds_root() {
        let mut lp = LoopBisect::new(0.0, 10.0).watch("y").tolerance(1e-6);
        let xs = drive(&mut lp, |x| x - 3.0).unwrap();

        assert_eq!(&xs[..3], &[0.0, 10.0, 5.0]);
        assert_eq!(lp.midpoints(), 24);
        assert_eq!(xs.len(), 26);
        assert!((lp.estimate().unwrap() - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_tolerance_bounds_iterations() {
        let mut lp = LoopBisect::new(0.0, 10.0).tolerance(1e-5);
        drive(&mut lp, |x| x - 3.0).unwrap();
        assert_eq!(lp.midpoints(), 20);

        let mut capped = LoopBisect::new(0.0, 10.0).max_iterations(4);
        drive(&mut capped, |x| x - 3.0).unwrap();
        assert_eq!(capped.midpoints(), 4);
    }

    #[test]
    fn test_target_value() {
        let mut lp = LoopBisect::new(0.0, 4.0).target(4.0).tolerance(1e-9);
        drive(&mut lp, |x| x * x).unwrap();
        assert!((lp.estimate().unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_exact_hit_stops() {
        let mut lp = LoopBisect::new(0.0, 10.0);
        let xs = drive(&mut lp, |x| x - 5.0).unwrap();
        assert_eq!(xs, vec![0.0, 10.0, 5.0]);
        assert_eq!(lp.estimate(), Some(5.0));
    }

    #[test]
    fn test_bracket_error() {
        let mut lp = LoopBisect::new(0.0, 10.0);
        let err = drive(&mut lp, |x| x + 5.0).unwrap_err();
        assert!(matches!(err, FlowError::Bracket { low, high } if low == 0.0 && high == 10.0));
    }

    #[test]
    fn test_tolerate_bracket() {
        let mut lp = LoopBisect::new(0.0, 10.0).tolerate_bracket(true);
        let xs = drive(&mut lp, |x| x + 5.0).unwrap();
        assert_eq!(xs, vec![0.0, 10.0]);
        assert_eq!(lp.estimate(), None);
    }

    #[test]
    fn test_estimate_waits_for_bracket() {
        let mut lp = LoopBisect::new(0.0, 4.0);
        assert_eq!(lp.advance().unwrap(), Some(Value::Float(0.0)));
        lp.feedback(&outputs(-1.0)).unwrap();
        assert_eq!(lp.advance().unwrap(), Some(Value::Float(4.0)));
        assert_eq!(lp.estimate(), None);

        lp.feedback(&outputs(3.0)).unwrap();
        assert_eq!(lp.advance().unwrap(), Some(Value::Float(2.0)));
        assert_eq!(lp.estimate(), Some(2.0));
    }

    #[test]
    fn test_feedback_required() {
        let mut lp = LoopBisect::new(0.0, 1.0);
        lp.advance().unwrap();
        assert!(matches!(lp.advance(), Err(FlowError::Feedback(_))));

        lp.feedback(&outputs(-1.0)).unwrap();
        assert_eq!(lp.advance().unwrap(), Some(Value::Float(1.0)));
    }

    #[test]
    fn test_unsolicited_feedback_ignored() {
        let mut lp = LoopBisect::new(0.0, 1.0);
        lp.feedback(&outputs(1.0)).unwrap();
        assert_eq!(lp.advance().unwrap(), Some(Value::Float(0.0)));
    }

    #[test]
    fn test_predicate() {
        let mut lp = LoopBisect::new(0.0, 4.0)
            .predicate(|v| v.as_f64().is_some_and(|y| y > 2.0))
            .tolerance(1e-3);
        drive(&mut lp, |x| x * x).unwrap();
        assert!((lp.estimate().unwrap() - 2f64.sqrt()).abs() < 1e-3);
    }

    #[test]
    fn test_needs_watch_for_many_outputs() {
        let mut lp = LoopBisect::new(0.0, 1.0);
        lp.advance().unwrap();

        let many = Outputs::from([
            ("a".to_string(), Value::Float(0.0)),
            ("b".to_string(), Value::Float(1.0)),
        ]);
        assert!(matches!(lp.feedback(&many), Err(FlowError::Type(_))));
    }

    #[test]
    fn test_reset_and_domain() {
        let mut lp = LoopBisect::new(0.0, 10.0);
        drive(&mut lp, |x| x - 3.0).unwrap();
        lp.reset();
        assert_eq!(lp.estimate(), None);
        assert_eq!(lp.advance().unwrap(), Some(Value::Float(0.0)));

        let mut nan = LoopBisect::new(f64::NAN, 1.0);
        assert!(matches!(nan.advance(), Err(FlowError::Domain(_))));
    }
}
