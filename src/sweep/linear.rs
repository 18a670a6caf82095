use crate::error::FlowError;
use crate::sweep::Sequence;
use crate::value::Value;

/// Position `i` of `n` points spread evenly over `[a, b]`. The endpoints are
/// returned exactly.
fn spread(a: f64, b: f64, n: usize, i: usize) -> f64 {
    if i == 0 {
        a
    } else if i + 1 == n {
        b
    } else {
        a + i as f64 * (b - a) / (n - 1) as f64
    }
}

/// `n` evenly spaced floats from `start` to `stop`, both included.
#[derive(Clone, Debug)]
pub struct LoopLin {
    start: f64,
    stop: f64,
    num: usize,
    next: usize,
}

impl LoopLin {
    pub fn new(start: f64, stop: f64, num: usize) -> Self {
        Self {
            start,
            stop,
            num,
            next: 0,
        }
    }

    /// Distance between consecutive values, `None` for fewer than two.
    pub fn step(&self) -> Option<f64> {
        (self.num > 1).then(|| (self.stop - self.start) / (self.num - 1) as f64)
    }
}

impl Sequence for LoopLin {
    fn advance(&mut self) -> Result<Option<Value>, FlowError> {
        if self.next >= self.num {
            return Ok(None);
        }

        if !self.start.is_finite() || !self.stop.is_finite() {
            return Err(FlowError::Domain(format!(
                "linear sweep needs finite bounds, got {} and {}",
                self.start, self.stop
            )));
        }

        let value = spread(self.start, self.stop, self.num, self.next);
        self.next += 1;
        Ok(Some(Value::Float(value)))
    }

    fn reset(&mut self) {
        self.next = 0;
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.num)
    }
}

/// `n` floats from `start` to `stop`, evenly spaced on a logarithmic scale.
#[derive(Clone, Debug)]
pub struct LoopLog {
    start: f64,
    stop: f64,
    num: usize,
    next: usize,
}

impl LoopLog {
    pub fn new(start: f64, stop: f64, num: usize) -> Self {
        Self {
            start,
            stop,
            num,
            next: 0,
        }
    }

    fn check(&self) -> Result<(), FlowError> {
        let valid = |x: f64| x.is_finite() && x > 0.0;
        if valid(self.start) && valid(self.stop) {
            Ok(())
        } else {
            Err(FlowError::Domain(format!(
                "logarithmic sweep needs strictly positive bounds, got {} and {}",
                self.start, self.stop
            )))
        }
    }
}

impl Sequence for LoopLog {
    fn advance(&mut self) -> Result<Option<Value>, FlowError> {
        if self.next >= self.num {
            return Ok(None);
        }

        self.check()?;

        let value = if self.next == 0 {
            self.start
        } else if self.next + 1 == self.num {
            self.stop
        } else {
            let exponent = spread(self.start.log10(), self.stop.log10(), self.num, self.next);
            10f64.powf(exponent)
        };

        self.next += 1;
        Ok(Some(Value::Float(value)))
    }

    fn reset(&mut self) {
        self.next = 0;
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.num)
    }
}
