use crate::error::FlowError;
use crate::sweep::Sequence;
use crate::value::Value;

/// Yields `0, 1, …, n-1` as ints.
#[derive(Clone, Debug)]
pub struct CountingLoop {
    count: usize,
    next: usize,
}

impl CountingLoop {
    pub fn new(count: usize) -> Self {
        Self { count, next: 0 }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

impl Sequence for CountingLoop {
    fn advance(&mut self) -> Result<Option<Value>, FlowError> {
        if self.next >= self.count {
            return Ok(None);
        }

        let value = Value::from(self.next);
        self.next += 1;
        Ok(Some(value))
    }

    fn reset(&mut self) {
        self.next = 0;
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.count)
    }
}
