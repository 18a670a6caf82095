use crate::value::Value;

/// Append-only record of the values a feedback node has committed.
///
/// The first entry is the seed. Reads resolve to the last committed entry,
/// writes append, so a node can depend on its own previous value without the
/// graph holding a real cycle.
#[derive(Clone, Debug)]
pub(crate) struct History {
    entries: Vec<Value>,
}

impl History {
    pub(crate) fn new(seed: Value) -> Self {
        Self {
            entries: vec![seed],
        }
    }

    pub(crate) fn current(&self) -> &Value {
        // never empty, reset keeps the seed
        &self.entries[self.entries.len() - 1]
    }

    pub(crate) fn seed(&self) -> &Value {
        &self.entries[0]
    }

    /// Appends `value`, returning whether the current value changed.
    pub(crate) fn commit(&mut self, value: Value) -> bool {
        let changed = *self.current() != value;
        self.entries.push(value);
        changed
    }

    /// Drops everything but the seed, returning whether the current value
    /// changed.
    pub(crate) fn reset(&mut self) -> bool {
        let changed = self.current() != self.seed();
        self.entries.truncate(1);
        changed
    }

    pub(crate) fn entries(&self) -> &[Value] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_and_reset() {
        let mut history = History::new(Value::Int(0));
        assert_eq!(history.current(), &Value::Int(0));

        assert!(history.commit(Value::Int(1)));
        assert!(!history.commit(Value::Int(1)));
        assert_eq!(history.entries().len(), 3);
        assert_eq!(history.current(), &Value::Int(1));

        assert!(history.reset());
        assert_eq!(history.entries(), &[Value::Int(0)]);
        assert!(!history.reset());
    }
}
