use crate::error::FlowError;
use crate::sweep::{Sequence, Strategy};
use crate::task::Outputs;
use crate::value::Value;

enum Source {
    Items { items: Vec<Value>, next: usize },
    Loop(Box<Strategy>),
}

impl Source {
    fn advance(&mut self) -> Result<Option<Value>, FlowError> {
        match self {
            Source::Items { items, next } => {
                let item = items.get(*next).cloned();
                if item.is_some() {
                    *next += 1;
                }
                Ok(item)
            }
            Source::Loop(strategy) => strategy.advance(),
        }
    }

    fn reset(&mut self) {
        match self {
            Source::Items { next, .. } => *next = 0,
            Source::Loop(strategy) => strategy.reset(),
        }
    }

    fn len_hint(&self) -> Option<usize> {
        match self {
            Source::Items { items, .. } => Some(items.len()),
            Source::Loop(strategy) => strategy.len_hint(),
        }
    }
}

/// Yields every value of its sources, one source after the other.
///
/// This is also the "loop over items" strategy: [`ConcatLoop::items`] builds
/// a loop from an explicit list.
pub struct ConcatLoop {
    sources: Vec<Source>,
    current: usize,
}

impl ConcatLoop {
    pub fn new<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Strategy>,
    {
        Self {
            sources: sources
                .into_iter()
                .map(|source| Source::Loop(Box::new(source.into())))
                .collect(),
            current: 0,
        }
    }

    pub fn items<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::new(Vec::<Strategy>::new()).then_items(items)
    }

    /// Appends another strategy.
    pub fn then(mut self, source: impl Into<Strategy>) -> Self {
        self.sources.push(Source::Loop(Box::new(source.into())));
        self
    }

    /// Appends explicit items.
    pub fn then_items<I, V>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.sources.push(Source::Items {
            items: items.into_iter().map(Into::into).collect(),
            next: 0,
        });
        self
    }
}

impl Sequence for ConcatLoop {
    fn advance(&mut self) -> Result<Option<Value>, FlowError> {
        while let Some(source) = self.sources.get_mut(self.current) {
            if let Some(value) = source.advance()? {
                return Ok(Some(value));
            }
            self.current += 1;
        }
        Ok(None)
    }

    fn reset(&mut self) {
        self.current = 0;
        for source in &mut self.sources {
            source.reset();
        }
    }

    fn feedback(&mut self, outputs: &Outputs) -> Result<(), FlowError> {
        match self.sources.get_mut(self.current) {
            Some(Source::Loop(strategy)) => strategy.feedback(outputs),
            _ => Ok(()),
        }
    }

    fn len_hint(&self) -> Option<usize> {
        self.sources.iter().map(Source::len_hint).sum()
    }

    fn watched(&self) -> Option<&str> {
        self.sources.iter().find_map(|source| match source {
            Source::Loop(strategy) => strategy.watched(),
            Source::Items { .. } => None,
        })
    }
}
