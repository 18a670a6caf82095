//! Hierarchical addresses for tasks, ports and nodes.
//!
//! A [`PathNode`] is a list of non-empty segments, displayed and parsed with
//! `/` as the separator. The empty path is the root. A task called `amp`
//! lives at `amp`, its input `gain` at `amp/gain`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::FlowError;

const SEPARATOR: char = '/';

#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PathNode {
    segments: Vec<Arc<str>>,
}

impl PathNode {
    /// The empty path.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses `a/b/c`. Leading and trailing separators are ignored; empty
    /// segments in the middle are rejected.
    pub fn parse(path: &str) -> Result<Self, FlowError> {
        let trimmed = path.trim_matches(SEPARATOR);

        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        let mut segments = Vec::new();
        for segment in trimmed.split(SEPARATOR) {
            if segment.trim().is_empty() {
                return Err(FlowError::InvalidPath(path.to_string()));
            }
            segments.push(Arc::from(segment));
        }

        Ok(Self { segments })
    }

    /// Returns a new path with `name` appended.
    ///
    /// A name containing the separator is appended as several segments.
    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(
            name.split(SEPARATOR)
                .filter(|s| !s.is_empty())
                .map(Arc::from),
        );
        Self { segments }
    }

    pub fn join(&self, other: &PathNode) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self { segments }
    }

    pub fn parent(&self) -> Option<Self> {
        match self.segments.split_last() {
            Some((_, rest)) => Some(Self {
                segments: rest.to_vec(),
            }),
            None => None,
        }
    }

    /// Last segment, `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(AsRef::as_ref)
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(AsRef::as_ref)
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// True when `self` is `other` or one of its ancestors.
    pub fn contains(&self, other: &PathNode) -> bool {
        other.segments.starts_with(&self.segments)
    }

    /// Strips `prefix` from the front, if it is an ancestor.
    pub fn relative_to(&self, prefix: &PathNode) -> Option<Self> {
        self.segments
            .strip_prefix(prefix.segments.as_slice())
            .map(|rest| Self {
                segments: rest.to_vec(),
            })
    }
}

impl fmt::Display for PathNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{SEPARATOR}")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for PathNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathNode({self})")
    }
}

impl FromStr for PathNode {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PathNode {
    type Error = FlowError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for PathNode {
    type Error = FlowError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<PathNode> for String {
    fn from(value: PathNode) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let path = PathNode::parse("amp/stage/gain").unwrap();
        assert_eq!(path.depth(), 3);
        assert_eq!(path.name(), Some("gain"));
        assert_eq!(path.to_string(), "amp/stage/gain");

        let trimmed = PathNode::parse("/amp/gain/").unwrap();
        assert_eq!(trimmed.to_string(), "amp/gain");
    }

    #[test]
    fn test_parse_rejects_empty_segments() {
        assert!(matches!(
            PathNode::parse("amp//gain"),
            Err(FlowError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_root() {
        let root = PathNode::parse("").unwrap();
        assert!(root.is_root());
        assert_eq!(root.name(), None);
        assert_eq!(root.parent(), None);
        assert_eq!(root.to_string(), "");
    }

    #[test]
    fn test_child_parent_and_contains() {
        let task = PathNode::root().child("amp");
        let port = task.child("gain");

        assert_eq!(port.parent(), Some(task.clone()));
        assert!(task.contains(&port));
        assert!(!port.contains(&task));
        assert_eq!(port.relative_to(&task).unwrap().to_string(), "gain");
        assert_eq!(task.child("a/b").depth(), 3);
    }

    #[test]
    fn test_ordering_is_segment_wise() {
        let a = PathNode::parse("a/b").unwrap();
        let b = PathNode::parse("a/c").unwrap();
        assert!(a < b);
        assert_eq!(a, PathNode::root().child("a").child("b"));
    }

    #[test]
    fn test_serde_as_string() {
        let path = PathNode::parse("amp/gain").unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"amp/gain\"");

        let back: PathNode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }
}
