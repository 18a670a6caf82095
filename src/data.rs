//! Result store of a sweep.
//!
//! The [`DataManager`] maps a task path and a sweep [`Coordinate`] to the
//! [`Snapshot`] of monitored values taken at that coordinate. Entries keep
//! the order in which they were first recorded; recording an existing key
//! again replaces its snapshot in place.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::core::Hash32;
use crate::error::FlowError;
use crate::path::PathNode;
use crate::sweep::Coordinate;
use crate::value::Value;

/// Monitored name to value, for one coordinate.
pub type Snapshot = BTreeMap<String, Value>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub path: PathNode,
    pub coordinate: Coordinate,
    pub snapshot: Snapshot,
}

/// Selects entries by coordinate.
#[derive(Clone, Debug, Default)]
pub enum CoordinateFilter {
    #[default]
    Any,
    /// Same point, axis indices ignored.
    Exact(Coordinate),
    /// Coordinates where the named axis holds `value`.
    Axis { name: String, value: Value },
}

impl CoordinateFilter {
    pub fn axis(name: impl Into<String>, value: impl Into<Value>) -> Self {
        CoordinateFilter::Axis {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, coordinate: &Coordinate) -> bool {
        match self {
            CoordinateFilter::Any => true,
            CoordinateFilter::Exact(exact) => exact.same_point(coordinate),
            CoordinateFilter::Axis { name, value } => coordinate.get(name) == Some(value),
        }
    }
}

/// Tabular view of the entries under one path.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let index = self.columns.iter().position(|column| column == name)?;
        Some(self.rows.iter().map(|row| &row[index]).collect())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Entry>", into = "Vec<Entry>")]
pub struct DataManager {
    entries: Vec<Entry>,
    index: HashMap<(PathNode, Hash32), usize>,
}

impl DataManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a snapshot. Returns `true` when the key was new, `false` when
    /// an existing entry was overwritten.
    pub fn record(&mut self, path: PathNode, coordinate: Coordinate, snapshot: Snapshot) -> bool {
        let key = (path, coordinate.key());

        if let Some(&slot) = self.index.get(&key) {
            let entry = &mut self.entries[slot];
            entry.coordinate = coordinate;
            entry.snapshot = snapshot;
            return false;
        }

        self.entries.push(Entry {
            path: key.0.clone(),
            coordinate,
            snapshot,
        });
        self.index.insert(key, self.entries.len() - 1);
        true
    }

    pub fn get(&self, path: &PathNode, coordinate: &Coordinate) -> Option<&Snapshot> {
        self.index
            .get(&(path.clone(), coordinate.key()))
            .map(|&slot| &self.entries[slot].snapshot)
    }

    /// Entries at or below `path` whose coordinate passes `filter`, in
    /// recording order.
    pub fn query(&self, path: &PathNode, filter: &CoordinateFilter) -> Vec<&Entry> {
        self.entries
            .iter()
            .filter(|entry| path.contains(&entry.path) && filter.matches(&entry.coordinate))
            .collect()
    }

    /// Every recorded `(coordinate, snapshot)` at or below `path`.
    pub fn aggregate(&self, path: &PathNode) -> Vec<(&Coordinate, &Snapshot)> {
        self.query(path, &CoordinateFilter::Any)
            .into_iter()
            .map(|entry| (&entry.coordinate, &entry.snapshot))
            .collect()
    }

    /// The values of one monitored name, coordinate by coordinate.
    pub fn series(&self, path: &PathNode, name: &str) -> Vec<(&Coordinate, &Value)> {
        self.query(path, &CoordinateFilter::Any)
            .into_iter()
            .filter_map(|entry| {
                entry
                    .snapshot
                    .get(name)
                    .map(|value| (&entry.coordinate, value))
            })
            .collect()
    }

    /// Entries whose path matches a glob pattern such as `bench/*`.
    pub fn glob(&self, pattern: &str) -> Result<Vec<&Entry>, FlowError> {
        let pattern = glob::Pattern::new(pattern)?;
        Ok(self
            .entries
            .iter()
            .filter(|entry| pattern.matches(&entry.path.to_string()))
            .collect())
    }

    /// Distinct recorded paths, in order of first appearance.
    pub fn paths(&self) -> Vec<&PathNode> {
        let mut paths: Vec<&PathNode> = Vec::new();
        for entry in &self.entries {
            if !paths.contains(&&entry.path) {
                paths.push(&entry.path);
            }
        }
        paths
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Lays the entries under `path` out as rows: one column per axis, then
    /// one per monitored name not already covered by an axis. Missing cells
    /// are [`Value::None`].
    pub fn table(&self, path: &PathNode) -> Table {
        let entries = self.query(path, &CoordinateFilter::Any);

        let mut axes: Vec<String> = Vec::new();
        let mut names: Vec<String> = Vec::new();
        for entry in &entries {
            for axis in entry.coordinate.axes() {
                if !axes.contains(&axis.name) {
                    axes.push(axis.name.clone());
                }
            }
        }
        for entry in &entries {
            for name in entry.snapshot.keys() {
                if !axes.contains(name) && !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }

        let rows = entries
            .iter()
            .map(|entry| {
                let coordinates = axes.iter().map(|name| {
                    entry
                        .coordinate
                        .get(name)
                        .or_else(|| entry.snapshot.get(name))
                        .cloned()
                        .unwrap_or_default()
                });
                let values = names
                    .iter()
                    .map(|name| entry.snapshot.get(name).cloned().unwrap_or_default());
                coordinates.chain(values).collect()
            })
            .collect();

        axes.extend(names);
        Table {
            columns: axes,
            rows,
        }
    }

    /// Serializes every entry in recording order.
    ///
    /// Non-finite floats have no JSON form: they are written as `null` and
    /// come back from [`DataManager::from_json`] as [`Value::None`].
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl From<Vec<Entry>> for DataManager {
    fn from(entries: Vec<Entry>) -> Self {
        let mut manager = DataManager::new();
        for entry in entries {
            manager.record(entry.path, entry.coordinate, entry.snapshot);
        }
        manager
    }
}

impl From<DataManager> for Vec<Entry> {
    fn from(manager: DataManager) -> Self {
        manager.entries
    }
}
