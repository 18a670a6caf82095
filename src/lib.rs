#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod core;
mod data;
mod error;
mod graph;
mod path;
mod runner;
pub mod sweep;
mod task;
mod utils;
mod value;

pub use crate::data::{CoordinateFilter, DataManager, Entry, Snapshot, Table};
pub use crate::error::*;
pub use crate::graph::{Graph, NodeFn, NodeId};
pub use crate::path::PathNode;
pub use crate::runner::{ErrorPolicy, Report, StopHandle, Sweep, SweepSummary, run_sweep};
pub use crate::sweep::{
    Axis, BisectTarget, ConcatLoop, Coordinate, CountingLoop, LoopBisect, LoopLin, LoopLog,
    LoopSystem, Sequence, Strategy, loop_bisect, loop_concat, loop_count, loop_items, loop_lin,
    loop_log,
};
pub use crate::task::{Input, Output, Outputs, Port, Task, TaskBuilder};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
pub use crate::value::Value;
