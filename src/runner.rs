//! Sweep driver.
//!
//! A sweep walks the Cartesian product of one or more [`LoopSystem`]s in
//! odometer order: the innermost loop advances fastest, and every time an
//! outer loop advances the loops inside it restart. At each coordinate the
//! task is run with the loop values bound to their inputs, the monitored
//! values are recorded into a [`DataManager`], state nodes are stepped and
//! the outputs are fed back to the loops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::data::{DataManager, Snapshot};
use crate::error::{FlowError, SweepError};
use crate::sweep::{Axis, Coordinate, LoopSystem};
use crate::task::{Outputs, Task};
use crate::utils::progress_style;

/// What to do when a coordinate fails to evaluate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Stop the sweep and return what was recorded so far.
    #[default]
    Abort,
    /// Log the failure, remember it in the summary, and move on.
    Skip,
}

/// Cooperative cancellation, checked between coordinates.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct SweepSummary {
    /// Coordinates the task was run at.
    pub evaluated: usize,
    /// Snapshots written to the data manager.
    pub recorded: usize,
    /// Coordinates dropped under [`ErrorPolicy::Skip`].
    pub skipped: Vec<(Coordinate, FlowError)>,
    /// Whether the stop handle ended the sweep early.
    pub stopped: bool,
    pub duration: Duration,
}

#[derive(Debug)]
pub struct Report {
    pub data: DataManager,
    pub summary: SweepSummary,
}

/// Configures and runs a sweep over a task.
pub struct Sweep<'t> {
    task: &'t mut Task,
    loops: Vec<LoopSystem>,
    monitored: Vec<String>,
    policy: ErrorPolicy,
    stop: StopHandle,
    data: DataManager,
}

impl<'t> Sweep<'t> {
    pub fn new(task: &'t mut Task) -> Self {
        Self {
            task,
            loops: Vec::new(),
            monitored: Vec::new(),
            policy: ErrorPolicy::default(),
            stop: StopHandle::default(),
            data: DataManager::new(),
        }
    }

    /// Adds a loop nested inside the ones added before it.
    pub fn over(mut self, loop_system: LoopSystem) -> Self {
        self.loops.push(loop_system);
        self
    }

    /// Names to record at every coordinate. Without any, all output ports
    /// are recorded.
    pub fn monitor<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.monitored.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn on_error(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Handle that stops this sweep when triggered from elsewhere.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn with_stop(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    /// Records into an existing manager instead of a fresh one.
    pub fn with_data(mut self, data: DataManager) -> Self {
        self.data = data;
        self
    }

    pub fn run(self) -> Result<Report, SweepError> {
        let Sweep {
            task,
            mut loops,
            monitored,
            policy,
            stop,
            data,
        } = self;

        prepare(task, &mut loops, &monitored)?;

        let started = Instant::now();
        let span = tracing::info_span!("sweep", task = %task.path());
        if let Some(total) = loops.iter().map(LoopSystem::len_hint).product::<Option<usize>>() {
            span.pb_set_length(total as u64);
        }
        span.pb_set_style(&progress_style());
        span.pb_set_message(&format!("Sweeping {}", task.name()));
        let _enter = span.enter();

        tracing::info!(
            task = %task.path(),
            loops = loops.len(),
            monitored = monitored.len(),
            "sweep started"
        );

        let mut driver = Driver {
            task,
            monitored,
            policy,
            data,
            summary: SweepSummary::default(),
        };

        if loops.is_empty() {
            if stop.is_stopped() {
                driver.summary.stopped = true;
            } else {
                let coordinate = Coordinate::default();
                if let Err(source) = driver.visit(&coordinate, &mut loops) {
                    return Err(driver.abort(coordinate, source));
                }
                span.pb_inc(1);
            }
        } else {
            let mut axes: Vec<Axis> = Vec::with_capacity(loops.len());
            let mut level = 0;

            loop {
                if stop.is_stopped() {
                    tracing::info!("sweep stopped");
                    driver.summary.stopped = true;
                    break;
                }

                let axis = match loops[level].advance() {
                    Ok(axis) => axis,
                    Err(source) => return Err(driver.abort(Coordinate::new(axes), source)),
                };

                let Some(axis) = axis else {
                    if level == 0 {
                        break;
                    }
                    level -= 1;
                    continue;
                };

                axes.truncate(level);
                axes.push(axis);

                if level + 1 < loops.len() {
                    level += 1;
                    loops[level].reset();
                    continue;
                }

                let coordinate = Coordinate::new(axes.clone());
                if let Err(source) = driver.visit(&coordinate, &mut loops) {
                    return Err(driver.abort(coordinate, source));
                }
                span.pb_inc(1);
            }
        }

        let mut summary = driver.summary;
        summary.duration = started.elapsed();

        tracing::info!(
            evaluated = summary.evaluated,
            recorded = summary.recorded,
            skipped = summary.skipped.len(),
            elapsed = ?summary.duration,
            "sweep finished"
        );

        Ok(Report {
            data: driver.data,
            summary,
        })
    }
}

/// Sweeps `task` over a single loop, recording `monitored` at every
/// coordinate (all outputs when empty).
pub fn run_sweep(
    task: &mut Task,
    loop_system: LoopSystem,
    monitored: &[&str],
) -> Result<DataManager, SweepError> {
    Sweep::new(task)
        .over(loop_system)
        .monitor(monitored.iter().copied())
        .run()
        .map(|report| report.data)
}

/// Checks every name before anything runs, then rewinds the task state and
/// the loops.
fn prepare(task: &mut Task, loops: &mut [LoopSystem], monitored: &[String]) -> Result<(), FlowError> {
    for name in monitored {
        task.resolve(name)?;
    }

    let unknown = |port: &str| FlowError::UnknownPort {
        task: task.path().clone(),
        port: port.to_string(),
    };

    for lp in loops.iter() {
        if task.input(lp.target()).is_none() {
            return Err(unknown(lp.target()));
        }
        if let Some(watched) = lp.watched() {
            if task.output(watched).is_none() {
                return Err(unknown(watched));
            }
        }
    }

    task.reset_state();
    for lp in loops.iter_mut() {
        lp.reset();
    }
    Ok(())
}

struct Driver<'t> {
    task: &'t mut Task,
    monitored: Vec<String>,
    policy: ErrorPolicy,
    data: DataManager,
    summary: SweepSummary,
}

impl Driver<'_> {
    /// Runs one coordinate. An error returned here aborts the sweep.
    fn visit(&mut self, coordinate: &Coordinate, loops: &mut [LoopSystem]) -> Result<(), FlowError> {
        self.summary.evaluated += 1;

        let outputs = match self.evaluate(coordinate) {
            Ok(outputs) => outputs,
            Err(error) if self.policy == ErrorPolicy::Skip => {
                tracing::warn!(%coordinate, %error, "skipping coordinate");
                self.summary.skipped.push((coordinate.clone(), error));
                return Ok(());
            }
            Err(error) => return Err(error),
        };

        for lp in loops.iter_mut() {
            lp.feedback(&outputs)?;
        }
        Ok(())
    }

    fn evaluate(&mut self, coordinate: &Coordinate) -> Result<Outputs, FlowError> {
        let inputs = coordinate
            .axes()
            .iter()
            .map(|axis| (axis.name.as_str(), axis.value.clone()));
        let outputs = self.task.run(inputs)?;

        let mut snapshot = Snapshot::new();
        if self.monitored.is_empty() {
            snapshot.clone_from(&outputs);
        }
        for name in &self.monitored {
            snapshot.insert(name.clone(), self.task.value(name)?);
        }

        // snapshot first: stepping moves state nodes on to the next iteration
        self.task.step()?;

        self.data
            .record(self.task.path().clone(), coordinate.clone(), snapshot);
        self.summary.recorded += 1;

        tracing::debug!(%coordinate, "coordinate recorded");
        Ok(outputs)
    }

    fn abort(&mut self, coordinate: Coordinate, source: FlowError) -> SweepError {
        tracing::error!(%coordinate, error = %source, "sweep aborted");
        SweepError::Aborted {
            coordinate,
            source,
            partial: Box::new(std::mem::take(&mut self.data)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CoordinateFilter;
    use crate::path::PathNode;
    use crate::sweep::{Sequence, loop_bisect, loop_count, loop_items, loop_lin};
    use crate::value::Value;

    fn doubler() -> Task {
        let mut design = Task::design("amp");
        let x = design.input("x");
        let y = design.func("y", [x], |args| {
            let x = args[0]
                .as_f64()
                .ok_or_else(|| anyhow::anyhow!("x must be a number"))?;
            Ok(Value::Float(2.0 * x))
        });
        design.output("y", y);
        design.finish().unwrap()
    }

    fn grid() -> Task {
        let mut design = Task::design("grid");
        let a = design.input("a");
        let b = design.input("b");
        let sum = design.sum("sum", [a, b]);
        design.output("sum", sum);
        design.finish().unwrap()
    }

    fn amp() -> PathNode {
        PathNode::parse("amp").unwrap()
    }

    #[test]
    fn test_run_sweep_records_each_coordinate() {
        let mut task = doubler();
        let data = run_sweep(&mut task, loop_lin(0.0, 1.0, 3).over("x"), &["y"]).unwrap();

        let ys: Vec<_> = data.series(&amp(), "y").into_iter().map(|(_, y)| y.clone()).collect();
        assert_eq!(ys, vec![Value::Float(0.0), Value::Float(1.0), Value::Float(2.0)]);
        assert_eq!(data.entries()[1].coordinate.axes()[0].index, 1);
    }

    #[test]
    fn test_empty_loop_records_nothing() {
        let mut task = doubler();
        let data = run_sweep(&mut task, loop_count(0).over("x"), &[]).unwrap();
        assert!(data.is_empty());
        assert_eq!(task.runs(), 0);
    }

    #[test]
    fn test_records_all_outputs_by_default() {
        let mut task = doubler();
        let data = run_sweep(&mut task, loop_items([1.5]).over("x"), &[]).unwrap();
        let snapshot = data.get(&amp(), &Coordinate::of([("x", 1.5)])).unwrap();
        assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["y"]);
    }

    #[test]
    fn test_monitors_inputs_and_internal_nodes() {
        let mut task = grid();
        let data = Sweep::new(&mut task)
            .over(loop_items([1, 2]).over("a"))
            .over(loop_items([10]).over("b"))
            .monitor(["a", "sum"])
            .run()
            .unwrap()
            .data;

        let table = data.table(&PathNode::parse("grid").unwrap());
        assert_eq!(table.columns, vec!["a", "b", "sum"]);
        assert_eq!(table.rows[1], vec![Value::Int(2), Value::Int(10), Value::Int(12)]);
    }

    #[test]
    fn test_nested_odometer_order() {
        let mut task = grid();
        let report = Sweep::new(&mut task)
            .over(loop_count(2).over("a"))
            .over(loop_items([10, 20, 30]).over("b"))
            .run()
            .unwrap();

        let visited: Vec<(i64, i64)> = report
            .data
            .entries()
            .iter()
            .map(|entry| {
                let a = entry.coordinate.get("a").and_then(Value::as_i64).unwrap();
                let b = entry.coordinate.get("b").and_then(Value::as_i64).unwrap();
                (a, b)
            })
            .collect();

        assert_eq!(
            visited,
            vec![(0, 10), (0, 20), (0, 30), (1, 10), (1, 20), (1, 30)]
        );
        assert_eq!(report.summary.evaluated, 6);
        assert_eq!(report.summary.recorded, 6);

        let inner = &report.data.entries()[3].coordinate.axes()[1];
        assert_eq!(inner.index, 0);
    }

    #[test]
    fn test_no_loops_runs_once() {
        let mut task = grid();
        task.set("a", 1).unwrap();
        task.set("b", 2).unwrap();

        let report = Sweep::new(&mut task).run().unwrap();
        assert_eq!(report.data.len(), 1);
        assert!(report.data.entries()[0].coordinate.is_empty());
    }

    #[test]
    fn test_abort_keeps_partial_results() {
        let mut task = doubler();
        let err = run_sweep(
            &mut task,
            loop_items([Value::Float(1.0), Value::from("oops"), Value::Float(3.0)]).over("x"),
            &["y"],
        )
        .unwrap_err();

        let SweepError::Aborted {
            coordinate,
            source,
            partial,
        } = err
        else {
            panic!("expected an aborted sweep");
        };
        assert_eq!(coordinate.get("x"), Some(&Value::from("oops")));
        assert!(matches!(source, FlowError::Node(..)));
        assert_eq!(partial.len(), 1);
    }

    #[test]
    fn test_skip_policy_continues() {
        let mut task = doubler();
        let report = Sweep::new(&mut task)
            .over(loop_items([Value::Float(1.0), Value::from("oops"), Value::Float(3.0)]).over("x"))
            .on_error(ErrorPolicy::Skip)
            .run()
            .unwrap();

        assert_eq!(report.data.len(), 2);
        assert_eq!(report.summary.evaluated, 3);
        assert_eq!(report.summary.skipped.len(), 1);
        assert_eq!(
            report.summary.skipped[0].0.get("x"),
            Some(&Value::from("oops"))
        );
    }

    #[test]
    fn test_stop_handle() {
        let mut task = doubler();
        let stop = StopHandle::new();
        stop.stop();

        let report = Sweep::new(&mut task)
            .over(loop_count(5).over("x"))
            .with_stop(stop.clone())
            .run()
            .unwrap();

        assert!(report.summary.stopped);
        assert!(report.data.is_empty());
    }

    #[test]
    fn test_loops_rewind_before_sweep() {
        let mut task = doubler();
        let mut lp = loop_count(5).over("x");
        lp.advance().unwrap();
        lp.stop();

        let data = run_sweep(&mut task, lp, &[]).unwrap();
        assert_eq!(data.len(), 5);
    }

    #[test]
    fn test_setup_errors() {
        let mut task = doubler();

        let err = run_sweep(&mut task, loop_count(2).over("x"), &["nope"]).unwrap_err();
        assert!(matches!(err, SweepError::Setup(FlowError::UnknownPort { .. })));

        let err = run_sweep(&mut task, loop_count(2).over("y"), &[]).unwrap_err();
        assert!(matches!(err, SweepError::Setup(FlowError::UnknownPort { .. })));

        let bisect = loop_bisect(0.0, 1.0).watch("nope").over("x");
        let err = run_sweep(&mut task, bisect, &[]).unwrap_err();
        assert!(matches!(err, SweepError::Setup(FlowError::UnknownPort { .. })));
        assert!(err.partial().is_none());
        assert_eq!(task.runs(), 0);
    }

    #[test]
    fn test_bisect_sweep() {
        let mut design = Task::design("shifted");
        let x = design.input("x");
        let offset = design.constant("offset", -3.0);
        let y = design.sum("y", [x, offset]);
        design.output("y", y);
        let mut task = design.finish().unwrap();

        let data = run_sweep(
            &mut task,
            loop_bisect(0.0, 10.0).watch("y").tolerance(1e-6).over("x"),
            &["y"],
        )
        .unwrap();

        assert_eq!(data.len(), 26);
        let last = data.entries().last().unwrap();
        let x = last.coordinate.get("x").and_then(Value::as_f64).unwrap();
        assert!((x - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_state_accumulates_across_sweep() {
        let mut design = Task::design("acc");
        let x = design.input("x");
        let acc = design.state("acc", 0);
        let total = design.sum("total", [acc, x]);
        design.update(acc, total).output("total", total);
        let mut task = design.finish().unwrap();

        let path = PathNode::parse("acc").unwrap();
        let data = run_sweep(&mut task, loop_items([1, 2, 3]).over("x"), &["total"]).unwrap();
        let totals: Vec<_> = data.series(&path, "total").into_iter().map(|(_, v)| v.clone()).collect();
        assert_eq!(totals, vec![Value::Int(1), Value::Int(3), Value::Int(6)]);

        // every sweep starts from the seed
        let again = run_sweep(&mut task, loop_items([1, 2, 3]).over("x"), &["total"]).unwrap();
        assert_eq!(again.aggregate(&path).len(), 3);
        assert_eq!(again.series(&path, "total")[2].1, &Value::Int(6));
    }

    #[test]
    fn test_with_data_appends_and_overwrites() {
        let mut task = doubler();
        let first = run_sweep(&mut task, loop_items([1.0, 2.0]).over("x"), &["y"]).unwrap();

        // the same steps again replace the earlier snapshots
        let report = Sweep::new(&mut task)
            .over(loop_items([1.0, 2.0]).over("x"))
            .monitor(["y"])
            .with_data(first)
            .run()
            .unwrap();
        assert_eq!(report.data.len(), 2);

        // a longer run adds its new steps after them
        let report = Sweep::new(&mut task)
            .over(loop_items([1.0, 2.0, 3.0]).over("x"))
            .monitor(["y"])
            .with_data(report.data)
            .run()
            .unwrap();
        assert_eq!(report.data.len(), 3);
        let at_two = CoordinateFilter::axis("x", 2.0);
        assert_eq!(report.data.query(&amp(), &at_two).len(), 1);
        assert_eq!(
            report.data.entries()[2].coordinate.get("x"),
            Some(&Value::Float(3.0))
        );
    }

    #[test]
    fn test_memoizes_repeated_coordinates() {
        let mut task = doubler();
        let data = run_sweep(&mut task, loop_items([1.0, 1.0, 1.0]).over("x"), &["y"]).unwrap();
        assert_eq!(data.len(), 3);
        assert_eq!(task.runs(), 1);

        let exact = CoordinateFilter::Exact(Coordinate::of([("x", 1.0)]));
        assert_eq!(data.query(&amp(), &exact).len(), 3);
    }

    #[test]
    fn test_repeated_values_record_every_step() {
        let mut design = Task::design("acc");
        let x = design.input("x");
        let acc = design.state("acc", 0);
        let total = design.sum("total", [acc, x]);
        design.update(acc, total).output("total", total);
        let mut task = design.finish().unwrap();

        let path = PathNode::parse("acc").unwrap();
        let data = run_sweep(&mut task, loop_items([1, 1, 1]).over("x"), &["total"]).unwrap();
        let totals: Vec<_> = data.series(&path, "total").into_iter().map(|(_, v)| v.clone()).collect();
        assert_eq!(totals, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn test_len_hint_product() {
        let loops = [loop_count(2).over("a"), loop_lin(0.0, 1.0, 3).over("b")];
        let total = loops.iter().map(LoopSystem::len_hint).product::<Option<usize>>();
        assert_eq!(total, Some(6));
        assert_eq!(loop_bisect(0.0, 1.0).len_hint(), None);
    }
}
