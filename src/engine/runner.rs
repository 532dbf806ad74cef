mod diagnostics;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Sender, channel};
use std::time::{Duration, Instant};

use indicatif::ProgressStyle;
use petgraph::Graph;
use petgraph::graph::NodeIndex;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::{Dynamic, Mode, TaskContext};
use crate::engine::{Delayed, Handle, Node};
use crate::error::{ExecError, TaskError};

pub use diagnostics::Diagnostics;

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// Counts of settled nodes in a running or finished evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    /// Nodes taking part in the evaluation.
    pub total: usize,
    /// Nodes that produced a value.
    pub completed: usize,
    /// Nodes that failed, either themselves or through a dependency.
    pub failed: usize,
    /// Nodes that were never started because the evaluation was cancelled.
    pub cancelled: usize,
}

impl Progress {
    pub fn settled(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }

    pub fn pending(&self) -> usize {
        self.total - self.settled()
    }

    pub fn is_done(&self) -> bool {
        self.settled() == self.total
    }
}

/// Knobs shared between the caller and a running evaluation.
pub(crate) struct Control<'a> {
    pub mode: Mode,
    /// Once set, no further node is started.
    pub cancelled: &'a AtomicBool,
    /// Called on the scheduling thread after every settled node.
    pub on_progress: &'a (dyn Fn(&Progress) + Sync),
    /// Pool to run tasks on, the global one when `None`.
    pub pool: Option<&'a rayon::ThreadPool>,
}

/// The result of evaluating part of a graph.
///
/// Holds the value or the error of every node that took part in the
/// evaluation, not only of the terminals, so intermediate results can be
/// inspected after the fact.
pub struct Outcome {
    pub(crate) blueprint: u64,
    pub(crate) results: HashMap<NodeIndex, Result<Dynamic, TaskError>>,
    pub(crate) progress: Progress,
    pub(crate) diagnostics: Diagnostics,
}

impl Outcome {
    /// The value of a node, or the error of the task that prevented it.
    pub fn get<T>(&self, handle: Delayed<T>) -> Result<Arc<T>, ExecError>
    where
        T: Send + Sync + 'static,
    {
        let node = handle.node();

        if node.blueprint != self.blueprint {
            return Err(ExecError::UnknownNode(node.index.index()));
        }

        match self.results.get(&node.index) {
            Some(Ok(output)) => Ok(handle.downcast_owned(output)),
            Some(Err(error)) => Err(error.clone().into()),
            None => Err(ExecError::UnknownNode(node.index.index())),
        }
    }

    /// Whether the node took part in this evaluation.
    pub fn contains<T>(&self, handle: Delayed<T>) -> bool {
        handle.node.blueprint == self.blueprint && self.results.contains_key(&handle.node.index)
    }

    /// Number of nodes that took part in this evaluation.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Every node that did not produce a value, with its error.
    pub fn failures(&self) -> impl Iterator<Item = (NodeIndex, &TaskError)> {
        self.results
            .iter()
            .filter_map(|(index, result)| result.as_ref().err().map(|error| (*index, error)))
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }
}

/// A message from a worker (or from the scheduler itself, for nodes settled
/// without running) about one node.
struct Report {
    index: NodeIndex,
    output: Result<Dynamic, TaskError>,
    start: Instant,
    duration: Duration,
    executed: bool,
}

impl Report {
    fn skipped(index: NodeIndex, error: TaskError) -> Self {
        Self {
            index,
            output: Err(error),
            start: Instant::now(),
            duration: Duration::ZERO,
            executed: false,
        }
    }
}

/// This function executes the task graph on a rayon pool. It performs a
/// parallel topological sort of the graph, where tasks are executed as soon as
/// their dependencies are met.
///
/// The algorithm works as follows:
/// 1. Every node to run gets a count of its unresolved incoming edges.
/// 2. The nodes with no dependencies are spawned on the pool.
/// 3. The calling thread waits for results coming back over a channel.
/// 4. When a node settles, its result is stored and the counts of its
///    dependents are decremented.
/// 5. A dependent whose count reaches zero is spawned, unless one of its
///    dependencies failed (it settles with that same error, without running)
///    or the evaluation was cancelled (it settles as cancelled).
/// 6. The loop continues until every node has settled.
///
/// The calling thread only schedules, it never runs tasks itself, so a pool
/// with a single worker still makes progress.
pub(crate) fn run_tasks_parallel(
    graph: &Graph<Node, ()>,
    blueprint: u64,
    nodes_to_run: &HashSet<NodeIndex>,
    control: &Control<'_>,
) -> Result<Outcome, ExecError> {
    let mut scheduler = Scheduler::new(graph, nodes_to_run);

    if scheduler.progress.total == 0 {
        (control.on_progress)(&scheduler.progress);
        return Ok(scheduler.finish(blueprint));
    }

    let root_span = tracing::span!(Level::INFO, "evaluating", mode = ?control.mode);
    root_span.pb_set_length(scheduler.progress.total as u64);
    root_span.pb_set_style(&crate::utils::get_style_graph());
    root_span.pb_set_message("Running tasks...");
    let _enter = root_span.enter();

    match control.pool {
        Some(pool) => pool.in_place_scope(|s| scheduler.run(s, control, &root_span)),
        None => rayon::in_place_scope(|s| scheduler.run(s, control, &root_span)),
    }?;

    let progress = scheduler.progress;
    tracing::info!(
        completed = progress.completed,
        failed = progress.failed,
        cancelled = progress.cancelled,
        "evaluation finished"
    );

    Ok(scheduler.finish(blueprint))
}

/// Bookkeeping owned by the scheduling thread.
struct Scheduler<'g> {
    graph: &'g Graph<Node, ()>,
    dependents: HashMap<NodeIndex, Vec<NodeIndex>>,
    dependency_counts: HashMap<NodeIndex, usize>,
    results: HashMap<NodeIndex, Result<Dynamic, TaskError>>,
    execution_times: HashMap<NodeIndex, TaskExecution>,
    progress: Progress,
    /// Nodes settled on the scheduling thread without being spawned.
    settled: VecDeque<Report>,
}

impl<'g> Scheduler<'g> {
    fn new(graph: &'g Graph<Node, ()>, nodes_to_run: &HashSet<NodeIndex>) -> Self {
        // Build a map from a dependency to the nodes that depend on it.
        let mut dependents: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
        for edge in graph.raw_edges() {
            dependents
                .entry(edge.source())
                .or_default()
                .push(edge.target());
        }

        // Count dependencies for each node that we intend to run. A node
        // consuming the same handle twice has two edges and waits for both.
        let dependency_counts = nodes_to_run
            .iter()
            .map(|&i| {
                (
                    i,
                    graph
                        .neighbors_directed(i, petgraph::Direction::Incoming)
                        .filter(|dep| nodes_to_run.contains(dep))
                        .count(),
                )
            })
            .collect();

        Self {
            graph,
            dependents,
            dependency_counts,
            results: HashMap::with_capacity(nodes_to_run.len()),
            execution_times: HashMap::new(),
            progress: Progress {
                total: nodes_to_run.len(),
                ..Progress::default()
            },
            settled: VecDeque::new(),
        }
    }

    fn run(
        &mut self,
        s: &rayon::Scope<'_>,
        control: &Control<'_>,
        root_span: &tracing::Span,
    ) -> Result<(), ExecError> {
        let (sender, receiver) = channel::<Report>();
        let pb_style = crate::utils::get_style_task();

        // Seed initial tasks, in graph order so runs are reproducible.
        let mut roots: Vec<NodeIndex> = self
            .dependency_counts
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(index, _)| *index)
            .collect();
        roots.sort();

        for index in roots {
            self.dispatch(s, &sender, &pb_style, control, index)?;
        }

        // The scheduling thread sits here while Rayon workers execute tasks.
        while self.progress.settled() < self.progress.total {
            let report = match self.settled.pop_front() {
                Some(report) => report,
                None => receiver.recv()?,
            };

            let completed = report.index;
            self.settle(report);
            root_span.pb_inc(1);
            (control.on_progress)(&self.progress);

            // Unlock dependents
            if let Some(dependents) = self.dependents.get(&completed).cloned() {
                for index in dependents {
                    if let Some(count) = self.dependency_counts.get_mut(&index) {
                        *count -= 1;
                        if *count == 0 {
                            self.dispatch(s, &sender, &pb_style, control, index)?;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn settle(&mut self, report: Report) {
        match &report.output {
            Ok(_) => self.progress.completed += 1,
            Err(TaskError::Cancelled { .. }) => self.progress.cancelled += 1,
            Err(error) => {
                if report.executed {
                    tracing::error!(task = %self.graph[report.index].key, "{error}");
                }
                self.progress.failed += 1;
            }
        }

        if report.executed {
            self.execution_times.insert(
                report.index,
                TaskExecution {
                    start: report.start,
                    duration: report.duration,
                },
            );
        }

        self.results.insert(report.index, report.output);
    }

    /// Starts a node whose dependencies have all settled, or settles it
    /// right away when it can't run.
    fn dispatch(
        &mut self,
        s: &rayon::Scope<'_>,
        sender: &Sender<Report>,
        pb_style: &ProgressStyle,
        control: &Control<'_>,
        index: NodeIndex,
    ) -> Result<(), ExecError> {
        let node = &self.graph[index];

        let mut dependencies = Vec::new();
        for dependency in node.task.dependencies() {
            match self.results.get(&dependency.index) {
                Some(Ok(output)) => dependencies.push(output.clone()),
                Some(Err(error)) => {
                    tracing::debug!(task = %node.key, upstream = error.task(), "skipping");
                    self.settled.push_back(Report::skipped(index, error.clone()));
                    return Ok(());
                }
                None => return Err(ExecError::UnknownNode(dependency.index.index())),
            }
        }

        if control.cancelled.load(Ordering::Acquire) {
            let error = TaskError::Cancelled {
                task: node.name.clone(),
            };
            self.settled.push_back(Report::skipped(index, error));
            return Ok(());
        }

        let node = node.clone();
        let sender = sender.clone();
        let pb_style = pb_style.clone();
        let mode = control.mode;

        // Spawn on Rayon pool
        s.spawn(move |_| {
            let span = tracing::span!(Level::INFO, "task", key = %node.key);
            span.pb_set_style(&pb_style);
            span.pb_set_message(&format!("Running {}", node.name));
            let _enter = span.enter();

            let context = TaskContext {
                name: node.name.clone(),
                key: node.key.clone(),
                mode,
                span: span.clone(),
            };

            let start = Instant::now();

            // A task only owns cloned inputs, so unwinding can't leave shared
            // state half-written.
            let output = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                node.task.execute(&context, &dependencies)
            })) {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(error)) => Err(TaskError::Failed {
                    task: node.name.clone(),
                    error: Arc::new(error),
                }),
                Err(panic) => {
                    let message = if let Some(s) = panic.downcast_ref::<&str>() {
                        s.to_string()
                    } else if let Some(s) = panic.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        String::from("unknown payload")
                    };

                    Err(TaskError::Panicked {
                        task: node.name.clone(),
                        message,
                    })
                }
            };

            let duration = start.elapsed();

            // The receiver only goes away if the scheduler already gave up.
            let _ = sender.send(Report {
                index,
                output,
                start,
                duration,
                executed: true,
            });
        });

        Ok(())
    }

    fn finish(self, blueprint: u64) -> Outcome {
        Outcome {
            blueprint,
            results: self.results,
            progress: self.progress,
            diagnostics: Diagnostics {
                execution_times: self.execution_times,
            },
        }
    }
}
