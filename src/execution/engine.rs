//! Workflow Execution Engine
//!
//! The core engine that drives a workflow run to completion:
//! - Seeds the job graph with the top-level workflow unit
//! - Prepares ready control units inline (unrolling, scatter, gather)
//! - Runs tool units on worker threads, bounded by `max_parallel`
//! - Fails fast on the first error
//! - Reports a graph that can no longer make progress as a deadlock

use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use log::{debug, error, info};

use crate::dataflow::conditional::Conditional;
use crate::dataflow::indirect::{literal_map, resolve_indirect, Resolver};
use crate::error::{Diagnostic, Diagnostics, FlowError};
use crate::expression::{ExpressionEvaluator, ParameterReferences};
use crate::monitoring::{EventType, ExecutionTimeline};
use crate::workflow::model::{shortname, Workflow};
use crate::workflow::value::{Value, ValueMap};

use super::executor::{ExecutionRequest, Executor, LocalExecutor};
use super::graph::{Edge, JobGraph, UnitId, UnitOutput};
use super::unit::{prepare, Prepared, UnitContext, UnitKind};

type Completion = (UnitId, Result<ValueMap, FlowError>);

/// Workflow execution engine.
///
/// # Example
///
/// ```rust,no_run
/// use flowrunner::execution::Engine;
/// use flowrunner::workflow::{load_job_order, load_workflow};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let workflow = load_workflow("pipeline.yaml")?;
///     let job = load_job_order("job.yaml")?;
///
///     let mut engine = Engine::new();
///     engine.set_max_parallel(4);
///     engine.set_working_dir("/data/analysis");
///
///     let outcome = engine.run(&workflow, job)?;
///     println!("{:?}", outcome.outputs);
///     Ok(())
/// }
/// ```
pub struct Engine {
    executor: Arc<dyn Executor>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    max_parallel: usize,
    dry_run: bool,
    working_dir: Option<PathBuf>,
}

impl Engine {
    /// Creates an engine with the built-in evaluator and local executor.
    pub fn new() -> Self {
        let evaluator: Arc<dyn ExpressionEvaluator> = Arc::new(ParameterReferences::new());
        Self {
            executor: Arc::new(LocalExecutor::new(Arc::clone(&evaluator))),
            evaluator,
            max_parallel: num_cpus::get(),
            dry_run: false,
            working_dir: None,
        }
    }

    /// Replaces the executor that runs tool units.
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    /// Replaces the evaluator used for `valueFrom` and `when`.
    ///
    /// The executor keeps its own evaluator for tool commands and outputs.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Sets the maximum number of tool units running at once.
    pub fn set_max_parallel(&mut self, max: usize) {
        self.max_parallel = max.max(1);
    }

    /// Enables or disables dry run mode.
    ///
    /// In a dry run no tool is submitted; every declared tool output is null.
    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    /// Sets the working directory for tool execution.
    pub fn set_working_dir(&mut self, dir: impl Into<PathBuf>) {
        self.working_dir = Some(dir.into());
    }

    /// Runs `workflow` with the job order `job` and returns its outputs.
    ///
    /// This is the main entry point that:
    /// 1. Adds the top-level workflow unit and its output-resolution unit
    /// 2. Prepares every ready unit, spawning tool units on worker threads
    /// 3. Publishes worker results as they arrive
    /// 4. Stops at the first error, or once the graph is drained
    pub fn run(&self, workflow: &Workflow, job: ValueMap) -> Result<RunOutcome, FlowError> {
        let start_time = Instant::now();
        let mut timeline = ExecutionTimeline::new();
        let diagnostics = Diagnostics::new();
        let mut graph = JobGraph::new();

        let root = graph.add(
            UnitKind::Workflow {
                workflow: workflow.clone(),
                inputs: literal_map(job),
                gate: Conditional::always(),
            },
            workflow.id.clone(),
            workflow.id.clone(),
            None,
            Vec::new(),
        );
        let outputs_unit = graph.add(
            UnitKind::ResolveOutputs { workflow: root },
            format!("{} (outputs)", workflow.id),
            workflow.id.clone(),
            None,
            vec![Edge::AfterSubtree(root)],
        );

        info!(
            "Starting workflow '{}' (max parallel: {}, dry run: {})",
            workflow.id, self.max_parallel, self.dry_run
        );

        let (tx, rx): (Sender<Completion>, Receiver<Completion>) = channel();
        let mut running_count = 0;

        loop {
            // Control units finish inline and can unlock more units
            let mut progressed = true;
            while progressed {
                progressed = false;

                for id in graph.ready_units() {
                    let is_tool = graph.get(id).map_or(false, |u| u.kind.is_tool());
                    if is_tool && running_count >= self.max_parallel {
                        continue;
                    }

                    let ctx = UnitContext {
                        evaluator: self.evaluator.as_ref(),
                        diagnostics: &diagnostics,
                        working_dir: self.working_dir.as_ref(),
                    };
                    let prepared = match prepare(&mut graph, id, ctx) {
                        Ok(prepared) => prepared,
                        Err(e) => {
                            let label = label_of(&graph, id);
                            error!("Unit '{}' failed: {}", label, e);
                            graph.mark_failed(id, e.to_string());
                            timeline.add_event(label, EventType::Failed);
                            return Err(e);
                        }
                    };

                    match prepared {
                        Prepared::Done(output) => {
                            debug!("Unit '{}' finished", label_of(&graph, id));
                            graph.complete(id, output)?;
                        }
                        Prepared::Skipped(outputs) => {
                            timeline.add_event(label_of(&graph, id), EventType::Skipped);
                            graph.complete(id, UnitOutput::Values(outputs))?;
                        }
                        Prepared::Submit(request) if self.dry_run => {
                            info!("[DRY RUN] Unit '{}' ({}): {:?}", request.unit, request.tool.id, request.inputs);
                            timeline.add_event(request.unit.clone(), EventType::Started);
                            timeline.add_event(request.unit.clone(), EventType::Completed);
                            graph.complete(id, UnitOutput::Values(null_outputs(&request)))?;
                        }
                        Prepared::Submit(request) => {
                            info!("Starting unit: {}", request.unit);
                            timeline.add_event(request.unit.clone(), EventType::Started);
                            graph.mark_running(id);
                            self.spawn(id, request, tx.clone());
                            running_count += 1;
                        }
                    }
                    progressed = true;
                }
            }

            if running_count == 0 {
                if !graph.has_work_remaining() {
                    break;
                }
                return Err(FlowError::Deadlock {
                    workflow: workflow.id.clone(),
                    details: graph
                        .pending_labels()
                        .iter()
                        .map(|label| format!("  unit '{}' can never become ready", label))
                        .collect::<Vec<_>>()
                        .join("\n"),
                });
            }

            let (id, result) = rx.recv().map_err(|e| {
                FlowError::execution(workflow.id.clone(), format!("worker channel closed: {}", e))
            })?;
            running_count -= 1;
            let label = label_of(&graph, id);

            match result {
                Ok(outputs) => {
                    info!("Unit '{}' completed successfully", label);
                    timeline.add_event(label, EventType::Completed);
                    graph.complete(id, UnitOutput::Values(outputs))?;
                }
                Err(e) => {
                    error!("Unit '{}' failed: {}", label, e);
                    graph.mark_failed(id, e.to_string());
                    timeline.add_event(label, EventType::Failed);
                    return Err(e);
                }
            }
        }

        let outputs = graph.values(outputs_unit)?.clone();
        let (completed, total) = graph.progress();
        let elapsed = start_time.elapsed();
        info!(
            "Workflow '{}' completed: {}/{} units in {:.2?}",
            workflow.id, completed, total, elapsed
        );

        Ok(RunOutcome {
            outputs,
            diagnostics: diagnostics.snapshot(),
            started_at: timeline.started_at(),
            elapsed,
            timeline,
            graph,
            root,
            evaluator: Arc::clone(&self.evaluator),
        })
    }

    /// Runs one tool unit on a worker thread.
    fn spawn(&self, id: UnitId, request: ExecutionRequest, tx: Sender<Completion>) {
        let executor = Arc::clone(&self.executor);
        thread::spawn(move || {
            let result = executor.execute(&request);
            // The receiver is gone once the run has failed fast
            if let Err(e) = tx.send((id, result)) {
                debug!("Dropped result of unit '{}': {}", request.unit, e);
            }
        });
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

fn label_of(graph: &JobGraph, id: UnitId) -> String {
    graph
        .get(id)
        .map_or_else(|| id.to_string(), |unit| unit.label.clone())
}

/// Every declared tool output bound to null.
fn null_outputs(request: &ExecutionRequest) -> ValueMap {
    request
        .tool
        .outputs
        .iter()
        .map(|output| (shortname(&output.id).to_string(), Value::Null))
        .collect()
}

/// Result of a successful run.
pub struct RunOutcome {
    /// Final workflow outputs, keyed by output id
    pub outputs: ValueMap,
    /// Skipped values that reached a port without a pickValue policy
    pub diagnostics: Vec<Diagnostic>,
    pub started_at: DateTime<Local>,
    pub elapsed: Duration,
    pub timeline: ExecutionTimeline,
    graph: JobGraph,
    root: UnitId,
    evaluator: Arc<dyn ExpressionEvaluator>,
}

impl RunOutcome {
    /// Resolves the top-level output composite again from the finished graph.
    ///
    /// Promise reads do not change the graph, so this yields [`Self::outputs`]
    /// again.
    pub fn resolve_outputs(&self) -> Result<ValueMap, FlowError> {
        match self.graph.output(self.root)? {
            UnitOutput::Values(values) => Ok(values.clone()),
            UnitOutput::Deferred(composite) => {
                let diagnostics = Diagnostics::new();
                let resolver = Resolver::new(&self.graph, self.evaluator.as_ref(), &diagnostics);
                resolve_indirect(composite, &resolver)
            }
            UnitOutput::Fanout(_) => Err(FlowError::validation(format!(
                "unit {} is not a workflow unit",
                self.root
            ))),
        }
    }

    /// The job graph the run built.
    pub fn graph(&self) -> &JobGraph {
        &self.graph
    }
}
