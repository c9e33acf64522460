//! Workflow Unrolling
//!
//! Walks a workflow's step list until every step has been materialized into
//! scheduled units. A step is ready once every source it names has a promise;
//! scheduling it registers promises for its own outputs, which may make later
//! (or earlier) steps ready on the next pass.
//!
//! A pass that schedules nothing while steps or workflow outputs are still
//! waiting means the remaining dependencies can never be satisfied, and is
//! reported as [`FlowError::Deadlock`].

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info};

use crate::error::FlowError;
use crate::execution::graph::{Edge, JobGraph, UnitId};
use crate::execution::unit::UnitKind;
use crate::workflow::model::{shortname, Process, Workflow, WorkflowStep};
use crate::workflow::value::{Value, ValueMap};

use super::conditional::Conditional;
use super::indirect::{
    producers_of, DefaultWithSource, IndirectMap, IndirectValue, StepValueFrom,
};
use super::promise::{Promise, PromiseTable};
use super::scatter::ScatterMethod;
use super::source::ResolveSource;

/// Where a new job hangs in the graph.
#[derive(Debug, Clone)]
pub struct Placement {
    pub parent: UnitId,
    pub edges: Vec<Edge>,
    pub label: String,
    pub step: String,
}

/// Materializes one invocation of a tool or nested workflow.
///
/// Returns the unit whose outputs stand for the invocation's outputs: the
/// tool unit itself, or the output-resolution unit paired with a workflow.
pub fn make_job(
    graph: &mut JobGraph,
    process: &Process,
    inputs: IndirectMap,
    gate: Conditional,
    placement: Placement,
) -> UnitId {
    let Placement {
        parent,
        edges,
        label,
        step,
    } = placement;

    match process {
        Process::Tool(tool) => graph.add(
            UnitKind::Tool {
                tool: tool.clone(),
                inputs,
                gate,
            },
            label,
            step,
            Some(parent),
            edges,
        ),
        Process::Workflow(workflow) => {
            let unit = graph.add(
                UnitKind::Workflow {
                    workflow: workflow.clone(),
                    inputs,
                    gate,
                },
                label.clone(),
                step.clone(),
                Some(parent),
                edges,
            );
            graph.add(
                UnitKind::ResolveOutputs { workflow: unit },
                format!("{} (outputs)", label),
                step,
                Some(parent),
                vec![Edge::AfterSubtree(unit)],
            )
        }
    }
}

/// Unrolls one workflow invocation under the unit `parent`.
///
/// `inputs` is the invocation's input object keyed by short name. Returns
/// the workflow's output composite, to be resolved once every unit spawned
/// under `parent` has completed.
pub fn unroll(
    workflow: &Workflow,
    inputs: ValueMap,
    graph: &mut JobGraph,
    parent: UnitId,
) -> Result<IndirectMap, FlowError> {
    let mut promises = PromiseTable::new();
    let inputs = Arc::new(inputs);
    for input in &workflow.inputs {
        promises.register(input.id.clone(), Promise::literal(inputs.clone(), shortname(&input.id)))?;
    }

    let mut scheduled: HashSet<&str> = HashSet::new();
    let mut passes = 0;

    loop {
        passes += 1;
        let before = scheduled.len();

        for step in &workflow.steps {
            if scheduled.contains(step.id.as_str()) {
                continue;
            }
            if step.sources().all(|source| promises.contains(source)) {
                schedule_step(step, &mut promises, graph, parent)?;
                scheduled.insert(step.id.as_str());
            }
        }

        let outputs_ready = workflow
            .outputs
            .iter()
            .all(|output| output.output_source.iter().all(|s| promises.contains(s)));
        if scheduled.len() == workflow.steps.len() && outputs_ready {
            break;
        }
        if scheduled.len() == before {
            return Err(deadlock(workflow, &scheduled, &promises));
        }
    }

    info!(
        "Unrolled workflow '{}': {} steps in {} passes",
        workflow.id,
        workflow.steps.len(),
        passes
    );

    let mut outputs = IndirectMap::new();
    for output in &workflow.outputs {
        let key = shortname(&output.id).to_string();
        let source = ResolveSource::new(
            format!("Workflow output '{}'", key),
            output.source_spec(),
            &promises,
        )?;
        outputs.insert(key, IndirectValue::Source(source));
    }
    Ok(outputs)
}

/// Builds a ready step's input object and materializes its unit(s).
fn schedule_step(
    step: &WorkflowStep,
    promises: &mut PromiseTable,
    graph: &mut JobGraph,
    parent: UnitId,
) -> Result<(), FlowError> {
    let inputs = step_inputs(step, promises)?;
    let gate = Conditional::new(step.when.clone(), step.output_names());

    let producers = producers_of(&inputs);
    let edges: Vec<Edge> = if producers.is_empty() {
        vec![Edge::After(parent)]
    } else {
        producers.into_iter().map(Edge::After).collect()
    };

    let producer = if step.is_scattered() {
        for port in &step.scatter {
            let name = shortname(port);
            if !step.inputs.iter().any(|i| shortname(&i.id) == name) {
                return Err(FlowError::validation(format!(
                    "Step '{}' scatters over unknown input '{}'",
                    step.id, name
                )));
            }
        }
        let method = ScatterMethod::for_step(step)?;

        let scatter = graph.add(
            UnitKind::Scatter {
                step: step.clone(),
                inputs,
                gate,
                method,
            },
            format!("{} (scatter)", step.id),
            step.id.clone(),
            Some(parent),
            edges,
        );
        graph.add(
            UnitKind::Gather {
                scatter,
                outputs: step.output_names(),
            },
            format!("{} (gather)", step.id),
            step.id.clone(),
            Some(parent),
            vec![Edge::AfterSubtree(scatter)],
        )
    } else {
        make_job(
            graph,
            &step.run,
            inputs,
            gate,
            Placement {
                parent,
                edges,
                label: step.id.clone(),
                step: step.id.clone(),
            },
        )
    };

    for port in &step.outputs {
        promises.register(step.output_id(port), Promise::unit(producer, shortname(port)))?;
    }
    debug!("Step '{}' scheduled, outputs produced by unit {}", step.id, producer);
    Ok(())
}

/// The deferred input object of a step, keyed by short port name.
///
/// Ports with neither source, default nor `valueFrom` are left out. On a
/// scattered step `valueFrom` is applied per instance instead.
fn step_inputs(step: &WorkflowStep, promises: &PromiseTable) -> Result<IndirectMap, FlowError> {
    let mut inputs = IndirectMap::new();

    for input in &step.inputs {
        let key = shortname(&input.id).to_string();

        let mut value = if input.source.is_empty() {
            None
        } else {
            let name = format!("{}/{}", step.id, key);
            Some(IndirectValue::Source(ResolveSource::new(
                name,
                input.source_spec(),
                promises,
            )?))
        };

        if let Some(default) = &input.default {
            value = Some(IndirectValue::DefaultWithSource(DefaultWithSource::new(
                default.clone(),
                value,
            )));
        }

        if let Some(expression) = &input.value_from {
            if !step.is_scattered() {
                let upstream = value.unwrap_or(IndirectValue::Literal(Value::Null));
                value = Some(IndirectValue::ValueFrom(StepValueFrom::new(
                    expression.clone(),
                    upstream,
                )));
            }
        }

        if let Some(value) = value {
            inputs.insert(key, value);
        }
    }

    Ok(inputs)
}

fn deadlock(workflow: &Workflow, scheduled: &HashSet<&str>, promises: &PromiseTable) -> FlowError {
    let mut lines = Vec::new();

    for step in &workflow.steps {
        if scheduled.contains(step.id.as_str()) {
            continue;
        }
        let missing: Vec<&str> = step
            .sources()
            .filter(|s| !promises.contains(s.as_str()))
            .map(String::as_str)
            .collect();
        lines.push(format!("  step '{}' waits on: {}", step.id, missing.join(", ")));
    }

    for output in &workflow.outputs {
        let missing: Vec<&str> = output
            .output_source
            .iter()
            .filter(|s| !promises.contains(s.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            lines.push(format!("  output '{}' waits on: {}", output.id, missing.join(", ")));
        }
    }

    FlowError::Deadlock {
        workflow: workflow.id.clone(),
        details: lines.join("\n"),
    }
}
