//! Unit Kinds
//!
//! What each kind of scheduled unit does when its dependencies are met.
//! Control units (nested workflows, scatters, gathers, output resolution)
//! finish in [`prepare`]; tool units yield an [`ExecutionRequest`] for the
//! executor.

use std::path::PathBuf;

use log::{debug, info};

use crate::dataflow::conditional::Conditional;
use crate::dataflow::indirect::{literal_map, resolve_indirect, IndirectMap, Resolver};
use crate::dataflow::scatter::{expand, extract, post_scatter_eval, Fanout, ScatterMethod};
use crate::dataflow::unroll::{make_job, unroll, Placement};
use crate::error::{Diagnostics, FlowError};
use crate::expression::ExpressionEvaluator;
use crate::workflow::model::{shortname, ToolSpec, Workflow, WorkflowStep};
use crate::workflow::value::{Value, ValueMap};

use super::executor::ExecutionRequest;
use super::graph::{Edge, JobGraph, UnitId, UnitOutput};

/// The work a scheduled unit stands for.
#[derive(Debug, Clone)]
pub enum UnitKind {
    /// One invocation of an atomic tool
    Tool {
        tool: ToolSpec,
        inputs: IndirectMap,
        gate: Conditional,
    },
    /// One invocation of a nested workflow; running it unrolls the workflow
    Workflow {
        workflow: Workflow,
        inputs: IndirectMap,
        gate: Conditional,
    },
    /// Forces a workflow unit's output composite once its subtree is done
    ResolveOutputs { workflow: UnitId },
    /// Expands a scattered step into one sub-unit per instance
    Scatter {
        step: WorkflowStep,
        inputs: IndirectMap,
        gate: Conditional,
        method: ScatterMethod,
    },
    /// Collects per-instance outputs of a scatter unit into arrays
    Gather { scatter: UnitId, outputs: Vec<String> },
}

impl UnitKind {
    pub fn is_tool(&self) -> bool {
        matches!(self, UnitKind::Tool { .. })
    }
}

/// Outcome of preparing a ready unit.
#[derive(Debug)]
pub enum Prepared {
    /// Finished without the executor
    Done(UnitOutput),
    /// The gate was false; every declared output is skipped
    Skipped(ValueMap),
    /// Hand to the executor
    Submit(ExecutionRequest),
}

/// Shared services a unit needs while preparing.
#[derive(Clone, Copy)]
pub struct UnitContext<'a> {
    pub evaluator: &'a dyn ExpressionEvaluator,
    pub diagnostics: &'a Diagnostics,
    pub working_dir: Option<&'a PathBuf>,
}

/// Runs the control part of a ready unit.
///
/// Units spawned here (nested workflow steps, scatter instances) are added
/// to `graph` with `id` as their parent.
pub fn prepare(graph: &mut JobGraph, id: UnitId, ctx: UnitContext<'_>) -> Result<Prepared, FlowError> {
    let unit = graph
        .get(id)
        .ok_or_else(|| FlowError::validation(format!("unknown unit {}", id)))?;
    let label = unit.label.clone();
    let kind = unit.kind.clone();

    match kind {
        UnitKind::Tool { tool, inputs, gate } => {
            let resolver = Resolver::new(graph, ctx.evaluator, ctx.diagnostics);
            let mut resolved = resolve_indirect(&inputs, &resolver)?;
            fill_tool_defaults(&tool, &mut resolved);

            if !gate.evaluate(&resolved, ctx.evaluator)? {
                info!("Skipping '{}': condition is false", label);
                return Ok(Prepared::Skipped(gate.skipped_outputs()));
            }

            // Inputs the tool does not declare never reach the executor
            resolved.retain(|name, _| tool.declares_input(name));

            Ok(Prepared::Submit(ExecutionRequest {
                unit: label,
                tool,
                inputs: resolved,
                working_dir: ctx.working_dir.cloned(),
            }))
        }

        UnitKind::Workflow { workflow, inputs, gate } => {
            let resolved = {
                let resolver = Resolver::new(graph, ctx.evaluator, ctx.diagnostics);
                resolve_indirect(&inputs, &resolver)?
            };
            if !gate.evaluate(&resolved, ctx.evaluator)? {
                info!("Skipping workflow '{}': condition is false", label);
                return Ok(Prepared::Skipped(gate.skipped_outputs()));
            }

            let job = fill_workflow_defaults(&workflow, resolved);
            let outputs = unroll(&workflow, job, graph, id)?;
            Ok(Prepared::Done(UnitOutput::Deferred(outputs)))
        }

        UnitKind::ResolveOutputs { workflow } => match graph.output(workflow)? {
            // A skipped workflow already holds its final outputs
            UnitOutput::Values(values) => Ok(Prepared::Done(UnitOutput::Values(values.clone()))),
            UnitOutput::Deferred(composite) => {
                let resolver = Resolver::new(graph, ctx.evaluator, ctx.diagnostics);
                let values = resolve_indirect(composite, &resolver)?;
                debug!("Resolved outputs of '{}': {:?}", label, values.keys());
                Ok(Prepared::Done(UnitOutput::Values(values)))
            }
            UnitOutput::Fanout(_) => Err(FlowError::validation(format!(
                "unit {} is not a workflow unit",
                workflow
            ))),
        },

        UnitKind::Scatter {
            step,
            inputs,
            gate,
            method,
        } => {
            let resolved = {
                let resolver = Resolver::new(graph, ctx.evaluator, ctx.diagnostics);
                resolve_indirect(&inputs, &resolver)?
            };
            let fanout = expand(&resolved, &step.scatter, method)?;

            let value_from: Vec<(String, String)> = step
                .inputs
                .iter()
                .filter_map(|input| {
                    input
                        .value_from
                        .as_ref()
                        .map(|expr| (shortname(&input.id).to_string(), expr.clone()))
                })
                .collect();

            let mut index = 0;
            let instances = fanout.try_map(&mut |instance: ValueMap| {
                let instance = post_scatter_eval(instance, &value_from, ctx.evaluator)?;
                let placement = Placement {
                    parent: id,
                    edges: vec![Edge::After(id)],
                    label: format!("{}[{}]", step.id, index),
                    step: step.id.clone(),
                };
                index += 1;
                Ok::<_, FlowError>(make_job(&mut *graph, &step.run, literal_map(instance), gate.clone(), placement))
            })?;

            info!("Scattered '{}' into {} instances", step.id, instances.leaf_count());
            Ok(Prepared::Done(UnitOutput::Fanout(instances)))
        }

        UnitKind::Gather { scatter, outputs } => {
            let fanout = match graph.output(scatter)? {
                UnitOutput::Fanout(fanout) => fanout.clone(),
                _ => {
                    return Err(FlowError::validation(format!(
                        "unit {} is not a scatter unit",
                        scatter
                    )))
                }
            };

            let results: Fanout<ValueMap> = fanout.try_map(&mut |unit| graph.values(unit).cloned())?;
            let gathered = outputs
                .iter()
                .map(|key| (key.clone(), extract(&results, key)))
                .collect();
            Ok(Prepared::Done(UnitOutput::Values(gathered)))
        }
    }
}

/// Fills missing or null tool inputs from the tool's declared defaults.
fn fill_tool_defaults(tool: &ToolSpec, job: &mut ValueMap) {
    for input in &tool.inputs {
        let key = shortname(&input.id);
        let missing = job.get(key).map_or(true, Value::is_null);
        if missing {
            let value = input.default.clone().unwrap_or(Value::Null);
            job.insert(key.to_string(), value);
        }
    }
}

/// Builds a workflow invocation's input object from its declared inputs.
///
/// Missing or null inputs take the declared default. Values for undeclared
/// inputs are dropped.
fn fill_workflow_defaults(workflow: &Workflow, mut job: ValueMap) -> ValueMap {
    let mut filled = ValueMap::new();
    for input in &workflow.inputs {
        let key = shortname(&input.id);
        let value = match job.remove(key) {
            Some(value) if !value.is_null() => value,
            other => input.default.clone().or(other).unwrap_or(Value::Null),
        };
        filled.insert(key.to_string(), value);
    }
    filled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::indirect::IndirectValue;
    use crate::expression::ParameterReferences;
    use crate::workflow::model::{Process, StepInput, WorkflowOutput};
    use serde_json::json;

    fn ctx<'a>(evaluator: &'a ParameterReferences, diagnostics: &'a Diagnostics) -> UnitContext<'a> {
        UnitContext {
            evaluator,
            diagnostics,
            working_dir: None,
        }
    }

    fn literal_inputs(value: serde_json::Value) -> IndirectMap {
        match Value::from(value) {
            Value::Object(map) => literal_map(map),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_tool_defaults_gate_and_pruning() {
        let tool = ToolSpec::new("t").with_input("a").with_input_default("b", 5);
        let mut graph = JobGraph::new();
        let id = graph.add(
            UnitKind::Tool {
                tool,
                inputs: literal_inputs(json!({"a": 1, "b": null, "extra": true})),
                gate: Conditional::new(Some("$(inputs.extra)".to_string()), vec!["out".to_string()]),
            },
            "s",
            "s",
            None,
            Vec::new(),
        );

        let evaluator = ParameterReferences::new();
        let diagnostics = Diagnostics::new();
        match prepare(&mut graph, id, ctx(&evaluator, &diagnostics)).unwrap() {
            Prepared::Submit(request) => {
                assert_eq!(request.inputs["a"], Value::from(1));
                assert_eq!(request.inputs["b"], Value::from(5));
                assert!(!request.inputs.contains_key("extra"));
            }
            other => panic!("expected submission, got {:?}", other),
        }
    }

    #[test]
    fn test_tool_gate_false_skips() {
        let mut graph = JobGraph::new();
        let id = graph.add(
            UnitKind::Tool {
                tool: ToolSpec::new("t"),
                inputs: IndirectMap::new(),
                gate: Conditional::new(Some("$(false)".to_string()), vec!["out".to_string()]),
            },
            "s",
            "s",
            None,
            Vec::new(),
        );

        let evaluator = ParameterReferences::new();
        let diagnostics = Diagnostics::new();
        match prepare(&mut graph, id, ctx(&evaluator, &diagnostics)).unwrap() {
            Prepared::Skipped(outputs) => assert_eq!(outputs["out"], Value::Skipped),
            other => panic!("expected skip, got {:?}", other),
        }
    }

    #[test]
    fn test_workflow_unit_unrolls_children() {
        let mut inner = Workflow::new("inner")
            .with_input_default("x", 2)
            .with_output(WorkflowOutput::new("y", "echo/out"));
        inner
            .add_step(
                WorkflowStep::new("echo", Process::Tool(ToolSpec::new("echo").with_input("msg")))
                    .with_input(StepInput::new("msg").from_source("x"))
                    .with_output("out"),
            )
            .unwrap();

        let mut graph = JobGraph::new();
        let id = graph.add(
            UnitKind::Workflow {
                workflow: inner,
                inputs: IndirectMap::new(),
                gate: Conditional::always(),
            },
            "inner",
            "inner",
            None,
            Vec::new(),
        );

        let evaluator = ParameterReferences::new();
        let diagnostics = Diagnostics::new();
        match prepare(&mut graph, id, ctx(&evaluator, &diagnostics)).unwrap() {
            Prepared::Done(UnitOutput::Deferred(outputs)) => {
                assert!(matches!(outputs.get("y"), Some(IndirectValue::Source(_))));
            }
            other => panic!("expected deferred outputs, got {:?}", other),
        }
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.get(UnitId(1)).unwrap().parent, Some(id));
    }

    #[test]
    fn test_scatter_and_gather() {
        let step = WorkflowStep::new("s", Process::Tool(ToolSpec::new("t").with_input("n")))
            .with_input(StepInput::new("n"))
            .with_output("out")
            .with_scatter("n");

        let mut graph = JobGraph::new();
        let scatter = graph.add(
            UnitKind::Scatter {
                step,
                inputs: literal_inputs(json!({"n": [1, 2, 3]})),
                gate: Conditional::always(),
                method: ScatterMethod::DotProduct,
            },
            "s (scatter)",
            "s",
            None,
            Vec::new(),
        );

        let evaluator = ParameterReferences::new();
        let diagnostics = Diagnostics::new();
        let prepared = prepare(&mut graph, scatter, ctx(&evaluator, &diagnostics)).unwrap();
        let Prepared::Done(output) = prepared else {
            panic!("scatter should finish in prepare");
        };
        graph.complete(scatter, output).unwrap();

        let instances: Vec<UnitId> = graph.units().filter(|u| u.kind.is_tool()).map(|u| u.id).collect();
        assert_eq!(instances.len(), 3);
        assert_eq!(graph.get(instances[2]).unwrap().label, "s[2]");

        for (i, id) in instances.iter().enumerate() {
            let mut out = ValueMap::new();
            out.insert("out".to_string(), Value::from(i as i64 * 10));
            graph.complete(*id, UnitOutput::Values(out)).unwrap();
        }

        let gather = graph.add(
            UnitKind::Gather {
                scatter,
                outputs: vec!["out".to_string()],
            },
            "s (gather)",
            "s",
            None,
            vec![Edge::AfterSubtree(scatter)],
        );
        match prepare(&mut graph, gather, ctx(&evaluator, &diagnostics)).unwrap() {
            Prepared::Done(UnitOutput::Values(values)) => {
                assert_eq!(values["out"].to_json(), json!([0, 10, 20]));
            }
            other => panic!("expected gathered values, got {:?}", other),
        }
    }

    #[test]
    fn test_fill_workflow_defaults() {
        let workflow = Workflow::new("w").with_input("a").with_input_default("b", "d").with_input("c");
        let mut job = ValueMap::new();
        job.insert("a".to_string(), Value::from(1));
        job.insert("b".to_string(), Value::Null);
        job.insert("undeclared".to_string(), Value::from(2));

        let filled = fill_workflow_defaults(&workflow, job);

        assert_eq!(filled["a"], Value::from(1));
        assert_eq!(filled["b"], Value::from("d"));
        assert_eq!(filled["c"], Value::Null);
        assert!(!filled.contains_key("undeclared"));
    }
}
