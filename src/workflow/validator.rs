//! Workflow Validation
//!
//! Static checks run when a workflow is loaded:
//! - Step and port identifiers
//! - Reference integrity of every source and output source
//! - Scatter ports and merge/pick/scatter policy names
//!
//! Nested workflows are validated recursively. Cycles are not rejected here;
//! they surface as a deadlock when the workflow is unrolled.

use std::collections::HashSet;
use std::str::FromStr;

use log::{debug, info};

use crate::dataflow::scatter::ScatterMethod;
use crate::dataflow::source::{LinkMerge, PickValue};
use crate::error::FlowError;

use super::model::{shortname, Process, SourceSpec, Workflow, WorkflowStep};

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyStepId { workflow: String },
    DuplicateStepId(String),
    DuplicatePort { step: String, port: String },
    UnknownSource { location: String, source: String },
    MissingOutputSource(String),
    UnknownScatterPort { step: String, port: String },
    UnsupportedPolicy { location: String, message: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyStepId { workflow } => {
                write!(f, "Workflow '{}' has a step with an empty ID", workflow)
            }
            Self::DuplicateStepId(id) => write!(f, "Duplicate step ID: '{}'", id),
            Self::DuplicatePort { step, port } => {
                write!(f, "Step '{}' declares port '{}' more than once", step, port)
            }
            Self::UnknownSource { location, source } => {
                write!(f, "{} references unknown source '{}'", location, source)
            }
            Self::MissingOutputSource(output) => {
                write!(f, "Workflow output '{}' has no outputSource", output)
            }
            Self::UnknownScatterPort { step, port } => {
                write!(f, "Step '{}' scatters over unknown input '{}'", step, port)
            }
            Self::UnsupportedPolicy { location, message } => write!(f, "{}: {}", location, message),
        }
    }
}

/// Checks the link-merge / pick-value names of one source spec.
fn validate_policies(location: &str, spec: SourceSpec<'_>, errors: &mut Vec<ValidationError>) {
    if let Some(Err(e)) = spec.link_merge.map(LinkMerge::from_str) {
        errors.push(ValidationError::UnsupportedPolicy {
            location: location.to_string(),
            message: e.to_string(),
        });
    }
    if let Some(Err(e)) = spec.pick_value.map(PickValue::from_str) {
        errors.push(ValidationError::UnsupportedPolicy {
            location: location.to_string(),
            message: e.to_string(),
        });
    }
}

/// Validates a single step's ports against the identifiers known in its workflow.
fn validate_step(step: &WorkflowStep, known: &HashSet<String>) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let mut ports = HashSet::new();
    for input in &step.inputs {
        let port = shortname(&input.id);
        if !ports.insert(port) {
            errors.push(ValidationError::DuplicatePort {
                step: step.id.clone(),
                port: port.to_string(),
            });
        }

        let location = format!("Step input '{}/{}'", step.id, port);
        for source in &input.source {
            if !known.contains(source) {
                errors.push(ValidationError::UnknownSource {
                    location: location.clone(),
                    source: source.clone(),
                });
            }
        }
        validate_policies(&location, input.source_spec(), &mut errors);
    }

    let mut outputs = HashSet::new();
    for output in &step.outputs {
        let port = shortname(output);
        if !outputs.insert(port) {
            errors.push(ValidationError::DuplicatePort {
                step: step.id.clone(),
                port: port.to_string(),
            });
        }
    }

    for port in &step.scatter {
        if !ports.contains(shortname(port)) {
            errors.push(ValidationError::UnknownScatterPort {
                step: step.id.clone(),
                port: port.clone(),
            });
        }
    }
    if step.is_scattered() {
        if let Err(e) = ScatterMethod::for_step(step) {
            errors.push(ValidationError::UnsupportedPolicy {
                location: format!("Step '{}'", step.id),
                message: e.to_string(),
            });
        }
    }

    if step.when.is_some() {
        debug!("Step '{}' is conditional", step.id);
    }

    errors
}

fn collect_errors(workflow: &Workflow, errors: &mut Vec<ValidationError>) {
    // Every identifier a source may name: workflow inputs and step outputs
    let mut known: HashSet<String> = workflow.inputs.iter().map(|i| i.id.clone()).collect();

    let mut seen_ids: HashSet<&str> = HashSet::new();
    for step in &workflow.steps {
        if step.id.trim().is_empty() {
            errors.push(ValidationError::EmptyStepId {
                workflow: workflow.id.clone(),
            });
            continue;
        }
        if !seen_ids.insert(step.id.as_str()) {
            errors.push(ValidationError::DuplicateStepId(step.id.clone()));
        }
        known.extend(step.output_ids());
    }

    for step in &workflow.steps {
        errors.extend(validate_step(step, &known));
        if let Process::Workflow(nested) = &step.run {
            collect_errors(nested, errors);
        }
    }

    for output in &workflow.outputs {
        if output.output_source.is_empty() {
            errors.push(ValidationError::MissingOutputSource(output.id.clone()));
        }
        let location = format!("Workflow output '{}'", output.id);
        for source in &output.output_source {
            if !known.contains(source) {
                errors.push(ValidationError::UnknownSource {
                    location: location.clone(),
                    source: source.clone(),
                });
            }
        }
        validate_policies(&location, output.source_spec(), errors);
    }
}

/// Validates the entire workflow structure.
///
/// All problems found are reported together in one [`FlowError::Validation`].
pub fn validate_workflow(workflow: &Workflow) -> Result<(), FlowError> {
    info!("Validating workflow '{}' with {} steps", workflow.id, workflow.steps.len());

    let mut errors = Vec::new();
    collect_errors(workflow, &mut errors);

    if !errors.is_empty() {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        return Err(FlowError::Validation(messages.join("\n")));
    }

    info!(
        "Workflow validated: {} inputs, {} steps, {} outputs",
        workflow.inputs.len(),
        workflow.steps.len(),
        workflow.outputs.len()
    );
    Ok(())
}
