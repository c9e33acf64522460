//! Workflow Parser
//!
//! Handles loading workflow definitions and job orders from files.
//! Files ending in `.json` are read as JSON; anything else as YAML.

use std::fs;
use std::path::Path;

use log::{debug, info};

use crate::error::FlowError;

use super::model::Workflow;
use super::validator::validate_workflow;
use super::value::{Value, ValueMap};

/// Serialization format of a workflow or job order file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Json,
}

impl Format {
    /// Picks the format from a file extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
            _ => Format::Yaml,
        }
    }
}

fn read(path: &Path, what: &str) -> Result<String, FlowError> {
    fs::read_to_string(path).map_err(|e| {
        FlowError::Parse(format!(
            "Failed to read {} file '{}': {}. Check that the file exists and is readable.",
            what,
            path.display(),
            e
        ))
    })
}

/// Parses a workflow description without validating it.
pub fn parse_workflow(content: &str, format: Format) -> Result<Workflow, FlowError> {
    let workflow = match format {
        Format::Json => serde_json::from_str(content)?,
        Format::Yaml => serde_yaml::from_str(content)?,
    };
    Ok(workflow)
}

/// Loads a workflow from a file.
///
/// This function:
/// 1. Reads and parses the file (YAML or JSON)
/// 2. Validates the workflow structure
///
/// # Example
///
/// ```rust,no_run
/// use flowrunner::workflow::load_workflow;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let workflow = load_workflow("pipeline.yaml")?;
///     println!("Loaded {} steps", workflow.steps.len());
///     Ok(())
/// }
/// ```
pub fn load_workflow(path: impl AsRef<Path>) -> Result<Workflow, FlowError> {
    let path = path.as_ref();
    info!("Loading workflow from: {}", path.display());

    let content = read(path, "workflow")?;
    debug!("Workflow content loaded ({} bytes)", content.len());

    let workflow = parse_workflow(&content, Format::from_path(path)).map_err(|e| {
        FlowError::Parse(format!(
            "Failed to parse workflow '{}': {}. Check the file format.",
            path.display(),
            e
        ))
    })?;

    info!(
        "Parsed workflow '{}': {} inputs, {} steps, {} outputs",
        workflow.id,
        workflow.inputs.len(),
        workflow.steps.len(),
        workflow.outputs.len()
    );

    validate_workflow(&workflow)?;
    Ok(workflow)
}

/// Parses a job order: a mapping from workflow input id to value.
pub fn parse_job_order(content: &str, format: Format) -> Result<ValueMap, FlowError> {
    let value: Value = match format {
        Format::Json => serde_json::from_str(content)?,
        Format::Yaml => serde_yaml::from_str(content)?,
    };
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(ValueMap::new()),
        other => Err(FlowError::Parse(format!(
            "Job order must be a mapping, got {}",
            other.type_name()
        ))),
    }
}

/// Loads a job order from a file.
pub fn load_job_order(path: impl AsRef<Path>) -> Result<ValueMap, FlowError> {
    let path = path.as_ref();
    info!("Loading job order from: {}", path.display());

    let content = read(path, "job order")?;
    let job = parse_job_order(&content, Format::from_path(path))?;
    debug!("Job order provides {} inputs", job.len());
    Ok(job)
}

/// Saves a workflow to a YAML file.
pub fn save_workflow(workflow: &Workflow, path: impl AsRef<Path>) -> Result<(), FlowError> {
    let yaml_content = serde_yaml::to_string(workflow)?;
    fs::write(path.as_ref(), yaml_content)?;
    info!("Workflow saved to: {}", path.as_ref().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::Process;
    use tempfile::tempdir;

    const WORKFLOW_YAML: &str = r#"
class: Workflow
id: main
inputs:
  - id: names
outputs:
  - id: greetings
    outputSource: greet/out
steps:
  - id: greet
    in:
      - id: name
        source: names
    out: [out]
    scatter: name
    run:
      class: Tool
      inputs: [{id: name}]
      outputs: [{id: out, eval: "hello $(inputs.name)"}]
"#;

    #[test]
    fn test_format_from_path() {
        assert_eq!(Format::from_path(Path::new("wf.json")), Format::Json);
        assert_eq!(Format::from_path(Path::new("wf.JSON")), Format::Json);
        assert_eq!(Format::from_path(Path::new("wf.yaml")), Format::Yaml);
        assert_eq!(Format::from_path(Path::new("wf")), Format::Yaml);
    }

    #[test]
    fn test_load_workflow_file_not_found() {
        let result = load_workflow("/nonexistent/path/workflow.yaml");
        assert!(matches!(result, Err(FlowError::Parse(_))));
    }

    #[test]
    fn test_load_workflow_valid_yaml() {
        let temp_dir = tempdir().unwrap();
        let workflow_path = temp_dir.path().join("test_load.yaml");
        fs::write(&workflow_path, WORKFLOW_YAML).unwrap();

        let workflow = load_workflow(&workflow_path).unwrap();

        assert_eq!(workflow.id, "main");
        assert_eq!(workflow.steps.len(), 1);
        assert_eq!(workflow.steps[0].scatter, vec!["name"]);
        assert!(matches!(workflow.steps[0].run, Process::Tool(_)));
    }

    #[test]
    fn test_load_workflow_json() {
        let temp_dir = tempdir().unwrap();
        let workflow_path = temp_dir.path().join("wf.json");
        let json = r#"{
            "id": "j",
            "inputs": [{"id": "x", "default": 1}],
            "outputs": [{"id": "y", "outputSource": "x"}]
        }"#;
        fs::write(&workflow_path, json).unwrap();

        let workflow = load_workflow(&workflow_path).unwrap();
        assert_eq!(workflow.inputs[0].default, Some(Value::from(1)));
    }

    #[test]
    fn test_load_workflow_invalid_yaml() {
        let temp_dir = tempdir().unwrap();
        let workflow_path = temp_dir.path().join("bad.yaml");
        fs::write(&workflow_path, "this is not valid yaml: [[[").unwrap();

        assert!(matches!(load_workflow(&workflow_path), Err(FlowError::Parse(_))));
    }

    #[test]
    fn test_load_workflow_fails_validation() {
        let temp_dir = tempdir().unwrap();
        let workflow_path = temp_dir.path().join("invalid.yaml");
        fs::write(
            &workflow_path,
            "id: w\noutputs:\n  - id: o\n    outputSource: missing\n",
        )
        .unwrap();

        assert!(matches!(load_workflow(&workflow_path), Err(FlowError::Validation(_))));
    }

    #[test]
    fn test_job_order() {
        let job = parse_job_order("names: [ada, grace]\nflag: true\n", Format::Yaml).unwrap();
        assert_eq!(job["names"].as_array().unwrap().len(), 2);
        assert_eq!(job["flag"], Value::Bool(true));

        assert!(parse_job_order("", Format::Yaml).unwrap().is_empty());
        assert!(parse_job_order("[1, 2]", Format::Json).is_err());
    }

    #[test]
    fn test_load_job_order_json() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("job.json");
        fs::write(&path, r#"{"x": 3}"#).unwrap();

        let job = load_job_order(&path).unwrap();
        assert_eq!(job["x"], Value::from(3));
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("saved.yaml");
        let workflow = parse_workflow(WORKFLOW_YAML, Format::Yaml).unwrap();

        save_workflow(&workflow, &path).unwrap();
        let reloaded = load_workflow(&path).unwrap();

        assert_eq!(reloaded, workflow);
    }
}
