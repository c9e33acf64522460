//! Workflow Data Model
//!
//! Core data structures describing a workflow: its inputs, outputs and steps,
//! the typed ports of each step, and the process (tool or nested workflow) a
//! step wraps.
//!
//! # Example YAML Format
//!
//! ```yaml
//! class: Workflow
//! id: main
//! inputs:
//!   - id: samples
//!   - id: run_qc
//!     default: true
//! outputs:
//!   - id: reports
//!     outputSource: qc/report
//!     pickValue: all_non_null
//! steps:
//!   - id: qc
//!     in:
//!       - id: sample
//!         source: samples
//!       - id: enabled
//!         source: run_qc
//!     out: [report]
//!     scatter: sample
//!     when: $(inputs.enabled)
//!     run:
//!       class: Tool
//!       inputs: [{id: sample}]
//!       outputs: [{id: report}]
//!       command: fastqc $(inputs.sample)
//! ```

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::value::Value;

/// Returns the short name of a parameter identifier.
///
/// Everything up to a `#` is dropped, then the last `/` segment is kept:
/// `file.yaml#main/align/bam` and `align/bam` both shorten to `bam`.
pub fn shortname(id: &str) -> &str {
    let fragment = match id.rfind('#') {
        Some(pos) => &id[pos + 1..],
        None => id,
    };
    match fragment.rfind('/') {
        Some(pos) => &fragment[pos + 1..],
        None => fragment,
    }
}

/// Deserializes either a single string or array of strings into Vec<String>
fn single_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = JsonValue::deserialize(deserializer)?;
    match val {
        JsonValue::Null => Ok(Vec::new()),
        JsonValue::String(s) if s.is_empty() => Ok(Vec::new()),
        JsonValue::String(s) => Ok(vec![s]),
        JsonValue::Array(arr) => arr
            .into_iter()
            .map(|v| match v {
                JsonValue::String(s) => Ok(s),
                _ => Err(de::Error::custom("Expected string in array")),
            })
            .collect(),
        _ => Err(de::Error::custom("Expected string or array of strings")),
    }
}

/// Borrowed view of a port that takes its value from other parameters.
#[derive(Debug, Clone, Copy)]
pub struct SourceSpec<'a> {
    pub sources: &'a [String],
    pub link_merge: Option<&'a str>,
    pub pick_value: Option<&'a str>,
}

/// One input port of a workflow step.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepInput {
    /// Port name, unique within the step
    pub id: String,

    /// Parameter identifiers feeding this port
    #[serde(deserialize_with = "single_or_vec", default, skip_serializing_if = "Vec::is_empty")]
    pub source: Vec<String>,

    /// Value used when there is no source, or the source resolves to null
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Expression computing the final port value (`self` = the sourced value)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<String>,

    /// `merge_nested` (default) or `merge_flattened`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_merge: Option<String>,

    /// `first_non_null`, `only_non_null` or `all_non_null`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pick_value: Option<String>,
}

impl StepInput {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into().trim().to_string(),
            source: Vec::new(),
            default: None,
            value_from: None,
            link_merge: None,
            pick_value: None,
        }
    }

    /// Adds a source parameter.
    pub fn from_source(mut self, source: impl Into<String>) -> Self {
        self.source.push(source.into());
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_value_from(mut self, expression: impl Into<String>) -> Self {
        self.value_from = Some(expression.into());
        self
    }

    pub fn with_link_merge(mut self, policy: impl Into<String>) -> Self {
        self.link_merge = Some(policy.into());
        self
    }

    pub fn with_pick_value(mut self, policy: impl Into<String>) -> Self {
        self.pick_value = Some(policy.into());
        self
    }

    pub fn source_spec(&self) -> SourceSpec<'_> {
        SourceSpec {
            sources: &self.source,
            link_merge: self.link_merge.as_deref(),
            pick_value: self.pick_value.as_deref(),
        }
    }
}

/// A declared workflow input.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowInput {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// A declared workflow output and the parameters it is collected from.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowOutput {
    pub id: String,

    #[serde(deserialize_with = "single_or_vec", default)]
    pub output_source: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_merge: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pick_value: Option<String>,
}

impl WorkflowOutput {
    pub fn new(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            output_source: vec![source.into()],
            link_merge: None,
            pick_value: None,
        }
    }

    /// Adds another output source.
    pub fn from_source(mut self, source: impl Into<String>) -> Self {
        self.output_source.push(source.into());
        self
    }

    pub fn with_link_merge(mut self, policy: impl Into<String>) -> Self {
        self.link_merge = Some(policy.into());
        self
    }

    pub fn with_pick_value(mut self, policy: impl Into<String>) -> Self {
        self.pick_value = Some(policy.into());
        self
    }

    pub fn source_spec(&self) -> SourceSpec<'_> {
        SourceSpec {
            sources: &self.output_source,
            link_merge: self.link_merge.as_deref(),
            pick_value: self.pick_value.as_deref(),
        }
    }
}

/// A tool input and its fallback value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolInput {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// A tool output, optionally computed by an expression.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub id: String,

    /// Evaluated with `inputs` bound and `self` = `{stdout, exitCode}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval: Option<String>,
}

/// An atomic executable unit.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ToolSpec {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub inputs: Vec<ToolInput>,

    #[serde(default)]
    pub outputs: Vec<ToolOutput>,

    /// Shell command with parameter references; absent for expression tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl ToolSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_input(mut self, id: impl Into<String>) -> Self {
        self.inputs.push(ToolInput {
            id: id.into(),
            default: None,
        });
        self
    }

    pub fn with_input_default(mut self, id: impl Into<String>, default: impl Into<Value>) -> Self {
        self.inputs.push(ToolInput {
            id: id.into(),
            default: Some(default.into()),
        });
        self
    }

    pub fn with_output(mut self, id: impl Into<String>, eval: Option<&str>) -> Self {
        self.outputs.push(ToolOutput {
            id: id.into(),
            eval: eval.map(str::to_string),
        });
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Returns true if the tool declares an input with this short name.
    pub fn declares_input(&self, name: &str) -> bool {
        self.inputs.iter().any(|i| shortname(&i.id) == name)
    }
}

/// What a step runs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "class")]
pub enum Process {
    Tool(ToolSpec),
    Workflow(Workflow),
}

impl Process {
    /// Identifier of the wrapped tool or workflow.
    pub fn id(&self) -> &str {
        match self {
            Process::Tool(tool) => &tool.id,
            Process::Workflow(workflow) => &workflow.id,
        }
    }
}

/// Represents a single step in a workflow.
///
/// A step becomes schedulable once every parameter named in its input
/// sources has a registered promise.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    /// Unique identifier for this step within its workflow
    pub id: String,

    /// Ordered input ports
    #[serde(rename = "in", default)]
    pub inputs: Vec<StepInput>,

    /// Output port names; published as `step_id/port`
    #[serde(rename = "out", deserialize_with = "single_or_vec", default)]
    pub outputs: Vec<String>,

    /// Input ports iterated over
    #[serde(deserialize_with = "single_or_vec", default, skip_serializing_if = "Vec::is_empty")]
    pub scatter: Vec<String>,

    /// `dotproduct`, `nested_crossproduct` or `flat_crossproduct`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scatter_method: Option<String>,

    /// Boolean gate; when false the step's outputs are all skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,

    /// The tool or nested workflow this step wraps
    pub run: Process,
}

impl WorkflowStep {
    /// Creates a new step wrapping `run`.
    ///
    /// # Example
    ///
    /// ```
    /// use flowrunner::workflow::{Process, StepInput, ToolSpec, WorkflowStep};
    ///
    /// let step = WorkflowStep::new("align", Process::Tool(ToolSpec::new("bwa")))
    ///     .with_input(StepInput::new("reads").from_source("fastq"))
    ///     .with_output("bam")
    ///     .with_scatter("reads");
    /// assert_eq!(step.output_id("bam"), "align/bam");
    /// ```
    pub fn new(id: impl Into<String>, run: Process) -> Self {
        Self {
            id: id.into().trim().to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            scatter: Vec::new(),
            scatter_method: None,
            when: None,
            run,
        }
    }

    pub fn with_input(mut self, input: StepInput) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn with_output(mut self, port: impl Into<String>) -> Self {
        self.outputs.push(port.into());
        self
    }

    /// Adds a scattered input port.
    pub fn with_scatter(mut self, port: impl Into<String>) -> Self {
        self.scatter.push(port.into());
        self
    }

    pub fn with_scatter_method(mut self, method: impl Into<String>) -> Self {
        self.scatter_method = Some(method.into());
        self
    }

    pub fn with_when(mut self, expression: impl Into<String>) -> Self {
        self.when = Some(expression.into());
        self
    }

    /// Parameter identifier published for one of this step's output ports.
    pub fn output_id(&self, port: &str) -> String {
        format!("{}/{}", self.id, shortname(port))
    }

    /// Parameter identifiers of every output port, in declaration order.
    pub fn output_ids(&self) -> Vec<String> {
        self.outputs.iter().map(|p| self.output_id(p)).collect()
    }

    /// Short names of every declared output port.
    pub fn output_names(&self) -> Vec<String> {
        self.outputs.iter().map(|p| shortname(p).to_string()).collect()
    }

    /// Every parameter identifier this step reads from.
    pub fn sources(&self) -> impl Iterator<Item = &String> {
        self.inputs.iter().flat_map(|i| i.source.iter())
    }

    pub fn is_scattered(&self) -> bool {
        !self.scatter.is_empty()
    }
}

/// Represents a complete workflow with multiple steps.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Workflow {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub inputs: Vec<WorkflowInput>,

    #[serde(default)]
    pub outputs: Vec<WorkflowOutput>,

    /// Steps in declaration order (not necessarily dependency order)
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
}

impl Workflow {
    /// Creates a new empty workflow.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_input(mut self, id: impl Into<String>) -> Self {
        self.inputs.push(WorkflowInput {
            id: id.into(),
            default: None,
        });
        self
    }

    pub fn with_input_default(mut self, id: impl Into<String>, default: impl Into<Value>) -> Self {
        self.inputs.push(WorkflowInput {
            id: id.into(),
            default: Some(default.into()),
        });
        self
    }

    pub fn with_output(mut self, output: WorkflowOutput) -> Self {
        self.outputs.push(output);
        self
    }

    /// Adds a step to the workflow.
    pub fn add_step(&mut self, step: WorkflowStep) -> Result<(), String> {
        if self.steps.iter().any(|s| s.id == step.id) {
            return Err(format!("Step '{}' already exists", step.id));
        }
        self.steps.push(step);
        Ok(())
    }

    /// Gets a step by ID.
    pub fn get_step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Returns the number of steps in the workflow.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the workflow has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> Process {
        Process::Tool(ToolSpec::new("echo").with_input("msg"))
    }

    #[test]
    fn test_shortname() {
        assert_eq!(shortname("reads"), "reads");
        assert_eq!(shortname("align/bam"), "bam");
        assert_eq!(shortname("file:///wf.cwl#main/align/bam"), "bam");
        assert_eq!(shortname("#reads"), "reads");
    }

    #[test]
    fn test_step_creation() {
        let step = WorkflowStep::new(" align ", tool())
            .with_input(StepInput::new("msg").from_source("text"))
            .with_output("out")
            .with_when("$(inputs.msg)");

        assert_eq!(step.id, "align");
        assert_eq!(step.output_ids(), vec!["align/out"]);
        assert_eq!(step.sources().collect::<Vec<_>>(), vec!["text"]);
        assert!(!step.is_scattered());
        assert_eq!(step.when.as_deref(), Some("$(inputs.msg)"));
    }

    #[test]
    fn test_workflow_add_step() {
        let mut workflow = Workflow::new("main");
        let step = WorkflowStep::new("step1", tool());

        assert!(workflow.add_step(step.clone()).is_ok());
        assert!(workflow.add_step(step).is_err()); // Duplicate
        assert_eq!(workflow.len(), 1);
        assert!(workflow.get_step("step1").is_some());
        assert!(workflow.get_step("nonexistent").is_none());
    }

    #[test]
    fn test_workflow_default() {
        let workflow = Workflow::default();
        assert!(workflow.is_empty());
    }

    #[test]
    fn test_deserialize_step_yaml() {
        let yaml = r#"
id: qc
in:
  - id: sample
    source: [a, b]
    linkMerge: merge_flattened
    pickValue: all_non_null
  - id: flag
    default: true
    valueFrom: $(self)
out: report
scatter: sample
scatterMethod: dotproduct
when: $(inputs.flag)
run:
  class: Tool
  inputs: [{id: sample}]
  outputs: [{id: report, eval: $(inputs.sample)}]
"#;
        let step: WorkflowStep = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(step.inputs[0].source, vec!["a", "b"]);
        assert_eq!(step.inputs[0].link_merge.as_deref(), Some("merge_flattened"));
        assert_eq!(step.inputs[1].default, Some(Value::Bool(true)));
        assert_eq!(step.outputs, vec!["report"]);
        assert_eq!(step.scatter, vec!["sample"]);
        assert!(matches!(step.run, Process::Tool(_)));
    }

    #[test]
    fn test_deserialize_nested_workflow() {
        let yaml = r#"
id: outer
run:
  class: Workflow
  id: inner
  inputs: [{id: x}]
  outputs: [{id: y, outputSource: x}]
"#;
        let step: WorkflowStep = serde_yaml::from_str(yaml).unwrap();
        match &step.run {
            Process::Workflow(inner) => {
                assert_eq!(inner.id, "inner");
                assert_eq!(inner.outputs[0].output_source, vec!["x"]);
            }
            Process::Tool(_) => panic!("expected nested workflow"),
        }
        assert_eq!(step.run.id(), "inner");
    }

    #[test]
    fn test_single_or_vec_rejects_numbers() {
        let yaml = "id: s\nout: 3\nrun: {class: Tool}\n";
        assert!(serde_yaml::from_str::<WorkflowStep>(yaml).is_err());
    }

    #[test]
    fn test_tool_declares_input() {
        let tool = ToolSpec::new("t").with_input("a").with_input_default("b", 1);
        assert!(tool.declares_input("a"));
        assert!(tool.declares_input("b"));
        assert!(!tool.declares_input("c"));
    }
}
