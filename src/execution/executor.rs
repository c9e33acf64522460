//! Tool Execution
//!
//! Handles the execution of a single tool unit including:
//! - Parameter reference interpolation in the command
//! - Script generation
//! - Running the script with bash in the working directory
//! - Computing declared outputs from the captured stdout

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, error, warn};
use once_cell::sync::Lazy;

use crate::error::FlowError;
use crate::expression::ExpressionEvaluator;
use crate::workflow::model::{shortname, ToolSpec};
use crate::workflow::value::{Value, ValueMap};

/// Directory holding generated step scripts.
static SCRIPT_DIR: Lazy<PathBuf> = Lazy::new(|| std::env::temp_dir().join("flowrunner_scripts"));

/// Distinguishes scripts of concurrent units with the same label.
static SCRIPT_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// A tool unit ready to run: every input is concrete.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRequest {
    /// Label of the scheduled unit, e.g. `align[2]`
    pub unit: String,
    pub tool: ToolSpec,
    /// Resolved inputs, keyed by short name, restricted to declared tool inputs
    pub inputs: ValueMap,
    pub working_dir: Option<PathBuf>,
}

/// Runs tool units.
///
/// Called from worker threads, so implementations must be thread-safe.
pub trait Executor: Send + Sync {
    /// Runs one tool invocation and returns its output mapping.
    fn execute(&self, request: &ExecutionRequest) -> Result<ValueMap, FlowError>;
}

/// Runs tool commands with bash on the local machine.
///
/// A tool without a command is an expression tool: only its output
/// expressions are evaluated.
pub struct LocalExecutor {
    evaluator: Arc<dyn ExpressionEvaluator>,
}

impl LocalExecutor {
    pub fn new(evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        Self { evaluator }
    }
}

impl Executor for LocalExecutor {
    fn execute(&self, request: &ExecutionRequest) -> Result<ValueMap, FlowError> {
        let (stdout, exit_code) = match &request.tool.command {
            Some(template) => {
                let command = match self.evaluator.evaluate(template, &request.inputs, None)? {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                run_command(&request.unit, &command, request.working_dir.as_deref())?
            }
            None => (String::new(), 0),
        };

        let mut result = ValueMap::new();
        result.insert("stdout".to_string(), Value::from(stdout.clone()));
        result.insert("exitCode".to_string(), Value::from(exit_code as i64));
        let context = Value::Object(result);

        let mut outputs = ValueMap::new();
        for output in &request.tool.outputs {
            let value = match &output.eval {
                Some(expression) => {
                    self.evaluator
                        .evaluate(expression, &request.inputs, Some(&context))?
                }
                None => {
                    let trimmed = stdout.trim();
                    if trimmed.is_empty() {
                        Value::Null
                    } else {
                        Value::from(trimmed)
                    }
                }
            };
            outputs.insert(shortname(&output.id).to_string(), value);
        }

        Ok(outputs)
    }
}

/// Runs a command through a generated script; returns stdout and exit code.
fn run_command(
    unit: &str,
    command: &str,
    working_dir: Option<&Path>,
) -> Result<(String, i32), FlowError> {
    let script_path = create_execution_script(unit, command)?;

    let mut cmd = Command::new("bash");
    cmd.arg(&script_path);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
        debug!("Executing in directory: {}", dir.display());
    }
    let output = cmd.output();

    if let Err(e) = fs::remove_file(&script_path) {
        warn!("Failed to clean up script {}: {}", script_path.display(), e);
    }
    let output = output?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if output.status.success() {
        debug!("Unit '{}' completed successfully", unit);
        if !stdout.trim().is_empty() {
            debug!("Unit '{}' output:\n{}", unit, stdout);
        }
        return Ok((stdout, output.status.code().unwrap_or(0)));
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    error!("Unit '{}' failed with exit code: {:?}", unit, output.status.code());
    if !stderr.trim().is_empty() {
        error!("stderr:\n{}", stderr);
    }

    Err(FlowError::execution(
        unit,
        format!(
            "command exited with status {}",
            output
                .status
                .code()
                .map_or_else(|| "unknown".to_string(), |c| c.to_string())
        ),
    ))
}

/// Creates a temporary bash script for a unit.
fn create_execution_script(unit: &str, command_text: &str) -> Result<PathBuf, FlowError> {
    fs::create_dir_all(&*SCRIPT_DIR)?;

    let safe: String = unit
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    let serial = SCRIPT_COUNTER.fetch_add(1, Ordering::Relaxed);
    let script_path = SCRIPT_DIR.join(format!("unit_{}_{}_{}.sh", std::process::id(), serial, safe));
    let mut file = File::create(&script_path)?;

    writeln!(file, "#!/bin/bash")?;
    writeln!(file, "set -e")?;
    writeln!(file, "{}", command_text)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755))?;
    }

    Ok(script_path)
}
