//! Error Types and Diagnostics
//!
//! Every fatal condition raised while unrolling or resolving a workflow is a
//! [`FlowError`]. Non-fatal conditions (a skipped value reaching a port that
//! did not ask for one) are recorded as [`Diagnostic`]s instead.

use std::fmt;
use std::sync::{Arc, Mutex};

use log::warn;
use thiserror::Error;

/// Fatal errors raised by the unroller, the resolver, or a unit run.
#[derive(Error, Debug)]
pub enum FlowError {
    /// Unsupported or missing scatter method, link-merge or pick-value policy,
    /// or a structurally invalid workflow.
    #[error("Validation error: {0}")]
    Validation(String),

    /// `first_non_null` / `only_non_null` found the wrong number of values.
    #[error("Cardinality error: {0}")]
    Cardinality(String),

    /// A `when` expression produced something other than a boolean.
    #[error("Condition '{expression}' evaluated to a non-boolean value: {value}")]
    ConditionType { expression: String, value: String },

    /// The unroll loop stopped making progress before every source appeared.
    #[error("Workflow '{workflow}' cannot make progress:\n{details}")]
    Deadlock { workflow: String, details: String },

    /// A scheduled unit failed.
    #[error("Unit '{unit}' failed: {message}")]
    Execution { unit: String, message: String },

    /// The expression collaborator rejected an expression.
    #[error("Expression '{expression}' failed: {message}")]
    Expression { expression: String, message: String },

    /// A promise was read before the unit producing it completed.
    #[error("Promise '{0}' was read before its producer completed")]
    PromiseNotReady(String),

    /// A promise slot was written twice.
    #[error("Parameter '{0}' already has a registered promise")]
    DuplicatePromise(String),

    /// A workflow description or job order could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FlowError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn expression(expression: &str, message: impl Into<String>) -> Self {
        Self::Expression {
            expression: expression.to_string(),
            message: message.into(),
        }
    }

    pub fn execution(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            unit: unit.into(),
            message: message.into(),
        }
    }
}

impl From<serde_yaml::Error> for FlowError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

/// A recovered, non-fatal problem found during resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    /// Step/port (or workflow output) the value was headed for
    pub port: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.port, self.message)
    }
}

/// Shared, append-only list of diagnostics for one run.
///
/// Cloning yields another handle onto the same list.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    records: Arc<Mutex<Vec<Diagnostic>>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a diagnostic and logs it as a warning.
    pub fn record(&self, port: impl Into<String>, message: impl Into<String>) {
        let diagnostic = Diagnostic {
            port: port.into(),
            message: message.into(),
        };
        warn!("{}", diagnostic);
        match self.records.lock() {
            Ok(mut records) => records.push(diagnostic),
            Err(poisoned) => poisoned.into_inner().push(diagnostic),
        }
    }

    /// Returns a copy of everything recorded so far.
    pub fn snapshot(&self) -> Vec<Diagnostic> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
