//! Workflow Definition Module
//!
//! Provides data structures and utilities for defining, parsing, and
//! validating dataflow workflows.
//!
//! # Structure
//!
//! - [`model`]: Core data structures (Workflow, WorkflowStep, ports, processes)
//! - [`value`]: Runtime parameter values, including the skipped marker
//! - [`parser`]: YAML/JSON loading of workflows and job orders
//! - [`validator`]: Static structural checks

pub mod model;
pub mod parser;
pub mod validator;
pub mod value;

pub use model::{
    shortname, Process, StepInput, ToolInput, ToolOutput, ToolSpec, Workflow, WorkflowInput,
    WorkflowOutput, WorkflowStep,
};
pub use parser::{load_job_order, load_workflow, save_workflow};
pub use validator::{validate_workflow, ValidationError};
pub use value::{Value, ValueMap};
