//! FlowRunner - Dataflow Workflow Engine
//!
//! Runs declarative workflow graphs whose steps are wired together by named
//! sources. Steps may scatter over array inputs, be gated by a `when`
//! condition, merge several sources into one port, or wrap a whole nested
//! workflow.
//!
//! # Architecture
//!
//! The library is organized into six modules:
//!
//! - [`workflow`]: Data structures, parsing and validation of workflow definitions
//! - [`dataflow`]: Promises, source resolution, scatter and the unroll loop
//! - [`execution`]: Job graph, unit control logic and the parallel engine
//! - [`expression`]: The expression evaluation seam and built-in evaluator
//! - [`monitoring`]: Execution timeline
//! - [`error`]: Error taxonomy and non-fatal diagnostics
//!
//! # Example
//!
//! ```rust,no_run
//! use flowrunner::execution::Engine;
//! use flowrunner::{load_job_order, load_workflow};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let workflow = load_workflow("pipeline.yaml")?;
//!     let job = load_job_order("job.json")?;
//!
//!     let mut engine = Engine::new();
//!     engine.set_max_parallel(4);
//!
//!     let outcome = engine.run(&workflow, job)?;
//!     for (name, value) in &outcome.outputs {
//!         println!("{} = {}", name, value);
//!     }
//!     Ok(())
//! }
//! ```

pub mod dataflow;
pub mod error;
pub mod execution;
pub mod expression;
pub mod monitoring;
pub mod workflow;

// Re-export commonly used types
pub use error::{Diagnostic, FlowError};
pub use execution::{Engine, RunOutcome};
pub use workflow::parser::{load_job_order, load_workflow};
pub use workflow::{Value, ValueMap, Workflow};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "FlowRunner";
