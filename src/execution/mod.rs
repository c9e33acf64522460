//! Workflow Execution Module
//!
//! Provides the job graph built while unrolling, the per-unit control logic,
//! tool execution, and the engine that runs everything with a bounded pool
//! of worker threads.
//!
//! # Architecture
//!
//! - [`graph`]: Arena of scheduled units and their dependency edges
//! - [`unit`]: What each unit kind does once it is ready
//! - [`executor`]: Tool execution seam and the local bash executor
//! - [`engine`]: Main execution engine orchestrating workflow runs

pub mod engine;
pub mod executor;
pub mod graph;
pub mod unit;

pub use engine::{Engine, RunOutcome};
pub use executor::{ExecutionRequest, Executor, LocalExecutor};
pub use graph::{Edge, JobGraph, UnitId, UnitOutput, UnitState};
pub use unit::UnitKind;
