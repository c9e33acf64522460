//! Expression Evaluation
//!
//! `valueFrom`, `when` and tool output expressions are opaque to the
//! dataflow core: it only hands an expression string, the step's resolved
//! inputs and an optional `self` value to an [`ExpressionEvaluator`].
//!
//! # Components
//!
//! - [`ExpressionEvaluator`]: the evaluation seam
//! - [`ParameterReferences`]: built-in evaluator for `$(inputs.x)` style references

pub mod reference;

pub use reference::ParameterReferences;

use crate::error::FlowError;
use crate::workflow::value::{Value, ValueMap};

/// Evaluates workflow expressions.
///
/// Implementations receive immutable snapshots and must not keep state
/// between calls. The engine calls the evaluator from its coordinating thread
/// and from executor worker threads, so implementations must be thread-safe.
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluates `expression` with `inputs` bound to the short-named input
    /// object and `context` bound to `self`.
    fn evaluate(
        &self,
        expression: &str,
        inputs: &ValueMap,
        context: Option<&Value>,
    ) -> Result<Value, FlowError>;
}
