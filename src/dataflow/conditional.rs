//! Conditional step gate (`when`).

use log::debug;

use crate::error::FlowError;
use crate::expression::ExpressionEvaluator;
use crate::workflow::value::{Value, ValueMap};

/// A step's `when` expression together with the outputs it would skip.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Conditional {
    expression: Option<String>,
    outputs: Vec<String>,
}

impl Conditional {
    pub fn new(expression: Option<String>, outputs: Vec<String>) -> Self {
        Self { expression, outputs }
    }

    /// A gate that always opens.
    pub fn always() -> Self {
        Self::default()
    }

    pub fn is_conditional(&self) -> bool {
        self.expression.is_some()
    }

    /// Evaluates the gate against the step's resolved inputs.
    ///
    /// No expression means the step runs. Anything other than a boolean is
    /// a [`FlowError::ConditionType`].
    pub fn evaluate(
        &self,
        inputs: &ValueMap,
        evaluator: &dyn ExpressionEvaluator,
    ) -> Result<bool, FlowError> {
        let Some(expression) = &self.expression else {
            return Ok(true);
        };

        let result = evaluator.evaluate(expression, inputs, None)?;
        debug!("when '{}' -> {}", expression, result);
        match result {
            Value::Bool(open) => Ok(open),
            other => Err(FlowError::ConditionType {
                expression: expression.clone(),
                value: other.to_string(),
            }),
        }
    }

    /// The output mapping of a step that did not run.
    pub fn skipped_outputs(&self) -> ValueMap {
        self.outputs
            .iter()
            .map(|name| (name.clone(), Value::Skipped))
            .collect()
    }
}
