//! Deferred Input Values
//!
//! A step's input object is built when the step is unrolled, long before the
//! values feeding it exist. Each port holds an [`IndirectValue`] describing
//! how to compute its value once the producers have completed; a whole input
//! object is forced with [`resolve_indirect`].

use std::collections::BTreeMap;

use log::debug;

use crate::error::{Diagnostics, FlowError};
use crate::execution::graph::{JobGraph, UnitId};
use crate::expression::ExpressionEvaluator;
use crate::workflow::value::{Value, ValueMap};

use super::promise::Promise;
use super::source::ResolveSource;

/// Input object whose values are still deferred, keyed by short port name.
pub type IndirectMap = BTreeMap<String, IndirectValue>;

/// Everything resolution needs to read promises and evaluate expressions.
#[derive(Clone, Copy)]
pub struct Resolver<'a> {
    pub graph: &'a JobGraph,
    pub evaluator: &'a dyn ExpressionEvaluator,
    pub diagnostics: &'a Diagnostics,
}

impl<'a> Resolver<'a> {
    pub fn new(
        graph: &'a JobGraph,
        evaluator: &'a dyn ExpressionEvaluator,
        diagnostics: &'a Diagnostics,
    ) -> Self {
        Self {
            graph,
            evaluator,
            diagnostics,
        }
    }
}

/// A port value that may not exist yet.
#[derive(Debug, Clone, PartialEq)]
pub enum IndirectValue {
    /// Already concrete (including the skipped marker)
    Literal(Value),
    /// One promised output port
    Promise(Promise),
    /// Several sources with link-merge / pick-value applied
    Source(ResolveSource),
    /// Upstream value transformed by a `valueFrom` expression
    ValueFrom(StepValueFrom),
    /// Upstream value with a fallback
    DefaultWithSource(DefaultWithSource),
}

impl IndirectValue {
    /// Resolves this value on its own.
    ///
    /// For [`IndirectValue::ValueFrom`] this yields the upstream value only:
    /// the expression needs the whole input object, so [`resolve_indirect`]
    /// evaluates it in a second pass.
    pub fn resolve(&self, resolver: &Resolver<'_>) -> Result<Value, FlowError> {
        match self {
            IndirectValue::Literal(value) => Ok(value.clone()),
            IndirectValue::Promise(promise) => promise.resolve(resolver.graph),
            IndirectValue::Source(source) => source.resolve(resolver),
            IndirectValue::ValueFrom(value_from) => value_from.source.resolve(resolver),
            IndirectValue::DefaultWithSource(default) => default.resolve(resolver),
        }
    }

    /// Units whose completion this value waits on.
    pub fn producers(&self) -> Vec<UnitId> {
        match self {
            IndirectValue::Literal(_) => Vec::new(),
            IndirectValue::Promise(promise) => promise.producer().into_iter().collect(),
            IndirectValue::Source(source) => source.producers(),
            IndirectValue::ValueFrom(value_from) => value_from.source.producers(),
            IndirectValue::DefaultWithSource(default) => default
                .source
                .as_ref()
                .map(|source| source.producers())
                .unwrap_or_default(),
        }
    }
}

/// A step input with a `valueFrom` expression.
#[derive(Debug, Clone, PartialEq)]
pub struct StepValueFrom {
    pub expression: String,
    /// Value bound to `self` while evaluating
    pub source: Box<IndirectValue>,
}

impl StepValueFrom {
    pub fn new(expression: impl Into<String>, source: IndirectValue) -> Self {
        Self {
            expression: expression.into(),
            source: Box::new(source),
        }
    }

    /// Evaluates the expression against the step's first-pass input object.
    pub fn evaluate(
        &self,
        inputs: &ValueMap,
        context: &Value,
        evaluator: &dyn ExpressionEvaluator,
    ) -> Result<Value, FlowError> {
        evaluator.evaluate(&self.expression, inputs, Some(context))
    }
}

/// A step input that has both a source and a default.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultWithSource {
    pub default: Value,
    pub source: Option<Box<IndirectValue>>,
}

impl DefaultWithSource {
    pub fn new(default: Value, source: Option<IndirectValue>) -> Self {
        Self {
            default,
            source: source.map(Box::new),
        }
    }

    /// The source value, or the default when it is null or skipped.
    pub fn resolve(&self, resolver: &Resolver<'_>) -> Result<Value, FlowError> {
        if let Some(source) = &self.source {
            let value = source.resolve(resolver)?;
            if !value.is_null() {
                return Ok(value);
            }
        }
        Ok(self.default.clone())
    }
}

/// Wraps concrete values so they can stand in for a deferred input object.
pub fn literal_map(values: ValueMap) -> IndirectMap {
    values
        .into_iter()
        .map(|(k, v)| (k, IndirectValue::Literal(v)))
        .collect()
}

/// Forces every deferred value in an input object.
///
/// Plain values are resolved first; `valueFrom` expressions are then
/// evaluated with that first-pass object bound to `inputs` and their own
/// upstream value bound to `self`.
pub fn resolve_indirect(map: &IndirectMap, resolver: &Resolver<'_>) -> Result<ValueMap, FlowError> {
    let mut first_pass = ValueMap::new();
    for (key, value) in map {
        first_pass.insert(key.clone(), value.resolve(resolver)?);
    }

    let mut result = ValueMap::new();
    for (key, value) in map {
        let resolved = match value {
            IndirectValue::ValueFrom(value_from) => {
                let context = first_pass.get(key).cloned().unwrap_or_default();
                let evaluated = value_from.evaluate(&first_pass, &context, resolver.evaluator)?;
                debug!("valueFrom '{}' on {} -> {}", value_from.expression, key, evaluated);
                evaluated
            }
            _ => first_pass.get(key).cloned().unwrap_or_default(),
        };
        result.insert(key.clone(), resolved);
    }

    Ok(result)
}

/// Every distinct unit an input object waits on, in id order.
pub fn producers_of(map: &IndirectMap) -> Vec<UnitId> {
    let mut producers: Vec<UnitId> = map.values().flat_map(IndirectValue::producers).collect();
    producers.sort();
    producers.dedup();
    producers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::ParameterReferences;
    use std::sync::Arc;

    fn resolve(map: &IndirectMap) -> Result<ValueMap, FlowError> {
        let graph = JobGraph::new();
        let evaluator = ParameterReferences::new();
        let diagnostics = Diagnostics::new();
        resolve_indirect(map, &Resolver::new(&graph, &evaluator, &diagnostics))
    }

    #[test]
    fn test_literals_pass_through() {
        let mut values = ValueMap::new();
        values.insert("a".to_string(), Value::from(1));
        values.insert("b".to_string(), Value::Skipped);

        let resolved = resolve(&literal_map(values.clone())).unwrap();
        assert_eq!(resolved, values);
    }

    #[test]
    fn test_value_from_sees_sibling_inputs() {
        let mut map = IndirectMap::new();
        map.insert("name".to_string(), IndirectValue::Literal(Value::from("s1")));
        map.insert(
            "label".to_string(),
            IndirectValue::ValueFrom(StepValueFrom::new(
                "$(inputs.name)-$(self)",
                IndirectValue::Literal(Value::from("raw")),
            )),
        );

        let resolved = resolve(&map).unwrap();
        assert_eq!(resolved["label"], Value::from("s1-raw"));
        assert_eq!(resolved["name"], Value::from("s1"));
    }

    #[test]
    fn test_value_from_sees_pre_expression_values() {
        // Sibling valueFrom ports are visible with their upstream value
        let mut map = IndirectMap::new();
        map.insert(
            "a".to_string(),
            IndirectValue::ValueFrom(StepValueFrom::new("changed", IndirectValue::Literal(Value::from("orig")))),
        );
        map.insert(
            "b".to_string(),
            IndirectValue::ValueFrom(StepValueFrom::new("$(inputs.a)", IndirectValue::Literal(Value::Null))),
        );

        let resolved = resolve(&map).unwrap();
        assert_eq!(resolved["a"], Value::from("changed"));
        assert_eq!(resolved["b"], Value::from("orig"));
    }

    #[test]
    fn test_default_with_source() {
        let mut map = IndirectMap::new();
        map.insert(
            "null_source".to_string(),
            IndirectValue::DefaultWithSource(DefaultWithSource::new(
                Value::from(7),
                Some(IndirectValue::Literal(Value::Null)),
            )),
        );
        map.insert(
            "skipped_source".to_string(),
            IndirectValue::DefaultWithSource(DefaultWithSource::new(
                Value::from(8),
                Some(IndirectValue::Literal(Value::Skipped)),
            )),
        );
        map.insert(
            "false_source".to_string(),
            IndirectValue::DefaultWithSource(DefaultWithSource::new(
                Value::Bool(true),
                Some(IndirectValue::Literal(Value::Bool(false))),
            )),
        );
        map.insert(
            "no_source".to_string(),
            IndirectValue::DefaultWithSource(DefaultWithSource::new(Value::from("d"), None)),
        );

        let resolved = resolve(&map).unwrap();
        assert_eq!(resolved["null_source"], Value::from(7));
        assert_eq!(resolved["skipped_source"], Value::from(8));
        assert_eq!(resolved["false_source"], Value::Bool(false));
        assert_eq!(resolved["no_source"], Value::from("d"));
    }

    #[test]
    fn test_promise_variant() {
        let mut values = ValueMap::new();
        values.insert("x".to_string(), Value::from(3));
        let mut map = IndirectMap::new();
        map.insert(
            "in".to_string(),
            IndirectValue::Promise(Promise::literal(Arc::new(values), "x")),
        );

        assert_eq!(resolve(&map).unwrap()["in"], Value::from(3));
        assert!(producers_of(&map).is_empty());
    }

    #[test]
    fn test_expression_failure_propagates() {
        let mut map = IndirectMap::new();
        map.insert(
            "bad".to_string(),
            IndirectValue::ValueFrom(StepValueFrom::new("$(nope.x)", IndirectValue::Literal(Value::Null))),
        );
        assert!(matches!(resolve(&map), Err(FlowError::Expression { .. })));
    }

    #[test]
    fn test_producers_deduplicated() {
        let mut map = IndirectMap::new();
        map.insert("a".to_string(), IndirectValue::Promise(Promise::unit(UnitId(3), "x")));
        map.insert("b".to_string(), IndirectValue::Promise(Promise::unit(UnitId(1), "y")));
        map.insert("c".to_string(), IndirectValue::Promise(Promise::unit(UnitId(3), "z")));

        assert_eq!(producers_of(&map), vec![UnitId(1), UnitId(3)]);
    }
}
