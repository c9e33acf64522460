//! Promise Table
//!
//! Maps parameter identifiers (workflow inputs, `step/port` outputs) to the
//! promise that will eventually yield their value. Each identifier is
//! registered exactly once; registering it again is an error.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::error::FlowError;
use crate::execution::graph::{JobGraph, UnitId};
use crate::workflow::value::{Value, ValueMap};

/// Where a promise gets its mapping from.
#[derive(Debug, Clone, PartialEq)]
pub enum PromiseSource {
    /// Values known when the promise was created (workflow inputs)
    Literal(Arc<ValueMap>),
    /// The output mapping of a scheduled unit, available once it completes
    Unit(UnitId),
}

/// The eventual value of one output port.
#[derive(Debug, Clone, PartialEq)]
pub struct Promise {
    source: PromiseSource,
    port: String,
}

impl Promise {
    /// Promise backed by values that already exist.
    pub fn literal(values: Arc<ValueMap>, port: impl Into<String>) -> Self {
        Self {
            source: PromiseSource::Literal(values),
            port: port.into(),
        }
    }

    /// Promise for the `port` entry of a unit's output.
    pub fn unit(unit: UnitId, port: impl Into<String>) -> Self {
        Self {
            source: PromiseSource::Unit(unit),
            port: port.into(),
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// The unit that must complete before this promise can be read, if any.
    pub fn producer(&self) -> Option<UnitId> {
        match self.source {
            PromiseSource::Unit(id) => Some(id),
            PromiseSource::Literal(_) => None,
        }
    }

    /// Reads the promised value.
    ///
    /// Repeated reads return the same value and never re-run the producer.
    /// A port missing from the producer's output resolves to null.
    pub fn resolve(&self, graph: &JobGraph) -> Result<Value, FlowError> {
        let values = match &self.source {
            PromiseSource::Literal(values) => values.as_ref(),
            PromiseSource::Unit(id) => graph.values(*id)?,
        };
        Ok(values.get(&self.port).cloned().unwrap_or(Value::Null))
    }
}

impl fmt::Display for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            PromiseSource::Literal(_) => write!(f, "literal:{}", self.port),
            PromiseSource::Unit(id) => write!(f, "{}:{}", id, self.port),
        }
    }
}

/// Single-assignment table of promises for one workflow invocation.
#[derive(Debug, Clone, Default)]
pub struct PromiseTable {
    slots: HashMap<String, Promise>,
}

impl PromiseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the promise for a parameter identifier.
    pub fn register(&mut self, id: impl Into<String>, promise: Promise) -> Result<(), FlowError> {
        let id = id.into();
        if self.slots.contains_key(&id) {
            return Err(FlowError::DuplicatePromise(id));
        }
        debug!("Registered promise {} -> {}", id, promise);
        self.slots.insert(id, promise);
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Promise> {
        self.slots.get(id)
    }

    /// Resolves the value registered under `id`.
    pub fn resolve(&self, id: &str, graph: &JobGraph) -> Result<Value, FlowError> {
        self.get(id)
            .ok_or_else(|| FlowError::PromiseNotReady(id.to_string()))?
            .resolve(graph)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::graph::UnitOutput;
    use crate::execution::unit::UnitKind;

    fn values(pairs: &[(&str, Value)]) -> Arc<ValueMap> {
        Arc::new(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    #[test]
    fn test_literal_promise_resolves() {
        let graph = JobGraph::new();
        let promise = Promise::literal(values(&[("x", Value::from(5))]), "x");

        assert_eq!(promise.resolve(&graph).unwrap(), Value::from(5));
        assert_eq!(promise.producer(), None);
    }

    #[test]
    fn test_missing_port_resolves_to_null() {
        let graph = JobGraph::new();
        let promise = Promise::literal(values(&[]), "absent");
        assert_eq!(promise.resolve(&graph).unwrap(), Value::Null);
    }

    #[test]
    fn test_register_twice_fails() {
        let mut table = PromiseTable::new();
        let promise = Promise::literal(values(&[]), "x");

        assert!(table.register("x", promise.clone()).is_ok());
        let err = table.register("x", promise).unwrap_err();
        assert!(matches!(err, FlowError::DuplicatePromise(id) if id == "x"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_unit_promise_not_ready_until_completed() {
        let mut graph = JobGraph::new();
        let id = graph.add(
            UnitKind::ResolveOutputs { workflow: UnitId(0) },
            "producer",
            "producer",
            None,
            Vec::new(),
        );
        let promise = Promise::unit(id, "out");
        assert_eq!(promise.producer(), Some(id));
        assert!(matches!(promise.resolve(&graph), Err(FlowError::PromiseNotReady(_))));

        let mut output = ValueMap::new();
        output.insert("out".to_string(), Value::from("done"));
        graph.complete(id, UnitOutput::Values(output)).unwrap();

        // Idempotent reads
        assert_eq!(promise.resolve(&graph).unwrap(), Value::from("done"));
        assert_eq!(promise.resolve(&graph).unwrap(), Value::from("done"));
    }

    #[test]
    fn test_table_resolve_unknown_id() {
        let table = PromiseTable::new();
        let graph = JobGraph::new();
        assert!(table.resolve("nope", &graph).is_err());
    }
}
