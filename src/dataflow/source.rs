//! Source Resolution
//!
//! Combines the values arriving at a port from one or more sources:
//!
//! 1. resolve each source promise
//! 2. merge them (`merge_nested` keeps one element per source,
//!    `merge_flattened` splices array sources in)
//! 3. apply the pick-value policy, ignoring nulls and skipped markers
//! 4. replace any skipped marker left over with null, recording a diagnostic

use std::fmt;
use std::str::FromStr;

use log::warn;

use crate::error::{Diagnostics, FlowError};
use crate::execution::graph::UnitId;
use crate::workflow::model::SourceSpec;
use crate::workflow::value::Value;

use super::indirect::Resolver;
use super::promise::{Promise, PromiseTable};

/// How several sources feeding one port are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkMerge {
    #[default]
    MergeNested,
    MergeFlattened,
}

impl FromStr for LinkMerge {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "merge_nested" => Ok(LinkMerge::MergeNested),
            "merge_flattened" => Ok(LinkMerge::MergeFlattened),
            other => Err(FlowError::validation(format!("Unsupported linkMerge '{}'", other))),
        }
    }
}

/// How non-null values are selected after merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickValue {
    FirstNonNull,
    OnlyNonNull,
    AllNonNull,
}

impl FromStr for PickValue {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first_non_null" => Ok(PickValue::FirstNonNull),
            "only_non_null" => Ok(PickValue::OnlyNonNull),
            "all_non_null" => Ok(PickValue::AllNonNull),
            other => Err(FlowError::validation(format!("Unsupported pickValue '{}'", other))),
        }
    }
}

impl fmt::Display for PickValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PickValue::FirstNonNull => "first_non_null",
            PickValue::OnlyNonNull => "only_non_null",
            PickValue::AllNonNull => "all_non_null",
        };
        f.write_str(name)
    }
}

/// Deferred link-merge / pick-value over a port's sources.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveSource {
    /// Human-readable `step/port` (or workflow output) name
    name: String,
    promises: Vec<Promise>,
    /// `None` when a single source is passed through unwrapped
    link_merge: Option<LinkMerge>,
    pick_value: Option<PickValue>,
}

impl ResolveSource {
    /// Captures the promises for every source named by `spec`.
    ///
    /// Policies are validated here so that a bad policy fails at unroll time.
    pub fn new(
        name: impl Into<String>,
        spec: SourceSpec<'_>,
        promises: &PromiseTable,
    ) -> Result<Self, FlowError> {
        let name = name.into();
        if spec.sources.is_empty() {
            return Err(FlowError::validation(format!("{} has no sources", name)));
        }

        let explicit_merge = spec
            .link_merge
            .map(LinkMerge::from_str)
            .transpose()
            .map_err(|e| FlowError::validation(format!("{} on {}", e, name)))?;
        let pick_value = spec
            .pick_value
            .map(PickValue::from_str)
            .transpose()
            .map_err(|e| FlowError::validation(format!("{} on {}", e, name)))?;

        // A single source without an explicit linkMerge is not wrapped in a list
        let link_merge = if explicit_merge.is_some() || spec.sources.len() > 1 {
            Some(explicit_merge.unwrap_or_default())
        } else {
            None
        };

        let promises = spec
            .sources
            .iter()
            .map(|source| {
                promises
                    .get(source)
                    .cloned()
                    .ok_or_else(|| FlowError::PromiseNotReady(source.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name,
            promises,
            link_merge,
            pick_value,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Units producing the sources, in source order.
    pub fn producers(&self) -> Vec<UnitId> {
        self.promises.iter().filter_map(Promise::producer).collect()
    }

    /// Merges, picks and filters the source values.
    pub fn resolve(&self, resolver: &Resolver<'_>) -> Result<Value, FlowError> {
        let merged = match self.link_merge {
            Some(policy) => {
                let values = self
                    .promises
                    .iter()
                    .map(|p| p.resolve(resolver.graph))
                    .collect::<Result<Vec<_>, _>>()?;
                link_merge(policy, values)
            }
            None => self.promises[0].resolve(resolver.graph)?,
        };

        let picked = pick_value(&self.name, self.pick_value, merged)?;
        Ok(filter_skip_null(&self.name, picked, resolver.diagnostics))
    }
}

/// Combines per-source values into one sequence.
pub fn link_merge(policy: LinkMerge, values: Vec<Value>) -> Value {
    match policy {
        LinkMerge::MergeNested => Value::Array(values),
        LinkMerge::MergeFlattened => {
            let mut result = Vec::new();
            for value in values {
                match value {
                    Value::Array(items) => result.extend(items),
                    other => result.push(other),
                }
            }
            Value::Array(result)
        }
    }
}

/// Applies a pick-value policy to a merged value.
///
/// Nulls and skipped markers are ignored when counting candidates.
pub fn pick_value(name: &str, policy: Option<PickValue>, value: Value) -> Result<Value, FlowError> {
    let Some(policy) = policy else {
        return Ok(value);
    };

    let items = match value {
        Value::Array(items) => items,
        other => {
            warn!("pickValue used but input {} is not a list", name);
            return Ok(other);
        }
    };

    let mut survivors: Vec<Value> = items.into_iter().filter(|v| !v.is_null()).collect();

    match policy {
        PickValue::FirstNonNull => {
            if survivors.is_empty() {
                return Err(FlowError::Cardinality(format!(
                    "{}: first_non_null operator found no non-null values",
                    name
                )));
            }
            Ok(survivors.swap_remove(0))
        }
        PickValue::OnlyNonNull => match survivors.len() {
            0 => Err(FlowError::Cardinality(format!(
                "{}: only_non_null operator found no non-null values",
                name
            ))),
            1 => Ok(survivors.swap_remove(0)),
            n => Err(FlowError::Cardinality(format!(
                "{}: only_non_null operator found {} non-null values",
                name, n
            ))),
        },
        PickValue::AllNonNull => Ok(Value::Array(survivors)),
    }
}

/// Recursively replaces skipped markers with null.
///
/// Records one diagnostic naming `name` if any marker was found: it means a
/// conditional step did not run and the consumer did not use pickValue.
pub fn filter_skip_null(name: &str, value: Value, diagnostics: &Diagnostics) -> Value {
    let mut found = false;
    let value = strip_skipped(value, &mut found);
    if found {
        diagnostics.record(
            name,
            "skipped result cast to null; a conditional step did not run \
             and pickValue was not used to handle its output",
        );
    }
    value
}

fn strip_skipped(value: Value, found: &mut bool) -> Value {
    match value {
        Value::Skipped => {
            *found = true;
            Value::Null
        }
        Value::Array(items) => Value::Array(items.into_iter().map(|v| strip_skipped(v, found)).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, strip_skipped(v, found)))
                .collect(),
        ),
        other => other,
    }
}
