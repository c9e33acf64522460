//! Scatter Expansion and Gather
//!
//! A scattered step runs once per element of its scattered input ports. The
//! expansion is a [`Fanout`] tree: one level for dotproduct and
//! flat_crossproduct, one level per port for nested_crossproduct. Gathering
//! walks the same tree so the output arrays keep its shape.

use std::str::FromStr;

use log::debug;

use crate::error::FlowError;
use crate::expression::ExpressionEvaluator;
use crate::workflow::model::{shortname, WorkflowStep};
use crate::workflow::value::{Value, ValueMap};

/// How several scattered ports are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScatterMethod {
    DotProduct,
    NestedCrossProduct,
    FlatCrossProduct,
}

impl FromStr for ScatterMethod {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dotproduct" => Ok(ScatterMethod::DotProduct),
            "nested_crossproduct" => Ok(ScatterMethod::NestedCrossProduct),
            "flat_crossproduct" => Ok(ScatterMethod::FlatCrossProduct),
            other => Err(FlowError::validation(format!(
                "Unsupported complex scatter type '{}'",
                other
            ))),
        }
    }
}

impl ScatterMethod {
    /// Picks the method for a scattered step.
    ///
    /// A single scattered port is always a dotproduct, whatever is declared.
    pub fn for_step(step: &WorkflowStep) -> Result<Self, FlowError> {
        if step.scatter.len() == 1 {
            return Ok(ScatterMethod::DotProduct);
        }
        match &step.scatter_method {
            Some(method) => method.parse(),
            None => Err(FlowError::validation(format!(
                "Step '{}': must provide scatterMethod to scatter over multiple inputs",
                step.id
            ))),
        }
    }
}

/// Tree of per-instance items produced by a scatter.
#[derive(Debug, Clone, PartialEq)]
pub enum Fanout<T> {
    Leaf(T),
    Branch(Vec<Fanout<T>>),
}

impl<T> Fanout<T> {
    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        match self {
            Fanout::Leaf(_) => 1,
            Fanout::Branch(children) => children.iter().map(Fanout::leaf_count).sum(),
        }
    }

    /// Leaves in depth-first order.
    pub fn leaves(&self) -> Vec<&T> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a T>) {
        match self {
            Fanout::Leaf(item) => out.push(item),
            Fanout::Branch(children) => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
        }
    }

    /// Rebuilds the tree with every leaf transformed, keeping its shape.
    pub fn try_map<U, E, F>(self, f: &mut F) -> Result<Fanout<U>, E>
    where
        F: FnMut(T) -> Result<U, E>,
    {
        match self {
            Fanout::Leaf(item) => Ok(Fanout::Leaf(f(item)?)),
            Fanout::Branch(children) => children
                .into_iter()
                .map(|child| child.try_map(&mut *f))
                .collect::<Result<Vec<_>, E>>()
                .map(Fanout::Branch),
        }
    }
}

/// The array held by a scattered port.
fn scattered_items<'a>(job: &'a ValueMap, port: &str) -> Result<&'a Vec<Value>, FlowError> {
    match job.get(port) {
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(FlowError::validation(format!(
            "Scattered input '{}' must be an array, got {}",
            port,
            other.type_name()
        ))),
        None => Err(FlowError::validation(format!(
            "Scattered input '{}' has no value",
            port
        ))),
    }
}

/// Expands a resolved input object into one input object per instance.
///
/// `ports` are the scattered port identifiers; they are shortnamed here.
pub fn expand(
    job: &ValueMap,
    ports: &[String],
    method: ScatterMethod,
) -> Result<Fanout<ValueMap>, FlowError> {
    let ports: Vec<&str> = ports.iter().map(|p| shortname(p)).collect();
    if ports.is_empty() {
        return Err(FlowError::validation("scatter requires at least one input port"));
    }

    let fanout = match method {
        ScatterMethod::DotProduct => dot_product(job, &ports)?,
        ScatterMethod::FlatCrossProduct => {
            let mut leaves = Vec::new();
            flat_cross_product(job.clone(), &ports, &mut leaves)?;
            Fanout::Branch(leaves)
        }
        ScatterMethod::NestedCrossProduct => nested_cross_product(job, &ports)?,
    };

    debug!(
        "Expanded scatter over {:?} ({:?}) into {} instances",
        ports,
        method,
        fanout.leaf_count()
    );
    Ok(fanout)
}

fn dot_product(job: &ValueMap, ports: &[&str]) -> Result<Fanout<ValueMap>, FlowError> {
    let mut columns = Vec::with_capacity(ports.len());
    for port in ports {
        columns.push(scattered_items(job, port)?);
    }

    let length = columns[0].len();
    if let Some((port, items)) = ports
        .iter()
        .zip(&columns)
        .find(|(_, items)| items.len() != length)
    {
        return Err(FlowError::validation(format!(
            "dotproduct requires equal-length arrays: '{}' has {} elements, '{}' has {}",
            ports[0],
            length,
            port,
            items.len()
        )));
    }

    let leaves = (0..length)
        .map(|i| {
            let mut instance = job.clone();
            for (port, items) in ports.iter().zip(&columns) {
                instance.insert(port.to_string(), items[i].clone());
            }
            Fanout::Leaf(instance)
        })
        .collect();
    Ok(Fanout::Branch(leaves))
}

fn flat_cross_product(
    job: ValueMap,
    ports: &[&str],
    leaves: &mut Vec<Fanout<ValueMap>>,
) -> Result<(), FlowError> {
    let items = scattered_items(&job, ports[0])?.clone();
    for item in items {
        let mut instance = job.clone();
        instance.insert(ports[0].to_string(), item);
        if ports.len() == 1 {
            leaves.push(Fanout::Leaf(instance));
        } else {
            flat_cross_product(instance, &ports[1..], leaves)?;
        }
    }
    Ok(())
}

fn nested_cross_product(job: &ValueMap, ports: &[&str]) -> Result<Fanout<ValueMap>, FlowError> {
    let items = scattered_items(job, ports[0])?;
    let mut children = Vec::with_capacity(items.len());
    for item in items {
        let mut instance = job.clone();
        instance.insert(ports[0].to_string(), item.clone());
        if ports.len() == 1 {
            children.push(Fanout::Leaf(instance));
        } else {
            children.push(nested_cross_product(&instance, &ports[1..])?);
        }
    }
    Ok(Fanout::Branch(children))
}

/// Applies the step's `valueFrom` expressions to one scatter instance.
///
/// Every expression sees the instance before any expression ran as `inputs`
/// and its own port's element as `self`. Ports with an expression but no
/// value are bound to null.
pub fn post_scatter_eval(
    instance: ValueMap,
    value_from: &[(String, String)],
    evaluator: &dyn ExpressionEvaluator,
) -> Result<ValueMap, FlowError> {
    if value_from.is_empty() {
        return Ok(instance);
    }

    let mut bindings = instance;
    for (port, _) in value_from {
        bindings.entry(port.clone()).or_insert(Value::Null);
    }

    let mut result = bindings.clone();
    for (port, expression) in value_from {
        let context = bindings.get(port).cloned().unwrap_or_default();
        let value = evaluator.evaluate(expression, &bindings, Some(&context))?;
        result.insert(port.clone(), value);
    }
    Ok(result)
}

/// Collects one output port across every instance, keeping the fanout shape.
///
/// An instance without the port contributes null.
pub fn extract(outputs: &Fanout<ValueMap>, key: &str) -> Value {
    match outputs {
        Fanout::Leaf(map) => map.get(key).cloned().unwrap_or(Value::Null),
        Fanout::Branch(children) => {
            Value::Array(children.iter().map(|child| extract(child, key)).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::ParameterReferences;
    use crate::workflow::model::{Process, ToolSpec};
    use serde_json::json;

    fn job(value: serde_json::Value) -> ValueMap {
        match Value::from(value) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn ports(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn leaf_values(fanout: &Fanout<ValueMap>, key: &str) -> Vec<Value> {
        fanout.leaves().iter().map(|m| m[key].clone()).collect()
    }

    #[test]
    fn test_single_port_forces_dotproduct() {
        let step = WorkflowStep::new("s", Process::Tool(ToolSpec::new("t")))
            .with_scatter("a")
            .with_scatter_method("nested_crossproduct");
        assert_eq!(ScatterMethod::for_step(&step).unwrap(), ScatterMethod::DotProduct);
    }

    #[test]
    fn test_multiple_ports_need_method() {
        let step = WorkflowStep::new("s", Process::Tool(ToolSpec::new("t")))
            .with_scatter("a")
            .with_scatter("b");
        assert!(matches!(ScatterMethod::for_step(&step), Err(FlowError::Validation(_))));

        let step = step.with_scatter_method("zip");
        let err = ScatterMethod::for_step(&step).unwrap_err();
        assert!(err.to_string().contains("zip"));
    }

    #[test]
    fn test_dotproduct() {
        let input = job(json!({"a": [1, 2, 3], "b": ["x", "y", "z"], "c": "fixed"}));
        let fanout = expand(&input, &ports(&["a", "b"]), ScatterMethod::DotProduct).unwrap();

        assert_eq!(fanout.leaf_count(), 3);
        assert_eq!(leaf_values(&fanout, "a"), vec![Value::from(1), Value::from(2), Value::from(3)]);
        assert_eq!(leaf_values(&fanout, "b")[2], Value::from("z"));
        assert_eq!(leaf_values(&fanout, "c")[0], Value::from("fixed"));
    }

    #[test]
    fn test_dotproduct_length_mismatch() {
        let input = job(json!({"a": [1, 2], "b": [1]}));
        let err = expand(&input, &ports(&["a", "b"]), ScatterMethod::DotProduct).unwrap_err();
        assert!(matches!(err, FlowError::Validation(_)));
    }

    #[test]
    fn test_scatter_over_non_array() {
        let input = job(json!({"a": 5}));
        assert!(expand(&input, &ports(&["a"]), ScatterMethod::DotProduct).is_err());
    }

    #[test]
    fn test_empty_array_scatter() {
        let input = job(json!({"a": []}));
        let fanout = expand(&input, &ports(&["a"]), ScatterMethod::DotProduct).unwrap();

        assert_eq!(fanout.leaf_count(), 0);
        assert_eq!(extract(&Fanout::Branch(Vec::new()), "out"), Value::Array(vec![]));
    }

    #[test]
    fn test_flat_crossproduct_order() {
        let input = job(json!({"a": [1, 2], "b": ["x", "y", "z"]}));
        let fanout = expand(&input, &ports(&["a", "b"]), ScatterMethod::FlatCrossProduct).unwrap();

        assert_eq!(fanout.leaf_count(), 6);
        let pairs: Vec<(Value, Value)> = fanout
            .leaves()
            .iter()
            .map(|m| (m["a"].clone(), m["b"].clone()))
            .collect();
        assert_eq!(pairs[0], (Value::from(1), Value::from("x")));
        assert_eq!(pairs[2], (Value::from(1), Value::from("z")));
        assert_eq!(pairs[3], (Value::from(2), Value::from("x")));
    }

    #[test]
    fn test_nested_crossproduct_shape() {
        let input = job(json!({"a": [1, 2], "b": ["x", "y", "z"]}));
        let fanout = expand(&input, &ports(&["a", "b"]), ScatterMethod::NestedCrossProduct).unwrap();

        match &fanout {
            Fanout::Branch(rows) => {
                assert_eq!(rows.len(), 2);
                assert!(rows.iter().all(|row| row.leaf_count() == 3));
            }
            Fanout::Leaf(_) => panic!("expected branch"),
        }

        let gathered = extract(&fanout, "b");
        assert_eq!(gathered.to_json(), json!([["x", "y", "z"], ["x", "y", "z"]]));
    }

    #[test]
    fn test_scatter_ports_are_shortnamed() {
        let input = job(json!({"a": [1, 2]}));
        let fanout = expand(&input, &ports(&["main/step/a"]), ScatterMethod::DotProduct).unwrap();
        assert_eq!(fanout.leaf_count(), 2);
    }

    #[test]
    fn test_post_scatter_eval() {
        let instance = job(json!({"n": 3, "label": "s"}));
        let value_from = vec![
            ("label".to_string(), "$(self)-$(inputs.n)".to_string()),
            ("extra".to_string(), "$(inputs.label)".to_string()),
        ];

        let result = post_scatter_eval(instance, &value_from, &ParameterReferences::new()).unwrap();

        assert_eq!(result["label"], Value::from("s-3"));
        // Sees the pre-expression value of its sibling
        assert_eq!(result["extra"], Value::from("s"));
        assert_eq!(result["n"], Value::from(3));
    }

    #[test]
    fn test_extract_missing_key_is_null() {
        let fanout = Fanout::Branch(vec![
            Fanout::Leaf(job(json!({"out": 1}))),
            Fanout::Leaf(job(json!({}))),
        ]);
        assert_eq!(extract(&fanout, "out").to_json(), json!([1, null]));
    }

    #[test]
    fn test_try_map_keeps_shape() {
        let fanout = Fanout::Branch(vec![Fanout::Leaf(1), Fanout::Branch(vec![Fanout::Leaf(2)])]);
        let mapped: Fanout<i32> = fanout.try_map(&mut |n| Ok::<_, FlowError>(n * 10)).unwrap();
        assert_eq!(
            mapped,
            Fanout::Branch(vec![Fanout::Leaf(10), Fanout::Branch(vec![Fanout::Leaf(20)])])
        );
    }
}
