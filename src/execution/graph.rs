//! Job Graph
//!
//! The arena of scheduled units built while a workflow is unrolled.
//! Tracks, for every unit:
//! - Its dependency edges
//! - Its lifecycle state
//! - Its single-assignment output slot
//! - How many units it spawned are still unfinished

use std::fmt;

use log::debug;
use once_cell::sync::OnceCell;

use crate::dataflow::indirect::IndirectMap;
use crate::dataflow::scatter::Fanout;
use crate::error::FlowError;
use crate::workflow::value::ValueMap;

use super::unit::UnitKind;

/// Index of a unit in the [`JobGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitId(pub usize);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A dependency on another unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Wait for the unit itself to complete
    After(UnitId),
    /// Wait for the unit and every unit its run spawned
    AfterSubtree(UnitId),
}

impl Edge {
    pub fn target(&self) -> UnitId {
        match self {
            Edge::After(id) | Edge::AfterSubtree(id) => *id,
        }
    }
}

/// What a completed unit produced.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutput {
    /// Concrete output mapping, keyed by short port name
    Values(ValueMap),
    /// A nested workflow's output composite, forced by its paired unit
    Deferred(IndirectMap),
    /// The follow-on units of each scatter instance, gathered by its paired unit
    Fanout(Fanout<UnitId>),
}

/// Status of a unit during execution.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitState {
    /// Waiting for dependencies
    Pending,
    /// Submitted to the executor
    Running,
    /// Output slot filled
    Completed,
    /// Failed with error message
    Failed(String),
}

/// One materialized job (or job group) in the graph.
#[derive(Debug)]
pub struct ScheduledUnit {
    pub id: UnitId,
    /// Display name, e.g. `align` or `align[3]`
    pub label: String,
    /// Step this unit was materialized for
    pub step: String,
    pub kind: UnitKind,
    /// The unit whose run created this one
    pub parent: Option<UnitId>,
    pub edges: Vec<Edge>,
    pub state: UnitState,
    output: OnceCell<UnitOutput>,
    /// Spawned descendants not yet completed
    outstanding: usize,
}

impl ScheduledUnit {
    pub fn output(&self) -> Option<&UnitOutput> {
        self.output.get()
    }
}

/// Arena of every unit scheduled for one run.
#[derive(Debug, Default)]
pub struct JobGraph {
    units: Vec<ScheduledUnit>,
}

impl JobGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pending unit and returns its id.
    ///
    /// Every ancestor of the new unit now has one more outstanding descendant.
    pub fn add(
        &mut self,
        kind: UnitKind,
        label: impl Into<String>,
        step: impl Into<String>,
        parent: Option<UnitId>,
        edges: Vec<Edge>,
    ) -> UnitId {
        let id = UnitId(self.units.len());
        let label = label.into();
        debug!("Scheduled unit {} '{}' after {:?}", id, label, edges);

        self.units.push(ScheduledUnit {
            id,
            label,
            step: step.into(),
            kind,
            parent,
            edges,
            state: UnitState::Pending,
            output: OnceCell::new(),
            outstanding: 0,
        });

        let mut ancestor = parent;
        while let Some(a) = ancestor {
            let unit = &mut self.units[a.0];
            unit.outstanding += 1;
            ancestor = unit.parent;
        }

        id
    }

    pub fn get(&self, id: UnitId) -> Option<&ScheduledUnit> {
        self.units.get(id.0)
    }

    fn unit(&self, id: UnitId) -> Result<&ScheduledUnit, FlowError> {
        self.get(id)
            .ok_or_else(|| FlowError::validation(format!("unknown unit {}", id)))
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn units(&self) -> impl Iterator<Item = &ScheduledUnit> {
        self.units.iter()
    }

    fn edge_satisfied(&self, edge: &Edge) -> bool {
        match self.get(edge.target()) {
            Some(target) => match edge {
                Edge::After(_) => target.state == UnitState::Completed,
                Edge::AfterSubtree(_) => {
                    target.state == UnitState::Completed && target.outstanding == 0
                }
            },
            None => false,
        }
    }

    /// Pending units whose dependencies are all satisfied, in id order.
    pub fn ready_units(&self) -> Vec<UnitId> {
        self.units
            .iter()
            .filter(|u| u.state == UnitState::Pending)
            .filter(|u| u.edges.iter().all(|e| self.edge_satisfied(e)))
            .map(|u| u.id)
            .collect()
    }

    pub fn mark_running(&mut self, id: UnitId) {
        if let Some(unit) = self.units.get_mut(id.0) {
            unit.state = UnitState::Running;
        }
    }

    /// Publishes a unit's output. A slot can only be written once.
    pub fn complete(&mut self, id: UnitId, output: UnitOutput) -> Result<(), FlowError> {
        let unit = self
            .units
            .get_mut(id.0)
            .ok_or_else(|| FlowError::validation(format!("unknown unit {}", id)))?;

        if unit.output.set(output).is_err() {
            return Err(FlowError::DuplicatePromise(format!("output of unit {}", id)));
        }
        unit.state = UnitState::Completed;

        let mut ancestor = unit.parent;
        while let Some(a) = ancestor {
            let parent = &mut self.units[a.0];
            parent.outstanding = parent.outstanding.saturating_sub(1);
            ancestor = parent.parent;
        }
        Ok(())
    }

    pub fn mark_failed(&mut self, id: UnitId, message: impl Into<String>) {
        if let Some(unit) = self.units.get_mut(id.0) {
            unit.state = UnitState::Failed(message.into());
        }
    }

    /// True once the unit and everything it spawned have completed.
    pub fn is_settled(&self, id: UnitId) -> bool {
        self.edge_satisfied(&Edge::AfterSubtree(id))
    }

    pub fn output(&self, id: UnitId) -> Result<&UnitOutput, FlowError> {
        self.unit(id)?
            .output()
            .ok_or_else(|| FlowError::PromiseNotReady(format!("output of unit {}", id)))
    }

    /// The concrete output mapping of a completed unit.
    pub fn values(&self, id: UnitId) -> Result<&ValueMap, FlowError> {
        match self.output(id)? {
            UnitOutput::Values(values) => Ok(values),
            _ => Err(FlowError::PromiseNotReady(format!(
                "unit {} has no concrete outputs",
                id
            ))),
        }
    }

    pub fn has_work_remaining(&self) -> bool {
        self.units
            .iter()
            .any(|u| matches!(u.state, UnitState::Pending | UnitState::Running))
    }

    /// Returns (completed, total) unit counts.
    pub fn progress(&self) -> (usize, usize) {
        let completed = self
            .units
            .iter()
            .filter(|u| u.state == UnitState::Completed)
            .count();
        (completed, self.units.len())
    }

    /// Number of units materialized for a step, across every workflow level.
    pub fn units_for_step(&self, step: &str) -> usize {
        self.units.iter().filter(|u| u.step == step).count()
    }

    /// Labels of units that never left the pending state.
    pub fn pending_labels(&self) -> Vec<String> {
        self.units
            .iter()
            .filter(|u| u.state == UnitState::Pending)
            .map(|u| u.label.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::value::Value;

    fn placeholder() -> UnitKind {
        UnitKind::ResolveOutputs { workflow: UnitId(0) }
    }

    fn values(n: i64) -> UnitOutput {
        let mut map = ValueMap::new();
        map.insert("out".to_string(), Value::from(n));
        UnitOutput::Values(map)
    }

    #[test]
    fn test_ready_after_dependency() {
        let mut graph = JobGraph::new();
        let a = graph.add(placeholder(), "a", "a", None, Vec::new());
        let b = graph.add(placeholder(), "b", "b", None, vec![Edge::After(a)]);

        assert_eq!(graph.ready_units(), vec![a]);

        graph.mark_running(a);
        assert!(graph.ready_units().is_empty());

        graph.complete(a, values(1)).unwrap();
        assert_eq!(graph.ready_units(), vec![b]);
    }

    #[test]
    fn test_subtree_edge_waits_for_descendants() {
        let mut graph = JobGraph::new();
        let root = graph.add(placeholder(), "root", "root", None, Vec::new());
        let follow = graph.add(placeholder(), "follow", "root", None, vec![Edge::AfterSubtree(root)]);

        // Children are spawned while the root runs
        graph.mark_running(root);
        let child = graph.add(placeholder(), "child", "c", Some(root), vec![Edge::After(root)]);
        let grandchild = graph.add(placeholder(), "gc", "g", Some(child), Vec::new());
        graph.complete(root, values(0)).unwrap();

        assert!(!graph.ready_units().contains(&follow));
        assert!(!graph.is_settled(root));

        graph.complete(grandchild, values(2)).unwrap();
        assert!(!graph.ready_units().contains(&follow));

        graph.complete(child, values(1)).unwrap();
        assert!(graph.is_settled(root));
        assert_eq!(graph.ready_units(), vec![follow]);
    }

    #[test]
    fn test_output_written_once() {
        let mut graph = JobGraph::new();
        let a = graph.add(placeholder(), "a", "a", None, Vec::new());

        assert!(matches!(graph.values(a), Err(FlowError::PromiseNotReady(_))));
        graph.complete(a, values(1)).unwrap();

        let err = graph.complete(a, values(2)).unwrap_err();
        assert!(matches!(err, FlowError::DuplicatePromise(_)));
        assert_eq!(graph.values(a).unwrap()["out"], Value::from(1));
    }

    #[test]
    fn test_values_of_deferred_output() {
        let mut graph = JobGraph::new();
        let a = graph.add(placeholder(), "a", "a", None, Vec::new());
        graph.complete(a, UnitOutput::Deferred(IndirectMap::new())).unwrap();

        assert!(graph.output(a).is_ok());
        assert!(graph.values(a).is_err());
    }

    #[test]
    fn test_progress_and_pending() {
        let mut graph = JobGraph::new();
        let a = graph.add(placeholder(), "a", "step", None, Vec::new());
        graph.add(placeholder(), "b", "step", None, vec![Edge::After(a)]);

        assert!(graph.has_work_remaining());
        graph.complete(a, values(1)).unwrap();

        assert_eq!(graph.progress(), (1, 2));
        assert_eq!(graph.pending_labels(), vec!["b"]);
        assert_eq!(graph.units_for_step("step"), 2);
    }

    #[test]
    fn test_failed_unit_is_not_work() {
        let mut graph = JobGraph::new();
        let a = graph.add(placeholder(), "a", "a", None, Vec::new());
        graph.mark_failed(a, "boom");

        assert!(!graph.has_work_remaining());
        assert_eq!(graph.get(a).unwrap().state, UnitState::Failed("boom".to_string()));
    }

    #[test]
    fn test_unit_id_display() {
        assert_eq!(UnitId(7).to_string(), "#7");
    }
}
