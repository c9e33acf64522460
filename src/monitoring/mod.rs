//! Run Monitoring Module
//!
//! Provides the per-unit execution timeline recorded during workflow runs.
//!
//! # Components
//!
//! - [`ExecutionTimeline`]: unit start/end timing for Gantt charts

pub mod timeline;

pub use timeline::{EventType, ExecutionTimeline, TimelineEvent, TimelineSummary};
