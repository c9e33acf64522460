//! Execution Timeline
//!
//! Records when each scheduled unit starts, completes, is skipped or fails,
//! for run summaries and ASCII Gantt charts.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

/// Type of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Unit handed to the executor (or started preparing)
    Started,
    /// Unit published its outputs
    Completed,
    /// Unit's `when` condition was false
    Skipped,
    Failed,
}

/// A single event in the execution timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    /// Label of the unit, e.g. `align[2]`
    pub unit: String,
    pub event_type: EventType,
    pub timestamp: Instant,
}

/// Event counts per type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimelineSummary {
    pub started: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Tracks the execution timeline of one run.
#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    start_time: Instant,
    started_at: DateTime<Local>,
}

impl ExecutionTimeline {
    /// Creates a new timeline starting now.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            start_time: Instant::now(),
            started_at: Local::now(),
        }
    }

    /// Records an event for a unit.
    pub fn add_event(&mut self, unit: impl Into<String>, event_type: EventType) {
        self.events.push(TimelineEvent {
            unit: unit.into(),
            event_type,
            timestamp: Instant::now(),
        });
    }

    pub fn get_events(&self) -> &[TimelineEvent] {
        &self.events
    }

    /// Wall-clock time the run started.
    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Returns the total elapsed time since timeline creation.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn summary(&self) -> TimelineSummary {
        let mut summary = TimelineSummary::default();
        for event in &self.events {
            match event.event_type {
                EventType::Started => summary.started += 1,
                EventType::Completed => summary.completed += 1,
                EventType::Skipped => summary.skipped += 1,
                EventType::Failed => summary.failed += 1,
            }
        }
        summary
    }

    fn offset(&self, event: &TimelineEvent) -> u128 {
        event.timestamp.duration_since(self.start_time).as_millis()
    }

    /// Generates an ASCII Gantt chart representation.
    ///
    /// Units that ran are drawn as bars scaled to a 50 character width;
    /// skipped units are listed with a marker at the point they were skipped.
    pub fn gantt_chart(&self) -> String {
        let mut output = format!(
            "\nExecution Timeline (started {}):\n\n",
            self.started_at.format("%Y-%m-%d %H:%M:%S")
        );

        let total_time = self.elapsed().as_millis();
        if total_time == 0 {
            return output;
        }
        let scale = 50.0 / total_time as f64;

        // (start, end, skipped) per unit, in first-seen order
        let mut order: Vec<String> = Vec::new();
        let mut spans: HashMap<String, (u128, u128, bool)> = HashMap::new();

        for event in &self.events {
            let elapsed = self.offset(event);
            if !spans.contains_key(&event.unit) {
                order.push(event.unit.clone());
            }
            let span = spans.entry(event.unit.clone()).or_insert((elapsed, elapsed, false));
            match event.event_type {
                EventType::Started => span.0 = elapsed,
                EventType::Completed | EventType::Failed => span.1 = elapsed,
                EventType::Skipped => {
                    span.1 = elapsed;
                    span.2 = true;
                }
            }
        }

        let mut rows: Vec<(String, (u128, u128, bool))> = order
            .into_iter()
            .filter_map(|unit| spans.remove(&unit).map(|span| (unit, span)))
            .collect();
        rows.sort_by_key(|(_, (start, _, _))| *start);

        for (unit, (start, end, skipped)) in rows {
            let start_pos = (start as f64 * scale) as usize;
            if skipped {
                output.push_str(&format!(
                    "{} |{}-| (skipped)\n",
                    truncate(&unit, 12),
                    " ".repeat(start_pos)
                ));
            } else if end > start {
                let width = ((end - start) as f64 * scale).max(1.0) as usize;
                output.push_str(&format!(
                    "{} |{}{}| ({} ms)\n",
                    truncate(&unit, 12),
                    " ".repeat(start_pos),
                    "#".repeat(width),
                    end - start
                ));
            }
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }

    /// Returns unit durations in milliseconds. Skipped units are absent.
    pub fn get_durations(&self) -> HashMap<String, u128> {
        let mut starts: HashMap<&str, u128> = HashMap::new();
        let mut durations: HashMap<String, u128> = HashMap::new();

        for event in &self.events {
            let elapsed = self.offset(event);
            match event.event_type {
                EventType::Started => {
                    starts.insert(event.unit.as_str(), elapsed);
                }
                EventType::Completed | EventType::Failed => {
                    if let Some(start) = starts.get(event.unit.as_str()) {
                        durations.insert(event.unit.clone(), elapsed - start);
                    }
                }
                EventType::Skipped => {}
            }
        }

        durations
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Pads or truncates a label to exactly `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
