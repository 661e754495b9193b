//! Run state and reconstruction from audit events.
//!
//! A run is one pass of one artifact through the trust pipeline:
//! validating-context -> invoking -> gating -> (reviewing) -> arbitrating
//! -> (escalating) -> applying -> done | aborted.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{Event, EventType, StageStatus};

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ValidatingContext,
    Invoking,
    Gating,
    Reviewing,
    Arbitrating,
    Escalating,
    Applying,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ValidatingContext => "validating_context",
            Self::Invoking => "invoking",
            Self::Gating => "gating",
            Self::Reviewing => "reviewing",
            Self::Arbitrating => "arbitrating",
            Self::Escalating => "escalating",
            Self::Applying => "applying",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub workflow_id: String,
    pub step_id: String,
    pub state: RunState,

    /// Stage currently (or last) executing
    pub stage: Option<Stage>,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stage_statuses: BTreeMap<Stage, StageStatus>,
}

impl Run {
    pub fn new(id: Uuid, workflow_id: String, step_id: String) -> Self {
        Self {
            id,
            workflow_id,
            step_id,
            state: RunState::Running,
            stage: None,
            started_at: Utc::now(),
            completed_at: None,
            stage_statuses: BTreeMap::new(),
        }
    }

    /// Reconstruct run state from a sequence of events
    pub fn from_events(events: &[Event]) -> Option<Self> {
        let first_event = events.first()?;

        let mut run = Self::new(first_event.run_id, String::new(), String::new());
        run.started_at = first_event.timestamp;

        for event in events {
            run.apply_event(event);
        }

        Some(run)
    }

    /// Apply a single event to update run state
    pub fn apply_event(&mut self, event: &Event) {
        match event.event_type {
            EventType::RunStarted => {
                self.state = RunState::Running;
                self.started_at = event.timestamp;
                if let Some(data) = &event.data {
                    if let Some(workflow_id) = data.get("workflow_id").and_then(|v| v.as_str()) {
                        self.workflow_id = workflow_id.to_string();
                    }
                    if let Some(step_id) = data.get("step_id").and_then(|v| v.as_str()) {
                        self.step_id = step_id.to_string();
                    }
                }
            }
            EventType::RunCompleted => {
                self.state = RunState::Completed;
                self.completed_at = Some(event.timestamp);
            }
            EventType::RunAborted => {
                self.state = RunState::Aborted {
                    reason: event.error.clone().unwrap_or_default(),
                };
                self.completed_at = Some(event.timestamp);
            }
            EventType::StageStarted | EventType::StageCompleted | EventType::StageFailed => {
                if let Some(stage) = event.stage {
                    self.stage = Some(stage);
                    self.stage_statuses.insert(stage, event.status);
                }
            }
            EventType::InvocationRetrying
            | EventType::InputWarning
            | EventType::ValidationReported
            | EventType::VerdictReached
            | EventType::EscalationRaised
            | EventType::EscalationAnswered
            | EventType::DecisionRecorded
            | EventType::EffectsApplied
            | EventType::BottleneckDetected => {}
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, RunState::Running)
    }

    pub fn is_finished(&self) -> bool {
        !self.is_running()
    }

    pub fn stage_status(&self, stage: Stage) -> StageStatus {
        self.stage_statuses.get(&stage).copied().unwrap_or_default()
    }
}

/// State of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunState {
    Running,
    Completed,
    Aborted { reason: String },
}

impl Default for RunState {
    fn default() -> Self {
        Self::Running
    }
}
