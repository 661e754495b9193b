//! Audit events for pipeline runs.
//!
//! Every run writes an append-only log of these. Decisions, validation
//! reports and verdicts travel in `data` as structured JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::run::Stage;

/// A single entry in a run's audit log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The run this event belongs to
    pub run_id: Uuid,

    /// Stage the event belongs to (run-level events have none)
    pub stage: Option<Stage>,

    /// Type of event
    pub event_type: EventType,

    /// Idempotency key format: "{run_id}:{stage}:{digest}"
    pub idempotency_key: String,

    /// Human-readable summary (NO secrets)
    pub payload_summary: String,

    /// Status of the stage/run after this event
    pub status: StageStatus,

    /// Time taken in milliseconds (for completed stages)
    pub duration_ms: Option<u64>,

    /// Error message if failed
    pub error: Option<String>,

    /// Structured payload (decision, verdict, reports, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Event {
    /// Create a new event with the current timestamp
    pub fn new(
        run_id: Uuid,
        stage: Option<Stage>,
        event_type: EventType,
        idempotency_key: String,
        payload_summary: String,
        status: StageStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            stage,
            event_type,
            idempotency_key,
            payload_summary,
            status,
            duration_ms: None,
            error: None,
            data: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }

    /// Attach a structured payload. Values that fail to serialize are dropped.
    pub fn with_data<T: Serialize>(mut self, data: &T) -> Self {
        self.data = serde_json::to_value(data).ok();
        self
    }
}

/// Types of audit events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStarted,
    RunCompleted,

    /// The run was aborted (input error, rejection, timeout, ...)
    RunAborted,

    StageStarted,
    StageCompleted,
    StageFailed,

    /// The generative capability failed and will be invoked again
    InvocationRetrying,

    /// Input exceeded a soft limit; logged, not fatal
    InputWarning,

    /// The quality gate produced its reports
    ValidationReported,

    /// Arbitration reached a verdict
    VerdictReached,

    EscalationRaised,
    EscalationAnswered,

    /// A decision became final (autonomous or human)
    DecisionRecorded,

    /// Side effects were applied (possibly partially)
    EffectsApplied,

    /// A stage or the whole run exceeded its duration budget
    BottleneckDetected,
}

/// Status of a stage or run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl Default for StageStatus {
    fn default() -> Self {
        Self::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = Event::new(
            Uuid::new_v4(),
            Some(Stage::Invoking),
            EventType::StageStarted,
            "test-key".to_string(),
            "Invoking producer".to_string(),
            StageStatus::Running,
        );

        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.event_type, EventType::StageStarted);
        assert_eq!(parsed.stage, Some(Stage::Invoking));
        assert!(!json.contains("\"data\""));
    }

    #[test]
    fn test_event_with_data_and_error() {
        let event = Event::new(
            Uuid::new_v4(),
            Some(Stage::Arbitrating),
            EventType::VerdictReached,
            "test-key".to_string(),
            "Verdict".to_string(),
            StageStatus::Completed,
        )
        .with_duration(12)
        .with_error("boom".to_string())
        .with_data(&serde_json::json!({"decision": "pass"}));

        assert_eq!(event.duration_ms, Some(12));
        assert_eq!(event.error.as_deref(), Some("boom"));
        assert_eq!(event.data.unwrap()["decision"], "pass");
    }
}
