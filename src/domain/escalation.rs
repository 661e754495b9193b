//! Decisions awaiting a human.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of an escalation (pending -> answered, terminal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    Pending,
    Answered,
}

/// An escalation before the queue assigns it an id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEscalation {
    pub workflow_id: String,
    pub step_id: String,
    pub question: String,

    /// Why the automated path could not decide
    pub reasoning: String,

    pub confidence: f64,

    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
}

/// A human answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationResponse {
    pub answer: String,
    pub answered_at: DateTime<Utc>,
}

/// Flat, persistable escalation record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub id: String,
    pub workflow_id: String,
    pub step_id: String,
    pub question: String,
    pub reasoning: String,
    pub confidence: f64,

    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,

    pub status: EscalationStatus,

    /// Absent while pending
    pub answer: Option<String>,

    pub created_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
}

impl EscalationRecord {
    /// Build a pending record from a new escalation
    pub fn pending(id: String, new: NewEscalation, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            workflow_id: new.workflow_id,
            step_id: new.step_id,
            question: new.question,
            reasoning: new.reasoning,
            confidence: new.confidence,
            context: new.context,
            status: EscalationStatus::Pending,
            answer: None,
            created_at,
            answered_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == EscalationStatus::Pending
    }

    /// The answer, once there is one
    pub fn response(&self) -> Option<EscalationResponse> {
        match (&self.answer, self.answered_at) {
            (Some(answer), Some(answered_at)) => Some(EscalationResponse {
                answer: answer.clone(),
                answered_at,
            }),
            _ => None,
        }
    }
}
