//! Run-level failures.
//!
//! Every way a run can end without applying its artifact maps to exactly one
//! variant, so callers can tell a human rejection from an escalation timeout
//! or a gate rejection from exhausted retries.

use std::time::Duration;

use thiserror::Error;

use super::escalation::EscalationError;
use super::gate::GateRejected;
use super::registry::RegistryError;
use super::retry::InvocationError;
use super::safety::SafetyViolation;
use crate::adapters::FailedUnit;
use crate::domain::Verdict;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("input rejected: {0}")]
    Safety(#[from] SafetyViolation),

    #[error(transparent)]
    Invocation(#[from] InvocationError),

    #[error(transparent)]
    GateRejected(#[from] GateRejected),

    #[error("arbitration failed: {verdict}")]
    ArbitrationFailed { verdict: Verdict },

    #[error("human reviewer rejected escalation {escalation_id}: {answer}")]
    HumanRejected {
        escalation_id: String,
        answer: String,
    },

    #[error(transparent)]
    Escalation(#[from] EscalationError),

    #[error("{} of {} units failed to apply: {}", .failed.len(), .failed.len() + .succeeded.len(), describe_failures(.failed))]
    PartialApply {
        failed: Vec<FailedUnit>,
        succeeded: Vec<String>,
    },

    #[error("run exceeded timeout of {0:?}")]
    RunTimeout(Duration),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl PipelineError {
    /// The missing field, when the run aborted on input validation
    pub fn missing_field(&self) -> Option<&str> {
        match self {
            Self::Safety(SafetyViolation::MissingField { field }) => Some(field),
            _ => None,
        }
    }

    pub fn is_escalation_timeout(&self) -> bool {
        matches!(self, Self::Escalation(EscalationError::Timeout { .. }))
    }
}

fn describe_failures(failed: &[FailedUnit]) -> String {
    failed
        .iter()
        .map(|f| format!("{} ({})", f.unit, f.error))
        .collect::<Vec<_>>()
        .join(", ")
}
