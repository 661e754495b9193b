//! Contracts for external collaborators.
//!
//! - [`Capability`]: an opaque generative worker (producer or reviewer)
//! - [`SideEffectApplier`]: writes accepted artifact units somewhere durable

pub mod command;
pub mod fs;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Artifact, ArtifactUnit};

pub use command::CommandCapability;
pub use fs::FsApplier;

/// What a worker is being asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    /// Produce an artifact and a self-assessment
    Produce,

    /// Independently review an existing artifact
    Review,
}

/// Input handed to a capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityInput {
    pub task: Task,
    pub workflow_id: String,
    pub step_id: String,
    pub context: serde_json::Value,

    /// The artifact under review (review tasks only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
}

/// Failure reported by a capability
#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Malformed or incomplete output
    #[error("malformed output: {0}")]
    Shape(String),
}

impl CapabilityError {
    /// Transport and timeout failures may succeed on another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

/// A generative worker
#[async_trait]
pub trait Capability: Send + Sync {
    /// Human-readable capability name
    fn name(&self) -> &str;

    /// Invoke the worker, returning its raw structured output
    async fn invoke(&self, input: &CapabilityInput) -> Result<serde_json::Value, CapabilityError>;
}

/// A unit that could not be applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedUnit {
    pub unit: String,
    pub error: String,
}

/// Outcome of applying side effects
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<FailedUnit>,
}

impl ApplyReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Applies accepted artifact units. Failures are per unit, never all-or-nothing.
#[async_trait]
pub trait SideEffectApplier: Send + Sync {
    async fn apply(&self, units: &[ArtifactUnit]) -> ApplyReport;
}
