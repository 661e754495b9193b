//! Input checks and limits for pipeline runs.
//!
//! Everything here runs before any capability is invoked:
//! - Required context fields (dot paths such as `story.title`)
//! - Input size (warn threshold and hard limit)
//! - Run and escalation timeouts

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Safety limits for pipeline execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyLimits {
    /// Dot paths that must be present and non-blank in the run context
    #[serde(default)]
    pub required_fields: Vec<String>,

    /// Input size that triggers a warning (default: 256KB)
    #[serde(default = "default_warn_input_bytes")]
    pub warn_input_bytes: u64,

    /// Maximum input size in bytes (default: 10MB)
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: u64,

    /// Total run timeout in seconds (default: 1800 = 30 min)
    #[serde(default = "default_run_timeout")]
    pub run_timeout_seconds: u64,

    /// Upper bound on waiting for a human; unset waits for the run timeout
    #[serde(default)]
    pub escalation_timeout_seconds: Option<u64>,
}

fn default_warn_input_bytes() -> u64 {
    256 * 1024
}
fn default_max_input_bytes() -> u64 {
    10 * 1024 * 1024
} // 10MB
fn default_run_timeout() -> u64 {
    1800
} // 30 min

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            required_fields: Vec::new(),
            warn_input_bytes: default_warn_input_bytes(),
            max_input_bytes: default_max_input_bytes(),
            run_timeout_seconds: default_run_timeout(),
            escalation_timeout_seconds: None,
        }
    }
}

impl SafetyLimits {
    pub fn requiring(mut self, field: impl Into<String>) -> Self {
        self.required_fields.push(field.into());
        self
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_seconds)
    }

    pub fn escalation_timeout(&self) -> Option<Duration> {
        self.escalation_timeout_seconds.map(Duration::from_secs)
    }

    /// Validate the run context. Violations abort the run; warnings are
    /// returned for the caller to log.
    pub fn check_context(
        &self,
        context: &serde_json::Value,
    ) -> Result<Vec<SafetyWarning>, SafetyViolation> {
        for field in &self.required_fields {
            if !has_value(context, field) {
                return Err(SafetyViolation::MissingField {
                    field: field.clone(),
                });
            }
        }

        let size = serde_json::to_vec(context)
            .map(|bytes| bytes.len() as u64)
            .unwrap_or(0);

        if size > self.max_input_bytes {
            return Err(SafetyViolation::MaxInputBytes {
                actual: size,
                limit: self.max_input_bytes,
            });
        }

        let mut warnings = Vec::new();
        if size > self.warn_input_bytes {
            warnings.push(SafetyWarning::LargeInput {
                actual: size,
                threshold: self.warn_input_bytes,
            });
        }
        Ok(warnings)
    }
}

/// Look up a dot path and require a non-null, non-blank value
fn has_value(context: &serde_json::Value, path: &str) -> bool {
    let mut current = context;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return false,
        }
    }

    match current {
        serde_json::Value::Null => false,
        serde_json::Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

/// Non-fatal findings about the input
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SafetyWarning {
    LargeInput { actual: u64, threshold: u64 },
}

impl fmt::Display for SafetyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LargeInput { actual, threshold } => {
                write!(f, "input is {} bytes (warn threshold {})", actual, threshold)
            }
        }
    }
}

/// Safety violation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SafetyViolation {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Maximum input bytes exceeded: {actual} > {limit}")]
    MaxInputBytes { actual: u64, limit: u64 },
}
