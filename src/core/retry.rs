//! Bounded retries with exponential backoff.
//!
//! The invoker knows nothing about what it calls. It retries transport and
//! timeout failures, stops immediately on malformed output, and suspends
//! only the calling task between attempts.

use std::marker::PhantomData;
use std::time::Duration;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::adapters::{Capability, CapabilityError, CapabilityInput};
use crate::domain::{IndependentAssessment, Production};

/// Retry policy for capability invocations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failed attempt, in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given attempt failed (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms.min(self.max_delay_ms));
        }

        let delay = self.initial_delay_ms as f64
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Reject policies that could never run or would shrink their delays
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            anyhow::bail!("retry policy needs at least one attempt");
        }
        if !(self.backoff_multiplier >= 1.0) {
            anyhow::bail!(
                "backoff multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            );
        }
        if self.max_delay_ms < self.initial_delay_ms {
            anyhow::bail!(
                "max delay ({}ms) is below the initial delay ({}ms)",
                self.max_delay_ms,
                self.initial_delay_ms
            );
        }
        Ok(())
    }
}

/// Typed output a capability is expected to return
pub trait OutputShape: DeserializeOwned {
    /// Checks beyond deserialization; failures are terminal
    fn check_shape(&self) -> Result<(), String> {
        Ok(())
    }
}

impl OutputShape for Production {
    fn check_shape(&self) -> Result<(), String> {
        Production::check_shape(self)
    }
}

impl OutputShape for IndependentAssessment {
    fn check_shape(&self) -> Result<(), String> {
        IndependentAssessment::check_shape(self)
    }
}

impl OutputShape for serde_json::Value {}

/// Invocation failure surfaced to callers. Callers must not retry again.
#[derive(Debug, Clone, Error)]
pub enum InvocationError {
    #[error("invocation exhausted after {attempts} attempts: {last_error}")]
    Exhausted {
        attempts: u32,
        last_error: CapabilityError,
    },

    #[error("terminal failure on attempt {attempt}: {error}")]
    Terminal { attempt: u32, error: CapabilityError },
}

impl InvocationError {
    /// Number of attempts made before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::Terminal { attempt, .. } => *attempt,
        }
    }
}

/// A failed attempt that will be retried
#[derive(Debug, Clone, Serialize)]
pub struct AttemptFailure {
    pub attempt: u32,
    pub error: String,
    pub delay_ms: u64,
}

/// Successful invocation
#[derive(Debug, Clone)]
pub struct Invocation<T> {
    pub output: T,
    pub attempts: u32,

    /// Total time spent suspended between attempts
    pub backoff: Duration,
}

/// Calls a capability under a retry policy
#[derive(Debug, Clone)]
pub struct RetryingInvoker {
    policy: RetryPolicy,
}

impl RetryingInvoker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invoke and decode into `T`
    pub async fn invoke<T: OutputShape>(
        &self,
        capability: &dyn Capability,
        input: &CapabilityInput,
    ) -> Result<Invocation<T>, InvocationError> {
        self.invoke_observed(capability, input, |_| {}).await
    }

    /// Invoke and decode into `T`, reporting every retried failure
    pub async fn invoke_observed<T, F>(
        &self,
        capability: &dyn Capability,
        input: &CapabilityInput,
        mut on_retry: F,
    ) -> Result<Invocation<T>, InvocationError>
    where
        T: OutputShape,
        F: FnMut(&AttemptFailure),
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let decoder = Decoder::<T>::new();
        let mut attempt = 0u32;
        let mut backoff = Duration::ZERO;

        loop {
            attempt += 1;
            debug!(capability = capability.name(), attempt, "Invoking capability");

            let result = capability
                .invoke(input)
                .await
                .and_then(|raw| decoder.decode(raw));

            match result {
                Ok(output) => {
                    return Ok(Invocation {
                        output,
                        attempts: attempt,
                        backoff,
                    });
                }
                Err(e) if !e.is_retryable() => {
                    error!(
                        capability = capability.name(),
                        attempt,
                        error = %e,
                        "Capability returned unusable output"
                    );
                    return Err(InvocationError::Terminal { attempt, error: e });
                }
                Err(e) if attempt < max_attempts => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(
                        capability = capability.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Invocation failed, retrying"
                    );
                    on_retry(&AttemptFailure {
                        attempt,
                        error: e.to_string(),
                        delay_ms: delay.as_millis() as u64,
                    });

                    tokio::time::sleep(delay).await;
                    backoff += delay;
                }
                Err(e) => {
                    error!(
                        capability = capability.name(),
                        attempt,
                        error = %e,
                        "Invocation failed permanently"
                    );
                    return Err(InvocationError::Exhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }
            }
        }
    }
}

/// Decodes raw capability output; every failure here is a shape error
struct Decoder<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T: OutputShape> Decoder<T> {
    fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    fn decode(&self, raw: serde_json::Value) -> Result<T, CapabilityError> {
        let output: T = serde_json::from_value(raw)
            .map_err(|e| CapabilityError::Shape(format!("incomplete output: {}", e)))?;
        output.check_shape().map_err(CapabilityError::Shape)?;
        Ok(output)
    }
}
