//! Core trust pipeline logic.
//!
//! This module contains:
//! - RetryingInvoker: bounded retries around capability calls
//! - ValidationGate: pluggable artifact validators
//! - DecisionEngine: confidence-scored autonomous decisions
//! - EscalationQueue: durable human-in-the-loop decisions
//! - Arbitration: merging two reviews into a verdict
//! - EventStore: append-only audit log
//! - PipelineOrchestrator: the stage machine tying it together

pub mod arbitration;
pub mod decision;
pub mod error;
pub mod escalation;
pub mod event_store;
pub mod gate;
pub mod metrics;
pub mod orchestrator;
pub mod registry;
pub mod retry;
pub mod safety;
pub mod validators;

// Re-export commonly used types
pub use arbitration::{arbitrate, arbitrate_self_only, DEFAULT_CONFIDENCE_THRESHOLD};
pub use decision::{
    ContextHint, DecisionEngine, DecisionRequest, DecisionService, Heuristic, Signal,
    DEFAULT_ESCALATION_THRESHOLD,
};
pub use error::PipelineError;
pub use escalation::{EscalationError, EscalationQueue};
pub use event_store::{generate_idempotency_key, hash_input, EventStore};
pub use gate::{GateMode, GateOutcome, GateRejected, ValidationGate, ValidationReport, Validator};
pub use metrics::{Bottleneck, Budgets, MetricsRecorder, PipelineMetrics};
pub use orchestrator::{HumanAnswer, PipelineOrchestrator, PipelineSettings, RunReport, RunRequest};
pub use registry::{RegistryError, WorkerLease, WorkerRegistry, WorkerSession};
pub use retry::{AttemptFailure, Invocation, InvocationError, OutputShape, RetryPolicy, RetryingInvoker};
pub use safety::{SafetyLimits, SafetyViolation, SafetyWarning};
pub use validators::{DenylistedPaths, NonEmptyArtifact, RequiredSections, UnitSizeLimit};
