//! Domain types for the trust pipeline.
//!
//! - Decision: scored judgments (autonomous or human)
//! - Assessments: self and independent review reports
//! - Verdict: arbitration output
//! - EscalationRecord: decisions awaiting a human
//! - Events / Run: audit log and run state
//! - Artifact: generated output

pub mod artifact;
pub mod assessment;
pub mod decision;
pub mod escalation;
pub mod events;
pub mod run;
pub mod verdict;

pub use artifact::{Artifact, ArtifactUnit, Production};
pub use assessment::{
    AcceptanceCheck, ChecklistResult, IndependentAssessment, PreliminaryDecision,
    SecurityFinding, SelfAssessment, Severity, TestCoverage,
};
pub use decision::{Decision, DecisionContext, DecisionSource};
pub use escalation::{EscalationRecord, EscalationResponse, EscalationStatus, NewEscalation};
pub use events::{Event, EventType, StageStatus};
pub use run::{Run, RunState, Stage};
pub use verdict::{ArbitrationRule, Verdict, VerdictDecision};
