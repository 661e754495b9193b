//! Review reports fed into arbitration.
//!
//! A [`SelfAssessment`] comes from the worker that produced an artifact;
//! an [`IndependentAssessment`] comes from a second, adversarial reviewer.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity of a security finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    /// Critical and high findings always need a human
    pub fn requires_human(&self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Info => "info",
        };
        f.write_str(label)
    }
}

/// One checklist line from the producer's review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistResult {
    pub item: String,
    pub passed: bool,
}

/// Whether an acceptance criterion was met
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceCheck {
    pub criterion: String,
    pub met: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

/// Producer's own review of its artifact.
///
/// `critical_issues` has no serde default: a report that omits it, or sends
/// `null`, fails to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfAssessment {
    #[serde(default)]
    pub checklist: Vec<ChecklistResult>,

    #[serde(default)]
    pub smells: Vec<String>,

    #[serde(default)]
    pub acceptance_checks: Vec<AcceptanceCheck>,

    pub confidence: f64,

    pub critical_issues: Vec<String>,
}

impl SelfAssessment {
    /// Structural checks beyond what serde enforces
    pub fn check_shape(&self) -> Result<(), String> {
        check_unit_interval("self_assessment.confidence", self.confidence)
    }
}

/// A single security finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityFinding {
    pub severity: Severity,
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Test coverage judgment with optional quality sub-scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCoverage {
    pub adequate: bool,

    #[serde(default)]
    pub quality_scores: BTreeMap<String, f64>,
}

/// The reviewer's own summary verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreliminaryDecision {
    Pass,
    Fail,
}

/// Second worker's adversarial review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndependentAssessment {
    #[serde(default)]
    pub security_findings: Vec<SecurityFinding>,

    pub quality_score: f64,

    pub test_coverage: TestCoverage,

    pub architecture_compliant: bool,

    pub overall_score: f64,

    pub confidence: f64,

    pub preliminary_decision: PreliminaryDecision,

    #[serde(default)]
    pub findings: Vec<String>,

    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl IndependentAssessment {
    /// Structural checks beyond what serde enforces
    pub fn check_shape(&self) -> Result<(), String> {
        check_unit_interval("independent.quality_score", self.quality_score)?;
        check_unit_interval("independent.overall_score", self.overall_score)?;
        check_unit_interval("independent.confidence", self.confidence)?;
        for (name, score) in &self.test_coverage.quality_scores {
            check_unit_interval(&format!("independent.test_coverage.{}", name), *score)?;
        }
        Ok(())
    }

    /// Findings at critical or high severity
    pub fn blocking_findings(&self) -> impl Iterator<Item = &SecurityFinding> {
        self.security_findings
            .iter()
            .filter(|f| f.severity.requires_human())
    }
}

fn check_unit_interval(field: &str, value: f64) -> Result<(), String> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(format!("{} must be within [0, 1], got {}", field, value))
    }
}
