//! Arbitration output.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Final outcome of arbitration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictDecision {
    Pass,
    Fail,
    Escalate,
}

impl fmt::Display for VerdictDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => f.write_str("pass"),
            Self::Fail => f.write_str("fail"),
            Self::Escalate => f.write_str("escalate"),
        }
    }
}

/// Arbitration rules, declared in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbitrationRule {
    CriticalIssues,
    SecurityFindings,
    InsufficientCoverage,
    IndependentReviewFailed,
    LowConfidence,
    BothPassed,
}

impl ArbitrationRule {
    /// Decision this rule yields when it fires
    pub fn decision(&self) -> VerdictDecision {
        match self {
            Self::CriticalIssues | Self::InsufficientCoverage => VerdictDecision::Fail,
            Self::SecurityFindings | Self::IndependentReviewFailed | Self::LowConfidence => {
                VerdictDecision::Escalate
            }
            Self::BothPassed => VerdictDecision::Pass,
        }
    }

    /// Fixed rationale for this rule
    pub fn rationale(&self) -> &'static str {
        match self {
            Self::CriticalIssues => "critical issues identified",
            Self::SecurityFindings => "security issues require human review",
            Self::InsufficientCoverage => "test coverage below threshold",
            Self::IndependentReviewFailed => "independent review failed",
            Self::LowConfidence => "combined confidence below threshold",
            Self::BothPassed => "both reviews passed with sufficient confidence",
        }
    }
}

/// Decision plus the rationale of the rule that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub decision: VerdictDecision,
    pub rule: ArbitrationRule,
    pub rationale: String,

    /// Confidence the verdict was reached with (combined or self-only)
    pub confidence: f64,
}

impl Verdict {
    pub fn from_rule(rule: ArbitrationRule, confidence: f64) -> Self {
        Self {
            decision: rule.decision(),
            rule,
            rationale: rule.rationale().to_string(),
            confidence,
        }
    }

    pub fn is_pass(&self) -> bool {
        self.decision == VerdictDecision::Pass
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.decision, self.rationale)
    }
}
