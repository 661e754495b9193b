//! Deterministic arbitration between a self assessment and an independent review.
//!
//! Rules are checked in priority order and the first match decides. The
//! verdict carries only that rule's rationale.

use tracing::debug;

use crate::domain::{
    ArbitrationRule, IndependentAssessment, PreliminaryDecision, SelfAssessment, Verdict,
};

/// Default combined-confidence threshold below which a pass is escalated
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.80;

/// Merge both reviews into a verdict.
///
/// 1. critical issues in the self assessment -> fail
/// 2. critical/high security findings -> escalate
/// 3. inadequate test coverage -> fail
/// 4. reviewer's preliminary decision is fail -> escalate
/// 5. mean confidence below `threshold` -> escalate
/// 6. otherwise -> pass
pub fn arbitrate(
    self_assessment: &SelfAssessment,
    independent: &IndependentAssessment,
    threshold: f64,
) -> Verdict {
    let combined = (self_assessment.confidence + independent.confidence) / 2.0;

    let rule = if !self_assessment.critical_issues.is_empty() {
        ArbitrationRule::CriticalIssues
    } else if independent.blocking_findings().next().is_some() {
        ArbitrationRule::SecurityFindings
    } else if !independent.test_coverage.adequate {
        ArbitrationRule::InsufficientCoverage
    } else if independent.preliminary_decision == PreliminaryDecision::Fail {
        ArbitrationRule::IndependentReviewFailed
    } else if !(combined >= threshold) {
        ArbitrationRule::LowConfidence
    } else {
        ArbitrationRule::BothPassed
    };

    debug!(?rule, combined, threshold, "Arbitration rule matched");
    Verdict::from_rule(rule, combined)
}

/// Verdict when no independent reviewer is configured
pub fn arbitrate_self_only(self_assessment: &SelfAssessment, threshold: f64) -> Verdict {
    let confidence = self_assessment.confidence;

    let rule = if !self_assessment.critical_issues.is_empty() {
        ArbitrationRule::CriticalIssues
    } else if !(confidence >= threshold) {
        ArbitrationRule::LowConfidence
    } else {
        ArbitrationRule::BothPassed
    };

    debug!(?rule, confidence, threshold, "Self-only arbitration rule matched");
    Verdict::from_rule(rule, confidence)
}
