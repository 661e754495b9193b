//! Scored decisions.
//!
//! A Decision is one judgment, made either autonomously or by a human.
//! It is immutable once created: fields are private and only readable.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Context attached to a decision (key -> arbitrary JSON)
pub type DecisionContext = BTreeMap<String, serde_json::Value>;

/// Who produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// Scored by the decision engine
    Autonomous,

    /// Answered through the escalation queue
    Human,
}

/// One scored judgment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    question: String,
    context: DecisionContext,
    value: String,
    confidence: f64,
    reasoning: String,
    source: DecisionSource,
    timestamp: DateTime<Utc>,
}

impl Decision {
    /// Create an autonomous decision. Confidence is clamped into [0, 1];
    /// a NaN confidence is treated as zero.
    pub fn autonomous(
        question: impl Into<String>,
        context: DecisionContext,
        value: impl Into<String>,
        confidence: f64,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            question: question.into(),
            context,
            value: value.into(),
            confidence: clamp_confidence(confidence),
            reasoning: reasoning.into(),
            source: DecisionSource::Autonomous,
            timestamp: Utc::now(),
        }
    }

    /// Create a decision from a human answer. Human answers always carry
    /// full confidence.
    pub fn from_human(
        question: impl Into<String>,
        context: DecisionContext,
        answer: impl Into<String>,
        answered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            question: question.into(),
            context,
            value: answer.into(),
            confidence: 1.0,
            reasoning: "answered by a human reviewer".to_string(),
            source: DecisionSource::Human,
            timestamp: answered_at,
        }
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn context(&self) -> &DecisionContext {
        &self.context
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn source(&self) -> DecisionSource {
        self.source
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// True when a human produced this decision
    pub fn is_human(&self) -> bool {
        self.source == DecisionSource::Human
    }
}

fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_is_clamped() {
        let high = Decision::autonomous("q", DecisionContext::new(), "a", 1.7, "r");
        let low = Decision::autonomous("q", DecisionContext::new(), "a", -0.2, "r");
        let nan = Decision::autonomous("q", DecisionContext::new(), "a", f64::NAN, "r");

        assert_eq!(high.confidence(), 1.0);
        assert_eq!(low.confidence(), 0.0);
        assert_eq!(nan.confidence(), 0.0);
    }

    #[test]
    fn test_human_decision_has_full_confidence() {
        let decision = Decision::from_human("Ship it?", DecisionContext::new(), "yes", Utc::now());

        assert_eq!(decision.confidence(), 1.0);
        assert!(decision.is_human());
        assert_eq!(decision.value(), "yes");
    }

    #[test]
    fn test_decision_serialization() {
        let mut context = DecisionContext::new();
        context.insert("story".to_string(), serde_json::json!({"title": "Login"}));
        let decision = Decision::autonomous("Which db?", context, "postgres", 0.8, "fits");

        let json = serde_json::to_string(&decision).unwrap();
        let parsed: Decision = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, decision);
        assert!(json.contains("\"source\":\"autonomous\""));
    }
}
