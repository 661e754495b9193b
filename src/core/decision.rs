//! Confidence-scored decisions.
//!
//! The engine never escalates by itself; callers compare the score against
//! the escalation threshold. [`DecisionService`] is that caller for
//! standalone workflow decisions.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::escalation::{EscalationError, EscalationQueue};
use crate::domain::{Decision, DecisionContext, NewEscalation};

/// Default threshold below which a decision goes to a human
pub const DEFAULT_ESCALATION_THRESHOLD: f64 = 0.75;

const COMPLETENESS_WEIGHT: f64 = 0.4;
const CONSISTENCY_WEIGHT: f64 = 0.3;
const HEURISTIC_WEIGHT: f64 = 0.3;

/// Score used for a factor there is no evidence for
const NO_EVIDENCE: f64 = 0.5;

/// A question to decide
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub question: String,

    #[serde(default)]
    pub context: DecisionContext,

    /// Allowed answers; empty means open-ended
    #[serde(default)]
    pub options: Vec<String>,

    /// Context keys that must be present for a complete picture
    #[serde(default)]
    pub required_context: Vec<String>,
}

impl DecisionRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_options(mut self, options: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn requiring(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.required_context = keys.into_iter().map(Into::into).collect();
        self
    }
}

/// What a heuristic contributes
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    /// Strength of this signal in [0, 1]
    pub score: f64,

    /// Value this heuristic favours, if any
    pub suggestion: Option<String>,

    pub note: String,
}

/// Domain-specific scoring plugin
pub trait Heuristic: Send + Sync {
    fn name(&self) -> &str;

    /// `None` when the heuristic has nothing to say about this request
    fn assess(&self, request: &DecisionRequest) -> Option<Signal>;
}

/// Reads a suggested answer from a context key
#[derive(Debug, Clone)]
pub struct ContextHint {
    key: String,
    score: f64,
}

impl ContextHint {
    pub fn new(key: impl Into<String>, score: f64) -> Self {
        Self {
            key: key.into(),
            score: score.clamp(0.0, 1.0),
        }
    }
}

impl Heuristic for ContextHint {
    fn name(&self) -> &str {
        &self.key
    }

    fn assess(&self, request: &DecisionRequest) -> Option<Signal> {
        let suggestion = request.context.get(&self.key)?.as_str()?.trim();
        if suggestion.is_empty() {
            return None;
        }
        Some(Signal {
            score: self.score,
            suggestion: Some(suggestion.to_string()),
            note: format!("context '{}' suggests '{}'", self.key, suggestion),
        })
    }
}

/// Produces scored decisions
pub struct DecisionEngine {
    heuristics: Vec<Box<dyn Heuristic>>,
    escalation_threshold: f64,
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::new(DEFAULT_ESCALATION_THRESHOLD)
    }
}

impl DecisionEngine {
    pub fn new(escalation_threshold: f64) -> Self {
        Self {
            heuristics: Vec::new(),
            escalation_threshold,
        }
    }

    pub fn with_heuristic(mut self, heuristic: impl Heuristic + 'static) -> Self {
        self.heuristics.push(Box::new(heuristic));
        self
    }

    pub fn escalation_threshold(&self) -> f64 {
        self.escalation_threshold
    }

    /// True when the caller should hand this decision to a human
    pub fn needs_escalation(&self, decision: &Decision) -> bool {
        decision.confidence() < self.escalation_threshold
    }

    /// Score a decision from context completeness, signal agreement and
    /// heuristic strength
    pub fn attempt_autonomous_decision(&self, request: &DecisionRequest) -> Decision {
        let (completeness, present) = completeness(request);

        let signals: Vec<(&str, Signal)> = self
            .heuristics
            .iter()
            .filter_map(|h| h.assess(request).map(|s| (h.name(), s)))
            .collect();

        let value = choose_value(request, &signals);
        let consistency = consistency(request, &signals, value.as_deref());
        let heuristic_score = if signals.is_empty() {
            NO_EVIDENCE
        } else {
            signals.iter().map(|(_, s)| s.score.clamp(0.0, 1.0)).sum::<f64>() / signals.len() as f64
        };

        let confidence = COMPLETENESS_WEIGHT * completeness
            + CONSISTENCY_WEIGHT * consistency
            + HEURISTIC_WEIGHT * heuristic_score;

        let mut reasoning = vec![
            format!(
                "completeness {:.2} ({}/{} required context present)",
                completeness,
                present,
                request.required_context.len()
            ),
            format!("consistency {:.2}", consistency),
            format!(
                "heuristics {:.2} ({} signal(s))",
                heuristic_score,
                signals.len()
            ),
        ];
        reasoning.extend(signals.iter().map(|(name, s)| format!("{}: {}", name, s.note)));
        if value.is_none() {
            reasoning.push("no candidate answer available".to_string());
        }

        Decision::autonomous(
            request.question.clone(),
            request.context.clone(),
            value.unwrap_or_default(),
            confidence,
            reasoning.join("; "),
        )
    }
}

fn is_present(value: Option<&serde_json::Value>) -> bool {
    match value {
        None | Some(serde_json::Value::Null) => false,
        Some(serde_json::Value::String(s)) => !s.trim().is_empty(),
        Some(serde_json::Value::Array(a)) => !a.is_empty(),
        Some(serde_json::Value::Object(o)) => !o.is_empty(),
        Some(_) => true,
    }
}

fn completeness(request: &DecisionRequest) -> (f64, usize) {
    if request.required_context.is_empty() {
        return (1.0, 0);
    }
    let present = request
        .required_context
        .iter()
        .filter(|key| is_present(request.context.get(key.as_str())))
        .count();
    (present as f64 / request.required_context.len() as f64, present)
}

/// Highest total signal weight wins; ties go to option order
fn choose_value(request: &DecisionRequest, signals: &[(&str, Signal)]) -> Option<String> {
    let mut tally: BTreeMap<&str, f64> = BTreeMap::new();
    for (_, signal) in signals {
        if let Some(suggestion) = &signal.suggestion {
            *tally.entry(suggestion.as_str()).or_default() += signal.score;
        }
    }

    let rank = |candidate: &str| {
        request
            .options
            .iter()
            .position(|o| o == candidate)
            .unwrap_or(usize::MAX)
    };

    let best = tally
        .iter()
        .max_by(|(a, wa), (b, wb)| {
            wa.partial_cmp(wb)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| rank(b).cmp(&rank(a)))
        })
        .map(|(candidate, _)| candidate.to_string());

    best.or_else(|| request.options.first().cloned())
}

fn consistency(request: &DecisionRequest, signals: &[(&str, Signal)], value: Option<&str>) -> f64 {
    let Some(value) = value else {
        return 0.0;
    };
    if !request.options.is_empty() && !request.options.iter().any(|o| o == value) {
        return 0.0;
    }

    let total: f64 = signals
        .iter()
        .filter(|(_, s)| s.suggestion.is_some())
        .map(|(_, s)| s.score)
        .sum();
    if total <= 0.0 {
        return NO_EVIDENCE;
    }
    let agreeing: f64 = signals
        .iter()
        .filter(|(_, s)| s.suggestion.as_deref() == Some(value))
        .map(|(_, s)| s.score)
        .sum();
    agreeing / total
}

/// Decides autonomously when confident, otherwise asks a human and waits
pub struct DecisionService {
    engine: DecisionEngine,
    queue: Arc<EscalationQueue>,
    wait_timeout: Option<Duration>,
}

impl DecisionService {
    pub fn new(engine: DecisionEngine, queue: Arc<EscalationQueue>) -> Self {
        Self {
            engine,
            queue,
            wait_timeout: None,
        }
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Returns the autonomous decision, or the human answer with confidence 1.0
    #[instrument(skip(self, request), fields(question = %request.question))]
    pub async fn decide(
        &self,
        workflow_id: &str,
        step_id: &str,
        request: &DecisionRequest,
    ) -> Result<Decision, EscalationError> {
        let decision = self.engine.attempt_autonomous_decision(request);

        if !self.engine.needs_escalation(&decision) {
            info!(confidence = decision.confidence(), value = decision.value(), "Decided autonomously");
            return Ok(decision);
        }

        info!(
            confidence = decision.confidence(),
            threshold = self.engine.escalation_threshold(),
            "Confidence below threshold, escalating"
        );

        let id = self
            .queue
            .add(NewEscalation {
                workflow_id: workflow_id.to_string(),
                step_id: step_id.to_string(),
                question: request.question.clone(),
                reasoning: decision.reasoning().to_string(),
                confidence: decision.confidence(),
                context: request.context.clone(),
            })
            .await?;

        let response = self.queue.wait_for_response(&id, self.wait_timeout).await?;

        Ok(Decision::from_human(
            request.question.clone(),
            request.context.clone(),
            response.answer,
            response.answered_at,
        ))
    }
}
