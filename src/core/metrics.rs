//! Per-run stage timing and bottleneck detection.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::warn;

use crate::domain::Stage;

/// Duration budgets checked after a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Budgets {
    /// Soft deadline for the whole run
    #[serde(default)]
    pub soft_deadline: Option<Duration>,

    #[serde(default)]
    pub stages: BTreeMap<Stage, Duration>,
}

impl Budgets {
    pub fn with_soft_deadline(mut self, deadline: Duration) -> Self {
        self.soft_deadline = Some(deadline);
        self
    }

    pub fn with_stage_budget(mut self, stage: Stage, budget: Duration) -> Self {
        self.stages.insert(stage, budget);
        self
    }
}

/// A stage (or the whole run) that went over budget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bottleneck {
    /// Stage label, or `total` for the soft deadline
    pub label: String,
    pub elapsed_ms: u64,
    pub budget_ms: u64,
}

/// Timing summary of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineMetrics {
    pub stage_durations_ms: BTreeMap<Stage, u64>,
    pub total_ms: u64,
    pub invocation_attempts: u32,
    pub backoff_ms: u64,
    pub bottlenecks: Vec<Bottleneck>,
}

impl PipelineMetrics {
    pub fn stage_ms(&self, stage: Stage) -> Option<u64> {
        self.stage_durations_ms.get(&stage).copied()
    }

    pub fn bottleneck_labels(&self) -> Vec<&str> {
        self.bottlenecks.iter().map(|b| b.label.as_str()).collect()
    }
}

/// Accumulates stage timings while a run is in flight
#[derive(Debug)]
pub struct MetricsRecorder {
    started: Instant,
    current: Option<(Stage, Instant)>,
    stages: BTreeMap<Stage, Duration>,
    invocation_attempts: u32,
    backoff: Duration,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            current: None,
            stages: BTreeMap::new(),
            invocation_attempts: 0,
            backoff: Duration::ZERO,
        }
    }

    /// Start timing a stage, closing any stage still open
    pub fn start_stage(&mut self, stage: Stage) {
        self.end_stage();
        self.current = Some((stage, Instant::now()));
    }

    /// Close the open stage and return how long it ran
    pub fn end_stage(&mut self) -> Option<Duration> {
        let (stage, started) = self.current.take()?;
        let elapsed = started.elapsed();
        *self.stages.entry(stage).or_default() += elapsed;
        Some(elapsed)
    }

    pub fn current_stage(&self) -> Option<Stage> {
        self.current.map(|(stage, _)| stage)
    }

    pub fn record_attempts(&mut self, attempts: u32) {
        self.invocation_attempts += attempts;
    }

    pub fn record_backoff(&mut self, backoff: Duration) {
        self.backoff += backoff;
    }

    /// Close out the run and flag anything over budget
    pub fn finish(mut self, budgets: &Budgets) -> PipelineMetrics {
        self.end_stage();

        let stage_sum: Duration = self.stages.values().sum();
        let total = self.started.elapsed().max(stage_sum);

        let mut bottlenecks = Vec::new();
        for (stage, elapsed) in &self.stages {
            if let Some(budget) = budgets.stages.get(stage) {
                if elapsed > budget {
                    bottlenecks.push(bottleneck(stage.label(), *elapsed, *budget));
                }
            }
        }
        if let Some(deadline) = budgets.soft_deadline {
            if total > deadline {
                bottlenecks.push(bottleneck("total", total, deadline));
            }
        }

        PipelineMetrics {
            stage_durations_ms: self
                .stages
                .iter()
                .map(|(stage, d)| (*stage, millis(*d)))
                .collect(),
            total_ms: millis(total),
            invocation_attempts: self.invocation_attempts,
            backoff_ms: millis(self.backoff),
            bottlenecks,
        }
    }
}

fn bottleneck(label: &str, elapsed: Duration, budget: Duration) -> Bottleneck {
    warn!(
        label,
        elapsed_ms = millis(elapsed),
        budget_ms = millis(budget),
        "Bottleneck detected"
    );
    Bottleneck {
        label: label.to_string(),
        elapsed_ms: millis(elapsed),
        budget_ms: millis(budget),
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
