//! Main orchestrator for trust pipeline runs.
//!
//! Drives one artifact through validating-context -> invoking -> gating ->
//! (reviewing) -> arbitrating -> (escalating) -> applying, recording every
//! stage in the run's audit log and timing it for bottleneck detection.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{
    ApplyReport, Capability, CapabilityInput, SideEffectApplier, Task,
};
use crate::domain::{
    Decision, DecisionContext, Event, EventType, IndependentAssessment, NewEscalation,
    Production, Run, Stage, StageStatus, Verdict, VerdictDecision,
};

use super::arbitration::{arbitrate, arbitrate_self_only, DEFAULT_CONFIDENCE_THRESHOLD};
use super::error::PipelineError;
use super::escalation::{EscalationError, EscalationQueue};
use super::event_store::{generate_idempotency_key, hash_input, EventStore};
use super::gate::{GateRejected, ValidationGate, ValidationReport};
use super::metrics::{Budgets, MetricsRecorder, PipelineMetrics};
use super::registry::{RegistryError, WorkerLease, WorkerRegistry};
use super::retry::{AttemptFailure, InvocationError, OutputShape, RetryPolicy, RetryingInvoker};
use super::safety::{SafetyLimits, SafetyViolation};
use super::validators::{DenylistedPaths, NonEmptyArtifact};

/// Read-mostly settings shared by every run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub limits: SafetyLimits,

    /// Combined confidence needed for a pass
    #[serde(default = "default_threshold")]
    pub arbitration_threshold: f64,

    #[serde(default)]
    pub budgets: Budgets,
}

fn default_threshold() -> f64 {
    DEFAULT_CONFIDENCE_THRESHOLD
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            limits: SafetyLimits::default(),
            arbitration_threshold: default_threshold(),
            budgets: Budgets::default(),
        }
    }
}

/// One artifact to push through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub workflow_id: String,
    pub step_id: String,
    pub context: serde_json::Value,

    /// Question shown to a human if the run escalates
    #[serde(default)]
    pub question: Option<String>,
}

impl RunRequest {
    pub fn new(
        workflow_id: impl Into<String>,
        step_id: impl Into<String>,
        context: serde_json::Value,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            step_id: step_id.into(),
            context,
            question: None,
        }
    }

    pub fn with_question(mut self, question: impl Into<String>) -> Self {
        self.question = Some(question.into());
        self
    }

    fn escalation_question(&self) -> String {
        self.question.clone().unwrap_or_else(|| {
            format!(
                "Accept the artifact produced for {}/{}?",
                self.workflow_id, self.step_id
            )
        })
    }
}

/// How a human answer maps onto the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HumanAnswer {
    Approve,
    Reject(String),
}

impl HumanAnswer {
    const APPROVALS: [&'static str; 6] = ["yes", "y", "approve", "approved", "accept", "pass"];

    pub fn parse(answer: &str) -> Self {
        let normalized = answer.trim().to_lowercase();
        if Self::APPROVALS.contains(&normalized.as_str()) {
            Self::Approve
        } else {
            Self::Reject(answer.trim().to_string())
        }
    }
}

/// Everything a run produced, including why it stopped
#[derive(Debug)]
pub struct RunReport {
    pub run: Run,
    pub metrics: PipelineMetrics,
    pub warnings: Vec<String>,
    pub reports: Vec<ValidationReport>,
    pub production: Option<Production>,
    pub independent: Option<IndependentAssessment>,
    pub verdict: Option<Verdict>,
    pub escalation_id: Option<String>,
    pub decision: Option<Decision>,
    pub applied: Option<ApplyReport>,
    pub error: Option<PipelineError>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Why `drive` stopped early
enum Halt {
    /// The run is aborted; recorded in the report
    Abort(PipelineError),

    /// The audit trail itself failed
    Audit(anyhow::Error),
}

impl From<anyhow::Error> for Halt {
    fn from(e: anyhow::Error) -> Self {
        Self::Audit(e)
    }
}

impl From<PipelineError> for Halt {
    fn from(e: PipelineError) -> Self {
        Self::Abort(e)
    }
}

macro_rules! abort_from {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Halt {
            fn from(e: $ty) -> Self {
                Self::Abort(e.into())
            }
        })*
    };
}

abort_from!(SafetyViolation, InvocationError, GateRejected, EscalationError, RegistryError);

/// Mutable state of one in-flight run
struct RunContext {
    store: EventStore,
    run: Run,
    input_digest: String,
    metrics: MetricsRecorder,
    retries: Vec<AttemptFailure>,
    warnings: Vec<String>,
    reports: Vec<ValidationReport>,
    production: Option<Production>,
    independent: Option<IndependentAssessment>,
    verdict: Option<Verdict>,
    escalation_id: Option<String>,
    decision: Option<Decision>,
    applied: Option<ApplyReport>,
}

impl RunContext {
    fn stage_event(
        &self,
        stage: Stage,
        event_type: EventType,
        summary: String,
        status: StageStatus,
    ) -> Event {
        Event::new(
            self.run.id,
            Some(stage),
            event_type,
            generate_idempotency_key(self.run.id, stage, &self.input_digest),
            summary,
            status,
        )
    }

    fn run_event(&self, event_type: EventType, suffix: &str, summary: String, status: StageStatus) -> Event {
        Event::new(
            self.run.id,
            None,
            event_type,
            format!("{}:{}", self.run.id, suffix),
            summary,
            status,
        )
    }

    /// Append to the audit log and fold into run state
    async fn record(&mut self, event: Event) -> Result<()> {
        self.store.append(&event).await?;
        self.run.apply_event(&event);
        Ok(())
    }

    async fn begin(&mut self, stage: Stage) -> Result<()> {
        self.metrics.start_stage(stage);
        let event = self.stage_event(
            stage,
            EventType::StageStarted,
            format!("Stage '{}' started", stage),
            StageStatus::Running,
        );
        self.record(event).await
    }

    async fn complete(&mut self, stage: Stage) -> Result<()> {
        let elapsed = self.metrics.end_stage().unwrap_or_default();
        let duration_ms = elapsed.as_millis() as u64;
        let event = self
            .stage_event(
                stage,
                EventType::StageCompleted,
                format!("Stage '{}' completed in {}ms", stage, duration_ms),
                StageStatus::Completed,
            )
            .with_duration(duration_ms);
        self.record(event).await
    }

    /// Mark whatever stage was in flight as failed
    async fn fail_open_stage(&mut self, error: &str) -> Result<()> {
        let Some(stage) = self.metrics.current_stage() else {
            return Ok(());
        };
        let duration_ms = self.metrics.end_stage().unwrap_or_default().as_millis() as u64;
        let event = self
            .stage_event(
                stage,
                EventType::StageFailed,
                format!("Stage '{}' failed after {}ms", stage, duration_ms),
                StageStatus::Failed,
            )
            .with_duration(duration_ms)
            .with_error(error.to_string());
        self.record(event).await
    }

    /// Log retried attempts collected during the last invocation
    async fn flush_retries(&mut self, stage: Stage) -> Result<()> {
        for failure in std::mem::take(&mut self.retries) {
            let event = Event::new(
                self.run.id,
                Some(stage),
                EventType::InvocationRetrying,
                format!(
                    "{}:retry:{}",
                    generate_idempotency_key(self.run.id, stage, &self.input_digest),
                    failure.attempt
                ),
                format!(
                    "Attempt {} failed, retrying in {}ms",
                    failure.attempt, failure.delay_ms
                ),
                StageStatus::Running,
            )
            .with_error(failure.error.clone())
            .with_data(&failure);
            self.record(event).await?;
        }
        Ok(())
    }
}

/// Runs artifacts through the trust pipeline
pub struct PipelineOrchestrator {
    producer: Arc<dyn Capability>,
    reviewer: Option<Arc<dyn Capability>>,
    applier: Arc<dyn SideEffectApplier>,
    escalations: Arc<EscalationQueue>,
    gate: ValidationGate,
    invoker: RetryingInvoker,
    registry: WorkerRegistry,
    settings: PipelineSettings,
    runs_dir: Option<PathBuf>,
}

impl PipelineOrchestrator {
    /// Create an orchestrator with a strict default gate and no reviewer
    pub fn new(
        producer: Arc<dyn Capability>,
        applier: Arc<dyn SideEffectApplier>,
        escalations: Arc<EscalationQueue>,
        settings: PipelineSettings,
    ) -> Self {
        let gate = ValidationGate::strict()
            .with_validator(NonEmptyArtifact)
            .with_validator(DenylistedPaths::default());

        Self {
            producer,
            reviewer: None,
            applier,
            escalations,
            gate,
            invoker: RetryingInvoker::new(settings.retry.clone()),
            registry: WorkerRegistry::new(),
            settings,
            runs_dir: None,
        }
    }

    /// Obtain an independent assessment for every artifact
    pub fn with_reviewer(mut self, reviewer: Arc<dyn Capability>) -> Self {
        self.reviewer = Some(reviewer);
        self
    }

    pub fn with_gate(mut self, gate: ValidationGate) -> Self {
        self.gate = gate;
        self
    }

    /// Write audit logs under `dir` instead of the configured runs dir
    pub fn with_runs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runs_dir = Some(dir.into());
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn escalations(&self) -> &Arc<EscalationQueue> {
        &self.escalations
    }

    /// Run one artifact through the pipeline.
    ///
    /// Pipeline outcomes, including aborts, are in the returned report.
    /// `Err` means the audit trail could not be written.
    #[instrument(skip(self, request), fields(workflow_id = %request.workflow_id, step_id = %request.step_id))]
    pub async fn run(&self, request: RunRequest) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        info!(%run_id, "Starting trust pipeline run");

        let store = match &self.runs_dir {
            Some(dir) => EventStore::open_in(dir, run_id).await?,
            None => EventStore::open(run_id).await?,
        };

        let mut ctx = RunContext {
            store,
            run: Run::new(run_id, request.workflow_id.clone(), request.step_id.clone()),
            input_digest: hash_input(&request.context.to_string()),
            metrics: MetricsRecorder::new(),
            retries: Vec::new(),
            warnings: Vec::new(),
            reports: Vec::new(),
            production: None,
            independent: None,
            verdict: None,
            escalation_id: None,
            decision: None,
            applied: None,
        };

        let start_event = ctx
            .run_event(
                EventType::RunStarted,
                "start",
                format!("Run for {}/{} started", request.workflow_id, request.step_id),
                StageStatus::Running,
            )
            .with_data(&serde_json::json!({
                "workflow_id": request.workflow_id,
                "step_id": request.step_id,
            }));
        ctx.record(start_event).await?;

        let run_timeout = self.settings.limits.run_timeout();
        let error = match tokio::time::timeout(run_timeout, self.drive(&mut ctx, &request)).await {
            Ok(Ok(())) => None,
            Ok(Err(Halt::Abort(e))) => Some(e),
            Ok(Err(Halt::Audit(e))) => return Err(e),
            Err(_) => {
                error!(%run_id, timeout = ?run_timeout, "Run timed out");
                if let Some(stage) = ctx.metrics.current_stage() {
                    ctx.flush_retries(stage).await?;
                }
                Some(PipelineError::RunTimeout(run_timeout))
            }
        };

        if let Some(e) = &error {
            ctx.fail_open_stage(&e.to_string()).await?;
        }

        self.finish(ctx, error).await
    }

    /// Execute the stages in order
    async fn drive(&self, ctx: &mut RunContext, request: &RunRequest) -> Result<(), Halt> {
        self.validate_context(ctx, request).await?;

        let production = self.produce(ctx, request).await?;
        self.gate_artifact(ctx, request, &production).await?;

        let independent = match &self.reviewer {
            Some(reviewer) => Some(self.review(ctx, request, reviewer.as_ref(), &production).await?),
            None => None,
        };

        let verdict = self.arbitrate(ctx, &production, independent.as_ref()).await?;
        match verdict.decision {
            VerdictDecision::Fail => {
                return Err(PipelineError::ArbitrationFailed { verdict }.into());
            }
            VerdictDecision::Pass => {
                let decision = Decision::autonomous(
                    request.escalation_question(),
                    context_map(&request.context),
                    "pass",
                    verdict.confidence,
                    verdict.rationale.clone(),
                );
                self.record_decision(ctx, Stage::Arbitrating, decision).await?;
            }
            VerdictDecision::Escalate => {
                self.escalate(ctx, request, &verdict).await?;
            }
        }

        self.apply(ctx, &production).await
    }

    async fn validate_context(&self, ctx: &mut RunContext, request: &RunRequest) -> Result<(), Halt> {
        ctx.begin(Stage::ValidatingContext).await?;

        let warnings = self.settings.limits.check_context(&request.context)?;
        for warning in warnings {
            warn!(%warning, "Input warning");
            let event = ctx
                .stage_event(
                    Stage::ValidatingContext,
                    EventType::InputWarning,
                    warning.to_string(),
                    StageStatus::Running,
                )
                .with_data(&warning);
            ctx.record(event).await?;
            ctx.warnings.push(warning.to_string());
        }

        ctx.complete(Stage::ValidatingContext).await?;
        Ok(())
    }

    async fn produce(&self, ctx: &mut RunContext, request: &RunRequest) -> Result<Production, Halt> {
        ctx.begin(Stage::Invoking).await?;
        let _lease = self.lease(ctx, request, self.producer.as_ref())?;

        let input = CapabilityInput {
            task: Task::Produce,
            workflow_id: request.workflow_id.clone(),
            step_id: request.step_id.clone(),
            context: request.context.clone(),
            artifact: None,
        };
        let production: Production = self
            .invoke(ctx, Stage::Invoking, self.producer.as_ref(), &input)
            .await?;

        ctx.store.store_artifact("production", &production).await?;
        ctx.production = Some(production.clone());
        ctx.complete(Stage::Invoking).await?;
        Ok(production)
    }

    async fn gate_artifact(
        &self,
        ctx: &mut RunContext,
        request: &RunRequest,
        production: &Production,
    ) -> Result<(), Halt> {
        ctx.begin(Stage::Gating).await?;

        let result = self.gate.run(&production.artifact, &request.context);
        let (reports, warnings, passed) = match &result {
            Ok(outcome) => (outcome.reports.clone(), outcome.warnings.clone(), outcome.passed),
            Err(rejected) => (rejected.reports.clone(), rejected.warnings(), false),
        };

        let event = ctx
            .stage_event(
                Stage::Gating,
                EventType::ValidationReported,
                format!(
                    "{} validators, {} failed",
                    reports.len(),
                    reports.iter().filter(|r| !r.passed()).count()
                ),
                if passed { StageStatus::Completed } else { StageStatus::Failed },
            )
            .with_data(&reports);
        ctx.record(event).await?;
        ctx.reports = reports;
        ctx.warnings.extend(warnings);

        result?;
        ctx.complete(Stage::Gating).await?;
        Ok(())
    }

    async fn review(
        &self,
        ctx: &mut RunContext,
        request: &RunRequest,
        reviewer: &dyn Capability,
        production: &Production,
    ) -> Result<IndependentAssessment, Halt> {
        ctx.begin(Stage::Reviewing).await?;
        let _lease = self.lease(ctx, request, reviewer)?;

        let input = CapabilityInput {
            task: Task::Review,
            workflow_id: request.workflow_id.clone(),
            step_id: request.step_id.clone(),
            context: request.context.clone(),
            artifact: Some(production.artifact.clone()),
        };
        let independent: IndependentAssessment =
            self.invoke(ctx, Stage::Reviewing, reviewer, &input).await?;

        ctx.store.store_artifact("independent", &independent).await?;
        ctx.independent = Some(independent.clone());
        ctx.complete(Stage::Reviewing).await?;
        Ok(independent)
    }

    async fn arbitrate(
        &self,
        ctx: &mut RunContext,
        production: &Production,
        independent: Option<&IndependentAssessment>,
    ) -> Result<Verdict, Halt> {
        ctx.begin(Stage::Arbitrating).await?;

        let threshold = self.settings.arbitration_threshold;
        let verdict = match independent {
            Some(independent) => arbitrate(&production.self_assessment, independent, threshold),
            None => arbitrate_self_only(&production.self_assessment, threshold),
        };
        info!(decision = %verdict.decision, rationale = %verdict.rationale, "Verdict reached");

        let event = ctx
            .stage_event(
                Stage::Arbitrating,
                EventType::VerdictReached,
                verdict.to_string(),
                StageStatus::Completed,
            )
            .with_data(&verdict);
        ctx.record(event).await?;
        ctx.verdict = Some(verdict.clone());

        ctx.complete(Stage::Arbitrating).await?;
        Ok(verdict)
    }

    async fn escalate(
        &self,
        ctx: &mut RunContext,
        request: &RunRequest,
        verdict: &Verdict,
    ) -> Result<(), Halt> {
        ctx.begin(Stage::Escalating).await?;

        let question = request.escalation_question();
        let mut context = context_map(&request.context);
        context.insert("run_id".to_string(), serde_json::json!(ctx.run.id));
        context.insert("rule".to_string(), serde_json::json!(verdict.rule));

        let escalation_id = self
            .escalations
            .add(NewEscalation {
                workflow_id: request.workflow_id.clone(),
                step_id: request.step_id.clone(),
                question: question.clone(),
                reasoning: verdict.rationale.clone(),
                confidence: verdict.confidence,
                context: context.clone(),
            })
            .await?;
        ctx.escalation_id = Some(escalation_id.clone());

        let event = ctx
            .stage_event(
                Stage::Escalating,
                EventType::EscalationRaised,
                format!("Escalation {} raised: {}", escalation_id, verdict.rationale),
                StageStatus::Running,
            )
            .with_data(&serde_json::json!({ "escalation_id": escalation_id }));
        ctx.record(event).await?;

        let response = self
            .escalations
            .wait_for_response(&escalation_id, self.settings.limits.escalation_timeout())
            .await?;

        let event = ctx
            .stage_event(
                Stage::Escalating,
                EventType::EscalationAnswered,
                format!("Escalation {} answered: {}", escalation_id, response.answer),
                StageStatus::Running,
            )
            .with_data(&response);
        ctx.record(event).await?;

        let decision = Decision::from_human(question, context, &response.answer, response.answered_at);
        self.record_decision(ctx, Stage::Escalating, decision).await?;

        if let HumanAnswer::Reject(answer) = HumanAnswer::parse(&response.answer) {
            return Err(PipelineError::HumanRejected {
                escalation_id,
                answer,
            }
            .into());
        }

        ctx.complete(Stage::Escalating).await?;
        Ok(())
    }

    async fn apply(&self, ctx: &mut RunContext, production: &Production) -> Result<(), Halt> {
        ctx.begin(Stage::Applying).await?;

        let report = self.applier.apply(&production.artifact.units).await;
        let event = ctx
            .stage_event(
                Stage::Applying,
                EventType::EffectsApplied,
                format!(
                    "{} units applied, {} failed",
                    report.succeeded.len(),
                    report.failed.len()
                ),
                if report.is_complete() { StageStatus::Completed } else { StageStatus::Failed },
            )
            .with_data(&report);
        ctx.record(event).await?;
        ctx.applied = Some(report.clone());

        if !report.is_complete() {
            return Err(PipelineError::PartialApply {
                failed: report.failed,
                succeeded: report.succeeded,
            }
            .into());
        }

        ctx.complete(Stage::Applying).await?;
        Ok(())
    }

    /// Invoke a capability, counting every attempt in the run metrics
    async fn invoke<T: OutputShape>(
        &self,
        ctx: &mut RunContext,
        stage: Stage,
        capability: &dyn Capability,
        input: &CapabilityInput,
    ) -> Result<T, Halt> {
        let metrics = &mut ctx.metrics;
        let retries = &mut ctx.retries;

        let result = self
            .invoker
            .invoke_observed::<T, _>(capability, input, |failure| {
                metrics.record_attempts(1);
                metrics.record_backoff(Duration::from_millis(failure.delay_ms));
                retries.push(failure.clone());
            })
            .await;

        // The final attempt, successful or not
        ctx.metrics.record_attempts(1);
        ctx.flush_retries(stage).await?;

        Ok(result?.output)
    }

    async fn record_decision(&self, ctx: &mut RunContext, stage: Stage, decision: Decision) -> Result<()> {
        let event = ctx
            .stage_event(
                stage,
                EventType::DecisionRecorded,
                format!(
                    "Decision '{}' at confidence {:.2}",
                    decision.value(),
                    decision.confidence()
                ),
                StageStatus::Running,
            )
            .with_data(&decision);
        ctx.record(event).await?;
        ctx.decision = Some(decision);
        Ok(())
    }

    fn lease(
        &self,
        ctx: &RunContext,
        request: &RunRequest,
        capability: &dyn Capability,
    ) -> Result<WorkerLease, RegistryError> {
        // One session per run and capability
        let name = format!(
            "{}/{}/{}/{}",
            ctx.run.id,
            request.workflow_id,
            request.step_id,
            capability.name()
        );
        self.registry.acquire(name, ctx.run.id)
    }

    /// Close out metrics and write the terminal run event
    async fn finish(&self, ctx: RunContext, error: Option<PipelineError>) -> Result<RunReport> {
        let RunContext {
            store,
            mut run,
            metrics,
            warnings,
            reports,
            production,
            independent,
            verdict,
            escalation_id,
            decision,
            applied,
            ..
        } = ctx;

        let metrics = metrics.finish(&self.settings.budgets);
        let run_id = run.id;

        for bottleneck in &metrics.bottlenecks {
            let event = Event::new(
                run_id,
                None,
                EventType::BottleneckDetected,
                format!("{}:bottleneck:{}", run_id, bottleneck.label),
                format!(
                    "{} took {}ms (budget {}ms)",
                    bottleneck.label, bottleneck.elapsed_ms, bottleneck.budget_ms
                ),
                StageStatus::Completed,
            )
            .with_data(bottleneck);
            store.append(&event).await?;
            run.apply_event(&event);
        }

        let final_event = match &error {
            None => {
                info!(%run_id, total_ms = metrics.total_ms, "Run completed successfully");
                Event::new(
                    run_id,
                    None,
                    EventType::RunCompleted,
                    format!("{}:complete", run_id),
                    format!("Run completed in {}ms", metrics.total_ms),
                    StageStatus::Completed,
                )
            }
            Some(e) => {
                error!(%run_id, error = %e, "Run aborted");
                Event::new(
                    run_id,
                    None,
                    EventType::RunAborted,
                    format!("{}:complete", run_id),
                    format!("Run aborted: {}", e),
                    StageStatus::Failed,
                )
                .with_error(e.to_string())
            }
        }
        .with_data(&metrics);

        store
            .append(&final_event)
            .await
            .context("Failed to record run outcome")?;
        run.apply_event(&final_event);

        Ok(RunReport {
            run,
            metrics,
            warnings,
            reports,
            production,
            independent,
            verdict,
            escalation_id,
            decision,
            applied,
            error,
        })
    }

    /// Get status of a run by ID
    pub async fn get_run_status(&self, run_id: Uuid) -> Result<Run> {
        let store = match &self.runs_dir {
            Some(dir) => EventStore::open_in(dir, run_id).await?,
            None => EventStore::open(run_id).await?,
        };
        store
            .load_run()
            .await?
            .with_context(|| format!("Run {} not found", run_id))
    }
}

/// Flatten an object context into decision context entries
fn context_map(context: &serde_json::Value) -> DecisionContext {
    match context {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        serde_json::Value::Null => DecisionContext::new(),
        other => DecisionContext::from([("input".to_string(), other.clone())]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_answer_parsing() {
        assert_eq!(HumanAnswer::parse("yes"), HumanAnswer::Approve);
        assert_eq!(HumanAnswer::parse("  Approved "), HumanAnswer::Approve);
        assert_eq!(HumanAnswer::parse("Y"), HumanAnswer::Approve);
        assert_eq!(
            HumanAnswer::parse("no, rewrite section 2"),
            HumanAnswer::Reject("no, rewrite section 2".to_string())
        );
        assert_eq!(HumanAnswer::parse(""), HumanAnswer::Reject(String::new()));
    }

    #[test]
    fn test_default_question_names_the_step() {
        let request = RunRequest::new("wf-9", "write-docs", serde_json::json!({}));
        assert_eq!(
            request.escalation_question(),
            "Accept the artifact produced for wf-9/write-docs?"
        );
        assert_eq!(
            request.with_question("Ship it?").escalation_question(),
            "Ship it?"
        );
    }

    #[test]
    fn test_context_map_wraps_non_objects() {
        let map = context_map(&serde_json::json!({"story": {"title": "t"}}));
        assert!(map.contains_key("story"));

        let wrapped = context_map(&serde_json::json!("plain text"));
        assert_eq!(wrapped["input"], "plain text");
    }

    #[test]
    fn test_settings_defaults() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.arbitration_threshold, 0.80);
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.limits.run_timeout_seconds, 1800);
    }
}
