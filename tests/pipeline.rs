//! Pipeline Integration Tests
//!
//! End-to-end runs with scripted workers, an in-memory applier and
//! temporary audit/escalation storage.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;
use trustpipe::adapters::{
    ApplyReport, Capability, CapabilityError, CapabilityInput, FailedUnit, SideEffectApplier, Task,
};
use trustpipe::core::{
    EscalationQueue, EventStore, PipelineError, PipelineOrchestrator, PipelineSettings,
    RunRequest, SafetyLimits,
};
use trustpipe::domain::{
    ArbitrationRule, ArtifactUnit, DecisionSource, EventType, RunState, VerdictDecision,
};

/// Returns `output` after failing `failures` times with a transport error
struct ScriptedWorker {
    name: &'static str,
    output: Value,
    failures: u32,
    delay: Option<Duration>,
    calls: AtomicU32,
    tasks: Mutex<Vec<Task>>,
}

impl ScriptedWorker {
    fn new(name: &'static str, output: Value) -> Self {
        Self {
            name,
            output,
            failures: 0,
            delay: None,
            calls: AtomicU32::new(0),
            tasks: Mutex::new(Vec::new()),
        }
    }

    fn failing_first(mut self, failures: u32) -> Self {
        self.failures = failures;
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Capability for ScriptedWorker {
    fn name(&self) -> &str {
        self.name
    }

    async fn invoke(&self, input: &CapabilityInput) -> Result<Value, CapabilityError> {
        self.tasks.lock().unwrap().push(input.task);
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if call <= self.failures {
            return Err(CapabilityError::Transport("connection reset".to_string()));
        }
        Ok(self.output.clone())
    }
}

/// Records applied units; units listed in `fail` are reported as failed
#[derive(Default)]
struct RecordingApplier {
    fail: Vec<String>,
    applied: Mutex<Vec<String>>,
}

impl RecordingApplier {
    fn failing(paths: &[&str]) -> Self {
        Self {
            fail: paths.iter().map(|p| p.to_string()).collect(),
            applied: Mutex::new(Vec::new()),
        }
    }

    fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl SideEffectApplier for RecordingApplier {
    async fn apply(&self, units: &[ArtifactUnit]) -> ApplyReport {
        let mut report = ApplyReport::default();
        for unit in units {
            if self.fail.contains(&unit.path) {
                report.failed.push(FailedUnit {
                    unit: unit.path.clone(),
                    error: "disk full".to_string(),
                });
            } else {
                self.applied.lock().unwrap().push(unit.path.clone());
                report.succeeded.push(unit.path.clone());
            }
        }
        report
    }
}

fn production(confidence: f64) -> Value {
    json!({
        "artifact": {
            "kind": "docs",
            "units": [
                {"path": "README.md", "content": "# Usage\nRun it."},
                {"path": "docs/install.md", "content": "# Install\ncargo install"}
            ]
        },
        "self_assessment": {
            "checklist": [{"item": "examples compile", "passed": true}],
            "confidence": confidence,
            "critical_issues": []
        }
    })
}

fn review(confidence: f64, preliminary: &str) -> Value {
    json!({
        "security_findings": [],
        "quality_score": 0.9,
        "test_coverage": {"adequate": true},
        "architecture_compliant": true,
        "overall_score": 0.9,
        "confidence": confidence,
        "preliminary_decision": preliminary
    })
}

fn request() -> RunRequest {
    RunRequest::new(
        "wf-docs",
        "write-readme",
        json!({"story": {"title": "Document the CLI"}}),
    )
}

struct Harness {
    dir: TempDir,
    queue: Arc<EscalationQueue>,
}

impl Harness {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let queue = Arc::new(
            EscalationQueue::open(dir.path().join("escalations.jsonl"))
                .await
                .unwrap(),
        );
        Self { dir, queue }
    }

    fn orchestrator(
        &self,
        producer: Arc<ScriptedWorker>,
        applier: Arc<RecordingApplier>,
        settings: PipelineSettings,
    ) -> PipelineOrchestrator {
        PipelineOrchestrator::new(producer, applier, Arc::clone(&self.queue), settings)
            .with_runs_dir(self.dir.path().join("runs"))
    }

    /// Answer the first pending escalation once it shows up
    async fn answer_first(&self, answer: &str) -> String {
        loop {
            if let Some(record) = self.queue.list_pending().await.into_iter().next() {
                self.queue.resolve(&record.id, answer).await.unwrap();
                return record.id;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[tokio::test]
async fn test_missing_required_field_aborts_before_invocation() {
    let harness = Harness::new().await;
    let producer = Arc::new(ScriptedWorker::new("producer", production(0.95)));
    let applier = Arc::new(RecordingApplier::default());
    let settings = PipelineSettings {
        limits: SafetyLimits::default().requiring("story.title"),
        ..Default::default()
    };
    let orchestrator = harness.orchestrator(producer.clone(), applier.clone(), settings);

    let report = orchestrator
        .run(RunRequest::new("wf-docs", "write-readme", json!({"story": {}})))
        .await
        .unwrap();

    let error = report.error.as_ref().unwrap();
    assert_eq!(error.missing_field(), Some("story.title"));
    assert_eq!(report.metrics.invocation_attempts, 0);
    assert_eq!(producer.calls(), 0);
    assert!(applier.applied().is_empty());
    assert!(matches!(report.run.state, RunState::Aborted { .. }));
}

#[tokio::test]
async fn test_confident_run_applies_autonomously() {
    let harness = Harness::new().await;
    let producer = Arc::new(ScriptedWorker::new("producer", production(0.92)));
    let reviewer = Arc::new(ScriptedWorker::new("reviewer", review(0.9, "pass")));
    let applier = Arc::new(RecordingApplier::default());
    let orchestrator = harness
        .orchestrator(producer.clone(), applier.clone(), PipelineSettings::default())
        .with_reviewer(reviewer.clone());

    let report = orchestrator.run(request()).await.unwrap();

    assert!(report.is_success(), "unexpected error: {:?}", report.error);
    assert_eq!(report.verdict.as_ref().unwrap().decision, VerdictDecision::Pass);
    assert_eq!(report.decision.as_ref().unwrap().source(), DecisionSource::Autonomous);
    assert_eq!(applier.applied(), vec!["README.md", "docs/install.md"]);
    assert_eq!(reviewer.tasks.lock().unwrap().as_slice(), &[Task::Review]);
    assert_eq!(report.metrics.invocation_attempts, 2);
    assert!(report.escalation_id.is_none());
    assert_eq!(report.run.state, RunState::Completed);

    // The audit trail replays to the same run
    let store = EventStore::open_in(&harness.dir.path().join("runs"), report.run.id)
        .await
        .unwrap();
    let events = store.replay().await.unwrap();
    assert_eq!(events.first().unwrap().event_type, EventType::RunStarted);
    assert_eq!(events.last().unwrap().event_type, EventType::RunCompleted);
    assert!(events.iter().any(|e| e.event_type == EventType::VerdictReached));
    assert!(store.load_artifact("production").await.unwrap().is_some());
    assert!(store.load_artifact("independent").await.unwrap().is_some());

    let status = orchestrator.get_run_status(report.run.id).await.unwrap();
    assert_eq!(status.state, RunState::Completed);
}

#[tokio::test]
async fn test_low_confidence_escalates_and_human_approves() {
    let harness = Harness::new().await;
    let producer = Arc::new(ScriptedWorker::new("producer", production(0.7)));
    let reviewer = Arc::new(ScriptedWorker::new("reviewer", review(0.7, "pass")));
    let applier = Arc::new(RecordingApplier::default());
    let orchestrator = harness
        .orchestrator(producer, applier.clone(), PipelineSettings::default())
        .with_reviewer(reviewer);

    let (report, escalation_id) =
        tokio::join!(orchestrator.run(request()), harness.answer_first("yes"));
    let report = report.unwrap();

    assert!(report.is_success(), "unexpected error: {:?}", report.error);
    assert_eq!(report.verdict.as_ref().unwrap().rule, ArbitrationRule::LowConfidence);
    assert_eq!(report.escalation_id.as_deref(), Some(escalation_id.as_str()));

    let decision = report.decision.as_ref().unwrap();
    assert!(decision.is_human());
    assert_eq!(decision.value(), "yes");
    assert_eq!(decision.confidence(), 1.0);
    assert_eq!(applier.applied().len(), 2);

    let record = harness.queue.get(&escalation_id).await.unwrap();
    assert_eq!(record.context["rule"], "low_confidence");
    assert_eq!(record.context["story"]["title"], "Document the CLI");
}

#[tokio::test]
async fn test_human_rejection_aborts_without_applying() {
    let harness = Harness::new().await;
    let producer = Arc::new(ScriptedWorker::new("producer", production(0.95)));
    let reviewer = Arc::new(ScriptedWorker::new("reviewer", review(0.95, "fail")));
    let applier = Arc::new(RecordingApplier::default());
    let orchestrator = harness
        .orchestrator(producer, applier.clone(), PipelineSettings::default())
        .with_reviewer(reviewer);

    let (report, escalation_id) = tokio::join!(
        orchestrator.run(request().with_question("Ship the README?")),
        harness.answer_first("no, the install section is wrong")
    );
    let report = report.unwrap();

    match report.error.as_ref().unwrap() {
        PipelineError::HumanRejected {
            escalation_id: id,
            answer,
        } => {
            assert_eq!(id, &escalation_id);
            assert_eq!(answer, "no, the install section is wrong");
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(
        report.verdict.as_ref().unwrap().rule,
        ArbitrationRule::IndependentReviewFailed
    );
    assert_eq!(report.decision.as_ref().unwrap().question(), "Ship the README?");
    assert!(applier.applied().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_escalation_timeout_aborts_and_keeps_record() {
    let harness = Harness::new().await;
    let producer = Arc::new(ScriptedWorker::new("producer", production(0.5)));
    let applier = Arc::new(RecordingApplier::default());
    let settings = PipelineSettings {
        limits: SafetyLimits {
            escalation_timeout_seconds: Some(60),
            ..Default::default()
        },
        ..Default::default()
    };
    let orchestrator = harness.orchestrator(producer, applier.clone(), settings);

    let report = orchestrator.run(request()).await.unwrap();

    assert!(report.error.as_ref().unwrap().is_escalation_timeout());
    let id = report.escalation_id.unwrap();
    assert!(harness.queue.get(&id).await.unwrap().is_pending());
    assert!(applier.applied().is_empty());
}

#[tokio::test]
async fn test_arbitration_failure_is_terminal() {
    let harness = Harness::new().await;
    let mut output = production(0.95);
    output["self_assessment"]["critical_issues"] = json!(["panics on empty input"]);
    let producer = Arc::new(ScriptedWorker::new("producer", output));
    let applier = Arc::new(RecordingApplier::default());
    let orchestrator = harness.orchestrator(producer, applier.clone(), PipelineSettings::default());

    let report = orchestrator.run(request()).await.unwrap();

    assert!(matches!(
        report.error,
        Some(PipelineError::ArbitrationFailed { .. })
    ));
    assert!(harness.queue.list().await.is_empty());
    assert!(applier.applied().is_empty());
}

#[tokio::test]
async fn test_gate_rejection_skips_review() {
    let harness = Harness::new().await;
    let mut output = production(0.95);
    output["artifact"]["units"][1] = json!({"path": "config/.env", "content": "KEY=1"});
    let producer = Arc::new(ScriptedWorker::new("producer", output));
    let reviewer = Arc::new(ScriptedWorker::new("reviewer", review(0.95, "pass")));
    let applier = Arc::new(RecordingApplier::default());
    let orchestrator = harness
        .orchestrator(producer, applier.clone(), PipelineSettings::default())
        .with_reviewer(reviewer.clone());

    let report = orchestrator.run(request()).await.unwrap();

    match report.error.as_ref().unwrap() {
        PipelineError::GateRejected(rejected) => {
            assert_eq!(rejected.failing_categories(), vec!["security"]);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(report.reports.len(), 2);
    assert_eq!(reviewer.calls(), 0);
}

#[tokio::test]
async fn test_partial_apply_names_failed_units() {
    let harness = Harness::new().await;
    let producer = Arc::new(ScriptedWorker::new("producer", production(0.95)));
    let applier = Arc::new(RecordingApplier::failing(&["docs/install.md"]));
    let orchestrator = harness.orchestrator(producer, applier.clone(), PipelineSettings::default());

    let report = orchestrator.run(request()).await.unwrap();

    match report.error.as_ref().unwrap() {
        PipelineError::PartialApply { failed, succeeded } => {
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].unit, "docs/install.md");
            assert_eq!(succeeded, &vec!["README.md".to_string()]);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(applier.applied(), vec!["README.md"]);
    assert!(report
        .error
        .as_ref()
        .unwrap()
        .to_string()
        .contains("docs/install.md (disk full)"));
}

#[tokio::test(start_paused = true)]
async fn test_retries_are_counted_and_logged() {
    let harness = Harness::new().await;
    let producer = Arc::new(ScriptedWorker::new("producer", production(0.95)).failing_first(2));
    let applier = Arc::new(RecordingApplier::default());
    let orchestrator = harness.orchestrator(producer.clone(), applier, PipelineSettings::default());

    let report = orchestrator.run(request()).await.unwrap();

    assert!(report.is_success(), "unexpected error: {:?}", report.error);
    assert_eq!(producer.calls(), 3);
    assert_eq!(report.metrics.invocation_attempts, 3);
    assert_eq!(report.metrics.backoff_ms, 3000);

    let store = EventStore::open_in(&harness.dir.path().join("runs"), report.run.id)
        .await
        .unwrap();
    let retries = store
        .find_events(|e| e.event_type == EventType::InvocationRetrying)
        .await
        .unwrap();
    assert_eq!(retries.len(), 2);
}

#[tokio::test]
async fn test_leases_released_after_success_and_failure() {
    let harness = Harness::new().await;
    let applier = Arc::new(RecordingApplier::default());

    let ok = harness.orchestrator(
        Arc::new(ScriptedWorker::new("producer", production(0.95))),
        applier.clone(),
        PipelineSettings::default(),
    );
    assert!(ok.run(request()).await.unwrap().is_success());
    assert!(ok.registry().is_empty());

    let broken = harness.orchestrator(
        Arc::new(ScriptedWorker::new("producer", json!({"artifact": {"units": []}}))),
        applier,
        PipelineSettings::default(),
    );
    let report = broken.run(request()).await.unwrap();
    assert!(matches!(report.error, Some(PipelineError::Invocation(_))));
    assert!(broken.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_run_timeout_aborts_slow_worker() {
    let harness = Harness::new().await;
    let producer = Arc::new(
        ScriptedWorker::new("producer", production(0.95)).slow(Duration::from_secs(600)),
    );
    let applier = Arc::new(RecordingApplier::default());
    let settings = PipelineSettings {
        limits: SafetyLimits {
            run_timeout_seconds: 5,
            ..Default::default()
        },
        ..Default::default()
    };
    let orchestrator = harness.orchestrator(producer, applier.clone(), settings);

    let report = orchestrator.run(request()).await.unwrap();

    assert!(matches!(
        report.error,
        Some(PipelineError::RunTimeout(t)) if t == Duration::from_secs(5)
    ));
    assert!(orchestrator.registry().is_empty());
    assert!(applier.applied().is_empty());
    assert!(matches!(report.run.state, RunState::Aborted { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_run_timeout_during_backoff_keeps_retry_events() {
    let harness = Harness::new().await;
    let producer = Arc::new(ScriptedWorker::new("producer", production(0.95)).failing_first(u32::MAX));
    let applier = Arc::new(RecordingApplier::default());
    let settings = PipelineSettings {
        limits: SafetyLimits {
            run_timeout_seconds: 2,
            ..Default::default()
        },
        ..Default::default()
    };
    let orchestrator = harness.orchestrator(producer.clone(), applier, settings);

    // Attempts fail at 0s and 1s; the run times out inside the second backoff
    let report = orchestrator.run(request()).await.unwrap();

    assert!(matches!(report.error, Some(PipelineError::RunTimeout(_))));
    assert_eq!(producer.calls(), 2);

    let store = EventStore::open_in(&harness.dir.path().join("runs"), report.run.id)
        .await
        .unwrap();
    let retries = store
        .find_events(|e| e.event_type == EventType::InvocationRetrying)
        .await
        .unwrap();
    assert_eq!(retries.len(), 2);
    let failed = store
        .find_events(|e| e.event_type == EventType::StageFailed)
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
}

#[tokio::test]
async fn test_concurrent_runs_of_same_step_both_complete() {
    let harness = Harness::new().await;
    let producer = Arc::new(
        ScriptedWorker::new("producer", production(0.95)).slow(Duration::from_millis(300)),
    );
    let applier = Arc::new(RecordingApplier::default());
    let orchestrator = harness.orchestrator(producer.clone(), applier, PipelineSettings::default());

    let (first, second) = tokio::join!(orchestrator.run(request()), orchestrator.run(request()));
    let (first, second) = (first.unwrap(), second.unwrap());

    assert!(first.is_success(), "unexpected error: {:?}", first.error);
    assert!(second.is_success(), "unexpected error: {:?}", second.error);
    assert_ne!(first.run.id, second.run.id);
    assert_eq!(producer.calls(), 2);
    assert!(orchestrator.registry().is_empty());
}
