//! Command-line interface for trustpipe.
//!
//! Provides commands for running artifacts through the trust pipeline,
//! answering escalations, arbitrating stored reviews and inspecting runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::adapters::{CommandCapability, FsApplier};
use crate::config;
use crate::core::{
    arbitrate, ContextHint, DecisionEngine, DecisionRequest, DecisionService, EscalationQueue,
    EventStore, PipelineOrchestrator, RunReport, RunRequest,
};
use crate::domain::{IndependentAssessment, Run, RunState, SelfAssessment};

pub mod escalations;

/// How often a waiting run re-reads the escalation log for answers
const ESCALATION_POLL: Duration = Duration::from_secs(2);

/// trustpipe - Trust pipeline for generative workers
#[derive(Parser, Debug)]
#[command(name = "trustpipe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Produce, gate, review and apply one artifact
    Run {
        /// Producer worker command (receives JSON on stdin, prints JSON)
        #[arg(long)]
        producer: String,

        /// Independent reviewer worker command
        #[arg(long)]
        reviewer: Option<String>,

        /// JSON file with the run context
        #[arg(short, long)]
        context: PathBuf,

        /// Workflow ID
        #[arg(long)]
        workflow: String,

        /// Step ID within the workflow
        #[arg(long)]
        step: String,

        /// Directory accepted artifact units are written to
        #[arg(short, long)]
        out: PathBuf,

        /// Question shown to a human if the run escalates
        #[arg(long)]
        question: Option<String>,

        /// Per-invocation worker timeout in seconds
        #[arg(long, default_value = "300")]
        worker_timeout: u64,
    },

    /// Manage escalations awaiting a human
    Escalations {
        #[command(subcommand)]
        command: escalations::EscalationCommands,
    },

    /// Decide a standalone question, escalating when confidence is low
    Decide {
        /// JSON file with the decision request (question, context, options)
        request: PathBuf,

        /// Workflow ID recorded on any escalation
        #[arg(long, default_value = "adhoc")]
        workflow: String,

        /// Step ID recorded on any escalation
        #[arg(long, default_value = "decide")]
        step: String,

        /// Context keys whose string value suggests an answer
        #[arg(long = "hint")]
        hints: Vec<String>,

        /// Seconds to wait for a human before giving up
        #[arg(long)]
        wait: Option<u64>,
    },

    /// Arbitrate a stored self assessment against an independent review
    Arbitrate {
        /// Self assessment JSON file
        #[arg(long)]
        self_assessment: PathBuf,

        /// Independent assessment JSON file
        #[arg(long)]
        independent: PathBuf,

        /// Combined confidence threshold (defaults to config)
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Check the status of a run
    Status {
        /// Run ID (UUID)
        run_id: String,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                producer,
                reviewer,
                context,
                workflow,
                step,
                out,
                question,
                worker_timeout,
            } => {
                let options = RunOptions {
                    producer,
                    reviewer,
                    context,
                    workflow,
                    step,
                    out,
                    question,
                    worker_timeout: Duration::from_secs(worker_timeout),
                };
                run_artifact(options).await
            }
            Commands::Escalations { command } => escalations::execute(command).await,
            Commands::Decide {
                request,
                workflow,
                step,
                hints,
                wait,
            } => decide(&request, &workflow, &step, hints, wait).await,
            Commands::Arbitrate {
                self_assessment,
                independent,
                threshold,
            } => arbitrate_files(&self_assessment, &independent, threshold),
            Commands::Status { run_id } => show_status(&run_id).await,
            Commands::Runs { limit } => list_runs(limit).await,
            Commands::Config => show_config(),
        }
    }
}

struct RunOptions {
    producer: String,
    reviewer: Option<String>,
    context: PathBuf,
    workflow: String,
    step: String,
    out: PathBuf,
    question: Option<String>,
    worker_timeout: Duration,
}

/// Run one artifact through the pipeline
async fn run_artifact(options: RunOptions) -> Result<()> {
    let cfg = config::config()?;
    let context: serde_json::Value = read_json(&options.context)?;

    let producer =
        CommandCapability::from_command_line("producer", &options.producer, options.worker_timeout)
            .context("Producer command is empty")?;

    let queue = Arc::new(
        EscalationQueue::open(cfg.escalations_path())
            .await
            .context("Failed to open escalation queue")?,
    );
    // Answers arrive from `trustpipe escalations resolve` in another process
    let refresher = Arc::clone(&queue).spawn_refresh(ESCALATION_POLL);

    let mut orchestrator = PipelineOrchestrator::new(
        Arc::new(producer),
        Arc::new(FsApplier::new(&options.out)),
        queue,
        cfg.pipeline.clone(),
    )
    .with_gate(cfg.gate.build());

    if let Some(reviewer) = &options.reviewer {
        let reviewer =
            CommandCapability::from_command_line("reviewer", reviewer, options.worker_timeout)
                .context("Reviewer command is empty")?;
        orchestrator = orchestrator.with_reviewer(Arc::new(reviewer));
    }

    let mut request = RunRequest::new(options.workflow, options.step, context);
    if let Some(question) = options.question {
        request = request.with_question(question);
    }

    let report = orchestrator.run(request).await;
    refresher.abort();
    let report = report?;

    print_report(&report);

    if let Some(error) = &report.error {
        eprintln!("\n[Run {} aborted: {}]", report.run.id, error);
        std::process::exit(1);
    }

    eprintln!("\n[Run {} completed successfully]", report.run.id);
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("Run ID: {}", report.run.id);

    if let Some(verdict) = &report.verdict {
        println!("Verdict: {} (confidence {:.2})", verdict, verdict.confidence);
    }
    if let Some(id) = &report.escalation_id {
        println!("Escalation: {}", id);
    }
    if let Some(decision) = &report.decision {
        println!(
            "Decision: {} ({}, confidence {:.2})",
            decision.value(),
            decision.reasoning(),
            decision.confidence()
        );
    }

    if !report.reports.is_empty() {
        println!("\nValidators:");
        for r in &report.reports {
            let mark = if r.passed() { "✓" } else { "✗" };
            println!("  {} {}", mark, r.category());
            for issue in r.issues() {
                println!("      {}", issue);
            }
        }
    }

    if !report.warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &report.warnings {
            println!("  ⚠️  {}", warning);
        }
    }

    if let Some(applied) = &report.applied {
        println!("\nApplied: {} unit(s)", applied.succeeded.len());
        for failed in &applied.failed {
            println!("  ✗ {}: {}", failed.unit, failed.error);
        }
    }

    let metrics = &report.metrics;
    println!(
        "\nTiming: {}ms total, {} invocation attempt(s), {}ms backoff",
        metrics.total_ms, metrics.invocation_attempts, metrics.backoff_ms
    );
    for (stage, ms) in &metrics.stage_durations_ms {
        println!("  {:<20} {:>8}ms", stage, ms);
    }
    for bottleneck in &metrics.bottlenecks {
        println!(
            "  ⚠️  bottleneck: {} ({}ms > {}ms)",
            bottleneck.label, bottleneck.elapsed_ms, bottleneck.budget_ms
        );
    }
}

/// Decide one question, waiting on the escalation queue if needed
async fn decide(
    request_path: &Path,
    workflow: &str,
    step: &str,
    hints: Vec<String>,
    wait: Option<u64>,
) -> Result<()> {
    let cfg = config::config()?;
    let request: DecisionRequest = read_json(request_path)?;

    let engine = hints.into_iter().fold(
        DecisionEngine::new(cfg.escalation_threshold),
        |engine, key| engine.with_heuristic(ContextHint::new(key, 0.9)),
    );

    let queue = Arc::new(
        EscalationQueue::open(cfg.escalations_path())
            .await
            .context("Failed to open escalation queue")?,
    );
    let refresher = Arc::clone(&queue).spawn_refresh(ESCALATION_POLL);

    let mut service = DecisionService::new(engine, queue);
    if let Some(secs) = wait {
        service = service.with_wait_timeout(Duration::from_secs(secs));
    }

    let decision = service.decide(workflow, step, &request).await;
    refresher.abort();
    let decision = decision?;

    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}

/// Arbitrate two stored review files
fn arbitrate_files(
    self_path: &Path,
    independent_path: &Path,
    threshold: Option<f64>,
) -> Result<()> {
    let self_assessment: SelfAssessment = read_json(self_path)?;
    let independent: IndependentAssessment = read_json(independent_path)?;

    self_assessment
        .check_shape()
        .map_err(|e| anyhow::anyhow!("Invalid self assessment: {}", e))?;
    independent
        .check_shape()
        .map_err(|e| anyhow::anyhow!("Invalid independent assessment: {}", e))?;

    let threshold = match threshold {
        Some(t) => t,
        None => config::config()?.pipeline.arbitration_threshold,
    };

    let verdict = arbitrate(&self_assessment, &independent, threshold);
    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(())
}

/// Show the status of a run
async fn show_status(run_id_str: &str) -> Result<()> {
    let run_id = Uuid::parse_str(run_id_str)
        .with_context(|| format!("Invalid run ID: {}", run_id_str))?;

    let run = load_run(run_id)
        .await?
        .with_context(|| format!("Run {} not found", run_id))?;

    println!("Run ID: {}", run.id);
    println!("Workflow: {}", run.workflow_id);
    println!("Step: {}", run.step_id);
    println!("State: {}", state_label(&run.state));
    if let RunState::Aborted { reason } = &run.state {
        println!("Reason: {}", reason);
    }
    println!("Started: {}", run.started_at);
    if let Some(completed) = run.completed_at {
        println!("Completed: {}", completed);
    }
    if let Some(stage) = run.stage {
        println!("Last stage: {}", stage);
    }
    println!("\nStage statuses:");
    for (stage, status) in &run.stage_statuses {
        println!("  {}: {:?}", stage, status);
    }

    Ok(())
}

/// List recent runs
async fn list_runs(limit: usize) -> Result<()> {
    let mut runs = Vec::new();
    for run_id in EventStore::list_runs().await? {
        if let Ok(Some(run)) = load_run(run_id).await {
            runs.push(run);
        }
    }

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    // Most recent first
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    runs.truncate(limit);

    println!("{:<38} {:<30} {:<10}", "RUN ID", "WORKFLOW/STEP", "STATE");
    println!("{}", "-".repeat(80));

    for run in runs {
        println!(
            "{:<38} {:<30} {:<10}",
            run.id,
            format!("{}/{}", run.workflow_id, run.step_id),
            state_label(&run.state)
        );
    }

    Ok(())
}

async fn load_run(run_id: Uuid) -> Result<Option<Run>> {
    EventStore::open(run_id).await?.load_run().await
}

fn state_label(state: &RunState) -> &'static str {
    match state {
        RunState::Running => "running",
        RunState::Completed => "completed",
        RunState::Aborted { .. } => "aborted",
    }
}

/// Show resolved configuration
fn show_config() -> Result<()> {
    let cfg = config::config()?;
    let settings = &cfg.pipeline;

    println!("trustpipe configuration");
    println!("═══════════════════════════════════════");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:        {}", cfg.home.display());
    println!("  Runs:        {}", cfg.runs_dir().display());
    println!("  Escalations: {}", cfg.escalations_path().display());
    println!();
    println!("Pipeline:");
    println!("  Arbitration threshold: {:.2}", settings.arbitration_threshold);
    println!("  Escalation threshold:  {:.2}", cfg.escalation_threshold);
    println!("  Run timeout:           {}s", settings.limits.run_timeout_seconds);
    match settings.limits.escalation_timeout_seconds {
        Some(secs) => println!("  Escalation timeout:    {}s", secs),
        None => println!("  Escalation timeout:    (bounded by run timeout)"),
    }
    println!("  Input warn size:       {} bytes", settings.limits.warn_input_bytes);
    if !settings.limits.required_fields.is_empty() {
        println!("  Required fields:       {}", settings.limits.required_fields.join(", "));
    }
    println!();
    println!("Retry:");
    println!("  Max attempts:  {}", settings.retry.max_attempts);
    println!("  Initial delay: {}ms", settings.retry.initial_delay_ms);
    println!("  Multiplier:    {}", settings.retry.backoff_multiplier);
    println!("  Max delay:     {}ms", settings.retry.max_delay_ms);
    println!();
    println!("Gate:");
    println!("  Mode:       {:?}", cfg.gate.mode);
    println!("  Validators: {}", cfg.gate.build().len());

    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_escalation_resolve() {
        let cli = Cli::try_parse_from(["trustpipe", "escalations", "resolve", "abc", "yes"]).unwrap();
        match cli.command {
            Commands::Escalations {
                command: escalations::EscalationCommands::Resolve { id, answer },
            } => {
                assert_eq!(id, "abc");
                assert_eq!(answer, "yes");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
