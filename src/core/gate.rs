//! Quality gate over produced artifacts.
//!
//! Runs every registered validator independently and aggregates their
//! reports. In strict mode any failure rejects the artifact; in advisory
//! mode failures are downgraded to warnings.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::Artifact;

/// Result of one validator.
///
/// `passed` is derived from `issues`, so a failed report always carries
/// at least one issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    category: String,
    passed: bool,
    issues: Vec<String>,
    warnings: Vec<String>,
}

impl ValidationReport {
    pub fn new(category: impl Into<String>, issues: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            category: category.into(),
            passed: issues.is_empty(),
            issues,
            warnings,
        }
    }

    pub fn pass(category: impl Into<String>) -> Self {
        Self::new(category, Vec::new(), Vec::new())
    }

    pub fn fail(category: impl Into<String>, issue: impl Into<String>) -> Self {
        Self::new(category, vec![issue.into()], Vec::new())
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    pub fn issues(&self) -> &[String] {
        &self.issues
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

/// A pluggable, side-effect free artifact check
pub trait Validator: Send + Sync {
    /// Category label reported for this validator
    fn category(&self) -> &str;

    /// Inspect the artifact. An `Err` is reported as a failure of this category.
    fn validate(
        &self,
        artifact: &Artifact,
        context: &serde_json::Value,
    ) -> anyhow::Result<ValidationReport>;
}

/// How the gate reacts to failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    /// Any failure rejects the artifact
    Strict,

    /// Failures become warnings
    Advisory,
}

impl Default for GateMode {
    fn default() -> Self {
        Self::Strict
    }
}

/// Reports from a gate run that did not reject
#[derive(Debug, Clone, Serialize)]
pub struct GateOutcome {
    pub reports: Vec<ValidationReport>,

    /// True only if every report passed
    pub passed: bool,

    /// All warnings, including failures downgraded in advisory mode
    pub warnings: Vec<String>,
}

/// Strict-mode rejection with every report
#[derive(Debug, Clone, Error)]
#[error("quality gate rejected: {}", collect_issues(.reports).join("; "))]
pub struct GateRejected {
    pub reports: Vec<ValidationReport>,
}

impl GateRejected {
    /// Every issue from every failing category, prefixed by category
    pub fn issues(&self) -> Vec<String> {
        collect_issues(&self.reports)
    }

    /// Warnings from all reports, passing or failing
    pub fn warnings(&self) -> Vec<String> {
        collect_warnings(&self.reports)
    }

    pub fn failing_categories(&self) -> Vec<&str> {
        self.reports
            .iter()
            .filter(|r| !r.passed())
            .map(|r| r.category())
            .collect()
    }
}

/// Ordered set of validators plus a mode
#[derive(Clone, Default)]
pub struct ValidationGate {
    validators: Vec<Arc<dyn Validator>>,
    mode: GateMode,
    short_circuit: bool,
}

impl ValidationGate {
    pub fn new(mode: GateMode) -> Self {
        Self {
            validators: Vec::new(),
            mode,
            short_circuit: false,
        }
    }

    pub fn strict() -> Self {
        Self::new(GateMode::Strict)
    }

    pub fn advisory() -> Self {
        Self::new(GateMode::Advisory)
    }

    pub fn with_validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    /// Stop at the first failure in strict mode. Off by default, since
    /// skipped validators leave their categories unreported.
    pub fn with_short_circuit(mut self, enabled: bool) -> Self {
        self.short_circuit = enabled;
        self
    }

    pub fn mode(&self) -> GateMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Run all validators over the artifact
    pub fn run(
        &self,
        artifact: &Artifact,
        context: &serde_json::Value,
    ) -> Result<GateOutcome, GateRejected> {
        let mut reports = Vec::with_capacity(self.validators.len());

        for validator in &self.validators {
            let report = run_validator(validator.as_ref(), artifact, context);
            debug!(
                category = report.category(),
                passed = report.passed(),
                issues = report.issues().len(),
                "Validator finished"
            );

            let failed = !report.passed();
            reports.push(report);

            if failed && self.mode == GateMode::Strict && self.short_circuit {
                break;
            }
        }

        let passed = reports.iter().all(ValidationReport::passed);

        match self.mode {
            GateMode::Strict if !passed => Err(GateRejected { reports }),
            GateMode::Strict => Ok(GateOutcome {
                warnings: collect_warnings(&reports),
                reports,
                passed,
            }),
            GateMode::Advisory => {
                let mut warnings = collect_issues(&reports);
                if !passed {
                    warn!(failures = warnings.len(), "Advisory gate found issues");
                }
                warnings.extend(collect_warnings(&reports));
                Ok(GateOutcome {
                    reports,
                    passed,
                    warnings,
                })
            }
        }
    }
}

/// Run one validator, converting errors and panics into a failed report
fn run_validator(
    validator: &dyn Validator,
    artifact: &Artifact,
    context: &serde_json::Value,
) -> ValidationReport {
    let category = validator.category().to_string();

    match panic::catch_unwind(AssertUnwindSafe(|| validator.validate(artifact, context))) {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => {
            warn!(%category, error = %e, "Validator errored");
            ValidationReport::fail(category, format!("validator error: {:#}", e))
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!(%category, %message, "Validator panicked");
            ValidationReport::fail(category, format!("validator panicked: {}", message))
        }
    }
}

fn collect_issues(reports: &[ValidationReport]) -> Vec<String> {
    reports
        .iter()
        .flat_map(|r| r.issues().iter().map(move |i| format!("{}: {}", r.category(), i)))
        .collect()
}

fn collect_warnings(reports: &[ValidationReport]) -> Vec<String> {
    reports
        .iter()
        .flat_map(|r| {
            r.warnings()
                .iter()
                .map(move |w| format!("{}: {}", r.category(), w))
        })
        .collect()
}
