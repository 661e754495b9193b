//! Configuration for trustpipe.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (TRUSTPIPE_HOME)
//! 2. Config file (.trustpipe/config.yaml)
//! 3. Defaults (~/.trustpipe)
//!
//! Config file discovery:
//! - Searches current directory and parents for .trustpipe/config.yaml
//! - `paths.home` is relative to the .trustpipe/ directory

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::{
    Budgets, DenylistedPaths, GateMode, NonEmptyArtifact, PipelineSettings, RequiredSections,
    RetryPolicy, SafetyLimits, UnitSizeLimit, ValidationGate, DEFAULT_CONFIDENCE_THRESHOLD,
    DEFAULT_ESCALATION_THRESHOLD,
};
use crate::domain::Stage;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const HOME_ENV: &str = "TRUSTPIPE_HOME";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub pipeline: Option<PipelineConfig>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub gate: Option<GateConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to the .trustpipe/ directory)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    pub arbitration_threshold: Option<f64>,
    pub escalation_threshold: Option<f64>,
    pub run_timeout_seconds: Option<u64>,
    pub escalation_timeout_seconds: Option<u64>,
    pub warn_input_bytes: Option<u64>,
    pub max_input_bytes: Option<u64>,
    pub soft_deadline_seconds: Option<u64>,
    #[serde(default)]
    pub stage_budgets_seconds: BTreeMap<Stage, u64>,
    #[serde(default)]
    pub required_fields: Vec<String>,
}

/// Which built-in validators the CLI gate runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default)]
    pub mode: GateMode,
    #[serde(default)]
    pub short_circuit: bool,
    /// Markdown headings every `.md` unit must contain
    #[serde(default)]
    pub required_sections: Vec<String>,
    pub max_unit_bytes: Option<u64>,
    /// Replaces the default secret-like path patterns
    pub denylist: Option<Vec<String>>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            mode: GateMode::Strict,
            short_circuit: false,
            required_sections: Vec::new(),
            max_unit_bytes: None,
            denylist: None,
        }
    }
}

impl GateConfig {
    pub fn build(&self) -> ValidationGate {
        let mut gate = ValidationGate::new(self.mode)
            .with_short_circuit(self.short_circuit)
            .with_validator(NonEmptyArtifact);

        if !self.required_sections.is_empty() {
            gate = gate.with_validator(RequiredSections::new(self.required_sections.clone()));
        }
        if let Some(max_bytes) = self.max_unit_bytes {
            gate = gate.with_validator(UnitSizeLimit {
                max_bytes,
                warn_bytes: max_bytes / 2,
            });
        }

        match &self.denylist {
            Some(patterns) => gate.with_validator(DenylistedPaths::new(patterns.clone())),
            None => gate.with_validator(DenylistedPaths::default()),
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to trustpipe home (runs, escalations)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub pipeline: PipelineSettings,
    /// Threshold for standalone decisions
    pub escalation_threshold: f64,
    pub gate: GateConfig,
}

impl ResolvedConfig {
    pub fn runs_dir(&self) -> PathBuf {
        self.home.join("runs")
    }

    pub fn escalations_path(&self) -> PathBuf {
        self.home.join("escalations.jsonl")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".trustpipe").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Fold the pipeline section over the defaults
fn pipeline_settings(
    pipeline: Option<PipelineConfig>,
    retry: Option<RetryPolicy>,
) -> Result<(PipelineSettings, f64)> {
    let pipeline = pipeline.unwrap_or_default();
    let defaults = SafetyLimits::default();

    let limits = SafetyLimits {
        required_fields: pipeline.required_fields,
        warn_input_bytes: pipeline.warn_input_bytes.unwrap_or(defaults.warn_input_bytes),
        max_input_bytes: pipeline.max_input_bytes.unwrap_or(defaults.max_input_bytes),
        run_timeout_seconds: pipeline
            .run_timeout_seconds
            .unwrap_or(defaults.run_timeout_seconds),
        escalation_timeout_seconds: pipeline.escalation_timeout_seconds,
    };

    let budgets = Budgets {
        soft_deadline: pipeline.soft_deadline_seconds.map(Duration::from_secs),
        stages: pipeline
            .stage_budgets_seconds
            .into_iter()
            .map(|(stage, secs)| (stage, Duration::from_secs(secs)))
            .collect(),
    };

    let retry = retry.unwrap_or_default();
    retry.validate().context("Invalid retry policy in config")?;

    let settings = PipelineSettings {
        retry,
        limits,
        arbitration_threshold: pipeline
            .arbitration_threshold
            .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
        budgets,
    };
    let escalation_threshold = pipeline
        .escalation_threshold
        .unwrap_or(DEFAULT_ESCALATION_THRESHOLD);

    Ok((settings, escalation_threshold))
}

/// Build the resolved config from an optional file and an optional home override
fn resolve(config_file: Option<PathBuf>, env_home: Option<String>) -> Result<ResolvedConfig> {
    let default_home = || -> Result<PathBuf> {
        Ok(dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(".trustpipe"))
    };

    let Some(config_path) = config_file else {
        let home = match env_home {
            Some(home) => PathBuf::from(home),
            None => default_home()?,
        };
        let (pipeline, escalation_threshold) = pipeline_settings(None, None)?;
        return Ok(ResolvedConfig {
            home,
            config_file: None,
            pipeline,
            escalation_threshold,
            gate: GateConfig::default(),
        });
    };

    let config = load_config_file(&config_path)?;

    let home = if let Some(env_home) = env_home {
        PathBuf::from(env_home)
    } else if let Some(ref home_path) = config.paths.home {
        // home is relative to .trustpipe/ directory
        let trustpipe_dir = config_path.parent().unwrap_or(Path::new("."));
        resolve_path(trustpipe_dir, home_path)
    } else {
        default_home()?
    };

    let (pipeline, escalation_threshold) = pipeline_settings(config.pipeline, config.retry)?;

    Ok(ResolvedConfig {
        home,
        config_file: Some(config_path),
        pipeline,
        escalation_threshold,
        gate: config.gate.unwrap_or_default(),
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    resolve(find_config_file(), std::env::var(HOME_ENV).ok())
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the trustpipe home directory
pub fn trustpipe_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the runs directory ($TRUSTPIPE_HOME/runs)
pub fn runs_dir() -> Result<PathBuf> {
    Ok(config()?.runs_dir())
}

/// Get the escalation log ($TRUSTPIPE_HOME/escalations.jsonl)
pub fn escalations_path() -> Result<PathBuf> {
    Ok(config()?.escalations_path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(temp: &TempDir, yaml: &str) -> PathBuf {
        let dir = temp.path().join(".trustpipe");
        std::fs::create_dir_all(&dir).unwrap();
        let config_path = dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "{}", yaml).unwrap();
        config_path
    }

    #[test]
    fn test_defaults_without_file() {
        let config = resolve(None, Some("/tmp/tp-home".to_string())).unwrap();

        assert_eq!(config.home, PathBuf::from("/tmp/tp-home"));
        assert_eq!(config.runs_dir(), PathBuf::from("/tmp/tp-home/runs"));
        assert_eq!(
            config.escalations_path(),
            PathBuf::from("/tmp/tp-home/escalations.jsonl")
        );
        assert_eq!(config.pipeline, PipelineSettings::default());
        assert_eq!(config.escalation_threshold, 0.75);
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(
            &temp,
            r#"
version: "1.0"
paths:
  home: ./state
pipeline:
  arbitration_threshold: 0.9
  run_timeout_seconds: 60
  escalation_timeout_seconds: 30
  soft_deadline_seconds: 45
  stage_budgets_seconds:
    invoking: 20
  required_fields:
    - story.title
retry:
  max_attempts: 5
gate:
  mode: advisory
  required_sections: [Overview]
"#,
        );

        let config = resolve(Some(config_path.clone()), None).unwrap();
        let settings = &config.pipeline;

        assert_eq!(config.home, config_path.parent().unwrap().join("./state"));
        assert_eq!(settings.arbitration_threshold, 0.9);
        assert_eq!(settings.limits.run_timeout(), Duration::from_secs(60));
        assert_eq!(settings.limits.escalation_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(settings.limits.required_fields, vec!["story.title"]);
        assert_eq!(settings.budgets.soft_deadline, Some(Duration::from_secs(45)));
        assert_eq!(
            settings.budgets.stages.get(&Stage::Invoking),
            Some(&Duration::from_secs(20))
        );
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.initial_delay_ms, 1000);
        assert_eq!(config.gate.mode, GateMode::Advisory);
        assert_eq!(config.gate.build().len(), 3);
    }

    #[test]
    fn test_env_home_beats_config_file() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(&temp, "version: \"1.0\"\npaths:\n  home: ./state\n");

        let config = resolve(Some(config_path), Some("/override".to_string())).unwrap();
        assert_eq!(config.home, PathBuf::from("/override"));
    }

    #[test]
    fn test_invalid_retry_policy_is_rejected() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(&temp, "version: \"1.0\"\nretry:\n  max_attempts: 0\n");

        assert!(resolve(Some(config_path), Some("/tmp".to_string())).is_err());
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
