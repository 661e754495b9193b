//! Built-in validator plugins.
//!
//! These are content-agnostic structural checks. Domain-specific quality
//! rules plug in through the same [`Validator`] trait.

use glob::Pattern;

use super::gate::{ValidationReport, Validator};
use crate::domain::Artifact;

/// Fails artifacts whose units are all blank
#[derive(Debug, Clone, Default)]
pub struct NonEmptyArtifact;

impl Validator for NonEmptyArtifact {
    fn category(&self) -> &str {
        "completeness"
    }

    fn validate(&self, artifact: &Artifact, _: &serde_json::Value) -> anyhow::Result<ValidationReport> {
        let issues = artifact
            .units
            .iter()
            .filter(|u| u.content.trim().is_empty())
            .map(|u| format!("{} is empty", u.path))
            .collect();
        Ok(ValidationReport::new(self.category(), issues, Vec::new()))
    }
}

/// Requires markdown headings in every `.md` unit
#[derive(Debug, Clone)]
pub struct RequiredSections {
    sections: Vec<String>,
}

impl RequiredSections {
    pub fn new(sections: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            sections: sections.into_iter().map(Into::into).collect(),
        }
    }
}

impl Validator for RequiredSections {
    fn category(&self) -> &str {
        "structure"
    }

    fn validate(&self, artifact: &Artifact, _: &serde_json::Value) -> anyhow::Result<ValidationReport> {
        let mut issues = Vec::new();

        for unit in artifact.units.iter().filter(|u| u.path.ends_with(".md")) {
            let headings: Vec<&str> = unit
                .content
                .lines()
                .filter_map(|line| {
                    let trimmed = line.trim_start();
                    trimmed
                        .starts_with('#')
                        .then(|| trimmed.trim_start_matches('#').trim())
                })
                .collect();

            for section in &self.sections {
                if !headings.iter().any(|h| h.eq_ignore_ascii_case(section)) {
                    issues.push(format!("{} is missing section '{}'", unit.path, section));
                }
            }
        }

        Ok(ValidationReport::new(self.category(), issues, Vec::new()))
    }
}

/// Caps unit size, warning before the hard limit
#[derive(Debug, Clone)]
pub struct UnitSizeLimit {
    pub max_bytes: u64,
    pub warn_bytes: u64,
}

impl Default for UnitSizeLimit {
    fn default() -> Self {
        Self {
            max_bytes: 1024 * 1024,
            warn_bytes: 256 * 1024,
        }
    }
}

impl Validator for UnitSizeLimit {
    fn category(&self) -> &str {
        "size"
    }

    fn validate(&self, artifact: &Artifact, _: &serde_json::Value) -> anyhow::Result<ValidationReport> {
        let mut issues = Vec::new();
        let mut warnings = Vec::new();

        for unit in &artifact.units {
            let size = unit.content.len() as u64;
            if size > self.max_bytes {
                issues.push(format!("{} is {} bytes (max {})", unit.path, size, self.max_bytes));
            } else if size > self.warn_bytes {
                warnings.push(format!("{} is {} bytes", unit.path, size));
            }
        }

        Ok(ValidationReport::new(self.category(), issues, warnings))
    }
}

/// Rejects units targeting secret-like paths
#[derive(Debug, Clone)]
pub struct DenylistedPaths {
    patterns: Vec<String>,
}

impl Default for DenylistedPaths {
    fn default() -> Self {
        Self::new(vec![
            "**/.env*".to_string(),
            "**/secrets*".to_string(),
            "**/*credential*".to_string(),
            "**/*.pem".to_string(),
            "**/*.key".to_string(),
        ])
    }
}

impl DenylistedPaths {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    /// Check if a path matches any denylist pattern
    pub fn is_denylisted(&self, path: &str) -> anyhow::Result<bool> {
        for pattern_str in &self.patterns {
            let pattern = Pattern::new(pattern_str)
                .map_err(|e| anyhow::anyhow!("invalid denylist pattern '{}': {}", pattern_str, e))?;
            if pattern.matches(path) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Validator for DenylistedPaths {
    fn category(&self) -> &str {
        "security"
    }

    fn validate(&self, artifact: &Artifact, _: &serde_json::Value) -> anyhow::Result<ValidationReport> {
        let mut issues = Vec::new();
        for unit in &artifact.units {
            if self.is_denylisted(&unit.path)? {
                issues.push(format!("{} matches a denylisted path pattern", unit.path));
            }
        }
        Ok(ValidationReport::new(self.category(), issues, Vec::new()))
    }
}
