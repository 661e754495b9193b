//! Artifacts produced by generative workers.
//!
//! An artifact is a set of units (files, documents) that are only written
//! out once the artifact has cleared the trust pipeline.

use serde::{Deserialize, Serialize};

use super::assessment::SelfAssessment;

/// One unit of an artifact, e.g. a single file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactUnit {
    /// Target path, relative to wherever side effects are applied
    pub path: String,

    pub content: String,
}

impl ArtifactUnit {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// The produced artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Kind label supplied by the producer (e.g. "spec", "source", "tests")
    #[serde(default)]
    pub kind: String,

    pub units: Vec<ArtifactUnit>,
}

impl Artifact {
    pub fn new(kind: impl Into<String>, units: Vec<ArtifactUnit>) -> Self {
        Self {
            kind: kind.into(),
            units,
        }
    }

    /// Total content size in bytes
    pub fn size_bytes(&self) -> u64 {
        self.units.iter().map(|u| u.content.len() as u64).sum()
    }

    pub fn unit(&self, path: &str) -> Option<&ArtifactUnit> {
        self.units.iter().find(|u| u.path == path)
    }
}

/// Structured output of the primary generation step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Production {
    pub artifact: Artifact,
    pub self_assessment: SelfAssessment,
}

impl Production {
    pub fn check_shape(&self) -> Result<(), String> {
        if self.artifact.units.is_empty() {
            return Err("artifact has no units".to_string());
        }
        if let Some(unit) = self.artifact.units.iter().find(|u| u.path.trim().is_empty()) {
            return Err(format!(
                "artifact unit with empty path ({} bytes)",
                unit.content.len()
            ));
        }
        self.self_assessment.check_shape()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_size() {
        let artifact = Artifact::new(
            "docs",
            vec![
                ArtifactUnit::new("a.md", "12345"),
                ArtifactUnit::new("b.md", "678"),
            ],
        );

        assert_eq!(artifact.size_bytes(), 8);
        assert_eq!(artifact.unit("b.md").map(|u| u.content.as_str()), Some("678"));
        assert!(artifact.unit("c.md").is_none());
    }

    #[test]
    fn test_production_shape() {
        let json = r#"{
            "artifact": {"kind": "docs", "units": []},
            "self_assessment": {"confidence": 0.9, "critical_issues": []}
        }"#;
        let production: Production = serde_json::from_str(json).unwrap();
        assert_eq!(production.check_shape().unwrap_err(), "artifact has no units");
    }
}
