//! Filesystem side-effect applier.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use super::{ApplyReport, FailedUnit, SideEffectApplier};
use crate::domain::ArtifactUnit;

/// Writes artifact units as files under a root directory
pub struct FsApplier {
    root: PathBuf,
}

impl FsApplier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a unit path under the root. Absolute paths and `..` are refused.
    fn resolve(&self, unit_path: &str) -> Result<PathBuf, String> {
        let relative = Path::new(unit_path);
        if unit_path.trim().is_empty() {
            return Err("empty path".to_string());
        }

        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir => return Err("path escapes the output root".to_string()),
                Component::RootDir | Component::Prefix(_) => {
                    return Err("absolute paths are not allowed".to_string())
                }
            }
        }

        Ok(self.root.join(relative))
    }

    async fn write_unit(&self, unit: &ArtifactUnit) -> Result<PathBuf, String> {
        let target = self.resolve(&unit.path)?;

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("failed to create {}: {}", parent.display(), e))?;
        }

        fs::write(&target, &unit.content)
            .await
            .map_err(|e| format!("failed to write {}: {}", target.display(), e))?;

        Ok(target)
    }
}

#[async_trait]
impl SideEffectApplier for FsApplier {
    async fn apply(&self, units: &[ArtifactUnit]) -> ApplyReport {
        let mut report = ApplyReport::default();

        for unit in units {
            match self.write_unit(unit).await {
                Ok(target) => {
                    debug!(path = %target.display(), "Unit written");
                    report.succeeded.push(unit.path.clone());
                }
                Err(error) => {
                    warn!(unit = %unit.path, %error, "Unit could not be applied");
                    report.failed.push(FailedUnit {
                        unit: unit.path.clone(),
                        error,
                    });
                }
            }
        }

        report
    }
}
