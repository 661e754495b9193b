//! Append-only audit log with file-based persistence.
//!
//! Each run owns `runs/<run_id>/events.jsonl`. Events are newline-delimited
//! JSON so the trail is easy to inspect with ordinary tools.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::domain::{Event, EventType, Run, Stage};

/// File-based event store using JSONL format
pub struct EventStore {
    /// Directory containing the run
    run_dir: PathBuf,

    /// Path to the events.jsonl file
    events_path: PathBuf,

    /// Snapshots of stage outputs (production, assessments)
    artifacts_dir: PathBuf,
}

impl EventStore {
    /// Create or open the event store for a run under the configured runs dir
    pub async fn open(run_id: Uuid) -> Result<Self> {
        let base_dir = Self::base_directory()?;
        Self::open_in(&base_dir, run_id).await
    }

    /// Create or open the event store for a run under `base_dir`
    pub async fn open_in(base_dir: &Path, run_id: Uuid) -> Result<Self> {
        let run_dir = base_dir.join(run_id.to_string());
        let artifacts_dir = run_dir.join("artifacts");

        fs::create_dir_all(&artifacts_dir)
            .await
            .with_context(|| format!("Failed to create run directory: {}", run_dir.display()))?;

        let events_path = run_dir.join("events.jsonl");

        Ok(Self {
            run_dir,
            events_path,
            artifacts_dir,
        })
    }

    /// Get the base directory for all runs (~/.trustpipe/runs or $TRUSTPIPE_HOME/runs)
    pub fn base_directory() -> Result<PathBuf> {
        crate::config::runs_dir()
    }

    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    /// Snapshot a stage output as pretty JSON
    pub async fn store_artifact<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let artifact_path = self.artifacts_dir.join(format!("{}.json", name));
        let content =
            serde_json::to_string_pretty(value).context("Failed to serialize artifact")?;

        fs::write(&artifact_path, content)
            .await
            .with_context(|| format!("Failed to write artifact: {}", artifact_path.display()))?;

        Ok(artifact_path)
    }

    /// Load a stored snapshot
    pub async fn load_artifact(&self, name: &str) -> Result<Option<serde_json::Value>> {
        let artifact_path = self.artifacts_dir.join(format!("{}.json", name));

        if !fs::try_exists(&artifact_path).await? {
            return Ok(None);
        }

        let content = fs::read_to_string(&artifact_path)
            .await
            .with_context(|| format!("Failed to read artifact: {}", artifact_path.display()))?;
        let value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse artifact: {}", artifact_path.display()))?;

        Ok(Some(value))
    }

    /// Append an event to the log
    pub async fn append(&self, event: &Event) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to open events file: {}",
                    self.events_path.display()
                )
            })?;

        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write event")?;
        file.flush().await.context("Failed to flush event")?;

        Ok(())
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<Event>> {
        if !fs::try_exists(&self.events_path).await? {
            return Ok(Vec::new());
        }

        let file = File::open(&self.events_path)
            .await
            .with_context(|| format!("Failed to open events file: {}", self.events_path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// Rebuild run state from the log (None if nothing was recorded)
    pub async fn load_run(&self) -> Result<Option<Run>> {
        let events = self.replay().await?;
        Ok(Run::from_events(&events))
    }

    /// Find events matching a predicate
    pub async fn find_events<F>(&self, predicate: F) -> Result<Vec<Event>>
    where
        F: Fn(&Event) -> bool,
    {
        let events = self.replay().await?;
        Ok(events.into_iter().filter(predicate).collect())
    }

    /// Get the last event of a specific type
    pub async fn last_event_of_type(&self, event_type: EventType) -> Result<Option<Event>> {
        let events = self.replay().await?;
        Ok(events.into_iter().rev().find(|e| e.event_type == event_type))
    }

    /// List all run IDs in the configured runs dir
    pub async fn list_runs() -> Result<Vec<Uuid>> {
        let base_dir = Self::base_directory()?;
        Self::list_runs_in(&base_dir).await
    }

    /// List all run IDs under `base_dir`
    pub async fn list_runs_in(base_dir: &Path) -> Result<Vec<Uuid>> {
        if !fs::try_exists(base_dir).await? {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let mut entries = fs::read_dir(base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(uuid) = Uuid::parse_str(name) {
                        runs.push(uuid);
                    }
                }
            }
        }

        Ok(runs)
    }
}

/// Generate an idempotency key for a stage event
pub fn generate_idempotency_key(run_id: Uuid, stage: Stage, input: &str) -> String {
    let input_hash = hash_input(input);
    format!("{}:{}:{}", run_id, stage.label(), input_hash)
}

/// Hash input content (first 16 chars of SHA256)
pub fn hash_input(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..8]) // First 16 hex chars (8 bytes)
}
