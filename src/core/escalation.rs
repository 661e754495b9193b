//! Durable queue of decisions awaiting a human.
//!
//! Follows the EventStore pattern: append-only JSONL with state derived from
//! replay, so pending escalations survive restarts. Each record also owns a
//! `watch` channel; every waiter subscribes to it, and because the channel
//! retains its last value a waiter that arrives after the answer still sees it.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{EscalationRecord, EscalationResponse, EscalationStatus, NewEscalation};

/// Errors that can occur with the escalation queue
#[derive(Debug, Error)]
pub enum EscalationError {
    #[error("Escalation not found: {0}")]
    NotFound(String),

    #[error("Escalation already answered: {0}")]
    AlreadyAnswered(String),

    #[error("Timed out after {after:?} waiting for escalation {id}")]
    Timeout { id: String, after: Duration },

    #[error("Escalation queue closed while waiting for {0}")]
    Closed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// An entry in the escalation log (append-only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEvent {
    pub timestamp: DateTime<Utc>,
    pub escalation_id: String,
    pub event_type: QueueEventType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEventType {
    /// A pending record was created; `data` holds the record
    Added,

    /// A human answered; `data` holds `{"answer": ...}`
    Answered,
}

struct Entry {
    record: EscalationRecord,
    tx: watch::Sender<Option<EscalationResponse>>,
}

impl Entry {
    fn new(record: EscalationRecord) -> Self {
        let (tx, _rx) = watch::channel(record.response());
        Self { record, tx }
    }
}

/// JSONL-backed escalation queue
pub struct EscalationQueue {
    log_path: PathBuf,
    entries: Mutex<HashMap<String, Entry>>,
}

impl EscalationQueue {
    /// Open (or create) the queue at `log_path`, replaying existing records
    pub async fn open(log_path: impl Into<PathBuf>) -> Result<Self, EscalationError> {
        let log_path = log_path.into();

        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let records = replay(&log_path).await?;
        let entries = records
            .into_iter()
            .map(|(id, record)| (id, Entry::new(record)))
            .collect();

        Ok(Self {
            log_path,
            entries: Mutex::new(entries),
        })
    }

    /// Open the queue at the configured location ($TRUSTPIPE_HOME/escalations.jsonl)
    pub async fn open_default() -> anyhow::Result<Self> {
        let path = crate::config::escalations_path()?;
        Ok(Self::open(path).await?)
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Persist a new pending record and return its id. Never blocks on a human.
    pub async fn add(&self, new: NewEscalation) -> Result<String, EscalationError> {
        let id = Uuid::new_v4().to_string();
        let record = EscalationRecord::pending(id.clone(), new, Utc::now());

        let mut entries = self.entries.lock().await;
        self.append(&QueueEvent {
            timestamp: record.created_at,
            escalation_id: id.clone(),
            event_type: QueueEventType::Added,
            data: Some(serde_json::to_value(&record)?),
        })
        .await?;

        info!(
            escalation_id = %id,
            workflow_id = %record.workflow_id,
            step_id = %record.step_id,
            confidence = record.confidence,
            "Escalation raised"
        );
        entries.insert(id.clone(), Entry::new(record));

        Ok(id)
    }

    /// Wait until the record is answered. Every concurrent waiter is released
    /// by the same answer. `timeout` of `None` waits indefinitely.
    pub async fn wait_for_response(
        &self,
        id: &str,
        timeout: Option<Duration>,
    ) -> Result<EscalationResponse, EscalationError> {
        let mut rx = {
            let entries = self.entries.lock().await;
            entries
                .get(id)
                .ok_or_else(|| EscalationError::NotFound(id.to_string()))?
                .tx
                .subscribe()
        };

        debug!(escalation_id = %id, ?timeout, "Waiting for human response");

        match timeout {
            Some(after) => tokio::time::timeout(after, await_answer(id, &mut rx))
                .await
                .map_err(|_| EscalationError::Timeout {
                    id: id.to_string(),
                    after,
                })?,
            None => await_answer(id, &mut rx).await,
        }
    }

    /// Record the human answer (pending -> answered, exactly once)
    pub async fn resolve(
        &self,
        id: &str,
        answer: impl Into<String>,
    ) -> Result<EscalationRecord, EscalationError> {
        let answer = answer.into();
        let mut entries = self.entries.lock().await;

        let entry = entries
            .get_mut(id)
            .ok_or_else(|| EscalationError::NotFound(id.to_string()))?;
        if !entry.record.is_pending() {
            return Err(EscalationError::AlreadyAnswered(id.to_string()));
        }

        let answered_at = Utc::now();
        self.append(&QueueEvent {
            timestamp: answered_at,
            escalation_id: id.to_string(),
            event_type: QueueEventType::Answered,
            data: Some(serde_json::json!({ "answer": answer })),
        })
        .await?;

        mark_answered(entry, answer, answered_at);
        info!(escalation_id = %id, "Escalation answered");

        Ok(entry.record.clone())
    }

    /// Get a specific record by id
    pub async fn get(&self, id: &str) -> Option<EscalationRecord> {
        self.entries.lock().await.get(id).map(|e| e.record.clone())
    }

    /// All records, oldest first
    pub async fn list(&self) -> Vec<EscalationRecord> {
        let entries = self.entries.lock().await;
        let mut records: Vec<EscalationRecord> =
            entries.values().map(|e| e.record.clone()).collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }

    /// Pending records, oldest first
    pub async fn list_pending(&self) -> Vec<EscalationRecord> {
        self.list()
            .await
            .into_iter()
            .filter(EscalationRecord::is_pending)
            .collect()
    }

    /// Re-read the log and pick up records and answers written by other
    /// processes. Returns how many pending records became answered.
    pub async fn refresh(&self) -> Result<usize, EscalationError> {
        let on_disk = replay(&self.log_path).await?;
        let mut entries = self.entries.lock().await;
        let mut released = 0;

        for (id, record) in on_disk {
            match entries.get_mut(&id) {
                Some(entry) if entry.record.is_pending() => {
                    if let (Some(answer), Some(answered_at)) = (record.answer, record.answered_at) {
                        mark_answered(entry, answer, answered_at);
                        released += 1;
                    }
                }
                Some(_) => {}
                None => {
                    entries.insert(id, Entry::new(record));
                }
            }
        }

        if released > 0 {
            info!(released, "Picked up external escalation answers");
        }
        Ok(released)
    }

    /// Periodically call [`refresh`](Self::refresh) until the handle is aborted
    pub fn spawn_refresh(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(e) = self.refresh().await {
                    warn!(error = %e, "Escalation refresh failed");
                }
            }
        })
    }

    /// Append one event under an exclusive file lock
    async fn append(&self, event: &QueueEvent) -> Result<(), EscalationError> {
        let line = serde_json::to_string(event)?;
        let path = self.log_path.clone();

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            file.lock_exclusive()?;
            writeln!(file, "{}", line)?;
            file.flush()?;
            file.sync_data()
            // Lock is released when file is dropped
        })
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;

        Ok(())
    }
}

async fn await_answer(
    id: &str,
    rx: &mut watch::Receiver<Option<EscalationResponse>>,
) -> Result<EscalationResponse, EscalationError> {
    let current = rx
        .wait_for(Option::is_some)
        .await
        .map_err(|_| EscalationError::Closed(id.to_string()))?;
    current
        .clone()
        .ok_or_else(|| EscalationError::Closed(id.to_string()))
}

fn mark_answered(entry: &mut Entry, answer: String, answered_at: DateTime<Utc>) {
    entry.record.status = EscalationStatus::Answered;
    entry.record.answer = Some(answer.clone());
    entry.record.answered_at = Some(answered_at);
    entry.tx.send_replace(Some(EscalationResponse {
        answer,
        answered_at,
    }));
}

/// Replay the log into current records
async fn replay(path: &Path) -> Result<HashMap<String, EscalationRecord>, EscalationError> {
    let mut records = HashMap::new();

    if !tokio::fs::try_exists(path).await? {
        return Ok(records);
    }

    let content = tokio::fs::read_to_string(path).await?;
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let event: QueueEvent = serde_json::from_str(line)?;
        apply_event(&mut records, event);
    }

    Ok(records)
}

/// Apply one logged event; only the first answer for a record counts
fn apply_event(records: &mut HashMap<String, EscalationRecord>, event: QueueEvent) {
    match event.event_type {
        QueueEventType::Added => {
            if let Some(data) = event.data {
                match serde_json::from_value::<EscalationRecord>(data) {
                    Ok(record) => {
                        records.entry(event.escalation_id).or_insert(record);
                    }
                    Err(e) => warn!(
                        escalation_id = %event.escalation_id,
                        error = %e,
                        "Skipping unreadable escalation record"
                    ),
                }
            }
        }
        QueueEventType::Answered => {
            if let Some(record) = records.get_mut(&event.escalation_id) {
                if !record.is_pending() {
                    return;
                }
                let answer = event
                    .data
                    .as_ref()
                    .and_then(|d| d.get("answer"))
                    .and_then(|a| a.as_str());
                if let Some(answer) = answer {
                    record.status = EscalationStatus::Answered;
                    record.answer = Some(answer.to_string());
                    record.answered_at = Some(event.timestamp);
                }
            }
        }
    }
}
