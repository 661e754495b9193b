//! Escalation CLI commands.
//!
//! Commands for the human side of the escalation queue:
//! - `trustpipe escalations list` - Show pending (or all) escalations
//! - `trustpipe escalations show <id>` - Show one escalation in full
//! - `trustpipe escalations resolve <id> <answer>` - Answer an escalation

use anyhow::{Context, Result};
use clap::Subcommand;

use crate::core::EscalationQueue;
use crate::domain::EscalationRecord;

/// Escalation subcommands
#[derive(Subcommand, Debug)]
pub enum EscalationCommands {
    /// List escalations awaiting an answer
    List {
        /// Include answered escalations
        #[arg(long)]
        all: bool,
    },

    /// Show details of an escalation
    Show {
        /// Escalation ID
        id: String,
    },

    /// Answer an escalation ("yes"/"approve" lets the run continue)
    Resolve {
        /// Escalation ID
        id: String,

        /// The answer
        answer: String,
    },
}

/// Execute an escalation command
pub async fn execute(command: EscalationCommands) -> Result<()> {
    let queue = EscalationQueue::open_default()
        .await
        .context("Failed to open escalation queue")?;

    match command {
        EscalationCommands::List { all } => execute_list(&queue, all).await,
        EscalationCommands::Show { id } => execute_show(&queue, &id).await,
        EscalationCommands::Resolve { id, answer } => execute_resolve(&queue, &id, &answer).await,
    }
}

async fn execute_list(queue: &EscalationQueue, all: bool) -> Result<()> {
    let records = if all {
        queue.list().await
    } else {
        queue.list_pending().await
    };

    if records.is_empty() {
        println!("✓ No {}escalations", if all { "" } else { "pending " });
        return Ok(());
    }

    println!(
        "{:<38} {:<20} {:<10} {:<6} {}",
        "ID", "WORKFLOW/STEP", "STATUS", "CONF", "QUESTION"
    );
    println!("{}", "-".repeat(100));

    for record in &records {
        println!(
            "{:<38} {:<20} {:<10} {:<6.2} {}",
            record.id,
            truncate(&format!("{}/{}", record.workflow_id, record.step_id), 20),
            status_label(record),
            record.confidence,
            truncate(&record.question, 40)
        );
    }

    println!();
    println!("{} escalation(s)", records.len());
    Ok(())
}

async fn execute_show(queue: &EscalationQueue, id: &str) -> Result<()> {
    let record = queue
        .get(id)
        .await
        .with_context(|| format!("Escalation not found: {}", id))?;

    println!("Escalation: {}", record.id);
    println!("Workflow:   {}", record.workflow_id);
    println!("Step:       {}", record.step_id);
    println!("Status:     {}", status_label(&record));
    println!("Created:    {}", record.created_at);
    println!();
    println!("Question:   {}", record.question);
    println!("Reasoning:  {}", record.reasoning);
    println!("Confidence: {:.2}", record.confidence);

    if !record.context.is_empty() {
        println!();
        println!("Context:");
        println!("{}", serde_json::to_string_pretty(&record.context)?);
    }

    if let (Some(answer), Some(answered_at)) = (&record.answer, record.answered_at) {
        println!();
        println!("Answer:     {}", answer);
        println!("Answered:   {}", answered_at);
    }

    Ok(())
}

async fn execute_resolve(queue: &EscalationQueue, id: &str, answer: &str) -> Result<()> {
    let record = queue
        .resolve(id, answer)
        .await
        .with_context(|| format!("Failed to resolve escalation {}", id))?;

    println!("✅ Escalation {} answered: {}", record.id, answer);
    Ok(())
}

fn status_label(record: &EscalationRecord) -> &'static str {
    if record.is_pending() {
        "pending"
    } else {
        "answered"
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a longer question", 8), "a longe…");
    }
}
