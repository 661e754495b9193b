//! Escalation Queue Integration Tests
//!
//! Durable human-in-the-loop decisions: concurrent waiters, exactly-once
//! answers, timeouts and recovery from the JSONL log.

use std::collections::BTreeMap;
use std::time::Duration;

use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};
use trustpipe::core::{EscalationError, EscalationQueue};
use trustpipe::domain::{EscalationStatus, NewEscalation};

fn new_escalation(step: &str) -> NewEscalation {
    NewEscalation {
        workflow_id: "wf-docs".to_string(),
        step_id: step.to_string(),
        question: "Accept the generated README?".to_string(),
        reasoning: "combined confidence below threshold".to_string(),
        confidence: 0.6,
        context: BTreeMap::from([("story".to_string(), serde_json::json!({"title": "t"}))]),
    }
}

async fn open_queue(dir: &TempDir) -> EscalationQueue {
    EscalationQueue::open(dir.path().join("escalations.jsonl"))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_concurrent_waiters_receive_same_answer() {
    let dir = TempDir::new().unwrap();
    let queue = open_queue(&dir).await;
    let id = queue.add(new_escalation("write-readme")).await.unwrap();

    let (first, second, resolved) = tokio::join!(
        queue.wait_for_response(&id, Some(Duration::from_secs(5))),
        queue.wait_for_response(&id, Some(Duration::from_secs(5))),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            queue.resolve(&id, "yes").await
        }
    );

    let first = first.unwrap();
    let second = second.unwrap();
    let record = resolved.unwrap();

    assert_eq!(first.answer, "yes");
    assert_eq!(first, second);
    assert_eq!(record.status, EscalationStatus::Answered);
    assert_eq!(record.answered_at, Some(first.answered_at));
}

#[tokio::test]
async fn test_waiter_after_answer_returns_immediately() {
    let dir = TempDir::new().unwrap();
    let queue = open_queue(&dir).await;
    let id = queue.add(new_escalation("write-readme")).await.unwrap();

    queue.resolve(&id, "approve").await.unwrap();

    let response = queue
        .wait_for_response(&id, Some(Duration::from_millis(10)))
        .await
        .unwrap();
    assert_eq!(response.answer, "approve");
}

#[tokio::test]
async fn test_second_answer_is_rejected() {
    let dir = TempDir::new().unwrap();
    let queue = open_queue(&dir).await;
    let id = queue.add(new_escalation("write-readme")).await.unwrap();

    assert_ok!(queue.resolve(&id, "yes").await);
    let err = assert_err!(queue.resolve(&id, "no").await);

    assert!(matches!(err, EscalationError::AlreadyAnswered(ref e) if e == &id));
    assert_eq!(queue.get(&id).await.unwrap().answer.as_deref(), Some("yes"));
}

#[tokio::test]
async fn test_unknown_id_is_not_found() {
    let dir = TempDir::new().unwrap();
    let queue = open_queue(&dir).await;

    assert!(matches!(
        queue.resolve("missing", "yes").await,
        Err(EscalationError::NotFound(_))
    ));
    assert!(matches!(
        queue.wait_for_response("missing", None).await,
        Err(EscalationError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_timeout_leaves_record_pending() {
    let dir = TempDir::new().unwrap();
    let queue = open_queue(&dir).await;
    let id = queue.add(new_escalation("write-readme")).await.unwrap();

    let err = queue
        .wait_for_response(&id, Some(Duration::from_millis(50)))
        .await
        .unwrap_err();

    assert!(matches!(err, EscalationError::Timeout { .. }));
    assert!(queue.get(&id).await.unwrap().is_pending());
    assert_eq!(queue.list_pending().await.len(), 1);

    // A late answer is still accepted
    assert_ok!(queue.resolve(&id, "yes").await);
    assert!(queue.list_pending().await.is_empty());
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let (answered, pending) = {
        let queue = open_queue(&dir).await;
        let answered = queue.add(new_escalation("write-readme")).await.unwrap();
        let pending = queue.add(new_escalation("write-changelog")).await.unwrap();
        queue.resolve(&answered, "no, missing install section").await.unwrap();
        (answered, pending)
    };

    let reopened = open_queue(&dir).await;

    let record = reopened.get(&answered).await.unwrap();
    assert_eq!(record.answer.as_deref(), Some("no, missing install section"));
    assert_eq!(record.context["story"]["title"], "t");

    let pending_records = reopened.list_pending().await;
    assert_eq!(pending_records.len(), 1);
    assert_eq!(pending_records[0].id, pending);
    assert_eq!(reopened.list().await.len(), 2);
}

#[tokio::test]
async fn test_refresh_picks_up_answers_from_another_instance() {
    let dir = TempDir::new().unwrap();
    let waiting = open_queue(&dir).await;
    let id = waiting.add(new_escalation("write-readme")).await.unwrap();

    // Another process answers through its own handle on the same log
    let answering = open_queue(&dir).await;
    answering.resolve(&id, "yes").await.unwrap();

    assert!(waiting.get(&id).await.unwrap().is_pending());
    assert_eq!(waiting.refresh().await.unwrap(), 1);

    let response = waiting
        .wait_for_response(&id, Some(Duration::from_millis(10)))
        .await
        .unwrap();
    assert_eq!(response.answer, "yes");
    assert_eq!(waiting.refresh().await.unwrap(), 0);
}
