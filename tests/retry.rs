//! Retry Integration Tests
//!
//! Bounded exponential backoff around capability calls, run on paused time.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::{Duration, Instant};
use trustpipe::adapters::{Capability, CapabilityError, CapabilityInput, Task};
use trustpipe::core::{InvocationError, RetryPolicy, RetryingInvoker};

/// Fails with `error` for the first `failures` calls, then returns `output`
struct Flaky {
    failures: u32,
    error: CapabilityError,
    output: Value,
    calls: AtomicU32,
}

impl Flaky {
    fn new(failures: u32, error: CapabilityError, output: Value) -> Self {
        Self {
            failures,
            error,
            output,
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Capability for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn invoke(&self, _input: &CapabilityInput) -> Result<Value, CapabilityError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            Err(self.error.clone())
        } else {
            Ok(self.output.clone())
        }
    }
}

fn input() -> CapabilityInput {
    CapabilityInput {
        task: Task::Produce,
        workflow_id: "wf".to_string(),
        step_id: "step".to_string(),
        context: json!({}),
        artifact: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_succeeds_on_third_attempt_after_backoff() {
    let capability = Flaky::new(
        2,
        CapabilityError::Transport("connection reset".to_string()),
        json!({"ok": true}),
    );
    let invoker = RetryingInvoker::new(RetryPolicy::default());

    let start = Instant::now();
    let invocation = invoker.invoke::<Value>(&capability, &input()).await.unwrap();

    assert_eq!(invocation.output, json!({"ok": true}));
    assert_eq!(invocation.attempts, 3);
    assert_eq!(capability.calls(), 3);
    assert_eq!(invocation.backoff, Duration::from_secs(3));
    assert!(start.elapsed() >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_after_max_attempts() {
    let capability = Flaky::new(
        3,
        CapabilityError::Timeout(Duration::from_secs(30)),
        json!({}),
    );
    let invoker = RetryingInvoker::new(RetryPolicy::default());

    let err = invoker.invoke::<Value>(&capability, &input()).await.unwrap_err();

    assert!(matches!(err, InvocationError::Exhausted { attempts: 3, .. }));
    assert_eq!(err.attempts(), 3);
    assert_eq!(capability.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_shape_error_is_terminal() {
    let capability = Flaky::new(
        5,
        CapabilityError::Shape("missing critical_issues".to_string()),
        json!({}),
    );
    let invoker = RetryingInvoker::new(RetryPolicy::default());

    let start = Instant::now();
    let err = invoker.invoke::<Value>(&capability, &input()).await.unwrap_err();

    assert!(matches!(err, InvocationError::Terminal { attempt: 1, .. }));
    assert_eq!(capability.calls(), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_observer_sees_each_retried_failure() {
    let capability = Flaky::new(
        2,
        CapabilityError::Transport("503".to_string()),
        json!(null),
    );
    let invoker = RetryingInvoker::new(RetryPolicy {
        initial_delay_ms: 500,
        ..Default::default()
    });

    let mut seen = Vec::new();
    invoker
        .invoke_observed::<Value, _>(&capability, &input(), |failure| {
            seen.push((failure.attempt, failure.delay_ms))
        })
        .await
        .unwrap();

    assert_eq!(seen, vec![(1, 500), (2, 1000)]);
}
