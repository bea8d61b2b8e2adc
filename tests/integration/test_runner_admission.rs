use async_trait::async_trait;
use microflow::core::data::Payload;
use microflow::core::flow::ActionDefinition;
use microflow::core::{
    build_runner, Activity, ActivityContext, ActivityMetadata, ActionRunner, AppError,
    DirectRunner, Engine, ErrorCategory, FunctionRegistry, RunnerConfig, RunnerType,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Blocks each evaluation until the test releases it.
#[derive(Clone)]
struct Gate {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

impl Gate {
    fn new() -> Self {
        Self {
            started: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }
}

struct GateActivity {
    metadata: ActivityMetadata,
    gate: Gate,
}

#[async_trait]
impl Activity for GateActivity {
    fn metadata(&self) -> &ActivityMetadata {
        &self.metadata
    }

    async fn eval(&self, _ctx: &mut ActivityContext) -> Result<bool, AppError> {
        self.gate.started.notify_one();
        self.gate.release.notified().await;
        Ok(true)
    }
}

struct Nap {
    metadata: ActivityMetadata,
}

#[async_trait]
impl Activity for Nap {
    fn metadata(&self) -> &ActivityMetadata {
        &self.metadata
    }

    async fn eval(&self, _ctx: &mut ActivityContext) -> Result<bool, AppError> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(true)
    }
}

const GATED: &str = r#"
id: gated
outputs:
  - name: finished
    type: bool
tasks:
  - id: wait
    activity: gate
  - id: after
    output:
      - target: finished
        type: literal
        value: true
links:
  - from: wait
    to: after
"#;

const SLOW: &str = r#"
id: slow
tasks:
  - id: nap
    activity: nap
  - id: after
links:
  - from: nap
    to: after
"#;

const ECHO: &str = r#"
id: echo
inputs:
  - name: text
    type: string
outputs:
  - name: text
    type: string
tasks:
  - id: reply
    type: return
    input:
      - target: text
        value: string.upper($text)
"#;

const BOOM: &str = r#"
id: boom
tasks:
  - id: fail
    activity: error
    input:
      - target: message
        type: literal
        value: exploded
"#;

fn engine(gate: &Gate, run_timeout: Option<Duration>) -> Arc<Engine> {
    let engine = Engine::builder()
        .functions(FunctionRegistry::with_builtins())
        .run_timeout(run_timeout)
        .register_activity(GateActivity {
            metadata: ActivityMetadata::new("gate"),
            gate: gate.clone(),
        })
        .unwrap()
        .register_activity(Nap {
            metadata: ActivityMetadata::new("nap"),
        })
        .unwrap()
        .build();
    for document in [GATED, SLOW, ECHO, BOOM] {
        engine
            .register_definition(ActionDefinition::from_yaml_str(document).unwrap())
            .unwrap();
    }
    Arc::new(engine)
}

fn pooled(worker_count: usize, queue_capacity: usize, stop_on_error: bool) -> RunnerConfig {
    RunnerConfig {
        runner_type: RunnerType::Pooled,
        worker_count,
        queue_capacity,
        stop_on_error,
        ..RunnerConfig::default()
    }
}

fn text(value: &str) -> Payload {
    json!({ "text": value }).as_object().cloned().unwrap()
}

fn spawn_submit(
    runner: &Arc<dyn ActionRunner>,
    action_id: &'static str,
) -> tokio::task::JoinHandle<Result<Payload, AppError>> {
    let runner = Arc::clone(runner);
    tokio::spawn(async move { runner.submit(action_id, Payload::new()).await })
}

#[tokio::test]
async fn test_full_queue_rejects_without_blocking() {
    let gate = Gate::new();
    let runner = build_runner(engine(&gate, None), &pooled(1, 0, true)).unwrap();

    let first = spawn_submit(&runner, "gated");
    gate.started.notified().await;

    let err = runner.submit("echo", text("hi")).await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::QueueFull);
    assert_eq!(err.context.get("action_id").map(String::as_str), Some("echo"));
    assert!(!runner.is_stopped());

    gate.release.notify_one();
    let outputs = first.await.unwrap().unwrap();
    assert_eq!(outputs.get("finished"), Some(&json!(true)));

    let outputs = runner.submit("echo", text("hi")).await.unwrap();
    assert_eq!(outputs.get("text"), Some(&json!("HI")));
    runner.shutdown().await;
}

#[tokio::test]
async fn test_queued_runs_wait_for_a_worker() {
    let gate = Gate::new();
    let runner = build_runner(engine(&gate, None), &pooled(1, 1, true)).unwrap();

    let first = spawn_submit(&runner, "gated");
    gate.started.notified().await;
    let queued = {
        let runner = Arc::clone(&runner);
        tokio::spawn(async move { runner.submit("echo", text("queued")).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let err = runner.submit("echo", text("third")).await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::QueueFull);
    assert!(!queued.is_finished());

    gate.release.notify_one();
    first.await.unwrap().unwrap();
    let outputs = queued.await.unwrap().unwrap();
    assert_eq!(outputs.get("text"), Some(&json!("QUEUED")));
    runner.shutdown().await;
}

#[tokio::test]
async fn test_failed_run_stops_runner_when_configured() {
    let gate = Gate::new();
    let runner = build_runner(engine(&gate, None), &pooled(2, 4, true)).unwrap();

    let err = runner.submit("boom", Payload::new()).await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::TaskFailed);
    assert_eq!(
        err.context.get("cause_code").map(String::as_str),
        Some("ACT-ERROR-001")
    );
    assert!(runner.is_stopped());

    let err = runner.submit("echo", text("late")).await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::RunnerStopped);
    runner.shutdown().await;
}

#[tokio::test]
async fn test_failed_run_is_tolerated_without_stop_on_error() {
    let gate = Gate::new();
    let runner = build_runner(engine(&gate, None), &pooled(2, 4, false)).unwrap();

    let err = runner.submit("boom", Payload::new()).await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::TaskFailed);
    assert!(!runner.is_stopped());

    let err = runner.submit("unknown", Payload::new()).await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::UnknownAction);

    let outputs = runner.submit("echo", text("still here")).await.unwrap();
    assert_eq!(outputs.get("text"), Some(&json!("STILL HERE")));
    runner.shutdown().await;
}

#[tokio::test]
async fn test_caller_cancellation_ends_run_at_next_boundary() {
    let gate = Gate::new();
    let runner = build_runner(engine(&gate, None), &pooled(1, 1, true)).unwrap();

    let token = CancellationToken::new();
    let run = {
        let runner = Arc::clone(&runner);
        let token = token.clone();
        tokio::spawn(async move {
            runner
                .submit_with_cancel("gated", Payload::new(), token)
                .await
        })
    };
    gate.started.notified().await;
    token.cancel();
    tokio::time::sleep(Duration::from_millis(20)).await;
    gate.release.notify_one();

    let err = run.await.unwrap().unwrap_err();
    assert_eq!(err.category, ErrorCategory::Cancelled);
    assert!(!runner.is_stopped());

    let outputs = runner.submit("echo", text("next")).await.unwrap();
    assert_eq!(outputs.get("text"), Some(&json!("NEXT")));
    runner.shutdown().await;
}

#[tokio::test]
async fn test_run_timeout_cancels_slow_runs() {
    let gate = Gate::new();
    let runner = DirectRunner::new(engine(&gate, Some(Duration::from_millis(30))), true);

    let err = runner.submit("slow", Payload::new()).await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::Cancelled);
    assert_eq!(err.code, "RUN-CANCEL-002");
    assert!(!runner.is_stopped());

    let outputs = runner.submit("echo", text("fast")).await.unwrap();
    assert_eq!(outputs.get("text"), Some(&json!("FAST")));
}

#[tokio::test]
async fn test_direct_runner_serves_concurrent_callers() {
    let gate = Gate::new();
    let config = RunnerConfig {
        runner_type: RunnerType::Direct,
        ..RunnerConfig::default()
    };
    let runner = build_runner(engine(&gate, None), &config).unwrap();

    let calls = ["a", "b", "c"].map(|word| {
        let runner = Arc::clone(&runner);
        tokio::spawn(async move { runner.submit("echo", text(word)).await })
    });
    for (call, expected) in calls.into_iter().zip(["A", "B", "C"]) {
        let outputs = call.await.unwrap().unwrap();
        assert_eq!(outputs.get("text"), Some(&json!(expected)));
    }

    runner.shutdown().await;
    let err = runner.submit("echo", text("x")).await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::RunnerStopped);
}

#[tokio::test]
async fn test_invalid_runner_config_is_rejected() {
    let gate = Gate::new();
    let err = build_runner(engine(&gate, None), &pooled(0, 1, true))
        .err()
        .unwrap();
    assert_eq!(err.category, ErrorCategory::ValidationError);
}
