use async_trait::async_trait;
use microflow::core::data::{AttrDecl, AttrType, Attribute, GlobalScope, Payload};
use microflow::core::flow::{ActionDefinition, TaskStatus};
use microflow::core::{
    Activity, ActivityContext, ActivityMetadata, AppError, Engine, ErrorCategory, FunctionRegistry,
};
use serde_json::{json, Value};
use std::fs;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Records every `item` it sees and echoes it back upper-cased.
struct Recorder {
    metadata: ActivityMetadata,
    seen: Arc<Mutex<Vec<(Option<usize>, Value)>>>,
}

impl Recorder {
    fn new(seen: Arc<Mutex<Vec<(Option<usize>, Value)>>>) -> Self {
        Self {
            metadata: ActivityMetadata::new("record")
                .with_input(AttrDecl::new("item", AttrType::Any))
                .with_output(AttrDecl::new("echoed", AttrType::String)),
            seen,
        }
    }
}

#[async_trait]
impl Activity for Recorder {
    fn metadata(&self) -> &ActivityMetadata {
        &self.metadata
    }

    async fn eval(&self, ctx: &mut ActivityContext) -> Result<bool, AppError> {
        let item = ctx.input_value("item").unwrap_or(Value::Null);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push((ctx.iteration, item.clone()));
        }
        ctx.set_output("echoed", json!(ctx.input_string("item").to_uppercase()))?;
        Ok(true)
    }
}

type Seen = Arc<Mutex<Vec<(Option<usize>, Value)>>>;

fn engine_with_recorder() -> (Engine, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let engine = Engine::builder()
        .functions(FunctionRegistry::with_builtins())
        .register_activity(Recorder::new(Arc::clone(&seen)))
        .unwrap()
        .build();
    (engine, seen)
}

fn register(engine: &Engine, yaml: &str) {
    engine
        .register_definition(ActionDefinition::from_yaml_str(yaml).unwrap())
        .unwrap();
}

fn payload(value: Value) -> Payload {
    value.as_object().cloned().unwrap_or_default()
}

const ITERATE: &str = r#"
id: iterate
inputs:
  - name: items
    type: array
outputs:
  - name: results
    type: array
tasks:
  - id: each
    type: iterator
    activity: record
    settings:
      iterate: $items
      accumulate: true
    input:
      - target: item
        value: ${iteration.value}
    output:
      - target: results
        value: $iterations
"#;

#[tokio::test]
async fn test_iterator_runs_activity_once_per_element_in_order() {
    let (engine, seen) = engine_with_recorder();
    register(&engine, ITERATE);

    let summary = engine
        .execute("iterate", payload(json!({"items": ["a", "b", "c"]})))
        .await
        .unwrap();

    let seen = seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            (Some(0), json!("a")),
            (Some(1), json!("b")),
            (Some(2), json!("c")),
        ]
    );
    assert_eq!(
        summary.outputs.get("results"),
        Some(&json!([{"echoed": "A"}, {"echoed": "B"}, {"echoed": "C"}]))
    );
    assert_eq!(summary.statuses["each"], TaskStatus::Done);
    assert_eq!(summary.evaluations, 3);
}

#[tokio::test]
async fn test_iterator_over_empty_collection_finishes() {
    let (engine, seen) = engine_with_recorder();
    register(&engine, ITERATE);

    let summary = engine
        .execute("iterate", payload(json!({"items": []})))
        .await
        .unwrap();
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(summary.outputs.get("results"), Some(&json!([])));
    assert_eq!(summary.statuses["each"], TaskStatus::Done);
}

const ROUTING: &str = r#"
id: routing
inputs:
  - name: priority
    type: string
outputs:
  - name: lane
    type: string
tasks:
  - id: triage
  - id: urgent
    activity: record
    input:
      - target: item
        value: string.concat('urgent:', ${trigger.content.priority})
    output:
      - target: lane
        value: $echoed
  - id: normal
    activity: record
    input:
      - target: item
        type: literal
        value: normal
    output:
      - target: lane
        value: $echoed
  - id: notify
links:
  - from: triage
    to: urgent
    type: expression
    value: ${trigger.content.priority} == high
  - from: triage
    to: normal
    type: expression
    value: ${trigger.content.priority} != high
  - from: urgent
    to: notify
"#;

#[tokio::test]
async fn test_guards_select_branch() {
    let (engine, seen) = engine_with_recorder();
    register(&engine, ROUTING);

    let summary = engine
        .execute("routing", payload(json!({"priority": "high"})))
        .await
        .unwrap();
    assert_eq!(summary.outputs.get("lane"), Some(&json!("URGENT:HIGH")));
    assert_eq!(summary.statuses["urgent"], TaskStatus::Done);
    assert_eq!(summary.statuses["normal"], TaskStatus::Skipped);
    assert_eq!(summary.statuses["notify"], TaskStatus::Done);

    let summary = engine
        .execute("routing", payload(json!({"priority": "low"})))
        .await
        .unwrap();
    assert_eq!(summary.outputs.get("lane"), Some(&json!("NORMAL")));
    assert_eq!(summary.statuses["urgent"], TaskStatus::Skipped);
    assert_eq!(summary.statuses["notify"], TaskStatus::Skipped);
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_every_run_reaches_terminal_states() {
    let (engine, _) = engine_with_recorder();
    register(&engine, ROUTING);
    for priority in ["high", "low", ""] {
        let summary = engine
            .execute("routing", payload(json!({"priority": priority})))
            .await
            .unwrap();
        assert_eq!(summary.statuses.len(), 4);
        assert!(summary.statuses.values().all(TaskStatus::is_terminal));
    }
}

#[test]
fn test_malformed_guard_is_rejected_at_load() {
    let engine = Engine::builder()
        .functions(FunctionRegistry::with_builtins())
        .build();
    let definition = ActionDefinition::from_yaml_str(
        r#"
id: broken
tasks:
  - id: a
  - id: b
links:
  - from: a
    to: b
    type: expression
    value: $amount >
"#,
    )
    .unwrap();
    let err = engine.register_definition(definition).unwrap_err();
    assert_eq!(err.category, ErrorCategory::ParseError);
    assert_eq!(err.context.get("link").map(String::as_str), Some("a -> b"));
    assert!(engine.action("broken").is_none());
}

#[test]
fn test_unknown_activity_is_rejected_at_load() {
    let engine = Engine::builder()
        .functions(FunctionRegistry::with_builtins())
        .build();
    let definition = ActionDefinition::from_yaml_str(
        r#"
id: missing
tasks:
  - id: call
    activity: http
"#,
    )
    .unwrap();
    let err = engine.register_definition(definition).unwrap_err();
    assert_eq!(err.category, ErrorCategory::ValidationError);
    assert_eq!(err.code, "DEF-ACTIVITY-001");
}

#[tokio::test]
async fn test_failure_policies() {
    let (engine, _) = engine_with_recorder();
    register(
        &engine,
        r#"
id: tolerant
outputs:
  - name: status
    type: string
tasks:
  - id: charge
    activity: error
    onError: continue
    input:
      - target: message
        type: literal
        value: declined
  - id: ship
    output:
      - target: status
        type: literal
        value: shipped
links:
  - from: charge
    to: ship
"#,
    );
    let summary = engine.execute("tolerant", Payload::new()).await.unwrap();
    assert_eq!(summary.statuses["charge"], TaskStatus::Failed);
    assert_eq!(summary.statuses["ship"], TaskStatus::Skipped);
    assert_eq!(summary.outputs.get("status"), Some(&Value::Null));

    register(
        &engine,
        r#"
id: strict
tasks:
  - id: charge
    activity: error
    input:
      - target: message
        type: literal
        value: declined
  - id: ship
links:
  - from: charge
    to: ship
"#,
    );
    let err = engine.execute("strict", Payload::new()).await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::TaskFailed);
    assert_eq!(err.context.get("task_id").map(String::as_str), Some("charge"));
    assert_eq!(err.context.get("action_id").map(String::as_str), Some("strict"));
}

#[tokio::test]
async fn test_return_task_replies_with_outputs() {
    let (engine, seen) = engine_with_recorder();
    register(
        &engine,
        r#"
id: reply
inputs:
  - name: name
    type: string
outputs:
  - name: greeting
    type: string
  - name: length
    type: int
tasks:
  - id: greet
    activity: record
    input:
      - target: item
        value: $name
  - id: done
    type: return
    input:
      - target: greeting
        value: string.concat('hello ', ${activity.greet.echoed})
      - target: length
        value: string.length($name)
  - id: never
    activity: record
links:
  - from: greet
    to: done
  - from: done
    to: never
"#,
    );
    let summary = engine
        .execute("reply", payload(json!({"name": "ada"})))
        .await
        .unwrap();
    assert_eq!(
        summary.outputs,
        payload(json!({"greeting": "hello ADA", "length": 3}))
    );
    assert_eq!(summary.statuses["done"], TaskStatus::Done);
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_global_scope_is_shared_across_runs() {
    let global = Arc::new(GlobalScope::new());
    global
        .add(Attribute::new("visits", AttrType::Int, json!(0)).unwrap())
        .unwrap();
    let engine = Engine::builder()
        .functions(FunctionRegistry::with_builtins())
        .global(Arc::clone(&global))
        .build();
    register(
        &engine,
        r#"
id: count
outputs:
  - name: seen
    type: int
tasks:
  - id: bump
    output:
      - target: global.visits
        value: ${global.visits} + 1
      - target: seen
        value: ${global.visits}
"#,
    );
    for expected in 1..=3 {
        let summary = engine.execute("count", Payload::new()).await.unwrap();
        assert_eq!(summary.outputs.get("seen"), Some(&json!(expected)));
    }
    assert_eq!(global.get_value("visits").unwrap(), Some(json!(3)));
}

#[tokio::test]
async fn test_action_files_load_from_json_and_yaml() {
    let dir = TempDir::new().unwrap();
    let json_path = dir.path().join("hello.json");
    fs::write(
        &json_path,
        json!({
            "id": "hello",
            "outputs": [{"name": "message", "type": "string"}],
            "tasks": [{
                "id": "say",
                "output": [{"mapTo": "message", "type": "literal", "value": "hi"}]
            }]
        })
        .to_string(),
    )
    .unwrap();
    let yaml_path = dir.path().join("bye.yaml");
    fs::write(
        &yaml_path,
        "id: bye\ntasks:\n  - id: log\n    activity: log\n    input:\n      - target: message\n        type: literal\n        value: bye\n",
    )
    .unwrap();

    let engine = Engine::builder()
        .functions(FunctionRegistry::with_builtins())
        .build();
    let hello = engine.load_action_file(&json_path).unwrap();
    assert_eq!(hello.entry(), "say");
    engine.load_action_file(&yaml_path).unwrap();
    assert_eq!(engine.action_ids(), vec!["bye", "hello"]);

    let summary = engine.execute("hello", Payload::new()).await.unwrap();
    assert_eq!(summary.outputs.get("message"), Some(&json!("hi")));

    let broken = dir.path().join("broken.yml");
    fs::write(&broken, "id: broken\ntasks: []\n").unwrap();
    let err = engine.load_action_file(&broken).unwrap_err();
    assert_eq!(err.category, ErrorCategory::ValidationError);

    let err = engine
        .load_action_file(&dir.path().join("absent.json"))
        .unwrap_err();
    assert_eq!(err.category, ErrorCategory::IoError);
}
