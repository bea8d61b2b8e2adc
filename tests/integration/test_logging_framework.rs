use microflow::core::data::Payload;
use microflow::core::flow::ActionDefinition;
use microflow::core::{Engine, FunctionRegistry};
use microflow::logging::{self, ConsoleOutput, LoggingConfig};
use std::env;
use std::fs;
use tempfile::TempDir;

// One subscriber per process, so everything lives in a single test.
#[tokio::test]
async fn file_sink_records_run_events_and_init_is_once() {
    env::remove_var("RUST_LOG");
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let log_dir = temp_dir.path().join("logs");
    let config = LoggingConfig {
        log_dir: Some(log_dir.clone()),
        default_level: "microflow=debug".to_string(),
        enable_file: true,
        console_output: ConsoleOutput::None,
    };

    let guard = logging::init(&config).expect("logging should initialize");
    assert_eq!(guard.console_output(), ConsoleOutput::None);
    let log_file = guard
        .log_file_path()
        .expect("file sink enabled")
        .to_path_buf();
    assert_eq!(log_file, log_dir.join("microflow.log"));

    let second = logging::init(&LoggingConfig::default());
    assert!(second.is_err());

    let engine = Engine::builder()
        .functions(FunctionRegistry::with_builtins())
        .build();
    engine
        .register_definition(
            ActionDefinition::from_yaml_str(
                r#"
id: logged
tasks:
  - id: say
    activity: log
    input:
      - target: message
        type: literal
        value: sink check message
"#,
            )
            .expect("definition parses"),
        )
        .expect("definition registers");
    engine
        .execute("logged", Payload::new())
        .await
        .expect("run succeeds");

    drop(guard);
    let contents = fs::read_to_string(&log_file).expect("log file readable");
    assert!(contents.contains("action registered"));
    assert!(contents.contains("sink check message"));
    assert!(contents.contains("run finished"));
    assert!(contents.contains("action_id=\"logged\"") || contents.contains("action_id=logged"));
}

#[test]
fn invalid_level_is_rejected_before_install() {
    let config = LoggingConfig {
        default_level: "microflow=loud".to_string(),
        ..LoggingConfig::default()
    };
    assert!(config.validate().is_err());
}
