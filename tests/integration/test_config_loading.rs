use microflow::core::data::Payload;
use microflow::core::flow::ActionDefinition;
use microflow::core::{
    build_runner, ConfigLoader, Engine, ErrorCategory, FunctionRegistry, MicroflowConfig,
    RunnerType,
};
use microflow::logging::ConsoleOutput;
use serial_test::serial;
use std::env;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const ENV_VARS: &[&str] = &[
    "MICROFLOW_RUNNER_TYPE",
    "MICROFLOW_WORKER_COUNT",
    "MICROFLOW_QUEUE_CAPACITY",
    "MICROFLOW_STOP_ON_ERROR",
    "MICROFLOW_RUN_TIMEOUT",
    "MICROFLOW_PARALLEL_LIMIT",
    "MICROFLOW_MAX_TASK_ITERATIONS",
    "MICROFLOW_LOG_LEVEL",
    "MICROFLOW_LOG_DIR",
    "MICROFLOW_LOG_CONSOLE",
];

fn clear_env() {
    for name in ENV_VARS {
        env::remove_var(name);
    }
}

fn write_config(dir: &TempDir, content: &str) {
    fs::write(dir.path().join("microflow.toml"), content).unwrap();
}

const FULL_CONFIG: &str = r#"
[runner]
runnerType = "direct"
workerCount = 2
queueCapacity = 7
stopOnError = false
runTimeout = "1m 30s"
parallelLimit = 2
maxTaskIterations = 10

[logging]
default_level = "microflow=debug,warn"
enable_file = false
console_output = "none"
"#;

#[test]
#[serial]
fn test_full_file_is_parsed() {
    clear_env();
    let dir = TempDir::new().unwrap();
    write_config(&dir, FULL_CONFIG);

    let config = ConfigLoader::load_from_dir(dir.path()).unwrap();
    assert_eq!(config.runner.runner_type, RunnerType::Direct);
    assert_eq!(config.runner.worker_count, 2);
    assert_eq!(config.runner.queue_capacity, 7);
    assert!(!config.runner.stop_on_error);
    assert_eq!(
        config.runner.run_timeout().unwrap(),
        Some(Duration::from_secs(90))
    );
    assert_eq!(config.runner.parallel_limit, 2);
    assert_eq!(config.runner.max_task_iterations, 10);
    assert_eq!(config.logging.default_level, "microflow=debug,warn");
    assert_eq!(config.logging.console_output, ConsoleOutput::None);
}

#[test]
#[serial]
fn test_missing_sections_fall_back_to_defaults() {
    clear_env();
    let dir = TempDir::new().unwrap();
    write_config(&dir, "[runner]\nworkerCount = 9\n");

    let config = ConfigLoader::load_from_dir(dir.path()).unwrap();
    let defaults = MicroflowConfig::default();
    assert_eq!(config.runner.worker_count, 9);
    assert_eq!(config.runner.queue_capacity, defaults.runner.queue_capacity);
    assert_eq!(config.runner.runner_type, RunnerType::Pooled);
    assert!(config.runner.stop_on_error);
    assert_eq!(config.runner.run_timeout().unwrap(), None);
    assert_eq!(config.logging, defaults.logging);
}

#[test]
#[serial]
fn test_environment_overrides_win() {
    clear_env();
    let dir = TempDir::new().unwrap();
    write_config(&dir, FULL_CONFIG);
    let log_dir = dir.path().join("logs");

    env::set_var("MICROFLOW_RUNNER_TYPE", "pooled");
    env::set_var("MICROFLOW_QUEUE_CAPACITY", "0");
    env::set_var("MICROFLOW_MAX_TASK_ITERATIONS", "25");
    env::set_var("MICROFLOW_LOG_LEVEL", "trace");
    env::set_var("MICROFLOW_LOG_DIR", &log_dir);
    env::set_var("MICROFLOW_LOG_CONSOLE", "stdout");
    let loaded = ConfigLoader::load_from_dir(dir.path());
    clear_env();

    let config = loaded.unwrap();
    assert_eq!(config.runner.runner_type, RunnerType::Pooled);
    assert_eq!(config.runner.queue_capacity, 0);
    assert_eq!(config.runner.max_task_iterations, 25);
    assert_eq!(config.runner.worker_count, 2);
    assert_eq!(config.logging.default_level, "trace");
    assert_eq!(config.logging.log_dir.as_deref(), Some(log_dir.as_path()));
    assert!(config.logging.enable_file);
    assert_eq!(config.logging.console_output, ConsoleOutput::Stdout);
}

#[test]
#[serial]
fn test_invalid_values_are_reported() {
    clear_env();
    let dir = TempDir::new().unwrap();

    write_config(&dir, "[runner]\nrunTimeout = \"soon\"\n");
    let err = ConfigLoader::load_from_dir(dir.path()).unwrap_err();
    assert_eq!(err.code, "CFG-VALID-002");

    write_config(&dir, "[runner]\nrunnerType = \"threaded\"\n");
    let err = ConfigLoader::load_from_dir(dir.path()).unwrap_err();
    assert_eq!(err.code, "CFG-PARSE-001");
    assert!(err.context.contains_key("path"));

    write_config(&dir, "[logging]\ndefault_level = \"microflow=loud\"\n");
    let err = ConfigLoader::load_from_dir(dir.path()).unwrap_err();
    assert_eq!(err.code, "CFG-VALID-003");

    write_config(&dir, "");
    env::set_var("MICROFLOW_STOP_ON_ERROR", "maybe");
    let loaded = ConfigLoader::load_from_dir(dir.path());
    clear_env();
    let err = loaded.unwrap_err();
    assert_eq!(err.category, ErrorCategory::ValidationError);
    assert_eq!(err.code, "CFG-ENV-001");
}

#[tokio::test]
#[serial]
async fn test_loaded_config_drives_engine_and_runner() {
    clear_env();
    let dir = TempDir::new().unwrap();
    write_config(
        &dir,
        "[runner]\nrunnerType = \"direct\"\nmaxTaskIterations = 2\n",
    );
    let config = ConfigLoader::load_from_dir(dir.path()).unwrap();

    let engine = Engine::builder()
        .functions(FunctionRegistry::with_builtins())
        .runner_config(&config.runner)
        .unwrap()
        .build();
    engine
        .register_definition(
            ActionDefinition::from_yaml_str(
                r#"
id: spin
outputs:
  - name: count
    type: int
tasks:
  - id: start
    output:
      - target: count
        type: literal
        value: 0
  - id: loop
    output:
      - target: count
        value: ${flow.count} + 1
links:
  - from: start
    to: loop
  - from: loop
    to: loop
    type: expression
    value: ${flow.count} < 5
"#,
            )
            .unwrap(),
        )
        .unwrap();
    let runner = build_runner(Arc::new(engine), &config.runner).unwrap();

    let err = runner.submit("spin", Payload::new()).await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::IterationLimit);
    assert_eq!(err.context.get("task_id").map(String::as_str), Some("loop"));
    assert!(runner.is_stopped());
}
