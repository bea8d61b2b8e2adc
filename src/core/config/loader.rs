#![allow(clippy::result_large_err)]

use super::{MicroflowConfig, RunnerType};
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::logging::ConsoleOutput;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default config file name looked up by [`ConfigLoader::load_from_dir`].
pub const CONFIG_FILE_NAME: &str = "microflow.toml";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load config from `dir/microflow.toml`, then environment overrides, then validate.
    /// A missing file means defaults.
    pub fn load_from_dir(dir: &Path) -> Result<MicroflowConfig, AppError> {
        Self::load(Some(&dir.join(CONFIG_FILE_NAME)))
    }

    /// Load config from an optional file path; environment variables override file values.
    pub fn load(path: Option<&Path>) -> Result<MicroflowConfig, AppError> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?.unwrap_or_default(),
            None => MicroflowConfig::default(),
        };
        Self::apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from specific file path
    /// Returns Ok(None) if file doesn't exist
    pub fn load_from_file(path: &Path) -> Result<Option<MicroflowConfig>, AppError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::new(
                ErrorCategory::IoError,
                format!("Failed to read config file {}: {}", path.display(), e),
            )
        })?;

        let config = Self::parse_str(&content).map_err(|mut err| {
            err.add_context("path", &path.display().to_string());
            err
        })?;
        Ok(Some(config))
    }

    pub fn parse_str(content: &str) -> Result<MicroflowConfig, AppError> {
        toml::from_str(content).map_err(|e| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("Failed to parse config: {}", e),
            )
            .with_code("CFG-PARSE-001")
        })
    }

    /// Apply environment variable overrides to the configuration.
    /// Unparsable values are errors rather than silently ignored.
    pub fn apply_env_overrides(config: &mut MicroflowConfig) -> Result<(), AppError> {
        if let Some(runner_type) = env_parse::<RunnerType>("MICROFLOW_RUNNER_TYPE")? {
            config.runner.runner_type = runner_type;
        }
        if let Some(count) = env_parse::<usize>("MICROFLOW_WORKER_COUNT")? {
            config.runner.worker_count = count;
        }
        if let Some(capacity) = env_parse::<usize>("MICROFLOW_QUEUE_CAPACITY")? {
            config.runner.queue_capacity = capacity;
        }
        if let Some(raw) = env_value("MICROFLOW_STOP_ON_ERROR") {
            config.runner.stop_on_error = parse_flag("MICROFLOW_STOP_ON_ERROR", &raw)?;
        }
        if let Some(timeout) = env_value("MICROFLOW_RUN_TIMEOUT") {
            config.runner.run_timeout = Some(timeout);
        }
        if let Some(limit) = env_parse::<usize>("MICROFLOW_PARALLEL_LIMIT")? {
            config.runner.parallel_limit = limit;
        }
        if let Some(limit) = env_parse::<usize>("MICROFLOW_MAX_TASK_ITERATIONS")? {
            config.runner.max_task_iterations = limit;
        }

        if let Some(level) = env_value("MICROFLOW_LOG_LEVEL") {
            config.logging.default_level = level;
        }
        if let Some(dir) = env_value("MICROFLOW_LOG_DIR") {
            config.logging.log_dir = Some(PathBuf::from(dir));
            config.logging.enable_file = true;
        }
        if let Some(output) = env_parse::<ConsoleOutput>("MICROFLOW_LOG_CONSOLE")? {
            config.logging.console_output = output;
        }
        Ok(())
    }

    /// Get documentation for supported environment variables
    pub fn env_var_documentation() -> &'static [&'static str] {
        &[
            "MICROFLOW_RUNNER_TYPE - Runner implementation (direct/pooled, default: pooled)",
            "MICROFLOW_WORKER_COUNT - Worker tasks of the pooled runner (default: 5)",
            "MICROFLOW_QUEUE_CAPACITY - Runs allowed to wait for a worker (default: 50)",
            "MICROFLOW_STOP_ON_ERROR - Stop the runner after a failed run (true/false, default: true)",
            "MICROFLOW_RUN_TIMEOUT - Per-run deadline such as 30s or 2m (default: none)",
            "MICROFLOW_PARALLEL_LIMIT - Ready tasks evaluated per tick (default: 4)",
            "MICROFLOW_MAX_TASK_ITERATIONS - Evaluations allowed per task (default: 1000)",
            "MICROFLOW_LOG_LEVEL - Default tracing filter when RUST_LOG is unset (default: info)",
            "MICROFLOW_LOG_DIR - Directory of the log file; enables the file sink",
            "MICROFLOW_LOG_CONSOLE - Console sink (stdout/stderr/none, default: stderr)",
        ]
    }
}

fn env_value(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn env_parse<T>(name: &str) -> Result<Option<T>, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_value(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|err| {
            invalid_env(name, &raw, &err.to_string())
        }),
    }
}

fn parse_flag(name: &str, raw: &str) -> Result<bool, AppError> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(invalid_env(name, raw, "expected true or false")),
    }
}

fn invalid_env(name: &str, raw: &str, reason: &str) -> AppError {
    let mut err = AppError::new(
        ErrorCategory::ValidationError,
        format!("invalid value '{}' for {}: {}", raw, name, reason),
    )
    .with_code("CFG-ENV-001");
    err.add_context("variable", name);
    err
}
