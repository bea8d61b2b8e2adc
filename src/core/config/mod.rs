use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::logging::config::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Main microflow configuration loaded from `microflow.toml`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MicroflowConfig {
    /// Runner selection and run limits
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Logging sinks and level
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MicroflowConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        ConfigValidator::validate(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerType {
    Direct,
    #[default]
    Pooled,
}

impl fmt::Display for RunnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerType::Direct => write!(f, "direct"),
            RunnerType::Pooled => write!(f, "pooled"),
        }
    }
}

impl FromStr for RunnerType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "direct" => Ok(RunnerType::Direct),
            "pooled" => Ok(RunnerType::Pooled),
            _ => Err(format!(
                "invalid runner type '{}'; supported values are direct, pooled",
                value
            )),
        }
    }
}

/// Runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerConfig {
    #[serde(default)]
    pub runner_type: RunnerType,

    /// Worker tasks of the pooled runner
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Runs allowed to wait for a worker
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Stop the runner after the first failed run
    #[serde(default = "default_stop_on_error")]
    pub stop_on_error: bool,

    /// Per-run deadline in humantime form (`30s`, `2m`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_timeout: Option<String>,

    /// Ready tasks evaluated together in one tick
    #[serde(default = "default_parallel_limit")]
    pub parallel_limit: usize,

    /// Entries allowed per task within a run; iterator elements are not entries
    #[serde(default = "default_max_task_iterations")]
    pub max_task_iterations: usize,
}

fn default_worker_count() -> usize {
    5
}

fn default_queue_capacity() -> usize {
    50
}

fn default_stop_on_error() -> bool {
    true
}

fn default_parallel_limit() -> usize {
    4
}

fn default_max_task_iterations() -> usize {
    1000
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            runner_type: RunnerType::default(),
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
            stop_on_error: default_stop_on_error(),
            run_timeout: None,
            parallel_limit: default_parallel_limit(),
            max_task_iterations: default_max_task_iterations(),
        }
    }
}

impl RunnerConfig {
    /// Parsed `runTimeout`; `None` when no deadline applies.
    pub fn run_timeout(&self) -> Result<Option<Duration>, AppError> {
        match self.run_timeout.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(text) => humantime::parse_duration(text).map(Some).map_err(|err| {
                AppError::new(
                    ErrorCategory::ValidationError,
                    format!("runner.runTimeout '{}' is not a duration: {}", text, err),
                )
                .with_code("CFG-VALID-002")
            }),
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        ConfigValidator::validate_runner(self)
    }
}

pub mod loader;
pub mod validation;

pub use loader::ConfigLoader;
pub use validation::ConfigValidator;
