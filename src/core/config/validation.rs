#![allow(clippy::result_large_err)]

use super::{MicroflowConfig, RunnerConfig};
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;

pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate configuration rules
    pub fn validate(config: &MicroflowConfig) -> Result<(), AppError> {
        Self::validate_runner(&config.runner)?;
        config.logging.validate().map_err(|err| {
            AppError::new(ErrorCategory::ValidationError, err.to_string())
                .with_code("CFG-VALID-003")
        })
    }

    pub fn validate_runner(runner: &RunnerConfig) -> Result<(), AppError> {
        if runner.worker_count == 0 {
            return Err(invalid("runner.workerCount must be at least 1"));
        }
        if runner.parallel_limit == 0 {
            return Err(invalid("runner.parallelLimit must be at least 1"));
        }
        if runner.max_task_iterations == 0 {
            return Err(invalid("runner.maxTaskIterations must be at least 1"));
        }
        runner.run_timeout()?;
        Ok(())
    }
}

fn invalid(message: &str) -> AppError {
    AppError::new(ErrorCategory::ValidationError, message).with_code("CFG-VALID-001")
}
