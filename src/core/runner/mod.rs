#![allow(clippy::result_large_err)] // Runner APIs return AppError directly for structured diagnostics without boxing.

//! Admission layer in front of the [`Engine`]: runs actions inline or on a bounded worker pool.

pub mod direct;
pub mod engine;
pub mod pooled;

pub use direct::DirectRunner;
pub use engine::{Engine, EngineBuilder};
pub use pooled::PooledRunner;

use crate::core::config::{RunnerConfig, RunnerType};
use crate::core::data::Payload;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait ActionRunner: Send + Sync {
    /// Run `action_id` with `inputs` and return its outputs.
    async fn submit(&self, action_id: &str, inputs: Payload) -> Result<Payload, AppError> {
        self.submit_with_cancel(action_id, inputs, CancellationToken::new())
            .await
    }

    async fn submit_with_cancel(
        &self,
        action_id: &str,
        inputs: Payload,
        cancel: CancellationToken,
    ) -> Result<Payload, AppError>;

    /// True once the runner refuses new work.
    fn is_stopped(&self) -> bool;

    /// Stop accepting work and release workers after queued runs drain.
    async fn shutdown(&self);
}

/// Build the runner selected by `config` around a shared engine.
///
/// The pooled runner spawns its workers on the current tokio runtime.
pub fn build_runner(
    engine: Arc<Engine>,
    config: &RunnerConfig,
) -> Result<Arc<dyn ActionRunner>, AppError> {
    config.validate()?;
    let runner: Arc<dyn ActionRunner> = match config.runner_type {
        RunnerType::Direct => Arc::new(DirectRunner::new(engine, config.stop_on_error)),
        RunnerType::Pooled => Arc::new(PooledRunner::new(engine, config)?),
    };
    tracing::info!(
        runner_type = %config.runner_type,
        worker_count = config.worker_count,
        queue_capacity = config.queue_capacity,
        stop_on_error = config.stop_on_error,
        "runner started"
    );
    Ok(runner)
}

/// Stop state shared by a runner and its workers.
#[derive(Debug)]
pub(crate) struct RunControl {
    stop_on_error: bool,
    stopped: AtomicBool,
    root: CancellationToken,
}

impl RunControl {
    pub(crate) fn new(stop_on_error: bool) -> Self {
        Self {
            stop_on_error,
            stopped: AtomicBool::new(false),
            root: CancellationToken::new(),
        }
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub(crate) fn check(&self) -> Result<(), AppError> {
        if self.is_stopped() {
            return Err(AppError::new(
                ErrorCategory::RunnerStopped,
                "runner no longer accepts work",
            ));
        }
        Ok(())
    }

    /// Run one action on `engine`, linking the caller's token to the runner's root token.
    pub(crate) async fn execute(
        &self,
        engine: &Engine,
        action_id: &str,
        inputs: Payload,
        cancel: CancellationToken,
    ) -> Result<Payload, AppError> {
        self.check()?;
        let run_token = self.root.child_token();
        let forwarder = tokio::spawn({
            let run_token = run_token.clone();
            async move {
                tokio::select! {
                    _ = cancel.cancelled() => run_token.cancel(),
                    _ = run_token.cancelled() => {}
                }
            }
        });
        let result = engine
            .execute_with_cancel(action_id, inputs, run_token)
            .await;
        forwarder.abort();
        match result {
            Ok(summary) => Ok(summary.outputs),
            Err(err) => {
                self.observe(&err);
                Err(err)
            }
        }
    }

    /// Stop the runner when a run-level failure occurs and `stop_on_error` is set.
    fn observe(&self, err: &AppError) {
        let admission_or_cancel = matches!(
            err.category,
            ErrorCategory::Cancelled
                | ErrorCategory::QueueFull
                | ErrorCategory::UnknownAction
                | ErrorCategory::InvalidInput
                | ErrorCategory::RunnerStopped
        );
        if admission_or_cancel {
            return;
        }
        if !self.stop_on_error {
            tracing::warn!(code = %err.code, error = %err.message, "run failed");
            return;
        }
        if !self.stopped.swap(true, Ordering::SeqCst) {
            tracing::error!(
                code = %err.code,
                error = %err.message,
                "run failed, stopping runner"
            );
            self.root.cancel();
        }
    }
}
