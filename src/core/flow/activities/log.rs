use crate::core::data::{AttrDecl, AttrType};
use crate::core::error::AppError;
use crate::core::flow::activity::{Activity, ActivityContext, ActivityMetadata};
use async_trait::async_trait;
use serde_json::json;

/// Writes `message` through `tracing` at `level` (`trace`..`error`, default `info`).
pub struct LogActivity {
    metadata: ActivityMetadata,
}

impl LogActivity {
    pub fn new() -> Self {
        Self {
            metadata: ActivityMetadata::new("log")
                .with_input(AttrDecl::new("message", AttrType::String))
                .with_input(AttrDecl::new("level", AttrType::String).with_default(json!("info"))),
        }
    }
}

impl Default for LogActivity {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Activity for LogActivity {
    fn metadata(&self) -> &ActivityMetadata {
        &self.metadata
    }

    async fn eval(&self, ctx: &mut ActivityContext) -> Result<bool, AppError> {
        let message = ctx.input_string("message");
        let level = ctx.input_string("level").to_lowercase();
        let task_id = ctx.task_id.as_str();
        let run_id = ctx.run_id.to_string();
        match level.as_str() {
            "trace" => tracing::trace!(task_id, run_id = %run_id, "{}", message),
            "debug" => tracing::debug!(task_id, run_id = %run_id, "{}", message),
            "warn" | "warning" => tracing::warn!(task_id, run_id = %run_id, "{}", message),
            "error" => tracing::error!(task_id, run_id = %run_id, "{}", message),
            _ => tracing::info!(task_id, run_id = %run_id, "{}", message),
        }
        Ok(true)
    }
}
