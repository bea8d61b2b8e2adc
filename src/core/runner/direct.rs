use crate::core::data::Payload;
use crate::core::error::AppError;
use crate::core::runner::{ActionRunner, Engine, RunControl};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Executes each submission on the caller's task. Concurrency is whatever the callers bring.
#[derive(Debug)]
pub struct DirectRunner {
    engine: Arc<Engine>,
    control: RunControl,
}

impl DirectRunner {
    pub fn new(engine: Arc<Engine>, stop_on_error: bool) -> Self {
        Self {
            engine,
            control: RunControl::new(stop_on_error),
        }
    }
}

#[async_trait]
impl ActionRunner for DirectRunner {
    async fn submit_with_cancel(
        &self,
        action_id: &str,
        inputs: Payload,
        cancel: CancellationToken,
    ) -> Result<Payload, AppError> {
        self.control
            .execute(&self.engine, action_id, inputs, cancel)
            .await
    }

    fn is_stopped(&self) -> bool {
        self.control.is_stopped()
    }

    async fn shutdown(&self) {
        self.control.stop();
    }
}
