use crate::core::error::AppError;
use crate::core::flow::activity::{Activity, ActivityContext, ActivityMetadata};
use async_trait::async_trait;

pub struct NoopActivity {
    metadata: ActivityMetadata,
}

impl NoopActivity {
    pub fn new() -> Self {
        Self {
            metadata: ActivityMetadata::new("noop"),
        }
    }
}

impl Default for NoopActivity {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Activity for NoopActivity {
    fn metadata(&self) -> &ActivityMetadata {
        &self.metadata
    }

    async fn eval(&self, _ctx: &mut ActivityContext) -> Result<bool, AppError> {
        Ok(true)
    }
}
