use crate::core::data::coerce::to_display_string;
use crate::core::data::{AttrDecl, AttrType};
use crate::core::error::AppError;
use crate::core::flow::activity::{Activity, ActivityContext, ActivityMetadata};
use crate::core::types::ErrorCategory;
use async_trait::async_trait;

/// Always fails with the mapped `message`; `data` is attached as error context.
pub struct ErrorActivity {
    metadata: ActivityMetadata,
}

impl ErrorActivity {
    pub fn new() -> Self {
        Self {
            metadata: ActivityMetadata::new("error")
                .with_input(AttrDecl::new("message", AttrType::String))
                .with_input(AttrDecl::new("data", AttrType::Any)),
        }
    }
}

impl Default for ErrorActivity {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Activity for ErrorActivity {
    fn metadata(&self) -> &ActivityMetadata {
        &self.metadata
    }

    async fn eval(&self, ctx: &mut ActivityContext) -> Result<bool, AppError> {
        let message = match ctx.input_string("message") {
            m if m.is_empty() => "error activity invoked".to_string(),
            m => m,
        };
        let mut error =
            AppError::new(ErrorCategory::TaskFailed, message).with_code("ACT-ERROR-001");
        if let Some(data) = ctx.input_value("data").filter(|data| !data.is_null()) {
            error.add_context("data", &to_display_string(&data));
        }
        Err(error)
    }
}
