use crate::core::types::{ErrorCategory, ErrorSeverity};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Debug)]
pub struct AppError {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub code: String,
    pub message: String,
    pub context: HashMap<String, String>,
    pub occurred_at: DateTime<Utc>,
    pub source: Option<anyhow::Error>,
}

impl AppError {
    pub fn new<T: Into<String>>(category: ErrorCategory, message: T) -> Self {
        let severity = match category {
            ErrorCategory::QueueFull | ErrorCategory::Cancelled => ErrorSeverity::Warning,
            ErrorCategory::ParseError
            | ErrorCategory::EvalError
            | ErrorCategory::UnknownFunction
            | ErrorCategory::InvalidArgument
            | ErrorCategory::CoercionError
            | ErrorCategory::UnknownAction
            | ErrorCategory::InvalidInput
            | ErrorCategory::TaskFailed
            | ErrorCategory::DuplicateRegistration
            | ErrorCategory::ValidationError
            | ErrorCategory::IterationLimit
            | ErrorCategory::RunnerStopped
            | ErrorCategory::SerializationError
            | ErrorCategory::IoError
            | ErrorCategory::InternalError => ErrorSeverity::Error,
        };
        AppError {
            category,
            severity,
            code: default_code(category).to_string(),
            message: message.into(),
            context: HashMap::new(),
            occurred_at: Utc::now(),
            source: None,
        }
    }

    pub fn with_source<T: Into<String>>(
        category: ErrorCategory,
        message: T,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        let mut error = AppError::new(category, message);
        error.source = Some(anyhow::anyhow!(source));
        error
    }

    pub fn with_context<T: Into<String>>(mut self, context: T) -> Self {
        self.context.insert("context".to_string(), context.into());
        self
    }

    pub fn with_code<T: Into<String>>(mut self, code: T) -> Self {
        self.code = code.into();
        self
    }

    pub fn add_context(&mut self, key: &str, value: &str) {
        self.context.insert(key.to_string(), value.to_string());
    }

    pub fn severity(&self) -> ErrorSeverity {
        self.severity
    }

    /// Only admission back-pressure is worth retrying at the submit boundary.
    pub fn is_retryable(&self) -> bool {
        self.category == ErrorCategory::QueueFull
    }

    /// Wrap an activity or behavior failure as a task failure, keeping the original as source.
    pub fn task_failed(task_id: &str, cause: AppError) -> Self {
        let mut error = AppError::new(
            ErrorCategory::TaskFailed,
            format!("task {} failed: {}", task_id, cause.message),
        )
        .with_code("FLOW-TASK-001");
        error.add_context("task_id", task_id);
        error.add_context("cause_code", &cause.code);
        error.add_context("cause_category", &cause.category.to_string());
        error.source = Some(anyhow::Error::new(cause));
        error
    }

    /// Category of the innermost wrapped AppError, or this error's category.
    pub fn root_category(&self) -> ErrorCategory {
        self.source
            .as_ref()
            .and_then(|source| source.downcast_ref::<AppError>())
            .map(AppError::root_category)
            .unwrap_or(self.category)
    }
}

fn default_code(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::ParseError => "EXPR-PARSE-001",
        ErrorCategory::EvalError => "EXPR-EVAL-001",
        ErrorCategory::UnknownFunction => "EXPR-FUNC-001",
        ErrorCategory::InvalidArgument => "EXPR-FUNC-002",
        ErrorCategory::CoercionError => "DATA-COERCE-001",
        ErrorCategory::UnknownAction => "RUN-ACTION-001",
        ErrorCategory::InvalidInput => "RUN-INPUT-001",
        ErrorCategory::QueueFull => "RUN-QUEUE-001",
        ErrorCategory::TaskFailed => "FLOW-TASK-001",
        ErrorCategory::DuplicateRegistration => "REG-DUP-001",
        ErrorCategory::ValidationError => "DEF-VALID-001",
        ErrorCategory::Cancelled => "RUN-CANCEL-001",
        ErrorCategory::IterationLimit => "FLOW-ITER-001",
        ErrorCategory::RunnerStopped => "RUN-STOP-001",
        ErrorCategory::SerializationError => "SER-001",
        ErrorCategory::IoError => "IO-001",
        ErrorCategory::InternalError => "INTERNAL-001",
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.category, self.message)?;
        if !self.context.is_empty() {
            write!(f, " (Context: {:?})", self.context)?;
        }
        if let Some(ref source) = self.source {
            write!(f, "\nCaused by: {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        let mut error = AppError::new(ErrorCategory::InternalError, e.to_string());
        error.source = Some(e);
        error
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        let mut error = AppError::new(ErrorCategory::IoError, e.to_string());
        error.source = Some(anyhow::anyhow!(e));
        error
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        let mut error = AppError::new(ErrorCategory::SerializationError, e.to_string());
        error.source = Some(anyhow::anyhow!(e));
        error
    }
}
