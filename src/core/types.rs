use serde::{Deserialize, Serialize};

/// Error category enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Malformed expression or mapping text.
    ParseError,
    /// Expression evaluation failure.
    EvalError,
    UnknownFunction,
    InvalidArgument,
    /// Type mismatch while coercing a value into an attribute.
    CoercionError,
    UnknownAction,
    InvalidInput,
    QueueFull,
    /// Wraps an activity's own failure.
    TaskFailed,
    DuplicateRegistration,
    /// Invalid action definition or configuration.
    ValidationError,
    Cancelled,
    IterationLimit,
    RunnerStopped,
    SerializationError,
    IoError,
    InternalError,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Error severity enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Error,
    Warning,
    Info,
}
