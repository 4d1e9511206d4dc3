use thiserror::Error;

use crate::domain::TaskType;
use crate::fault::ErrorCategory;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("handler not found for task_type={0}")]
    HandlerNotFound(TaskType),

    #[error("invalid value for '{field}': {reason}")]
    Validation { field: String, reason: String },

    #[error("invalid route pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid validation rule for '{pattern}': {reason}")]
    InvalidRule { pattern: String, reason: String },

    #[error("host API call failed: {0}")]
    HostApi(String),

    #[error("task failed: {0}")]
    Task(String),

    #[error("handler panicked: {0}")]
    Panic(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Taxonomy bucket used when this error reaches the error handler.
    pub fn category(&self) -> ErrorCategory {
        match self {
            BridgeError::HandlerNotFound(_) | BridgeError::Task(_) | BridgeError::Panic(_) => {
                ErrorCategory::TaskExecution
            }
            BridgeError::Validation { .. } | BridgeError::Json(_) => ErrorCategory::Validation,
            BridgeError::InvalidPattern { .. }
            | BridgeError::InvalidRule { .. }
            | BridgeError::Config(_) => ErrorCategory::Configuration,
            BridgeError::HostApi(_) => ErrorCategory::HostApi,
            BridgeError::Io(_) => ErrorCategory::System,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_name_the_field() {
        let err = BridgeError::validation("width", "must be positive");
        assert_eq!(err.to_string(), "invalid value for 'width': must be positive");
        assert_eq!(err.category(), ErrorCategory::Validation);
    }

    #[test]
    fn missing_handler_is_a_task_execution_failure() {
        let err = BridgeError::HandlerNotFound(TaskType::new("ghost"));
        assert!(err.to_string().contains("ghost"));
        assert_eq!(err.category(), ErrorCategory::TaskExecution);
    }
}
