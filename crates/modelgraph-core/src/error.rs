use thiserror::Error;

/// Neo4j status code reported when a uniqueness constraint rejects a write.
pub const CONSTRAINT_VALIDATION_FAILED: &str = "Neo.ClientError.Schema.ConstraintValidationFailed";

#[derive(Error, Debug)]
pub enum ModelGraphError {
    #[error("Validation failed{}: {reason}", .field.as_ref().map(|f| format!(" on '{}'", f)).unwrap_or_default())]
    Validation {
        field: Option<String>,
        reason: String,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Statement error{}: {message}", .code.as_ref().map(|c| format!(" [{}]", c)).unwrap_or_default())]
    Statement {
        code: Option<String>,
        message: String,
    },

    #[error("Invalid composition: {0}")]
    InvalidComposition(String),

    #[error("Cannot write to an unsaved root: {0}")]
    UnsavedRoot(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ModelGraphError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            field: None,
            reason: reason.into(),
        }
    }

    pub fn field_validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: Some(field.into()),
            reason: reason.into(),
        }
    }

    pub fn statement(message: impl Into<String>) -> Self {
        Self::Statement {
            code: None,
            message: message.into(),
        }
    }

    /// HTTP-equivalent status for callers that surface errors over an API.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } | Self::InvalidComposition(_) | Self::UnsavedRoot(_) => 400,
            Self::Conflict(_) => 409,
            _ => 500,
        }
    }

    /// True when the database rejected the statement because a unique key collided.
    pub fn is_uniqueness_violation(&self) -> bool {
        match self {
            Self::Conflict(_) => true,
            Self::Statement { code, message } => {
                code.as_deref() == Some(CONSTRAINT_VALIDATION_FAILED)
                    || message.contains("already exists with label")
            }
            _ => false,
        }
    }

    /// Rewrites a uniqueness collision into `Conflict`, leaving every other error untouched.
    pub fn into_conflict(self) -> Self {
        if !self.is_uniqueness_violation() {
            return self;
        }
        match self {
            Self::Statement { message, .. } => Self::Conflict(message),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelGraphError>;
