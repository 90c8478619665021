use thiserror::Error;

/// Engine-wide error taxonomy. Handlers map these onto HTTP codes; the
/// reconciler uses `SideEffect` to keep collaborator failures out of the
/// status-mutation path.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed on `{field}`: {message}")]
    Validation { field: &'static str, message: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("webhook signature rejected: {0}")]
    Signature(String),

    #[error("payment gateway error: {0}")]
    Gateway(String),

    #[error("side effect failed: {0}")]
    SideEffect(String),

    #[error("storage error: {0}")]
    Store(String),
}

impl EngineError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Retrying the operation cannot change the outcome for these kinds.
    pub fn is_permanent(&self) -> bool {
        !matches!(self, Self::Gateway(_) | Self::Store(_) | Self::SideEffect(_))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Store(format!("serialization: {}", err))
    }
}
