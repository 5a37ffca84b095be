#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Typed refusal returned across the adapter boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("step '{step_id}' needs a capability this backend does not have")]
    UnsupportedCapability { step_id: String },
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("transient backend error: {0}")]
    Transient(String),
    #[error("backend rejected the request: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    #[error("invalid step configuration: {0}")]
    Config(String),
    #[error("missing input '{0}'")]
    MissingInput(String),
    #[error("{0}")]
    Failed(String),
}
