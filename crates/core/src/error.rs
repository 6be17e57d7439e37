/// Domain errors raised by the pure catalog logic (URIs, templates, config).
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("Ambiguous target '{template}': {matches} sources would collapse onto one target")]
    AmbiguousTarget { template: String, matches: usize },

    #[error("Target collision: {sources:?} all resolve to '{target}'")]
    TargetCollision { target: String, sources: Vec<String> },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CoreError {
    /// Shorthand for an [`CoreError::InvalidUri`] with a reason.
    pub fn invalid_uri(uri: &str, reason: impl Into<String>) -> Self {
        Self::InvalidUri {
            uri: uri.to_string(),
            reason: reason.into(),
        }
    }
}
