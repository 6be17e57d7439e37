use cryocat_core::CoreError;

/// Errors raised by storage layers and the entity store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// Mutation attempted against an entity that only exists in the static layer.
    #[error("Read-only violation: {0}")]
    ReadOnly(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Codec error: {0}")]
    Codec(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl StoreError {
    pub(crate) fn io(path: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::NotFound(path.to_string());
        }
        Self::Io {
            path: path.to_string(),
            source,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

/// Convenience alias for store results.
pub type StoreResult<T> = Result<T, StoreError>;
