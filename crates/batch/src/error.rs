use cryocat_core::CoreError;
use cryocat_store::StoreError;

/// Structural failures that abort a batch before any run is dispatched.
///
/// Per-object failures never surface here; they are recorded in the
/// [`RunResult`](crate::report::RunResult) of the affected run.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("{0}")]
    InvalidUri(#[source] CoreError),

    #[error("Safety gate: refusing to remove pattern '{pattern}' without --force or --dry-run")]
    SafetyGate { pattern: String },

    #[error("Unknown run(s): {}", .0.join(", "))]
    UnknownRun(Vec<String>),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Worker pool error: {0}")]
    Worker(String),
}
