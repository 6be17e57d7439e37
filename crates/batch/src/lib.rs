//! Batch mutation engine: copy, move and remove entities across runs.

pub mod engine;
pub mod error;
pub mod report;
pub mod settings;

pub use engine::{BatchEngine, MoveState, RemoveRequest, TransferRequest};
pub use error::BatchError;
pub use report::{BatchReport, BatchSummary, RunEntry, RunResult};
pub use settings::EngineSettings;
