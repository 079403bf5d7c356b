//! Error types for the model server.

use batchq_common::StoreError;

/// Failure of an inference call. Always covers the whole batch.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Engine not available: {0}")]
    Unavailable(String),

    #[error("Inference failed: {0}")]
    InferenceFailed(String),

    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error("Engine returned {actual} result sets for a batch of {expected}")]
    ResultCountMismatch { expected: usize, actual: usize },

    #[error("Failed to load labels: {0}")]
    Labels(String),
}

/// Failure of one dispatch cycle.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The store could not be reached. Fatal to the worker loop.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The engine failed. The cycle is abandoned and its jobs are lost.
    #[error(transparent)]
    Engine(#[from] EngineError),
}
