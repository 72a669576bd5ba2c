//! Pipeline-level error types.
//!
//! Separate from the generation taxonomy: these decide the fate of a whole
//! task, while `GenerationError` decides the fate of a single work unit.

use thiserror::Error;

use crate::generation::GenerationError;

/// Failure of the document collaborator to supply sectioned text.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source document not found: {0}")]
    NotFound(String),

    #[error("failed to read source document: {0}")]
    Unavailable(String),
}

/// Failure of the report-writer collaborator to persist the artifact.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write result artifact: {0}")]
    WriteFailed(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Stage-1 input yielded no usable text: the one proven-unrecoverable
    /// state that fails a whole task.
    #[error("document produced no usable text")]
    EmptyDocument,

    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("document source error: {0}")]
    Source(#[from] SourceError),

    #[error("artifact sink error: {0}")]
    Sink(#[from] SinkError),

    /// Cooperative stop honored between work units. Not a failure; the
    /// worker transitions the task to Stopped.
    #[error("task stopped by user request")]
    Stopped,
}

impl PipelineError {
    pub fn is_stop(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}
