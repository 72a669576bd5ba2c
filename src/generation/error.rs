//! Failure taxonomy for generation-service calls.
//!
//! The fallback executor branches on these variants: transient classes are
//! retried in place, context overflow triggers unit splitting, malformed
//! output is retried then degraded, and only `Fatal` aborts a task.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenerationError {
    /// Capacity or resource failure on the service side. Retry the same
    /// unit after a backoff.
    #[error("generation service returned {status}: {detail}")]
    Transient { status: u16, detail: String },

    /// The combined prompt and expected output exceed the model's context
    /// window. Not retryable as-is; the work unit must shrink.
    #[error("context window exceeded: {0}")]
    ContextOverflow(String),

    /// The model answered, but the answer is empty or unparsable.
    #[error("malformed model output: {0}")]
    Malformed(String),

    #[error("generation request timed out after {0}s")]
    Timeout(u64),

    #[error("cannot reach generation service at {0}")]
    Connection(String),

    /// Unclassified failure. Propagates and fails the current task.
    #[error("{0}")]
    Fatal(String),
}

impl GenerationError {
    /// Retryable in place, with the same work unit.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient { .. } | Self::Timeout(_) | Self::Connection(_) | Self::Malformed(_)
        )
    }

    pub fn is_overflow(&self) -> bool {
        matches!(self, Self::ContextOverflow(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classes_are_retryable() {
        assert!(GenerationError::Transient {
            status: 503,
            detail: "loading model".into()
        }
        .is_retryable());
        assert!(GenerationError::Timeout(300).is_retryable());
        assert!(GenerationError::Connection("http://localhost:11434".into()).is_retryable());
        assert!(GenerationError::Malformed("empty response".into()).is_retryable());
    }

    #[test]
    fn overflow_and_fatal_are_not_retryable() {
        assert!(!GenerationError::ContextOverflow("prompt too large".into()).is_retryable());
        assert!(!GenerationError::Fatal("model not found".into()).is_retryable());
    }

    #[test]
    fn overflow_is_its_own_class() {
        assert!(GenerationError::ContextOverflow("x".into()).is_overflow());
        assert!(!GenerationError::Timeout(10).is_overflow());
    }
}
