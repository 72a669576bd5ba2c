//! Access to the external text-generation service.
//!
//! The pipeline only ever sees the [`GenerationClient`] trait and the
//! [`GenerationError`] taxonomy; the production implementation is an
//! Ollama-style HTTP endpoint reached with a blocking client.

pub mod error;
pub mod ollama;
pub mod types;

pub use error::GenerationError;
pub use ollama::{MockGenerationClient, OllamaClient};
pub use types::{GenerationClient, GenerationRequest};
