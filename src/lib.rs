//! casegen: orchestration core for a document-to-test-scenario service.
//!
//! One background worker drives queued tasks through four dependent stages
//! (extract → segment → paths → scenarios) against a slow, fallible local
//! generation model, while the lock-protected [`TaskQueue`] gives every
//! concurrent caller a consistent view of queue position and time remaining.
//!
//! The HTTP layer, document parsers and report writer are collaborators
//! behind traits ([`pipeline::DocumentSource`], [`pipeline::ArtifactSink`]);
//! the generation service is reached through [`generation::GenerationClient`].

pub mod config;
pub mod generation;
pub mod pipeline;
pub mod queue;
pub mod time_estimation;
pub mod worker;

pub use config::{GenerationOptions, PipelineSettings, UserPromptConfig};
pub use generation::{GenerationClient, GenerationError, GenerationRequest, OllamaClient};
pub use pipeline::{PipelineError, PipelineRunner};
pub use queue::{QueueError, TaskQueue, TaskStatus};
pub use worker::{spawn_worker, WorkerHandle};
