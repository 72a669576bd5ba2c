//! Document-to-scenario pipeline.
//!
//! Four stages connected by the runner:
//! ```text
//! Extract → Segment → Paths → Scenarios
//! ```
//!
//! Each stage turns the previous stage's artifact into the next one's input,
//! calling the generation service through the batch/fallback executor so a
//! single oversized or awkward work unit can never abort a stage.

pub mod batch;
pub mod chunker;
pub mod error;
pub mod eta;
pub mod parse;
pub mod prompts;
pub mod runner;
pub mod stages;
pub mod types;

pub use batch::{BatchFallbackExecutor, RetryPolicy, UnitOutcome, UnitProcessor};
pub use chunker::{split_into_chunks, ChunkUnit};
pub use error::{PipelineError, SinkError, SourceError};
pub use eta::EtaEstimator;
pub use runner::PipelineRunner;
pub use types::{
    ArtifactSink, DocumentSection, DocumentSource, ImagePayload, PathKind, ProgressEvent,
    Scenario, ScenarioStep, Segment, StageKind, TestPath,
};
