//! Settings for the generation client and the pipeline.
//!
//! Everything is an explicitly constructed value passed to the component that
//! needs it; no module-level state. Defaults match the tuning the service
//! shipped with (conservative sampling, 16k context window).

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Crate-level constants.
pub const APP_NAME: &str = "casegen";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Decoding options forwarded to the generation service on every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Sampling temperature. Low keeps scenario output close to the
    /// source documentation.
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    /// Maximum tokens the model may generate per call (`num_predict`).
    pub max_output_tokens: u32,
    /// Context window requested from the model (`num_ctx`).
    pub context_window: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            top_p: 0.9,
            top_k: 40,
            max_output_tokens: 8192,
            context_window: 16_000,
        }
    }
}

/// Knobs for the pipeline worker and the batch/fallback executor.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Chunk budget for document segmentation, in approximate tokens.
    pub chunk_budget_tokens: usize,
    /// How many test paths are elaborated per generation call before the
    /// fallback executor starts splitting.
    pub scenario_batch_size: usize,
    /// Attempts per work unit for transient and malformed failures.
    pub max_attempts: u32,
    /// Base of the exponential retry backoff, in seconds. Tests set 0.
    pub backoff_base_secs: u64,
    /// Per-call timeout for the generation service, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            chunk_budget_tokens: 12_000,
            scenario_batch_size: 4,
            max_attempts: 3,
            backoff_base_secs: 2,
            request_timeout_secs: 300,
        }
    }
}

/// Optional user-supplied prompt additions, carried per deployment.
///
/// When present these are appended verbatim to the paths/scenarios prompt
/// templates so generated output follows the user's house conventions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPromptConfig {
    /// Extra requirements for test-path generation.
    pub paths_requirements: Option<String>,
    /// Extra requirements for scenario elaboration.
    pub scenario_requirements: Option<String>,
    /// Example documentation fragment, paired with `example_scenarios`.
    pub example_documentation: Option<String>,
    /// Example scenarios matching `example_documentation`.
    pub example_scenarios: Vec<String>,
}

impl UserPromptConfig {
    pub fn has_example(&self) -> bool {
        self.example_documentation.is_some() && !self.example_scenarios.is_empty()
    }
}

/// Default `RUST_LOG`-style filter when the environment does not set one.
pub fn default_log_filter() -> String {
    format!("{APP_NAME}=info")
}

/// Initialize tracing for the embedding process.
///
/// Call once at startup; honors `RUST_LOG` when set.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_log_filter())),
        )
        .init();
}
