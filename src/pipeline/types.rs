//! Core types for the scenario pipeline.
//!
//! These model the full lifecycle:
//! Sectioned document → Segments → Test paths → Scenarios → Artifact.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{SinkError, SourceError};

// ═══════════════════════════════════════════════════════════
// Stages
// ═══════════════════════════════════════════════════════════

/// Number of pipeline stages.
pub const STAGE_COUNT: usize = 4;

/// The four ordered pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Extract,
    Segment,
    Paths,
    Scenarios,
}

impl StageKind {
    pub fn index(&self) -> usize {
        match self {
            Self::Extract => 0,
            Self::Segment => 1,
            Self::Paths => 2,
            Self::Scenarios => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Segment => "segment",
            Self::Paths => "paths",
            Self::Scenarios => "scenarios",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════
// Document input (supplied by the parser collaborator)
// ═══════════════════════════════════════════════════════════

/// Raw image bytes attached to a section, described during extraction.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// One section of already-extracted document text.
#[derive(Debug, Clone)]
pub struct DocumentSection {
    pub title: String,
    pub content: String,
    pub images: Vec<ImagePayload>,
}

/// Supplies the sectioned text of an uploaded document. Implemented by the
/// (out-of-scope) format parsers.
pub trait DocumentSource: Send + Sync {
    fn fetch(&self, user_id: &str, filename: &str) -> Result<Vec<DocumentSection>, SourceError>;
}

// ═══════════════════════════════════════════════════════════
// Stage artifacts
// ═══════════════════════════════════════════════════════════

/// A logical slice of the documentation covering one topic, with enough
/// context (prerequisites) to be processed independently.
#[derive(Debug, Clone, Serialize)]
pub struct Segment {
    /// `SEG_001`-style identifier.
    pub id: String,
    pub topic: String,
    pub prerequisites: Vec<String>,
    pub content: String,
}

impl Segment {
    /// Section content prefixed with its prerequisites, as fed to prompts.
    pub fn full_text(&self) -> String {
        if self.prerequisites.is_empty() {
            return self.content.clone();
        }
        let mut text = String::from("PREREQUISITES:\n");
        for p in &self.prerequisites {
            text.push_str("- ");
            text.push_str(p);
            text.push('\n');
        }
        text.push('\n');
        text.push_str(&self.content);
        text
    }
}

/// Flavor of a test path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathKind {
    HappyPath,
    Negative,
    EdgeCase,
}

impl PathKind {
    /// Lenient mapping from model output; unknown labels default to happy.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "negative" => Self::Negative,
            "edge_case" | "edge" | "boundary" => Self::EdgeCase,
            _ => Self::HappyPath,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HappyPath => "happy_path",
            Self::Negative => "negative",
            Self::EdgeCase => "edge_case",
        }
    }
}

/// A test path: one route through a documented feature, to be elaborated
/// into a full scenario.
#[derive(Debug, Clone, Serialize)]
pub struct TestPath {
    /// `PATH_001`-style identifier, globally numbered.
    pub id: String,
    pub title: String,
    pub description: String,
    pub kind: PathKind,
    pub source_segment: String,
    pub source_topic: String,
    pub prerequisites: Vec<String>,
}

/// A single ordered step of a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioStep {
    #[serde(default)]
    pub step_number: u32,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub expected_result: String,
}

/// A fully elaborated test scenario.
#[derive(Debug, Clone, Serialize)]
pub struct Scenario {
    /// `SCEN_001`-style identifier, globally numbered.
    pub scenario_id: String,
    /// `TC_0001`-style test-case identifier.
    pub test_case_id: String,
    pub kind: PathKind,
    pub test_path: String,
    pub title: String,
    pub prerequisites: Vec<String>,
    pub documentation_section: String,
    pub steps: Vec<ScenarioStep>,
    /// True when generation could not produce real content for this item
    /// and it needs manual follow-up.
    pub degraded: bool,
}

/// Consumes the final scenario set; returns a reference to the written
/// artifact. Implemented by the (out-of-scope) report writer.
pub trait ArtifactSink: Send + Sync {
    fn write_scenarios(
        &self,
        task_id: Uuid,
        user_id: &str,
        scenarios: &[Scenario],
    ) -> Result<String, SinkError>;
}

// ═══════════════════════════════════════════════════════════
// Progress events
// ═══════════════════════════════════════════════════════════

/// Progress notifications emitted by the runner, for UIs that want more than
/// the polled queue snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started {
        task_id: Uuid,
        total_stages: usize,
    },
    StageProgress {
        task_id: Uuid,
        stage: StageKind,
        completed: usize,
        total: usize,
    },
    Completed {
        task_id: Uuid,
        scenario_count: usize,
    },
}
