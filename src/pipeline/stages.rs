//! The four pipeline stages: processors for the fallback executor plus the
//! pure transforms between stage artifacts.
//!
//! Stage drivers live in the runner; everything here is independently
//! testable without a queue or worker.

use std::collections::HashMap;

use serde::Deserialize;

use crate::config::UserPromptConfig;
use crate::generation::{GenerationClient, GenerationRequest};

use super::batch::UnitProcessor;
use super::parse::{self, ParseError};
use super::prompts::{self, ContextTier};
use super::types::{
    DocumentSection, ImagePayload, PathKind, Scenario, ScenarioStep, Segment, TestPath,
};

/// Every scenario ships with at least this many steps; short ones are padded
/// with explicit manual-verification placeholders.
pub const MIN_SCENARIO_STEPS: usize = 3;

// ═══════════════════════════════════════════════════════════
// Stage 1: Extract
// ═══════════════════════════════════════════════════════════

/// Append one section's header and content to the combined document text.
pub fn append_section(combined: &mut String, section: &DocumentSection) {
    if !section.title.trim().is_empty() {
        combined.push_str("## ");
        combined.push_str(section.title.trim());
        combined.push_str("\n\n");
    }
    if !section.content.is_empty() {
        combined.push_str(&section.content);
        combined.push_str("\n\n");
    }
}

/// Describe one embedded image through the generation service. Failures
/// never abort extraction; the image degrades to a marker the downstream
/// stages can still reason about.
pub fn describe_image(client: &dyn GenerationClient, image: &ImagePayload) -> String {
    let request = prompts::render_image_prompt(image.bytes.clone());
    match client.generate(&request) {
        Ok(description) if !description.trim().is_empty() => description,
        Ok(_) => image_fallback(&image.name),
        Err(e) => {
            tracing::warn!(image = %image.name, error = %e, "Image description failed");
            image_fallback(&image.name)
        }
    }
}

fn image_fallback(name: &str) -> String {
    format!("[figure {name}: description unavailable]")
}

// ═══════════════════════════════════════════════════════════
// Stage 2: Segment
// ═══════════════════════════════════════════════════════════

/// One chunk of the combined document, as a work item.
#[derive(Debug, Clone)]
pub struct ChunkInput {
    pub index: usize,
    pub total: usize,
    pub text: String,
}

/// Model's analysis of one chunk.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkAnalysis {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub prerequisites: Vec<String>,
}

/// Chunk analysis is always a single-chunk unit: chunks are already sized to
/// the context budget, so batching them would only force overflow splits.
pub struct SegmentationProcessor;

impl UnitProcessor for SegmentationProcessor {
    type Item = ChunkInput;
    type Output = ChunkAnalysis;

    fn render(&self, items: &[ChunkInput], _tier: ContextTier) -> GenerationRequest {
        let chunk = &items[0];
        prompts::render_segmentation(chunk.index, chunk.total, &chunk.text)
    }

    fn parse(&self, response: &str, items: &[ChunkInput]) -> Result<Vec<ChunkAnalysis>, ParseError> {
        if items.len() != 1 {
            return Err(ParseError::Json("segmentation units are single chunks".into()));
        }
        Ok(vec![parse::parse_object(response)?])
    }

    fn placeholder(&self, item: &ChunkInput) -> ChunkAnalysis {
        ChunkAnalysis {
            topic: format!("Fragment {}", item.index + 1),
            summary: "Automatic analysis unavailable".into(),
            prerequisites: Vec::new(),
        }
    }
}

/// Merge per-chunk analyses into logical segments, one per distinct topic in
/// first-seen order. Chunks sharing a topic pool their text and
/// prerequisites. Falls back to a single whole-document segment when there
/// is nothing to merge.
pub fn merge_segments(analyses: Vec<(ChunkAnalysis, String)>, whole_document: &str) -> Vec<Segment> {
    struct Group {
        topic: String,
        prerequisites: Vec<String>,
        texts: Vec<String>,
    }

    let mut groups: Vec<Group> = Vec::new();
    for (analysis, text) in analyses {
        let topic = if analysis.topic.trim().is_empty() {
            "Untitled".to_string()
        } else {
            analysis.topic.trim().to_string()
        };
        match groups.iter_mut().find(|g| g.topic == topic) {
            Some(group) => {
                group.texts.push(text);
                for p in analysis.prerequisites {
                    if !group.prerequisites.contains(&p) {
                        group.prerequisites.push(p);
                    }
                }
            }
            None => groups.push(Group {
                topic,
                prerequisites: analysis.prerequisites,
                texts: vec![text],
            }),
        }
    }

    if groups.is_empty() {
        return vec![Segment {
            id: "SEG_001".into(),
            topic: "Whole document".into(),
            prerequisites: Vec::new(),
            content: whole_document.to_string(),
        }];
    }

    groups
        .into_iter()
        .enumerate()
        .map(|(i, g)| Segment {
            id: format!("SEG_{:03}", i + 1),
            topic: g.topic,
            prerequisites: g.prerequisites,
            content: g.texts.join("\n\n"),
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════
// Stage 3: Paths
// ═══════════════════════════════════════════════════════════

/// A test path as the model returns it, before numbering.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPath {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub kind: String,
}

/// One segment per unit; the output is the segment's whole path list.
pub struct PathsProcessor<'a> {
    pub user: &'a UserPromptConfig,
}

impl UnitProcessor for PathsProcessor<'_> {
    type Item = Segment;
    type Output = Vec<RawPath>;

    fn render(&self, items: &[Segment], tier: ContextTier) -> GenerationRequest {
        prompts::render_paths(&items[0], self.user, tier)
    }

    fn parse(&self, response: &str, items: &[Segment]) -> Result<Vec<Vec<RawPath>>, ParseError> {
        if items.len() != 1 {
            return Err(ParseError::Json("path units are single segments".into()));
        }
        let raw: Vec<RawPath> = parse::parse_array(response)?;
        if raw.is_empty() {
            return Err(ParseError::Json("model returned zero paths".into()));
        }
        Ok(vec![raw])
    }

    fn placeholder(&self, item: &Segment) -> Vec<RawPath> {
        vec![RawPath {
            title: format!("Path for: {}", item.topic),
            description: "Requires manual verification".into(),
            kind: "happy_path".into(),
        }]
    }
}

/// Turn a segment's raw paths into numbered [`TestPath`]s. The counter is
/// global across segments so ids stay unique.
pub fn assemble_paths(segment: &Segment, raw: Vec<RawPath>, counter: &mut usize) -> Vec<TestPath> {
    raw.into_iter()
        .map(|path| {
            *counter += 1;
            TestPath {
                id: format!("PATH_{:03}", *counter),
                title: if path.title.trim().is_empty() {
                    segment.topic.clone()
                } else {
                    path.title
                },
                description: path.description,
                kind: PathKind::parse(&path.kind),
                source_segment: segment.id.clone(),
                source_topic: segment.topic.clone(),
                prerequisites: segment.prerequisites.clone(),
            }
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════
// Stage 4: Scenarios
// ═══════════════════════════════════════════════════════════

/// A scenario as the model returns it, before numbering and padding.
#[derive(Debug, Clone, Deserialize)]
pub struct RawScenario {
    #[serde(default, alias = "scenario_title")]
    pub title: String,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub documentation_section: String,
    #[serde(default)]
    pub steps: Vec<ScenarioStep>,
}

/// Batches of paths per unit; context is the batch's source segments.
pub struct ScenariosProcessor<'a> {
    pub user: &'a UserPromptConfig,
    /// Segment id → full text, shared by every batch.
    pub segments: &'a HashMap<String, String>,
}

impl ScenariosProcessor<'_> {
    fn context_for(&self, paths: &[TestPath]) -> String {
        let mut seen: Vec<&str> = Vec::new();
        let mut context = String::new();
        for path in paths {
            if seen.contains(&path.source_segment.as_str()) {
                continue;
            }
            seen.push(&path.source_segment);
            if let Some(text) = self.segments.get(&path.source_segment) {
                if !context.is_empty() {
                    context.push_str("\n\n");
                }
                context.push_str(text);
            }
        }
        context
    }
}

impl UnitProcessor for ScenariosProcessor<'_> {
    type Item = TestPath;
    type Output = RawScenario;

    fn render(&self, items: &[TestPath], tier: ContextTier) -> GenerationRequest {
        let context = self.context_for(items);
        prompts::render_scenarios(items, &context, self.user, tier)
    }

    fn parse(&self, response: &str, _items: &[TestPath]) -> Result<Vec<RawScenario>, ParseError> {
        parse::parse_array(response)
    }

    fn placeholder(&self, item: &TestPath) -> RawScenario {
        RawScenario {
            title: item.title.clone(),
            prerequisites: item.prerequisites.clone(),
            documentation_section: item.source_topic.clone(),
            steps: Vec::new(),
        }
    }
}

/// Number, backfill and pad one scenario. Every scenario leaves here with a
/// unique id pair, its path's metadata where the model omitted any, and at
/// least [`MIN_SCENARIO_STEPS`] steps.
pub fn finalize_scenario(
    path: &TestPath,
    mut raw: RawScenario,
    degraded: bool,
    counter: &mut usize,
) -> Scenario {
    *counter += 1;

    renumber_and_pad(&mut raw.steps);

    Scenario {
        scenario_id: format!("SCEN_{:03}", *counter),
        test_case_id: format!("TC_{:04}", *counter),
        kind: path.kind,
        test_path: path.title.clone(),
        title: if raw.title.trim().is_empty() {
            path.title.clone()
        } else {
            raw.title
        },
        prerequisites: if raw.prerequisites.is_empty() {
            path.prerequisites.clone()
        } else {
            raw.prerequisites
        },
        documentation_section: if raw.documentation_section.trim().is_empty() {
            path.source_topic.clone()
        } else {
            raw.documentation_section
        },
        steps: raw.steps,
        degraded,
    }
}

fn renumber_and_pad(steps: &mut Vec<ScenarioStep>) {
    for (i, step) in steps.iter_mut().enumerate() {
        step.step_number = (i + 1) as u32;
    }
    while steps.len() < MIN_SCENARIO_STEPS {
        let n = steps.len() as u32 + 1;
        steps.push(ScenarioStep {
            step_number: n,
            action: format!("Step {n}: manual verification required"),
            expected_result: "As specified in the documentation".into(),
        });
    }
}
