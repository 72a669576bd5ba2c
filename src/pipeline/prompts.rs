//! Prompt templates and context budgeting.
//!
//! Larger work units get a stricter truncation of supporting material, so
//! the prompt plus expected output still fits the model's window. The
//! minimal tier exists for the last-chance retry on a single item.

use crate::config::UserPromptConfig;
use crate::generation::GenerationRequest;

use super::types::{Segment, TestPath};

pub const SYSTEM_PROMPT: &str =
    "You are a QA expert producing test documentation from product manuals. \
     Base everything strictly on the supplied documentation, never on general \
     knowledge. Respond with JSON only.";

pub const IMAGE_PROMPT: &str = "Describe the attached figure from a software manual: what the \
     screen or diagram shows, every labeled control or field, and any visible flow between \
     them. Plain text, one paragraph.";

const SEGMENTATION_INSTRUCTIONS: &str = "Analyze the documentation fragment below. Identify the \
     single functionality it describes, summarize it, and list any prerequisites the text \
     assumes (accounts, permissions, prior configuration).\n\
     Return ONLY a JSON object:\n\
     {\"topic\": \"functionality name\", \"summary\": \"one-sentence summary\", \
     \"prerequisites\": [\"prerequisite\", ...]}";

const PATHS_INSTRUCTIONS: &str = "From the documentation segment below, derive test paths.\n\
     Generate ALL plausible happy paths, ALL negative paths, and the edge cases.\n\
     Return ONLY a JSON array:\n\
     [{\"title\": \"short name\", \"description\": \"what the path exercises\", \
     \"type\": \"happy_path|negative|edge_case\"}]";

const SCENARIOS_INSTRUCTIONS: &str = "Elaborate each test path below into a detailed test \
     scenario, in the same order, one scenario per path. Every scenario needs at least five \
     concrete steps; each step is an action plus its expected result, based only on the \
     documentation fragment.\n\
     Return ONLY a JSON array, one object per path:\n\
     [{\"title\": \"scenario title\", \"prerequisites\": [\"...\"], \
     \"documentation_section\": \"source section\", \
     \"steps\": [{\"step_number\": 1, \"action\": \"...\", \"expected_result\": \"...\"}]}]";

// ═══════════════════════════════════════════════════════════
// Context tiers
// ═══════════════════════════════════════════════════════════

/// How much supporting material a prompt may carry, chosen by unit size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextTier {
    /// Single-item units: the full 8k-char context.
    Full,
    /// Small batches (2-3 items).
    Standard,
    /// Large batches (4+): leave room for the output.
    Strict,
    /// Last-chance floor for a single item that overflowed even at Full.
    Minimal,
}

impl ContextTier {
    pub fn for_batch(items: usize) -> Self {
        match items {
            0 | 1 => Self::Full,
            2 | 3 => Self::Standard,
            _ => Self::Strict,
        }
    }

    pub fn max_context_chars(self) -> usize {
        match self {
            Self::Full => 8000,
            Self::Standard => 4000,
            Self::Strict => 2000,
            Self::Minimal => 1000,
        }
    }
}

/// Truncate supporting context to the tier's budget, on a char boundary.
pub fn truncate_context(text: &str, tier: ContextTier) -> &str {
    let max = tier.max_context_chars();
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

// ═══════════════════════════════════════════════════════════
// Render
// ═══════════════════════════════════════════════════════════

pub fn render_image_prompt(image_bytes: Vec<u8>) -> GenerationRequest {
    GenerationRequest::text(IMAGE_PROMPT).with_image(image_bytes)
}

pub fn render_segmentation(index: usize, total: usize, text: &str) -> GenerationRequest {
    let prompt = format!(
        "{SEGMENTATION_INSTRUCTIONS}\n\nFRAGMENT {} of {}:\n{}",
        index + 1,
        total,
        text
    );
    GenerationRequest::text(prompt).with_system(SYSTEM_PROMPT)
}

pub fn render_paths(segment: &Segment, user: &UserPromptConfig, tier: ContextTier) -> GenerationRequest {
    let mut prompt = String::from(PATHS_INSTRUCTIONS);
    if let Some(extra) = &user.paths_requirements {
        prompt.push_str("\n\nADDITIONAL USER REQUIREMENTS:\n");
        prompt.push_str(extra);
    }
    if user.has_example() {
        prompt.push_str("\n\nUSER EXAMPLE:\nDocumentation:\n");
        prompt.push_str(user.example_documentation.as_deref().unwrap_or_default());
        prompt.push_str("\nExample scenarios:\n");
        for example in &user.example_scenarios {
            prompt.push_str("- ");
            prompt.push_str(example);
            prompt.push('\n');
        }
    }
    let context = segment.full_text();
    prompt.push_str(&format!(
        "\n\nDOCUMENTATION SEGMENT ({} - {}):\n{}",
        segment.id,
        segment.topic,
        truncate_context(&context, tier)
    ));
    GenerationRequest::text(prompt).with_system(SYSTEM_PROMPT)
}

pub fn render_scenarios(
    paths: &[TestPath],
    context: &str,
    user: &UserPromptConfig,
    tier: ContextTier,
) -> GenerationRequest {
    let mut prompt = String::from(SCENARIOS_INSTRUCTIONS);
    if let Some(extra) = &user.scenario_requirements {
        prompt.push_str("\n\nADDITIONAL USER REQUIREMENTS:\n");
        prompt.push_str(extra);
    }
    prompt.push_str("\n\nTEST PATHS:\n");
    for (i, path) in paths.iter().enumerate() {
        prompt.push_str(&format!(
            "{}. [{}] {} ({}): {}\n",
            i + 1,
            path.id,
            path.title,
            path.kind.as_str(),
            path.description
        ));
        if !path.prerequisites.is_empty() {
            prompt.push_str(&format!(
                "   Prerequisites: {}\n",
                path.prerequisites.join(", ")
            ));
        }
    }
    prompt.push_str(&format!(
        "\nDOCUMENTATION FRAGMENT:\n{}",
        truncate_context(context, tier)
    ));
    GenerationRequest::text(prompt).with_system(SYSTEM_PROMPT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::PathKind;

    fn segment() -> Segment {
        Segment {
            id: "SEG_001".into(),
            topic: "Login".into(),
            prerequisites: vec!["Active account".into()],
            content: "The login form validates credentials.".into(),
        }
    }

    #[test]
    fn tier_by_batch_size() {
        assert_eq!(ContextTier::for_batch(1), ContextTier::Full);
        assert_eq!(ContextTier::for_batch(2), ContextTier::Standard);
        assert_eq!(ContextTier::for_batch(3), ContextTier::Standard);
        assert_eq!(ContextTier::for_batch(4), ContextTier::Strict);
        assert_eq!(ContextTier::for_batch(12), ContextTier::Strict);
    }

    #[test]
    fn tiers_shrink_monotonically() {
        assert!(ContextTier::Full.max_context_chars() > ContextTier::Standard.max_context_chars());
        assert!(
            ContextTier::Standard.max_context_chars() > ContextTier::Strict.max_context_chars()
        );
        assert!(ContextTier::Strict.max_context_chars() > ContextTier::Minimal.max_context_chars());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "ł".repeat(6000);
        let cut = truncate_context(&text, ContextTier::Minimal);
        assert!(cut.len() <= 1000);
        assert!(text.starts_with(cut));
    }

    #[test]
    fn short_context_not_truncated() {
        assert_eq!(truncate_context("short", ContextTier::Strict), "short");
    }

    #[test]
    fn segmentation_prompt_carries_fragment() {
        let req = render_segmentation(0, 3, "The export screen has two buttons.");
        assert!(req.prompt.contains("FRAGMENT 1 of 3"));
        assert!(req.prompt.contains("two buttons"));
        assert_eq!(req.system.as_deref(), Some(SYSTEM_PROMPT));
    }

    #[test]
    fn paths_prompt_appends_user_requirements() {
        let user = UserPromptConfig {
            paths_requirements: Some("Cover keyboard-only navigation.".into()),
            ..Default::default()
        };
        let req = render_paths(&segment(), &user, ContextTier::Full);
        assert!(req.prompt.contains("ADDITIONAL USER REQUIREMENTS"));
        assert!(req.prompt.contains("keyboard-only"));
        assert!(req.prompt.contains("SEG_001 - Login"));
        assert!(req.prompt.contains("PREREQUISITES"));
    }

    #[test]
    fn scenarios_prompt_lists_paths_in_order() {
        let paths = vec![
            TestPath {
                id: "PATH_001".into(),
                title: "Valid login".into(),
                description: "Correct credentials".into(),
                kind: PathKind::HappyPath,
                source_segment: "SEG_001".into(),
                source_topic: "Login".into(),
                prerequisites: vec!["Active account".into()],
            },
            TestPath {
                id: "PATH_002".into(),
                title: "Wrong password".into(),
                description: "Rejected credentials".into(),
                kind: PathKind::Negative,
                source_segment: "SEG_001".into(),
                source_topic: "Login".into(),
                prerequisites: vec![],
            },
        ];
        let req = render_scenarios(&paths, "docs", &UserPromptConfig::default(), ContextTier::Standard);
        let first = req.prompt.find("PATH_001").unwrap();
        let second = req.prompt.find("PATH_002").unwrap();
        assert!(first < second);
        assert!(req.prompt.contains("[PATH_002] Wrong password (negative)"));
    }

    #[test]
    fn image_prompt_attaches_payload() {
        let req = render_image_prompt(vec![1, 2, 3]);
        assert_eq!(req.images.len(), 1);
        assert!(req.prompt.contains("software manual"));
    }
}
