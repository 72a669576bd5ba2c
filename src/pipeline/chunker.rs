//! Budgeted document splitting.
//!
//! Splits a document into units that fit a token budget, preferring section
//! headers over arbitrary offsets, then paragraph boundaries, then a hard
//! cut that backs off to the last whitespace in the window. Every unit is a
//! slice of the input at computed offsets, so concatenating the units
//! reconstructs the input exactly, with no gaps and no duplication.

/// Approximate characters per token for the working language.
pub const CHARS_PER_TOKEN: usize = 4;

/// One bounded slice of the document, with the section it belongs to.
#[derive(Debug, Clone)]
pub struct ChunkUnit<'a> {
    pub index: usize,
    /// Title of the nearest preceding section header, if any.
    pub section: Option<String>,
    pub text: &'a str,
}

/// Split `text` into ordered units of at most `budget_tokens` approximate
/// tokens. A unit exceeds the budget only when a single unbreakable word
/// does. Zero-length input yields a single empty unit; never errors.
pub fn split_into_chunks(text: &str, budget_tokens: usize) -> Vec<ChunkUnit<'_>> {
    let max_chars = budget_tokens.max(1) * CHARS_PER_TOKEN;

    if text.len() <= max_chars {
        return vec![ChunkUnit {
            index: 0,
            section: section_spans(text).first().and_then(|s| s.title.clone()),
            text,
        }];
    }

    let mut spans: Vec<(usize, usize, Option<String>)> = Vec::new();
    let mut run: Option<(usize, usize, Option<String>)> = None;

    for section in section_spans(text) {
        let len = section.end - section.start;
        if len > max_chars {
            if let Some(r) = run.take() {
                spans.push(r);
            }
            split_section(text, &section, max_chars, &mut spans);
            continue;
        }
        run = match run.take() {
            None => Some((section.start, section.end, section.title)),
            Some((start, end, title)) => {
                if end - start + len > max_chars {
                    spans.push((start, end, title));
                    Some((section.start, section.end, section.title))
                } else {
                    Some((start, section.end, title))
                }
            }
        };
    }
    if let Some(r) = run {
        spans.push(r);
    }

    spans
        .into_iter()
        .enumerate()
        .map(|(index, (start, end, section))| ChunkUnit {
            index,
            section,
            text: &text[start..end],
        })
        .collect()
}

struct SectionSpan {
    start: usize,
    end: usize,
    title: Option<String>,
}

/// Partition the text at section-header lines (`# ` / `## `). The spans
/// cover the text completely and in order.
fn section_spans(text: &str) -> Vec<SectionSpan> {
    let mut marks: Vec<(usize, Option<String>)> = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let body = line.trim_end_matches(['\n', '\r']);
        if body.starts_with("## ") || body.starts_with("# ") {
            let title = body.trim_start_matches('#').trim().to_string();
            marks.push((offset, Some(title)));
        }
        offset += line.len();
    }

    if marks.first().map(|(o, _)| *o != 0).unwrap_or(true) {
        marks.insert(0, (0, None));
    }

    let mut spans = Vec::new();
    for i in 0..marks.len() {
        let (start, ref title) = marks[i];
        let end = marks.get(i + 1).map(|(o, _)| *o).unwrap_or(text.len());
        if end > start {
            spans.push(SectionSpan {
                start,
                end,
                title: title.clone(),
            });
        }
    }
    if spans.is_empty() {
        spans.push(SectionSpan {
            start: 0,
            end: text.len(),
            title: None,
        });
    }
    spans
}

/// Split an oversized section at blank-line paragraph boundaries; paragraphs
/// that are themselves oversized fall through to the hard window split.
fn split_section(
    text: &str,
    section: &SectionSpan,
    max_chars: usize,
    out: &mut Vec<(usize, usize, Option<String>)>,
) {
    let body = &text[section.start..section.end];

    // Paragraph spans, each including its trailing blank-line separator so
    // the spans tile the section exactly.
    let mut paragraphs: Vec<(usize, usize)> = Vec::new();
    let mut pos = 0;
    while pos < body.len() {
        match body[pos..].find("\n\n") {
            Some(rel) => {
                let mut sep_end = pos + rel;
                while sep_end < body.len() && body.as_bytes()[sep_end] == b'\n' {
                    sep_end += 1;
                }
                paragraphs.push((pos, sep_end));
                pos = sep_end;
            }
            None => {
                paragraphs.push((pos, body.len()));
                break;
            }
        }
    }

    let mut run: Option<(usize, usize)> = None;
    for (ps, pe) in paragraphs {
        let len = pe - ps;
        if len > max_chars {
            if let Some((s, e)) = run.take() {
                out.push((section.start + s, section.start + e, section.title.clone()));
            }
            split_window(
                text,
                section.start + ps,
                section.start + pe,
                &section.title,
                max_chars,
                out,
            );
            continue;
        }
        run = match run.take() {
            None => Some((ps, pe)),
            Some((s, e)) => {
                if e - s + len > max_chars {
                    out.push((section.start + s, section.start + e, section.title.clone()));
                    Some((ps, pe))
                } else {
                    Some((s, pe))
                }
            }
        };
    }
    if let Some((s, e)) = run {
        out.push((section.start + s, section.start + e, section.title.clone()));
    }
}

/// Last resort: cut at the budget boundary, backing off to the final
/// whitespace inside the window when one exists.
fn split_window(
    text: &str,
    start: usize,
    end: usize,
    title: &Option<String>,
    max_chars: usize,
    out: &mut Vec<(usize, usize, Option<String>)>,
) {
    let mut pos = start;
    while pos < end {
        if end - pos <= max_chars {
            out.push((pos, end, title.clone()));
            break;
        }
        let mut hard_cut = pos + max_chars;
        while !text.is_char_boundary(hard_cut) {
            hard_cut -= 1;
        }
        let window = &text[pos..hard_cut];
        let cut = match window.rfind(|c: char| c.is_whitespace()) {
            Some(rel) if rel > 0 => {
                let ws_len = window[rel..].chars().next().map(|c| c.len_utf8()).unwrap_or(1);
                pos + rel + ws_len
            }
            _ => hard_cut,
        };
        out.push((pos, cut, title.clone()));
        pos = cut;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconstruct(chunks: &[ChunkUnit<'_>]) -> String {
        chunks.iter().map(|c| c.text).collect()
    }

    #[test]
    fn empty_input_yields_single_empty_unit() {
        let chunks = split_into_chunks("", 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "");
    }

    #[test]
    fn input_under_budget_is_one_unit() {
        let text = "## Setup\n\nInstall the package and run it.";
        let chunks = split_into_chunks(text, 1000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].section.as_deref(), Some("Setup"));
    }

    #[test]
    fn concatenation_reconstructs_input_exactly() {
        let mut text = String::new();
        for i in 0..12 {
            text.push_str(&format!("## Section {i}\n\n"));
            text.push_str(&"A documented behavior with some detail. ".repeat(30));
            text.push_str("\n\n");
        }
        let chunks = split_into_chunks(&text, 200);
        assert!(chunks.len() > 1);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn units_respect_budget() {
        let text = "## Only\n\n".to_string() + &"word ".repeat(4000);
        let budget = 100;
        let chunks = split_into_chunks(&text, budget);
        for chunk in &chunks {
            assert!(
                chunk.text.len() <= budget * CHARS_PER_TOKEN,
                "unit of {} chars exceeds budget",
                chunk.text.len()
            );
        }
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn chunk_boundaries_prefer_section_headers() {
        let section = format!("## Topic A\n\n{}\n\n", "alpha ".repeat(50));
        let text = format!(
            "{}## Topic B\n\n{}",
            section,
            "beta ".repeat(50)
        );
        // Budget fits one section but not both.
        let chunks = split_into_chunks(&text, 120);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].text.starts_with("## Topic B"));
        assert_eq!(chunks[0].section.as_deref(), Some("Topic A"));
        assert_eq!(chunks[1].section.as_deref(), Some("Topic B"));
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn oversized_section_splits_at_paragraphs() {
        let para = "A self-contained paragraph about one validation rule. ".repeat(4);
        let text = format!("## Rules\n\n{0}\n\n{0}\n\n{0}", para.trim_end());
        let budget = (para.len() + 100) / CHARS_PER_TOKEN;
        let chunks = split_into_chunks(&text, budget);
        assert!(chunks.len() >= 3);
        assert_eq!(reconstruct(&chunks), text);
        for chunk in &chunks {
            assert_eq!(chunk.section.as_deref(), Some("Rules"));
        }
    }

    #[test]
    fn hard_split_backs_off_to_whitespace() {
        let text = "verify ".repeat(500);
        let chunks = split_into_chunks(&text, 50);
        assert!(chunks.len() > 1);
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(
                chunk.text.ends_with(' '),
                "expected whitespace-aligned cut, got {:?}",
                &chunk.text[chunk.text.len().saturating_sub(10)..]
            );
        }
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn single_unbreakable_word_is_cut_at_budget() {
        let text = "x".repeat(3000);
        let chunks = split_into_chunks(&text, 100);
        assert!(chunks.len() > 1);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let text = "żółć i jaźń dokumentacji testowej: ".repeat(300);
        let chunks = split_into_chunks(&text, 64);
        assert!(chunks.len() > 1);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn five_hundred_word_budget_splits_2500_words_into_five_chunks() {
        // 25 paragraphs of 100 four-letter words → 2500 words. A budget of
        // 640 tokens (2560 chars) holds exactly five paragraphs.
        let paragraph = vec!["word"; 100].join(" ");
        let text = vec![paragraph; 25].join("\n\n");
        let chunks = split_into_chunks(&text, 640);

        assert_eq!(chunks.len(), 5);
        assert_eq!(reconstruct(&chunks), text);
        for chunk in &chunks {
            assert_eq!(chunk.text.split_whitespace().count(), 500);
        }
    }
}
