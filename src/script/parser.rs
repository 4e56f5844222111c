//! Markdown script chunker.
//!
//! A chunk is a paragraph: consecutive non-blank lines. Headings stand alone
//! with their `#` markers removed. Fenced code blocks and HTML comments are not
//! read aloud and are skipped.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use super::document::Document;

/// Split markdown text into chunk texts
pub fn parse_markdown(source: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut in_fence = false;
    let mut in_comment = false;

    fn flush(paragraph: &mut Vec<&str>, chunks: &mut Vec<String>) {
        if !paragraph.is_empty() {
            chunks.push(collapse_whitespace(&paragraph.join(" ")));
            paragraph.clear();
        }
    }

    for line in source.lines() {
        let trimmed = line.trim();

        if in_comment {
            if trimmed.contains("-->") {
                in_comment = false;
            }
            continue;
        }

        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            flush(&mut paragraph, &mut chunks);
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }

        if trimmed.starts_with("<!--") {
            flush(&mut paragraph, &mut chunks);
            in_comment = !trimmed.contains("-->");
            continue;
        }

        if trimmed.is_empty() {
            flush(&mut paragraph, &mut chunks);
            continue;
        }

        if trimmed.starts_with('#') {
            flush(&mut paragraph, &mut chunks);
            let heading = trimmed.trim_start_matches('#').trim();
            if !heading.is_empty() {
                chunks.push(collapse_whitespace(heading));
            }
            continue;
        }

        paragraph.push(trimmed);
    }

    flush(&mut paragraph, &mut chunks);
    chunks
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Read a script file and build the session's document
pub fn load_script(path: impl AsRef<Path>) -> Result<Document> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script {}", path.display()))?;

    let document = Document::from_texts(parse_markdown(&source))
        .with_context(|| format!("Failed to parse script {}", path.display()))?;

    info!("Loaded script {}: {} chunks", path.display(), document.len());

    Ok(document)
}
