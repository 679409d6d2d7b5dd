// src/ingest.rs
// Markdown knowledge ingestion: walk a
// directory, split each markdown file into sections by heading, and turn
// each section into a `reference` observation. Grounded on the same
// "flat fn(&Connection) -> Result<T>" shape as the repository modules in
// `db/`, since this is a one-shot batch write rather than an ongoing
// subsystem.

use std::path::{Path, PathBuf};

use crate::error::Result;

/// A single markdown section: a heading line and everything under it up
/// to the next heading of equal or shallower depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownSection {
    pub title: String,
    pub body: String,
}

/// Recursively collect every `.md` file under `root`. No dependency on a
/// directory-walking crate (`walkdir`/`ignore` are built for incremental
/// code indexing, which this crate has no module for) — plain recursion
/// is enough for a one-shot scan.
fn collect_markdown_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().and_then(|e| e.to_str()) == Some("md") {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

/// Split one markdown document into sections by heading (`#`..`######`).
/// Content before the first heading, if any, becomes a section titled
/// after the file (callers pass that in as `untitled_fallback`).
pub fn split_sections(content: &str, untitled_fallback: &str) -> Vec<MarkdownSection> {
    let mut sections = Vec::new();
    let mut current_title: Option<String> = None;
    let mut current_body = String::new();

    let flush = |title: Option<String>, body: &str, sections: &mut Vec<MarkdownSection>| {
        let trimmed = body.trim();
        if title.is_some() || !trimmed.is_empty() {
            sections.push(MarkdownSection {
                title: title.unwrap_or_else(|| untitled_fallback.to_string()),
                body: trimmed.to_string(),
            });
        }
    };

    for line in content.lines() {
        let heading = line.trim_start();
        if let Some(stripped) = heading.strip_prefix('#') {
            let stripped = stripped.trim_start_matches('#');
            if let Some(text) = stripped.strip_prefix(' ') {
                flush(current_title.take(), &current_body, &mut sections);
                current_body.clear();
                current_title = Some(text.trim().to_string());
                continue;
            }
        }
        current_body.push_str(line);
        current_body.push('\n');
    }
    flush(current_title.take(), &current_body, &mut sections);
    sections
}

#[derive(Debug, Clone)]
pub struct IngestSummary {
    pub files_scanned: usize,
    pub sections_found: usize,
    pub observations_created: usize,
}

/// Parse every markdown file under `directory` into sections and hand
/// each one to `on_section` to persist as a reference observation. The
/// callback returns `true` if it actually created an observation (it may
/// skip an admission-rejected or duplicate section).
pub fn ingest_directory(
    directory: &Path,
    mut on_section: impl FnMut(&Path, &MarkdownSection) -> Result<bool>,
) -> Result<IngestSummary> {
    let files = collect_markdown_files(directory)?;
    let mut sections_found = 0;
    let mut observations_created = 0;
    for file in &files {
        let contents = std::fs::read_to_string(file)?;
        let fallback = file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("untitled")
            .to_string();
        for section in split_sections(&contents, &fallback) {
            sections_found += 1;
            if on_section(file, &section)? {
                observations_created += 1;
            }
        }
    }
    Ok(IngestSummary {
        files_scanned: files.len(),
        sections_found,
        observations_created,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_sections_groups_by_heading() {
        let doc = "# Intro\nhello\n\n## Details\nmore text\nsecond line\n";
        let sections = split_sections(doc, "fallback");
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].title, "Intro");
        assert_eq!(sections[0].body, "hello");
        assert_eq!(sections[1].title, "Details");
        assert_eq!(sections[1].body, "more text\nsecond line");
    }

    #[test]
    fn content_before_first_heading_uses_fallback_title() {
        let doc = "just some preamble text\n# First heading\nbody\n";
        let sections = split_sections(doc, "README");
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].title, "README");
        assert_eq!(sections[0].body, "just some preamble text");
    }

    #[test]
    fn ingest_directory_walks_nested_markdown_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# A\nbody a\n").unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(nested.join("b.md"), "# B\nbody b\n").unwrap();
        std::fs::write(dir.path().join("ignore.txt"), "not markdown").unwrap();

        let mut seen = Vec::new();
        let summary = ingest_directory(dir.path(), |_path, section| {
            seen.push(section.title.clone());
            Ok(true)
        })
        .unwrap();

        assert_eq!(summary.files_scanned, 2);
        assert_eq!(summary.sections_found, 2);
        assert_eq!(summary.observations_created, 2);
        assert!(seen.contains(&"A".to_string()));
        assert!(seen.contains(&"B".to_string()));
    }
}
