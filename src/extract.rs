//! Markdown source extraction.
//!
//! Walks the configured content directories (posts, projects, plus the
//! single resume file), parses YAML front matter, normalizes markdown to
//! retrieval-friendly plain text, and emits one metadata-tagged
//! [`RawDocument`] per chunk. A malformed file is skipped with a warning;
//! a missing directory yields an empty result. Extraction never aborts the
//! whole build over one bad source.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use fancy_regex::Regex;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::chunk::chunk_text;
use crate::config::{Config, NormalizationMode};
use crate::models::{DocKind, RawDocument};

/// Structure-preserving rewrites, applied in order. Headings become inline
/// markers, bold becomes IMPORTANT:, list bullets become •, and images,
/// links, and inline code keep only their visible text.
static STRUCTURED_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"(?ms)^```[^\n]*\n.*?^``` *$").expect("valid regex"),
            "[code]",
        ),
        (
            Regex::new(r"!\[([^\]]*)\]\([^)]*\)").expect("valid regex"),
            "$1",
        ),
        (
            Regex::new(r"\[([^\]]+)\]\([^)]*\)").expect("valid regex"),
            "$1",
        ),
        (
            Regex::new(r"\*\*([^*\n]+)\*\*").expect("valid regex"),
            "IMPORTANT: $1",
        ),
        (
            Regex::new(r"(?m)^#{3,6}\s*(.+)$").expect("valid regex"),
            "SECTION: $1",
        ),
        (
            Regex::new(r"(?m)^##\s*(.+)$").expect("valid regex"),
            "CHAPTER: $1",
        ),
        (
            Regex::new(r"(?m)^#\s*(.+)$").expect("valid regex"),
            "TITLE: $1",
        ),
        (
            Regex::new(r"(?m)^\s*[-*+]\s+").expect("valid regex"),
            "\u{2022} ",
        ),
        (Regex::new(r"`([^`\n]*)`").expect("valid regex"), "$1"),
        (Regex::new(r"(?m)^>\s?").expect("valid regex"), ""),
        (Regex::new(r"\n{3,}").expect("valid regex"), "\n\n"),
    ]
});

/// Aggressive rewrites: all markup stripped down to near-plain text.
static AGGRESSIVE_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"(?ms)^```[^\n]*\n.*?^``` *$").expect("valid regex"),
            "",
        ),
        (
            Regex::new(r"!\[([^\]]*)\]\([^)]*\)").expect("valid regex"),
            "$1",
        ),
        (
            Regex::new(r"\[([^\]]+)\]\([^)]*\)").expect("valid regex"),
            "$1",
        ),
        (
            Regex::new(r"(?m)^#{1,6}\s*").expect("valid regex"),
            "",
        ),
        (
            Regex::new(r"\*\*([^*\n]+)\*\*").expect("valid regex"),
            "$1",
        ),
        (
            Regex::new(r"\*([^*\n]+)\*").expect("valid regex"),
            "$1",
        ),
        (
            Regex::new(r"__([^_\n]+)__").expect("valid regex"),
            "$1",
        ),
        (
            Regex::new(r"(?m)^\s*[-*+]\s+").expect("valid regex"),
            "",
        ),
        (Regex::new(r"`([^`\n]*)`").expect("valid regex"), "$1"),
        (Regex::new(r"(?m)^>\s?").expect("valid regex"), ""),
        (Regex::new(r"[*`~]").expect("valid regex"), ""),
        (Regex::new(r"\n{3,}").expect("valid regex"), "\n\n"),
    ]
});

/// Front matter fields recognized across all source kinds. Unknown keys
/// are ignored; every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FrontMatter {
    title: Option<String>,
    slug: Option<String>,
    date: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    technologies: Vec<String>,
    #[serde(alias = "projectUrl")]
    project_url: Option<String>,
    #[serde(alias = "lastUpdated")]
    last_updated: Option<String>,
}

/// Extract all configured sources into chunked documents, posts first,
/// then projects, then the resume.
pub fn extract_sources(config: &Config) -> Result<Vec<RawDocument>> {
    let mut docs = Vec::new();
    docs.extend(extract_dir(&config.content.posts_dir, DocKind::Post, config)?);
    docs.extend(extract_dir(
        &config.content.projects_dir,
        DocKind::Project,
        config,
    )?);
    docs.extend(extract_resume(config));
    Ok(docs)
}

fn extract_dir(dir: &Path, kind: DocKind, config: &Config) -> Result<Vec<RawDocument>> {
    if !dir.is_dir() {
        debug!(dir = %dir.display(), kind = %kind, "source directory absent, skipping");
        return Ok(Vec::new());
    }

    let include_set = build_globset(&config.content.include_globs)?;

    let mut paths = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                warn!(%err, "unreadable directory entry, skipping");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(dir).unwrap_or(path);
        if include_set.is_match(relative) {
            paths.push(path.to_path_buf());
        }
    }
    paths.sort();

    let mut docs = Vec::new();
    let mut seen_slugs = Vec::new();
    for path in &paths {
        match extract_file(path, kind, config) {
            Ok((slug, file_docs)) => {
                if seen_slugs.contains(&slug) {
                    warn!(file = %path.display(), slug, "duplicate slug, skipping file");
                    continue;
                }
                seen_slugs.push(slug);
                docs.extend(file_docs);
            }
            Err(err) => {
                warn!(file = %path.display(), %err, "failed to extract, skipping");
            }
        }
    }

    Ok(docs)
}

fn extract_resume(config: &Config) -> Vec<RawDocument> {
    let path = &config.content.resume_path;
    if !path.is_file() {
        debug!(path = %path.display(), "resume file absent, skipping");
        return Vec::new();
    }
    match extract_file(path, DocKind::Resume, config) {
        Ok((_, docs)) => docs,
        Err(err) => {
            warn!(file = %path.display(), %err, "failed to extract resume, skipping");
            Vec::new()
        }
    }
}

/// Extract a single markdown file into zero or more chunked documents.
/// Returns the file's slug so callers can detect duplicates.
fn extract_file(path: &Path, kind: DocKind, config: &Config) -> Result<(String, Vec<RawDocument>)> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let (front_raw, body) = split_front_matter(&raw);
    let front: FrontMatter = match front_raw {
        Some(yaml) => serde_yaml::from_str(yaml)
            .with_context(|| format!("invalid front matter in {}", path.display()))?,
        None => FrontMatter::default(),
    };

    let slug = front.slug.clone().unwrap_or_else(|| match kind {
        DocKind::Resume => "resume".to_string(),
        _ => path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default(),
    });
    let title = front.title.clone().unwrap_or_else(|| match kind {
        DocKind::Resume => "Resume".to_string(),
        _ => slug.clone(),
    });
    let url = match kind {
        DocKind::Post => format!("/blog/{}", slug),
        DocKind::Project => format!("/projects/{}", slug),
        DocKind::Resume => "/resume".to_string(),
    };

    let date = parse_front_date(front.date.as_deref());
    if date.is_none() && kind != DocKind::Resume {
        warn!(file = %path.display(), "front matter has no parseable date");
    }

    let summary = front.summary.clone().or_else(|| front.description.clone());

    let mut text = normalize_markdown(body, config.content.normalization);
    if text.is_empty() && kind == DocKind::Project {
        // Metadata-only project pages still deserve an index entry.
        if let Some(desc) = front.description.as_deref().or(front.summary.as_deref()) {
            text = desc.trim().to_string();
        }
    }
    if text.is_empty() {
        debug!(file = %path.display(), "no body text after normalization, skipping");
        return Ok((slug, Vec::new()));
    }

    let text = truncate_chars(&text, config.content.max_doc_chars);
    let chunks = chunk_text(&text, &config.chunking);

    let docs = chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let header = metadata_header(kind, &title, i, &front, date);
            RawDocument {
                id: format!("{}:{}:{}", kind, slug, i),
                kind,
                title: title.clone(),
                slug: slug.clone(),
                url: url.clone(),
                text: format!("{}\n\n{}", header, chunk),
                date,
                summary: summary.clone(),
                technologies: front.technologies.clone(),
                project_url: front.project_url.clone(),
                last_updated: front.last_updated.clone(),
            }
        })
        .collect();

    Ok((slug, docs))
}

/// Split a leading `---` fenced YAML block from the body. Returns the raw
/// YAML (without fences) and the remainder.
fn split_front_matter(raw: &str) -> (Option<&str>, &str) {
    let Some(rest) = raw.strip_prefix("---") else {
        return (None, raw);
    };
    let Some(rest) = rest.strip_prefix('\n').or_else(|| {
        rest.strip_prefix("\r\n")
    }) else {
        return (None, raw);
    };

    for fence in ["\n---\n", "\n---\r\n", "\r\n---\r\n", "\r\n---\n"] {
        if let Some(pos) = rest.find(fence) {
            return (Some(&rest[..pos]), &rest[pos + fence.len()..]);
        }
    }
    // Front matter fence never closed; treat the whole file as body.
    (None, raw)
}

/// Accepts `YYYY-MM-DD` or any string starting with it (datetimes).
fn parse_front_date(value: Option<&str>) -> Option<NaiveDate> {
    let value = value?.trim();
    let prefix = value.get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

/// Reduce markdown to plain text per the configured mode.
pub fn normalize_markdown(text: &str, mode: NormalizationMode) -> String {
    let patterns = match mode {
        NormalizationMode::Structured => &*STRUCTURED_PATTERNS,
        NormalizationMode::Aggressive => &*AGGRESSIVE_PATTERNS,
    };

    let mut out = text.to_string();
    for (re, rep) in patterns.iter() {
        out = re.replace_all(&out, *rep).into_owned();
    }
    out.trim().to_string()
}

/// The header prefixed to every chunk so type and identity survive excerpt
/// truncation in later pipeline stages.
fn metadata_header(
    kind: DocKind,
    title: &str,
    chunk_index: usize,
    front: &FrontMatter,
    date: Option<NaiveDate>,
) -> String {
    let mut lines = vec![
        format!("Type: {}", kind),
        format!("Title: {}", title),
        format!("ChunkIndex: {}", chunk_index),
    ];
    if let Some(d) = date {
        lines.push(format!("Date: {}", d.format("%Y-%m-%d")));
    }
    if let Some(s) = front.summary.as_deref().or(front.description.as_deref()) {
        lines.push(format!("Summary: {}", s));
    }
    if !front.technologies.is_empty() {
        lines.push(format!("Technologies: {}", front.technologies.join(", ")));
    }
    if let Some(u) = &front.project_url {
        lines.push(format!("ProjectURL: {}", u));
    }
    if let Some(u) = &front.last_updated {
        lines.push(format!("LastUpdated: {}", u));
    }
    lines.join("\n")
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_front_matter_basic() {
        let raw = "---\ntitle: Hello\ndate: 2024-06-01\n---\nBody text here.";
        let (front, body) = split_front_matter(raw);
        assert_eq!(front, Some("title: Hello\ndate: 2024-06-01"));
        assert_eq!(body, "Body text here.");
    }

    #[test]
    fn test_split_front_matter_absent() {
        let raw = "Just a body, no fences.";
        let (front, body) = split_front_matter(raw);
        assert!(front.is_none());
        assert_eq!(body, raw);
    }

    #[test]
    fn test_split_front_matter_unclosed_fence() {
        let raw = "---\ntitle: Broken\nno closing fence";
        let (front, body) = split_front_matter(raw);
        assert!(front.is_none());
        assert_eq!(body, raw);
    }

    #[test]
    fn test_parse_front_date_variants() {
        assert_eq!(
            parse_front_date(Some("2024-06-01")),
            NaiveDate::from_ymd_opt(2024, 6, 1)
        );
        assert_eq!(
            parse_front_date(Some("2024-06-01T10:30:00Z")),
            NaiveDate::from_ymd_opt(2024, 6, 1)
        );
        assert_eq!(parse_front_date(Some("not a date")), None);
        assert_eq!(parse_front_date(None), None);
    }

    #[test]
    fn test_structured_normalization_markers() {
        let md = "# My Post\n\n## Setup\n\nSome **very important** point.\n\n- first\n- second\n\n[a link](https://example.com) and ![an image](pic.png)";
        let out = normalize_markdown(md, NormalizationMode::Structured);
        assert!(out.contains("TITLE: My Post"));
        assert!(out.contains("CHAPTER: Setup"));
        assert!(out.contains("IMPORTANT: very important"));
        assert!(out.contains("\u{2022} first"));
        assert!(out.contains("a link"));
        assert!(out.contains("an image"));
        assert!(!out.contains("]("));
    }

    #[test]
    fn test_structured_code_fence_placeholder() {
        let md = "Before.\n\n```rust\nfn main() {}\n```\n\nAfter.";
        let out = normalize_markdown(md, NormalizationMode::Structured);
        assert!(out.contains("[code]"));
        assert!(!out.contains("fn main"));
        assert!(out.contains("Before."));
        assert!(out.contains("After."));
    }

    #[test]
    fn test_aggressive_normalization_strips_markup() {
        let md = "# Title\n\nSome **bold** and *italic* and `code`.\n\n- bullet one\n\n```\nblock\n```";
        let out = normalize_markdown(md, NormalizationMode::Aggressive);
        assert!(!out.contains('#'));
        assert!(!out.contains('*'));
        assert!(!out.contains('`'));
        assert!(out.contains("Some bold and italic and code."));
        assert!(out.contains("bullet one"));
        assert!(!out.contains("block"));
    }

    #[test]
    fn test_metadata_header_fields() {
        let front = FrontMatter {
            summary: Some("A tiny site".to_string()),
            technologies: vec!["rust".to_string(), "axum".to_string()],
            project_url: Some("https://example.com".to_string()),
            ..Default::default()
        };
        let header = metadata_header(
            DocKind::Project,
            "Site",
            2,
            &front,
            NaiveDate::from_ymd_opt(2024, 3, 9),
        );
        assert!(header.starts_with("Type: project\nTitle: Site\nChunkIndex: 2"));
        assert!(header.contains("Date: 2024-03-09"));
        assert!(header.contains("Summary: A tiny site"));
        assert!(header.contains("Technologies: rust, axum"));
        assert!(header.contains("ProjectURL: https://example.com"));
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("héllo", 2), "hé");
    }

    #[test]
    fn test_missing_directory_yields_empty() {
        let config = Config::default();
        let docs = extract_dir(
            Path::new("/definitely/not/a/real/dir"),
            DocKind::Post,
            &config,
        )
        .unwrap();
        assert!(docs.is_empty());
    }
}
