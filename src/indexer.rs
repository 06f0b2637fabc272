//! Offline index build.
//!
//! Extracts and chunks all markdown sources, embeds the chunks in
//! sequential batches, and persists the result as a single JSON array at
//! the configured index path. The write is atomic (temp file plus rename)
//! so a failed build never leaves a partial index behind. Without an API
//! key the build still succeeds, writing an empty index.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::extract::extract_sources;
use crate::models::{DocKind, EmbeddedDocument, RawDocument};

pub async fn run_index(config: &Config, dry_run: bool) -> Result<()> {
    println!("index build");

    let raw_docs = extract_sources(config)?;
    print_extraction_summary(&raw_docs);

    if dry_run {
        println!("dry run, skipping embeddings and index write");
        return Ok(());
    }

    if config.secrets.openai_api_key.is_none() {
        println!("no OPENAI_API_KEY set, writing empty index");
        write_index(&config.index.path, &[])?;
        println!("  wrote {}", config.index.path.display());
        println!("ok");
        return Ok(());
    }

    let client = EmbeddingClient::new(config)?;
    let mut embedded = Vec::with_capacity(raw_docs.len());

    // One outstanding request at a time; a failed batch aborts the whole
    // build before anything is written.
    for (batch_no, batch) in raw_docs.chunks(config.embedding.batch_size).enumerate() {
        let texts: Vec<String> = batch.iter().map(|d| d.text.clone()).collect();
        let vectors = client
            .embed_batch(&texts)
            .await
            .with_context(|| format!("embedding batch {} failed, aborting build", batch_no + 1))?;

        for (doc, vector) in batch.iter().cloned().zip(vectors) {
            embedded.push(EmbeddedDocument::from_raw(doc, vector));
        }
        println!("  embedded batch {} ({} chunks)", batch_no + 1, batch.len());
    }

    write_index(&config.index.path, &embedded)?;
    println!(
        "  wrote {} ({} records)",
        config.index.path.display(),
        embedded.len()
    );
    println!("ok");
    Ok(())
}

fn print_extraction_summary(docs: &[RawDocument]) {
    let count = |kind: DocKind| docs.iter().filter(|d| d.kind == kind).count();
    println!("  posts: {} chunks", count(DocKind::Post));
    println!("  projects: {} chunks", count(DocKind::Project));
    println!("  resume: {} chunks", count(DocKind::Resume));
}

/// Serialize the records and swap them into place. The temp file lives in
/// the same directory as the target so the rename stays on one filesystem.
pub fn write_index(path: &Path, docs: &[EmbeddedDocument]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    let json = serde_json::to_string_pretty(docs).context("failed to serialize index")?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json)
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to move index into place at {}", path.display()))?;

    Ok(())
}
