//! Index statistics overview.
//!
//! Provides a quick summary of what's indexed: record counts, per-kind
//! breakdowns, and date coverage. Used by `docent stats` to give
//! confidence that a build produced what was expected.

use anyhow::Result;
use chrono::NaiveDate;

use crate::config::Config;
use crate::models::{DocKind, EmbeddedDocument};
use crate::store;

/// Per-kind breakdown of record and document counts.
struct KindStats {
    kind: DocKind,
    records: usize,
    documents: usize,
    oldest: Option<NaiveDate>,
    newest: Option<NaiveDate>,
}

/// Run the stats command: load the index and print a summary.
pub fn run_stats(config: &Config) -> Result<()> {
    let index = store::load_index(&config.index.path)?;

    let index_size = std::fs::metadata(&config.index.path)
        .map(|m| m.len())
        .unwrap_or(0);
    let dims = index.first().map(|d| d.embedding.len()).unwrap_or(0);

    println!("Docent Index Stats");
    println!("==================");
    println!();
    println!("  Index:       {}", config.index.path.display());
    println!("  Size:        {}", format_bytes(index_size));
    println!();
    println!("  Records:     {}", index.len());
    println!("  Dimensions:  {}", dims);

    let kind_stats: Vec<KindStats> = [DocKind::Post, DocKind::Project, DocKind::Resume]
        .iter()
        .map(|&kind| collect_kind_stats(&index, kind))
        .filter(|s| s.records > 0)
        .collect();

    if !kind_stats.is_empty() {
        println!();
        println!("  By kind:");
        println!(
            "  {:<10} {:>8} {:>6}   {:<12} {}",
            "KIND", "RECORDS", "DOCS", "OLDEST", "NEWEST"
        );
        println!("  {}", "-".repeat(52));

        for s in &kind_stats {
            println!(
                "  {:<10} {:>8} {:>6}   {:<12} {}",
                s.kind.as_str(),
                s.records,
                s.documents,
                date_display(s.oldest),
                date_display(s.newest),
            );
        }
    }

    println!();

    Ok(())
}

fn collect_kind_stats(index: &[EmbeddedDocument], kind: DocKind) -> KindStats {
    let mut slugs: Vec<&str> = Vec::new();
    let mut records = 0usize;
    let mut oldest: Option<NaiveDate> = None;
    let mut newest: Option<NaiveDate> = None;

    for doc in index.iter().filter(|d| d.kind == kind) {
        records += 1;
        if !slugs.contains(&doc.slug.as_str()) {
            slugs.push(&doc.slug);
        }
        if let Some(date) = doc.date {
            if oldest.map_or(true, |o| date < o) {
                oldest = Some(date);
            }
            if newest.map_or(true, |n| date > n) {
                newest = Some(date);
            }
        }
    }

    KindStats {
        kind,
        records,
        documents: slugs.len(),
        oldest,
        newest,
    }
}

fn date_display(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
