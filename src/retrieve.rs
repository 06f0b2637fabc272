//! Vector retrieval and the lexical fallback.
//!
//! Vector search is primary: rank the whole index by cosine similarity
//! against the query embedding and keep the top k positive scores. The
//! keyword path only runs when vector search comes back empty (an index
//! built with different dimensions, or an all-zero query embedding), so a
//! stale index still answers in degraded mode instead of failing.

use anyhow::Result;
use std::cmp::Ordering;

use crate::config::Config;
use crate::embedding::{cosine_similarity, EmbeddingClient};
use crate::models::EmbeddedDocument;
use crate::store::load_index;

/// Query tokens dropped before lexical matching. Includes generic domain
/// terms that would match nearly every document on the site.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "about", "did", "do", "does", "for", "from", "have", "how", "in",
    "is", "it", "me", "my", "of", "on", "or", "show", "tell", "that", "the", "this", "to", "was",
    "what", "when", "where", "which", "who", "why", "with", "you", "your", "blog", "post",
    "posts", "project", "projects", "latest", "article", "articles", "write", "written", "wrote",
];

/// Rank the index by cosine similarity, descending, keeping only positive
/// scores. Ties keep original index order (the sort is stable).
pub fn top_k_scored(
    index: &[EmbeddedDocument],
    query_embedding: &[f32],
    k: usize,
) -> Vec<(EmbeddedDocument, f32)> {
    let mut scored: Vec<(usize, f32)> = index
        .iter()
        .enumerate()
        .map(|(i, doc)| (i, cosine_similarity(query_embedding, &doc.embedding)))
        .filter(|(_, score)| *score > 0.0)
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    scored.truncate(k);

    scored
        .into_iter()
        .map(|(i, score)| (index[i].clone(), score))
        .collect()
}

pub fn top_k_similar(
    index: &[EmbeddedDocument],
    query_embedding: &[f32],
    k: usize,
) -> Vec<EmbeddedDocument> {
    top_k_scored(index, query_embedding, k)
        .into_iter()
        .map(|(doc, _)| doc)
        .collect()
}

/// Keyword match over `title + text`: score is the number of query
/// keywords found as substrings. Documents with no matches are dropped.
pub fn lexical_scored(
    index: &[EmbeddedDocument],
    query: &str,
    k: usize,
) -> Vec<(EmbeddedDocument, f32)> {
    let keywords = tokenize_query(query);
    if keywords.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(usize, usize)> = index
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            let haystack = format!("{} {}", doc.title, doc.text).to_lowercase();
            let hits = keywords
                .iter()
                .filter(|kw| haystack.contains(kw.as_str()))
                .count();
            (i, hits)
        })
        .filter(|(_, hits)| *hits > 0)
        .collect();

    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored.truncate(k);

    scored
        .into_iter()
        .map(|(i, hits)| (index[i].clone(), hits as f32))
        .collect()
}

pub fn lexical_fallback(index: &[EmbeddedDocument], query: &str, k: usize) -> Vec<EmbeddedDocument> {
    lexical_scored(index, query, k)
        .into_iter()
        .map(|(doc, _)| doc)
        .collect()
}

/// Lowercase, strip punctuation, split on whitespace, drop stopwords and
/// single characters.
fn tokenize_query(query: &str) -> Vec<String> {
    let cleaned: String = query
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|t| t.len() >= 2 && !STOPWORDS.contains(t))
        .map(|t| t.to_string())
        .collect()
}

/// CLI entry for `search`: rank the persisted index against a query and
/// print the hits. Falls back to lexical matching without an API key.
pub async fn run_search(config: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let index = load_index(&config.index.path)?;
    if index.is_empty() {
        println!("No results (index is empty).");
        return Ok(());
    }

    let k = limit.unwrap_or(config.retrieval.top_k);

    let results = if config.secrets.openai_api_key.is_some() {
        let client = EmbeddingClient::new(config)?;
        let query_vec = client.embed_query(query).await?;
        let hits = top_k_scored(&index, &query_vec, k);
        if hits.is_empty() {
            lexical_scored(&index, query, k)
        } else {
            hits
        }
    } else {
        println!("no OPENAI_API_KEY set, using lexical matching");
        lexical_scored(&index, query, k)
    };

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, (doc, score)) in results.iter().enumerate() {
        println!("{}. [{:.3}] {} / {}", i + 1, score, doc.kind, doc.title);
        println!("    url: {}", doc.url);
        if let Some(date) = doc.date {
            println!("    date: {}", date.format("%Y-%m-%d"));
        }
        println!("    excerpt: \"{}\"", excerpt(&doc.text, 120));
        println!("    id: {}", doc.id);
        println!();
    }

    Ok(())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    text.replace('\n', " ").chars().take(max_chars).collect()
}
