//! Prompt context assembly.
//!
//! Turns an ordered document list into the text block handed to the
//! generation model, under a hard character budget. Each document gets a
//! `[Title]`/`[URL]`/`[Excerpt]` header so the model can cite by name; the
//! sources list mirrors inclusion order and backs the streamed citation
//! footer.

use crate::models::{Citation, EmbeddedDocument, PromptContext};

/// Build the context string and citation list. The result's `context` is
/// never longer than `char_limit`; the first document that does not fit
/// (header plus at least one excerpt character) stops assembly.
pub fn build_context(docs: &[EmbeddedDocument], char_limit: usize) -> PromptContext {
    let mut context = String::new();
    let mut sources: Vec<Citation> = Vec::new();

    for doc in docs {
        let header = format!("[Title] {}\n[URL] {}\n[Excerpt]\n", doc.title, doc.url);
        let sep = if context.is_empty() { 0 } else { 2 };

        let used = char_len(&context);
        let budget = char_limit.saturating_sub(used + sep + char_len(&header));
        if budget == 0 {
            break;
        }

        let excerpt = take_chars(&doc.text, budget);
        if !context.is_empty() {
            context.push_str("\n\n");
        }
        context.push_str(&header);
        context.push_str(&excerpt);

        if !sources.iter().any(|s| s.url == doc.url) {
            sources.push(Citation {
                title: doc.title.clone(),
                url: doc.url.clone(),
            });
        }

        if char_len(&context) >= char_limit {
            break;
        }
    }

    PromptContext { context, sources }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn take_chars(s: &str, max: usize) -> String {
    if char_len(s) <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}
