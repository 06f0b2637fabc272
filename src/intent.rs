//! Deterministic intent overrides on top of plain retrieval.
//!
//! Certain question shapes have exact answers the vector search cannot be
//! trusted to rank first ("what's your latest post?" is a date comparison,
//! not a similarity problem). A fixed-priority rule table matches the
//! question text and may override or restrict the retrieved documents.
//! The patterns are best-effort heuristics; the priority order is the
//! contract and must stay stable for reproducible answers.

use chrono::NaiveDate;
use fancy_regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use crate::models::{DocKind, EmbeddedDocument};

/// Cap on focus documents and on whole-index restrictions.
pub const FOCUS_LIMIT: usize = 5;

static PREVIOUS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(previous|prior|before that|earlier than that|one before)\b")
        .expect("valid regex")
});

static RESUME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(resume|c\.?v\.?|employment|work (history|experience)|jobs?|career|skills?|education|degree|university|qualifications?|hire|hiring|contact|email|e-mail|reach (you|out)|get in touch)\b",
    )
    .expect("valid regex")
});

static LATEST_PROJECT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)\b(latest|last|newest|most recent|recently)\b.*\b(projects?|built|build|building|made|created|shipped|working on)\b",
    )
    .expect("valid regex")
});

static LATEST_POST_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)\b(latest|last|newest|most recent|recently)\b.*\b(blog|posts?|articles?|wrote|written|writing)\b",
    )
    .expect("valid regex")
});

static PROJECT_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(projects?|built|build|building|portfolio|shipped|side[- ]projects?)\b")
        .expect("valid regex")
});

static POST_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(blog|posts?|articles?|wrote|writing|written|essays?)\b")
        .expect("valid regex")
});

static EARLIEST_POST_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\b(first|earliest|oldest)\b.*\b(blog|posts?|articles?|wrote|write)\b")
        .expect("valid regex")
});

static FOLLOWUP_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(it|that|this|that one|this one|the post|the blog|the project|the article)\b")
        .expect("valid regex")
});

fn re_match(re: &Regex, text: &str) -> bool {
    re.is_match(text).unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    PreviousOfType,
    ResumeContact,
    LatestProject,
    LatestPost,
    ProjectsOnly,
    PostsOnly,
    EarliestPost,
}

enum Action {
    /// Place this document first; drop other chunks of the same source
    /// from the remainder.
    Override(EmbeddedDocument),
    /// Replace the document list outright.
    Restrict(Vec<EmbeddedDocument>),
}

struct ResolveInput<'a> {
    index: &'a [EmbeddedDocument],
    retrieved: &'a [EmbeddedDocument],
}

struct Rule {
    intent: Intent,
    matches: fn(&str) -> bool,
    resolve: fn(&ResolveInput) -> Option<Action>,
}

/// Priority order. The first rule whose pattern matches AND whose resolver
/// produces an action wins; a matching rule that resolves to nothing
/// (previous-of-type without an anchor) lets evaluation continue.
static RULES: &[Rule] = &[
    Rule {
        intent: Intent::PreviousOfType,
        matches: matches_previous,
        resolve: resolve_previous,
    },
    Rule {
        intent: Intent::ResumeContact,
        matches: matches_resume,
        resolve: resolve_resume,
    },
    Rule {
        intent: Intent::LatestProject,
        matches: matches_latest_project,
        resolve: resolve_latest_project,
    },
    Rule {
        intent: Intent::LatestPost,
        matches: matches_latest_post,
        resolve: resolve_latest_post,
    },
    Rule {
        intent: Intent::ProjectsOnly,
        matches: matches_projects_only,
        resolve: resolve_projects_only,
    },
    Rule {
        intent: Intent::PostsOnly,
        matches: matches_posts_only,
        resolve: resolve_posts_only,
    },
    Rule {
        intent: Intent::EarliestPost,
        matches: matches_earliest_post,
        resolve: resolve_earliest_post,
    },
];

fn matches_previous(q: &str) -> bool {
    re_match(&PREVIOUS_PATTERN, q)
}
fn matches_resume(q: &str) -> bool {
    re_match(&RESUME_PATTERN, q)
}
fn matches_latest_project(q: &str) -> bool {
    re_match(&LATEST_PROJECT_PATTERN, q)
}
fn matches_latest_post(q: &str) -> bool {
    re_match(&LATEST_POST_PATTERN, q)
}
fn matches_projects_only(q: &str) -> bool {
    re_match(&PROJECT_WORDS, q) && !re_match(&POST_WORDS, q)
}
fn matches_posts_only(q: &str) -> bool {
    re_match(&POST_WORDS, q) && !re_match(&PROJECT_WORDS, q)
}
fn matches_earliest_post(q: &str) -> bool {
    re_match(&EARLIEST_POST_PATTERN, q)
}

/// Follow-up phrasing that refers back to something already on screen or
/// said earlier in the conversation.
pub fn is_followup(question: &str) -> bool {
    re_match(&FOLLOWUP_PATTERN, question)
}

/// Apply the intent rules to the retrieved set. Returns the final ordered
/// document list for context building.
pub fn resolve_intent(
    question: &str,
    index: &[EmbeddedDocument],
    retrieved: &[EmbeddedDocument],
) -> Vec<EmbeddedDocument> {
    let input = ResolveInput { index, retrieved };
    let mut docs: Vec<EmbeddedDocument> = retrieved.to_vec();

    for rule in RULES {
        if !(rule.matches)(question) {
            continue;
        }
        if let Some(action) = (rule.resolve)(&input) {
            debug!(intent = ?rule.intent, "intent rule fired");
            docs = apply_action(action, docs);
            break;
        }
    }

    // Earliest-post wins whenever its pattern is present, no matter which
    // rule fired above.
    if matches_earliest_post(question) {
        if let Some(oldest) = extreme_of_kind(index, DocKind::Post, Extreme::Oldest) {
            docs = apply_override(oldest, docs);
        }
    }

    docs
}

/// When the request carries focus URLs and the question reads like a
/// follow-up, the focused documents replace retrieval entirely.
pub fn focus_documents(
    index: &[EmbeddedDocument],
    focus_urls: &[String],
    question: &str,
) -> Option<Vec<EmbeddedDocument>> {
    if focus_urls.is_empty() || !is_followup(question) {
        return None;
    }

    let mut docs: Vec<EmbeddedDocument> = Vec::new();
    for url in focus_urls {
        let path = url_path(url);
        for doc in index {
            if docs.len() >= FOCUS_LIMIT {
                break;
            }
            if doc.url.trim_end_matches('/') == path.trim_end_matches('/')
                && !docs.iter().any(|d| d.id == doc.id)
            {
                docs.push(doc.clone());
            }
        }
    }

    if docs.is_empty() {
        None
    } else {
        debug!(count = docs.len(), "focus documents replace retrieval");
        Some(docs)
    }
}

fn url_path(url: &str) -> &str {
    if let Some(rest) = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
    {
        match rest.find('/') {
            Some(i) => &rest[i..],
            None => "/",
        }
    } else {
        url
    }
}

fn apply_action(action: Action, docs: Vec<EmbeddedDocument>) -> Vec<EmbeddedDocument> {
    match action {
        Action::Override(doc) => apply_override(doc, docs),
        Action::Restrict(set) => set,
    }
}

fn apply_override(over: EmbeddedDocument, rest: Vec<EmbeddedDocument>) -> Vec<EmbeddedDocument> {
    let mut out = Vec::with_capacity(rest.len() + 1);
    out.push(over);
    for doc in rest {
        let duplicate = doc.kind == out[0].kind && doc.slug == out[0].slug;
        if !duplicate {
            out.push(doc);
        }
    }
    out
}

fn resolve_previous(input: &ResolveInput) -> Option<Action> {
    let anchor = input.retrieved.first()?;
    let anchor_date = anchor.date?;

    let mut best: Option<(NaiveDate, &EmbeddedDocument)> = None;
    for doc in input.index {
        if doc.kind != anchor.kind || doc.slug == anchor.slug {
            continue;
        }
        let Some(date) = doc.date else { continue };
        if date >= anchor_date {
            continue;
        }
        match best {
            None => best = Some((date, doc)),
            Some((best_date, _)) if date > best_date => best = Some((date, doc)),
            _ => {}
        }
    }

    best.map(|(_, doc)| Action::Override(doc.clone()))
}

fn resolve_resume(input: &ResolveInput) -> Option<Action> {
    input
        .index
        .iter()
        .find(|d| d.kind == DocKind::Resume)
        .cloned()
        .map(Action::Override)
}

fn resolve_latest_project(input: &ResolveInput) -> Option<Action> {
    extreme_of_kind(input.index, DocKind::Project, Extreme::Newest).map(Action::Override)
}

fn resolve_latest_post(input: &ResolveInput) -> Option<Action> {
    extreme_of_kind(input.index, DocKind::Post, Extreme::Newest).map(Action::Override)
}

fn resolve_projects_only(input: &ResolveInput) -> Option<Action> {
    resolve_restriction(input, DocKind::Project)
}

fn resolve_posts_only(input: &ResolveInput) -> Option<Action> {
    resolve_restriction(input, DocKind::Post)
}

fn resolve_restriction(input: &ResolveInput, kind: DocKind) -> Option<Action> {
    let from_retrieved: Vec<EmbeddedDocument> = input
        .retrieved
        .iter()
        .filter(|d| d.kind == kind)
        .cloned()
        .collect();
    if !from_retrieved.is_empty() {
        return Some(Action::Restrict(from_retrieved));
    }

    let mut from_index: Vec<EmbeddedDocument> = input
        .index
        .iter()
        .filter(|d| d.kind == kind)
        .cloned()
        .collect();
    if from_index.is_empty() {
        return None;
    }
    from_index.truncate(FOCUS_LIMIT);
    Some(Action::Restrict(from_index))
}

fn resolve_earliest_post(input: &ResolveInput) -> Option<Action> {
    extreme_of_kind(input.index, DocKind::Post, Extreme::Oldest).map(Action::Override)
}

/// Most recent record of the kind, used for fallback navigation links.
pub(crate) fn newest_of_kind(
    index: &[EmbeddedDocument],
    kind: DocKind,
) -> Option<EmbeddedDocument> {
    extreme_of_kind(index, kind, Extreme::Newest)
}

#[derive(Clone, Copy)]
enum Extreme {
    Newest,
    Oldest,
}

/// First record of `kind` with the extreme date; ties keep the earliest
/// index position so chunk 0 of a document wins.
fn extreme_of_kind(
    index: &[EmbeddedDocument],
    kind: DocKind,
    extreme: Extreme,
) -> Option<EmbeddedDocument> {
    let mut best: Option<(NaiveDate, &EmbeddedDocument)> = None;
    for doc in index {
        if doc.kind != kind {
            continue;
        }
        let Some(date) = doc.date else { continue };
        let better = match (best, extreme) {
            (None, _) => true,
            (Some((best_date, _)), Extreme::Newest) => date > best_date,
            (Some((best_date, _)), Extreme::Oldest) => date < best_date,
        };
        if better {
            best = Some((date, doc));
        }
    }
    best.map(|(_, doc)| doc.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawDocument;

    fn fixture(kind: DocKind, slug: &str, title: &str, date: &str) -> EmbeddedDocument {
        let url = match kind {
            DocKind::Post => format!("/blog/{}", slug),
            DocKind::Project => format!("/projects/{}", slug),
            DocKind::Resume => "/resume".to_string(),
        };
        EmbeddedDocument::from_raw(
            RawDocument {
                id: format!("{}:{}:0", kind, slug),
                kind,
                title: title.to_string(),
                slug: slug.to_string(),
                url,
                text: format!("Text of {}", title),
                date: NaiveDate::parse_from_str(date, "%Y-%m-%d").ok(),
                summary: None,
                technologies: Vec::new(),
                project_url: None,
                last_updated: None,
            },
            vec![0.0; 4],
        )
    }

    fn two_post_index() -> Vec<EmbeddedDocument> {
        vec![
            fixture(DocKind::Post, "old-post", "Old Post", "2024-01-01"),
            fixture(DocKind::Post, "new-post", "New Post", "2024-06-01"),
        ]
    }

    #[test]
    fn test_latest_post_question_surfaces_newest() {
        let index = two_post_index();
        let docs = resolve_intent("what's your latest blog post?", &index, &[]);
        assert_eq!(docs[0].title, "New Post");
    }

    #[test]
    fn test_first_post_question_surfaces_oldest() {
        let index = two_post_index();
        let docs = resolve_intent("what was your first blog post?", &index, &[]);
        assert_eq!(docs[0].title, "Old Post");
    }

    #[test]
    fn test_previous_beats_latest_project() {
        let index = vec![
            fixture(DocKind::Project, "alpha", "Alpha", "2024-01-01"),
            fixture(DocKind::Project, "beta", "Beta", "2024-05-01"),
            fixture(DocKind::Project, "gamma", "Gamma", "2024-08-01"),
        ];
        let retrieved = vec![index[2].clone()];
        let docs = resolve_intent("what was your latest project before that?", &index, &retrieved);
        assert_eq!(docs[0].title, "Beta");
    }

    #[test]
    fn test_previous_without_anchor_falls_through() {
        let index = vec![
            fixture(DocKind::Project, "alpha", "Alpha", "2024-01-01"),
            fixture(DocKind::Project, "gamma", "Gamma", "2024-08-01"),
        ];
        let docs = resolve_intent("what was your latest project before that?", &index, &[]);
        assert_eq!(docs[0].title, "Gamma");
    }

    #[test]
    fn test_resume_prepended_for_contact_question() {
        let mut index = two_post_index();
        index.push(fixture(DocKind::Resume, "resume", "Resume", "2024-01-01"));
        let retrieved = vec![index[1].clone()];
        let docs = resolve_intent("how can I contact you?", &index, &retrieved);
        assert_eq!(docs[0].kind, DocKind::Resume);
        assert_eq!(docs[1].title, "New Post");
    }

    #[test]
    fn test_projects_only_restricts_retrieved() {
        let index = vec![
            fixture(DocKind::Post, "p1", "Post One", "2024-01-01"),
            fixture(DocKind::Project, "pr1", "Project One", "2024-02-01"),
        ];
        let retrieved = index.clone();
        let docs = resolve_intent("what have you built?", &index, &retrieved);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].title, "Project One");
    }

    #[test]
    fn test_projects_only_falls_back_to_whole_index() {
        let index = vec![
            fixture(DocKind::Post, "p1", "Post One", "2024-01-01"),
            fixture(DocKind::Project, "pr1", "Project One", "2024-02-01"),
        ];
        let retrieved = vec![index[0].clone()];
        let docs = resolve_intent("what have you built?", &index, &retrieved);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].title, "Project One");
    }

    #[test]
    fn test_override_excludes_duplicate_slug() {
        let index = two_post_index();
        let retrieved = vec![index[1].clone(), index[0].clone()];
        let docs = resolve_intent("what's your latest blog post?", &index, &retrieved);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].title, "New Post");
        assert_eq!(docs[1].title, "Old Post");
    }

    #[test]
    fn test_unmatched_question_passes_retrieval_through() {
        let index = two_post_index();
        let retrieved = vec![index[0].clone()];
        let docs = resolve_intent("explain rust lifetimes", &index, &retrieved);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].title, "Old Post");
    }

    #[test]
    fn test_focus_documents_replace_retrieval() {
        let index = two_post_index();
        let focus = vec!["/blog/new-post".to_string()];
        let docs = focus_documents(&index, &focus, "what is this post about?").unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].title, "New Post");
    }

    #[test]
    fn test_focus_matches_absolute_url() {
        let index = two_post_index();
        let focus = vec!["https://example.com/blog/old-post".to_string()];
        let docs = focus_documents(&index, &focus, "summarize it for me").unwrap();
        assert_eq!(docs[0].title, "Old Post");
    }

    #[test]
    fn test_focus_requires_followup_phrasing() {
        let index = two_post_index();
        let focus = vec!["/blog/new-post".to_string()];
        assert!(focus_documents(&index, &focus, "explain rust lifetimes").is_none());
    }

    #[test]
    fn test_focus_ignores_unknown_url() {
        let index = two_post_index();
        let focus = vec!["/blog/never-written".to_string()];
        assert!(focus_documents(&index, &focus, "what is this post about?").is_none());
    }
}
