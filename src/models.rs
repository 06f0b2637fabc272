//! Core data types shared by the indexing and chat pipeline.
//!
//! These types represent the documents that flow from markdown extraction
//! through embedding into the persisted index, plus the per-request values
//! assembled while answering a question.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Source category a document was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocKind {
    Post,
    Project,
    Resume,
}

impl DocKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocKind::Post => "post",
            DocKind::Project => "project",
            DocKind::Resume => "resume",
        }
    }
}

impl std::fmt::Display for DocKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One metadata-tagged chunk produced by extraction, before embedding.
///
/// The `id` is `{kind}:{slug}:{chunk_index}`, unique within one index build.
/// The `text` field already carries the metadata header so the document's
/// identity survives excerpt truncation later in the pipeline.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub id: String,
    pub kind: DocKind,
    pub title: String,
    pub slug: String,
    pub url: String,
    pub text: String,
    pub date: Option<NaiveDate>,
    pub summary: Option<String>,
    pub technologies: Vec<String>,
    pub project_url: Option<String>,
    pub last_updated: Option<String>,
}

/// Persisted, queryable unit stored in the vector index.
///
/// Identical to [`RawDocument`] plus the embedding vector. Immutable after
/// the index build; replaced wholesale by the next build.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedDocument {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: DocKind,
    pub title: String,
    pub slug: String,
    pub url: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub technologies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    pub embedding: Vec<f32>,
}

impl EmbeddedDocument {
    pub fn from_raw(raw: RawDocument, embedding: Vec<f32>) -> Self {
        Self {
            id: raw.id,
            kind: raw.kind,
            title: raw.title,
            slug: raw.slug,
            url: raw.url,
            text: raw.text,
            date: raw.date,
            summary: raw.summary,
            technologies: raw.technologies,
            project_url: raw.project_url,
            last_updated: raw.last_updated,
            embedding,
        }
    }
}

/// A cited source returned alongside a generated answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub url: String,
}

/// Bounded context string plus ordered citations, built fresh per request.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub context: String,
    pub sources: Vec<Citation>,
}

/// One prior turn of the conversation, as sent by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

/// Speaker of a [`ChatTurn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&DocKind::Post).unwrap(), "\"post\"");
        assert_eq!(
            serde_json::to_string(&DocKind::Project).unwrap(),
            "\"project\""
        );
    }

    #[test]
    fn test_embedded_document_roundtrip_field_names() {
        let doc = EmbeddedDocument {
            id: "project:site:0".to_string(),
            kind: DocKind::Project,
            title: "Site".to_string(),
            slug: "site".to_string(),
            url: "/projects/site".to_string(),
            text: "Type: project".to_string(),
            date: Some(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()),
            summary: None,
            technologies: vec!["rust".to_string()],
            project_url: Some("https://example.com".to_string()),
            last_updated: None,
            embedding: vec![0.1, 0.2],
        };

        let json = serde_json::to_string(&doc).unwrap();
        assert!(json.contains("\"type\":\"project\""));
        assert!(json.contains("\"projectUrl\""));
        assert!(json.contains("\"date\":\"2024-06-01\""));
        assert!(!json.contains("lastUpdated"), "absent fields are omitted");

        let back: EmbeddedDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, doc.id);
        assert_eq!(back.kind, DocKind::Project);
        assert_eq!(back.embedding, doc.embedding);
    }

    #[test]
    fn test_missing_optional_fields_deserialize() {
        let json = r#"{
            "id": "post:hello:0",
            "type": "post",
            "title": "Hello",
            "slug": "hello",
            "url": "/blog/hello",
            "text": "Type: post",
            "embedding": [1.0]
        }"#;
        let doc: EmbeddedDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.date, None);
        assert!(doc.technologies.is_empty());
    }
}
