//! Persisted index access with load-once caching.
//!
//! The serving side reads the index file at most once per process. An
//! absent file is a valid empty index; a corrupt file is an error on
//! every access (so a fixed file is picked up without a restart, since a
//! failed load is never cached).

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::models::EmbeddedDocument;

/// Process-wide read handle over the persisted index. Cheap to share;
/// every [`get`](IndexStore::get) after the first returns the cached
/// `Arc` without touching the filesystem.
pub struct IndexStore {
    path: PathBuf,
    cell: OnceCell<Arc<Vec<EmbeddedDocument>>>,
}

impl IndexStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            cell: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Result<Arc<Vec<EmbeddedDocument>>> {
        let docs = self
            .cell
            .get_or_try_init(|| async { load_index(&self.path).map(Arc::new) })
            .await?;
        Ok(docs.clone())
    }
}

/// Read and parse the index file. Absence yields an empty index.
pub fn load_index(path: &Path) -> Result<Vec<EmbeddedDocument>> {
    if !path.exists() {
        debug!(path = %path.display(), "index file absent, starting with empty index");
        return Ok(Vec::new());
    }

    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read index at {}", path.display()))?;
    let docs: Vec<EmbeddedDocument> = serde_json::from_str(&json)
        .with_context(|| format!("failed to parse index at {}", path.display()))?;

    debug!(count = docs.len(), "index loaded");
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::write_index;
    use crate::models::{DocKind, RawDocument};

    fn sample_doc(id: &str) -> EmbeddedDocument {
        EmbeddedDocument::from_raw(
            RawDocument {
                id: id.to_string(),
                kind: DocKind::Post,
                title: "T".to_string(),
                slug: "t".to_string(),
                url: "/blog/t".to_string(),
                text: "body".to_string(),
                date: None,
                summary: None,
                technologies: Vec::new(),
                project_url: None,
                last_updated: None,
            },
            vec![1.0, 0.0],
        )
    }

    #[test]
    fn test_load_absent_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let docs = load_index(&dir.path().join("nope.json")).unwrap();
        assert!(docs.is_empty());
    }

    #[test]
    fn test_load_corrupt_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(load_index(&path).is_err());
    }

    #[tokio::test]
    async fn test_get_caches_after_first_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        write_index(&path, &[sample_doc("post:t:0")]).unwrap();

        let store = IndexStore::new(path.clone());
        let first = store.get().await.unwrap();
        assert_eq!(first.len(), 1);

        // Deleting the file must not affect later reads.
        std::fs::remove_file(&path).unwrap();
        let second = store.get().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = IndexStore::new(path.clone());
        assert!(store.get().await.is_err());

        write_index(&path, &[sample_doc("post:t:0")]).unwrap();
        let docs = store.get().await.unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_access() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        write_index(&path, &[sample_doc("post:t:0")]).unwrap();

        let store = Arc::new(IndexStore::new(path));
        let a = tokio::spawn({
            let store = store.clone();
            async move { store.get().await.unwrap().len() }
        });
        let b = tokio::spawn({
            let store = store.clone();
            async move { store.get().await.unwrap().len() }
        });
        assert_eq!(a.await.unwrap(), 1);
        assert_eq!(b.await.unwrap(), 1);
    }
}
