use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{DuelError, Result};

/// One vocabulary entry of a study set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub id: i64,
    pub term: String,
    pub definition: String,
}

impl Term {
    pub fn new(id: i64, term: impl Into<String>, definition: impl Into<String>) -> Self {
        Self {
            id,
            term: term.into(),
            definition: definition.into(),
        }
    }
}

/// Lookup of the ordered terms belonging to a study set.
#[async_trait]
pub trait TermSource: Send + Sync {
    async fn terms_for_set(&self, set_id: i64) -> Result<Vec<Term>>;
}

/// Row layout of the terms table as exported to JSON.
#[derive(Debug, Deserialize)]
struct TermRow {
    id: i64,
    set_id: i64,
    term: String,
    definition: String,
}

/// In-memory term store, optionally seeded from a JSON export of the terms table.
#[derive(Default)]
pub struct InMemoryTermStore {
    sets: RwLock<HashMap<i64, Vec<Term>>>,
}

impl InMemoryTermStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the store from a JSON array of `{ id, set_id, term, definition }` rows.
    /// Terms keep the order in which they appear in the file.
    pub fn from_json(json: &str) -> Result<Self> {
        let rows: Vec<TermRow> = serde_json::from_str(json)?;
        let mut sets: HashMap<i64, Vec<Term>> = HashMap::new();
        for row in rows {
            sets.entry(row.set_id)
                .or_default()
                .push(Term::new(row.id, row.term, row.definition));
        }
        Ok(Self {
            sets: RwLock::new(sets),
        })
    }

    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            DuelError::term_source(format!("cannot read {}: {e}", path.display()))
        })?;
        let store = Self::from_json(&raw)?;
        tracing::info!(
            path = %path.display(),
            sets = store.sets.read().await.len(),
            "Loaded study set terms"
        );
        Ok(store)
    }

    pub async fn insert_set(&self, set_id: i64, terms: Vec<Term>) {
        self.sets.write().await.insert(set_id, terms);
    }
}

#[async_trait]
impl TermSource for InMemoryTermStore {
    async fn terms_for_set(&self, set_id: i64) -> Result<Vec<Term>> {
        let sets = self.sets.read().await;
        Ok(sets.get(&set_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_json_groups_by_set() {
        let store = InMemoryTermStore::from_json(
            r#"[
                {"id": 1, "set_id": 7, "term": "cat", "definition": "a small domesticated feline"},
                {"id": 9, "set_id": 8, "term": "hola", "definition": "hello"},
                {"id": 2, "set_id": 7, "term": "dog", "definition": "a domesticated canine", "image_url": null}
            ]"#,
        )
        .unwrap();

        let terms = store.terms_for_set(7).await.unwrap();
        assert_eq!(terms.len(), 2);
        assert_eq!(terms[0].term, "cat");
        assert_eq!(terms[1].term, "dog");
        assert_eq!(store.terms_for_set(8).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_set_is_empty() {
        let store = InMemoryTermStore::new();
        assert!(store.terms_for_set(404).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_set_replaces() {
        let store = InMemoryTermStore::new();
        store.insert_set(1, vec![Term::new(1, "a", "b")]).await;
        store.insert_set(1, vec![Term::new(2, "c", "d")]).await;
        let terms = store.terms_for_set(1).await.unwrap();
        assert_eq!(terms, vec![Term::new(2, "c", "d")]);
    }

    #[test]
    fn test_from_json_rejects_malformed() {
        assert!(matches!(
            InMemoryTermStore::from_json("{\"sets\": 1}"),
            Err(DuelError::SerializationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_term_source_error() {
        let result = InMemoryTermStore::from_json_file("/nonexistent/terms.json").await;
        assert!(matches!(result, Err(DuelError::TermSource(_))));
    }
}
