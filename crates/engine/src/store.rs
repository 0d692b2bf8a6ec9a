use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::sync::RwLock;

use theodore_common::types::normalize_name;
use theodore_common::{ErrorKind, TheodoreError};

/// Future type returned by the object-safe store trait.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TheodoreError>> + Send + 'a>>;

/// A stored company embedding with its metadata document.
#[derive(Clone, Debug)]
pub struct StoredCompany {
    pub id: String,
    pub name: String,
    pub vector: Vec<f32>,
    pub metadata: Value,
}

/// One k-NN hit. Scores are in [0, 1], higher is more similar.
#[derive(Clone, Debug)]
pub struct ScoredCompany {
    pub company: StoredCompany,
    pub score: f64,
}

/// Optional narrowing for k-NN queries.
#[derive(Clone, Debug, Default)]
pub struct KNearestFilter {
    /// Entry id to leave out (typically the query company itself).
    pub exclude_id: Option<String>,
}

/// The vector-store surface the core consumes. Durable backends live with
/// the external persistence collaborator; the in-memory implementation
/// below backs tests and store-less operation.
pub trait VectorStore: Send + Sync {
    fn upsert<'a>(
        &'a self,
        id: &'a str,
        name: &'a str,
        vector: &'a [f32],
        metadata: Value,
    ) -> StoreFuture<'a, ()>;

    fn find_by_name<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<StoredCompany>>;

    fn k_nearest<'a>(
        &'a self,
        vector: &'a [f32],
        k: usize,
        filter: Option<KNearestFilter>,
    ) -> StoreFuture<'a, Vec<ScoredCompany>>;
}

/// In-memory vector store with exact cosine scoring.
#[derive(Default)]
pub struct MemoryVectorStore {
    inner: RwLock<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    entries: HashMap<String, StoredCompany>,
    /// Normalized company name → entry id.
    by_name: HashMap<String, String>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorStore for MemoryVectorStore {
    fn upsert<'a>(
        &'a self,
        id: &'a str,
        name: &'a str,
        vector: &'a [f32],
        metadata: Value,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            if vector.is_empty() {
                return Err(TheodoreError::new(
                    ErrorKind::Internal,
                    "refusing to store an empty vector",
                ));
            }

            let mut inner = self.inner.write().await;
            inner.by_name.insert(normalize_name(name), id.to_string());
            inner.entries.insert(
                id.to_string(),
                StoredCompany {
                    id: id.to_string(),
                    name: name.to_string(),
                    vector: vector.to_vec(),
                    metadata,
                },
            );
            metrics::gauge!("vector_store.entries").set(inner.entries.len() as f64);
            Ok(())
        })
    }

    fn find_by_name<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<StoredCompany>> {
        Box::pin(async move {
            let inner = self.inner.read().await;
            let id = inner.by_name.get(&normalize_name(name));
            Ok(id.and_then(|id| inner.entries.get(id)).cloned())
        })
    }

    fn k_nearest<'a>(
        &'a self,
        vector: &'a [f32],
        k: usize,
        filter: Option<KNearestFilter>,
    ) -> StoreFuture<'a, Vec<ScoredCompany>> {
        Box::pin(async move {
            let exclude = filter.and_then(|f| f.exclude_id);
            let inner = self.inner.read().await;

            let mut scored: Vec<ScoredCompany> = inner
                .entries
                .values()
                .filter(|entry| Some(entry.id.as_str()) != exclude.as_deref())
                .map(|entry| ScoredCompany {
                    score: similarity_score(vector, &entry.vector),
                    company: entry.clone(),
                })
                .collect();

            scored.sort_by(|a, b| b.score.total_cmp(&a.score));
            scored.truncate(k);
            Ok(scored)
        })
    }
}

/// Cosine similarity mapped from [-1, 1] into [0, 1].
fn similarity_score(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += x as f64 * y as f64;
        norm_a += (x as f64).powi(2);
        norm_b += (y as f64).powi(2);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let cosine = dot / (norm_a.sqrt() * norm_b.sqrt());
    ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_upsert_find_roundtrip() {
        let store = MemoryVectorStore::new();
        let metadata = json!({"industry": "logistics"});

        store
            .upsert("acme", "Acme, Inc.", &[1.0, 0.0, 0.0], metadata.clone())
            .await
            .unwrap();

        // Lookup is on the normalized name, not the literal string.
        let found = store.find_by_name("acme").await.unwrap().unwrap();
        assert_eq!(found.id, "acme");
        assert_eq!(found.vector, vec![1.0, 0.0, 0.0]);
        assert_eq!(found.metadata, metadata);

        assert!(store.find_by_name("Globex").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let store = MemoryVectorStore::new();
        store
            .upsert("acme", "Acme", &[1.0, 0.0], json!({}))
            .await
            .unwrap();
        store
            .upsert("acme", "Acme", &[0.0, 1.0], json!({"v": 2}))
            .await
            .unwrap();

        let found = store.find_by_name("Acme").await.unwrap().unwrap();
        assert_eq!(found.vector, vec![0.0, 1.0]);
        assert_eq!(found.metadata["v"], 2);
    }

    #[tokio::test]
    async fn test_k_nearest_orders_by_similarity() {
        let store = MemoryVectorStore::new();
        store
            .upsert("aligned", "Aligned", &[1.0, 0.0], json!({}))
            .await
            .unwrap();
        store
            .upsert("orthogonal", "Orthogonal", &[0.0, 1.0], json!({}))
            .await
            .unwrap();
        store
            .upsert("opposite", "Opposite", &[-1.0, 0.0], json!({}))
            .await
            .unwrap();

        let hits = store.k_nearest(&[1.0, 0.0], 3, None).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].company.id, "aligned");
        assert_eq!(hits[1].company.id, "orthogonal");
        assert_eq!(hits[2].company.id, "opposite");

        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!((hits[1].score - 0.5).abs() < 1e-6);
        assert!(hits[2].score < 1e-6);
    }

    #[tokio::test]
    async fn test_k_nearest_respects_filter_and_k() {
        let store = MemoryVectorStore::new();
        for (id, v) in [("a", [1.0, 0.0]), ("b", [0.9, 0.1]), ("c", [0.0, 1.0])] {
            store.upsert(id, id, &v, json!({})).await.unwrap();
        }

        let filter = KNearestFilter {
            exclude_id: Some("a".into()),
        };
        let hits = store.k_nearest(&[1.0, 0.0], 1, Some(filter)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].company.id, "b");
    }

    #[tokio::test]
    async fn test_empty_vector_rejected() {
        let store = MemoryVectorStore::new();
        let err = store.upsert("x", "X", &[], json!({})).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
    }
}
