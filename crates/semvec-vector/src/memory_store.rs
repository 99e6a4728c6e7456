//! In-memory vector store
//!
//! Brute-force L2 search over process-local collections. Mirrors the
//! observable behaviour of a server-side store closely enough for offline
//! runs and tests: inserts stay pending until flushed (and are not counted
//! until then), searches require a prior load, and primary keys are unique.
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use semvec_core::{
    CollectionSchema, ConsistencyLevel, Hit, IndexSpec, InsertColumns, MetricType,
    MutationResult, Result, SearchRequest, SemvecError,
};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredEntity {
    id: String,
    vector: Vec<f32>,
    fields: Map<String, Value>,
}

#[derive(Debug)]
struct MemoryCollection {
    schema: CollectionSchema,
    flushed: Vec<StoredEntity>,
    pending: Vec<StoredEntity>,
    keys: HashSet<String>,
    index: Option<IndexSpec>,
    loaded: bool,
}

impl MemoryCollection {
    fn entities(&self) -> impl Iterator<Item = &StoredEntity> {
        self.flushed.iter().chain(self.pending.iter())
    }
}

/// Process-local vector store
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index recorded for a collection, if one was built
    pub async fn index_of(&self, name: &str) -> Option<IndexSpec> {
        self.collections
            .read()
            .await
            .get(name)
            .and_then(|c| c.index.clone())
    }
}

fn not_found(name: &str) -> SemvecError {
    SemvecError::NotFound(name.to_string())
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let norm = inner_product(a, a).sqrt() * inner_product(b, b).sqrt();
    if norm == 0.0 {
        0.0
    } else {
        inner_product(a, b) / norm
    }
}

#[async_trait]
impl super::VectorStore for MemoryStore {
    async fn connect(&self) -> Result<()> {
        tracing::debug!("In-memory store ready");
        Ok(())
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        Ok(self.collections.read().await.contains_key(name))
    }

    async fn create_collection(
        &self,
        name: &str,
        schema: &CollectionSchema,
        consistency: ConsistencyLevel,
    ) -> Result<()> {
        let mut collections = self.collections.write().await;
        if collections.contains_key(name) {
            return Err(SemvecError::DatabaseError(format!(
                "collection '{name}' already exists"
            )));
        }

        tracing::debug!(collection = name, %consistency, "Creating in-memory collection");
        collections.insert(
            name.to_string(),
            MemoryCollection {
                schema: schema.clone(),
                flushed: Vec::new(),
                pending: Vec::new(),
                keys: HashSet::new(),
                index: None,
                loaded: false,
            },
        );
        Ok(())
    }

    async fn create_index(&self, name: &str, field: &str, spec: &IndexSpec) -> Result<()> {
        let mut collections = self.collections.write().await;
        let collection = collections.get_mut(name).ok_or_else(|| not_found(name))?;

        if collection.schema.vector_field().name != field {
            return Err(SemvecError::SchemaError(format!(
                "cannot index '{field}': not the vector field of '{name}'"
            )));
        }

        collection.index = Some(spec.clone());
        Ok(())
    }

    async fn insert(&self, name: &str, columns: &InsertColumns) -> Result<MutationResult> {
        columns.validate()?;

        let mut collections = self.collections.write().await;
        let collection = collections.get_mut(name).ok_or_else(|| not_found(name))?;

        let dimension = collection.schema.dimension();
        let keys = columns.primary_keys();
        let vectors = columns.vectors();
        let rows = columns.to_rows();

        if keys.len() != rows.len() || vectors.len() != rows.len() {
            return Err(SemvecError::ValidationError(
                "insert is missing the primary key or vector column".to_string(),
            ));
        }

        // Validate the whole batch before writing anything
        let mut batch_keys = HashSet::new();
        for (key, vector) in keys.iter().zip(vectors) {
            if vector.len() != dimension {
                return Err(SemvecError::ValidationError(format!(
                    "vector for '{key}' has dimension {}, collection expects {dimension}",
                    vector.len()
                )));
            }
            if collection.keys.contains(key) || !batch_keys.insert(key.clone()) {
                return Err(SemvecError::ValidationError(format!(
                    "duplicate primary key '{key}'"
                )));
            }
        }

        for ((key, vector), mut fields) in keys.iter().zip(vectors).zip(rows) {
            fields.remove(&columns.vector_field);
            collection.keys.insert(key.clone());
            collection.pending.push(StoredEntity {
                id: key.clone(),
                vector: vector.clone(),
                fields,
            });
        }

        Ok(MutationResult {
            insert_count: keys.len() as u64,
            ids: keys,
        })
    }

    async fn flush(&self, name: &str) -> Result<()> {
        let mut collections = self.collections.write().await;
        let collection = collections.get_mut(name).ok_or_else(|| not_found(name))?;
        let pending = std::mem::take(&mut collection.pending);
        collection.flushed.extend(pending);
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<()> {
        let mut collections = self.collections.write().await;
        let collection = collections.get_mut(name).ok_or_else(|| not_found(name))?;
        collection.loaded = true;
        Ok(())
    }

    async fn search(&self, name: &str, request: &SearchRequest) -> Result<Vec<Vec<Hit>>> {
        let collections = self.collections.read().await;
        let collection = collections.get(name).ok_or_else(|| not_found(name))?;

        if !collection.loaded {
            return Err(SemvecError::SearchError(format!(
                "collection '{name}' is not loaded"
            )));
        }
        if collection.schema.vector_field().name != request.anns_field {
            return Err(SemvecError::SearchError(format!(
                "'{}' is not the vector field of '{name}'",
                request.anns_field
            )));
        }

        let dimension = collection.schema.dimension();
        let mut groups = Vec::with_capacity(request.vectors.len());

        for query in &request.vectors {
            if query.len() != dimension {
                return Err(SemvecError::SearchError(format!(
                    "query has dimension {}, collection expects {dimension}",
                    query.len()
                )));
            }

            let mut scored: Vec<(f32, &StoredEntity)> = collection
                .entities()
                .map(|entity| {
                    let distance = match request.params.metric_type {
                        MetricType::L2 => squared_l2(query, &entity.vector),
                        MetricType::Ip => inner_product(query, &entity.vector),
                        MetricType::Cosine => cosine(query, &entity.vector),
                    };
                    (distance, entity)
                })
                .collect();

            // L2 ranks ascending, similarity metrics descending
            match request.params.metric_type {
                MetricType::L2 => scored.sort_by(|a, b| a.0.total_cmp(&b.0)),
                MetricType::Ip | MetricType::Cosine => scored.sort_by(|a, b| b.0.total_cmp(&a.0)),
            }
            scored.truncate(request.limit);

            let hits = scored
                .into_iter()
                .map(|(distance, entity)| Hit {
                    id: entity.id.clone(),
                    distance,
                    fields: request
                        .output_fields
                        .iter()
                        .filter_map(|f| entity.fields.get(f).map(|v| (f.clone(), v.clone())))
                        .collect(),
                })
                .collect();
            groups.push(hits);
        }

        Ok(groups)
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        self.collections
            .write()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found(name))
    }

    async fn entity_count(&self, name: &str) -> Result<u64> {
        let collections = self.collections.read().await;
        let collection = collections.get(name).ok_or_else(|| not_found(name))?;
        Ok(collection.flushed.len() as u64)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VectorStore;
    use semvec_core::{Column, ColumnData, DataType, FieldSchema, SearchParams};

    fn schema() -> CollectionSchema {
        CollectionSchema::new(
            vec![
                FieldSchema::primary("pk", DataType::Varchar, Some(36)),
                FieldSchema::scalar("sentence", DataType::Varchar, Some(500)),
                FieldSchema::vector("embeddings", 2),
            ],
            "test",
        )
        .unwrap()
    }

    fn columns(keys: &[&str], vectors: Vec<Vec<f32>>) -> InsertColumns {
        InsertColumns {
            primary_field: "pk".to_string(),
            vector_field: "embeddings".to_string(),
            columns: vec![
                Column {
                    name: "pk".to_string(),
                    data: ColumnData::VarChar(keys.iter().map(|k| k.to_string()).collect()),
                },
                Column {
                    name: "sentence".to_string(),
                    data: ColumnData::VarChar(keys.iter().map(|k| format!("text {k}")).collect()),
                },
                Column {
                    name: "embeddings".to_string(),
                    data: ColumnData::FloatVector(vectors),
                },
            ],
        }
    }

    fn request(query: Vec<f32>, limit: usize) -> SearchRequest {
        SearchRequest {
            vectors: vec![query],
            anns_field: "embeddings".to_string(),
            primary_field: "pk".to_string(),
            params: SearchParams::default(),
            limit,
            output_fields: vec!["sentence".to_string()],
        }
    }

    #[tokio::test]
    async fn test_count_reflects_flush() {
        let store = MemoryStore::new();
        store
            .create_collection("c", &schema(), ConsistencyLevel::Strong)
            .await
            .unwrap();

        store
            .insert("c", &columns(&["0", "1"], vec![vec![0.0, 0.0], vec![1.0, 1.0]]))
            .await
            .unwrap();
        assert_eq!(store.entity_count("c").await.unwrap(), 0);

        store.flush("c").await.unwrap();
        assert_eq!(store.entity_count("c").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_search_orders_by_l2() {
        let store = MemoryStore::new();
        store
            .create_collection("c", &schema(), ConsistencyLevel::Strong)
            .await
            .unwrap();
        store
            .insert(
                "c",
                &columns(
                    &["0", "1", "2"],
                    vec![vec![5.0, 5.0], vec![0.1, 0.0], vec![1.0, 1.0]],
                ),
            )
            .await
            .unwrap();
        store.load("c").await.unwrap();

        let groups = store.search("c", &request(vec![0.0, 0.0], 2)).await.unwrap();
        assert_eq!(groups.len(), 1);

        let ids: Vec<_> = groups[0].iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert!((groups[0][0].distance - 0.01).abs() < 1e-6);
        assert_eq!(groups[0][0].get("sentence"), Some(&Value::from("text 1")));
        assert!(groups[0][0].get("pk").is_none());
    }

    #[tokio::test]
    async fn test_search_requires_load() {
        let store = MemoryStore::new();
        store
            .create_collection("c", &schema(), ConsistencyLevel::Strong)
            .await
            .unwrap();
        let result = store.search("c", &request(vec![0.0, 0.0], 1)).await;
        assert!(matches!(result, Err(SemvecError::SearchError(_))));
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicates_and_bad_dimension() {
        let store = MemoryStore::new();
        store
            .create_collection("c", &schema(), ConsistencyLevel::Strong)
            .await
            .unwrap();
        store
            .insert("c", &columns(&["0"], vec![vec![0.0, 0.0]]))
            .await
            .unwrap();

        let duplicate = store.insert("c", &columns(&["0"], vec![vec![1.0, 0.0]])).await;
        assert!(matches!(duplicate, Err(SemvecError::ValidationError(_))));

        let bad_dim = store
            .insert("c", &columns(&["1"], vec![vec![1.0, 0.0, 0.0]]))
            .await;
        assert!(matches!(bad_dim, Err(SemvecError::ValidationError(_))));

        store.flush("c").await.unwrap();
        assert_eq!(store.entity_count("c").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_index_only_on_vector_field() {
        let store = MemoryStore::new();
        store
            .create_collection("c", &schema(), ConsistencyLevel::Strong)
            .await
            .unwrap();

        assert!(store
            .create_index("c", "sentence", &IndexSpec::default())
            .await
            .is_err());
        store
            .create_index("c", "embeddings", &IndexSpec::default())
            .await
            .unwrap();
        assert_eq!(store.index_of("c").await, Some(IndexSpec::default()));
    }

    #[tokio::test]
    async fn test_drop_missing_collection() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.drop_collection("nope").await,
            Err(SemvecError::NotFound(_))
        ));
    }
}
