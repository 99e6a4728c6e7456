//! Qdrant implementation for vector storage
//!
//! Maps the collection model onto Qdrant points: the primary key becomes the
//! point id (it must be an unsigned integer), the vector field becomes the
//! point vector and every other field, the key included, is stored in the
//! payload. The distance is fixed when the collection is created, so it is
//! taken from the configured index metric. Qdrant builds its own HNSW index
//! and has no IVF parameters, so `create_index` only checks the metric and
//! `nprobe` is ignored.
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    CountPointsBuilder, CreateCollectionBuilder, DeleteCollectionBuilder, Distance, PointId,
    PointStruct, ScoredPoint, SearchPointsBuilder, UpsertPointsBuilder, Value as QdrantValue,
    VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use semvec_core::{
    CollectionSchema, ConsistencyLevel, Hit, IndexSpec, InsertColumns, MetricType,
    MutationResult, Result, SearchRequest, SemvecError, StoreConfig,
};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Qdrant vector store implementation
pub struct QdrantStore {
    client: Qdrant,
    url: String,
    alias: String,
    metric: MetricType,
}

impl QdrantStore {
    /// Create a new Qdrant connection
    pub async fn new(config: &StoreConfig) -> Result<Self> {
        let url = config.url();
        let mut builder = Qdrant::from_url(&url);
        if let Some(token) = &config.token {
            builder = builder.api_key(token.clone());
        }

        let client = builder
            .build()
            .map_err(|e| SemvecError::ConnectionError(format!("Qdrant connection failed: {e}")))?;

        Ok(Self {
            client,
            url,
            alias: config.alias.clone(),
            metric: config.index.metric_type,
        })
    }
}

fn distance_for(metric: MetricType) -> Distance {
    match metric {
        MetricType::L2 => Distance::Euclid,
        MetricType::Ip => Distance::Dot,
        MetricType::Cosine => Distance::Cosine,
    }
}

/// The collection distance cannot change after creation
fn check_index_metric(name: &str, collection: MetricType, spec: &IndexSpec) -> Result<()> {
    if spec.metric_type != collection {
        return Err(SemvecError::SchemaError(format!(
            "collection '{name}' uses {collection} distance, cannot index with {}",
            spec.metric_type
        )));
    }
    Ok(())
}

/// Qdrant point ids are unsigned integers or UUIDs; keys here are integers
fn point_id(key: &str) -> Result<u64> {
    key.parse::<u64>().map_err(|_| {
        SemvecError::ValidationError(format!(
            "Qdrant point ids must be unsigned integers, got '{key}'"
        ))
    })
}

fn point_id_string(id: Option<PointId>) -> Option<String> {
    match id?.point_id_options? {
        PointIdOptions::Num(n) => Some(n.to_string()),
        PointIdOptions::Uuid(s) => Some(s),
    }
}

/// Convert a payload value back to JSON
fn to_json(value: QdrantValue) -> Value {
    match value.kind {
        None | Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(b),
        Some(Kind::IntegerValue(n)) => Value::from(n),
        Some(Kind::DoubleValue(d)) => Value::from(d),
        Some(Kind::StringValue(s)) => Value::String(s),
        Some(Kind::ListValue(list)) => Value::Array(list.values.into_iter().map(to_json).collect()),
        Some(Kind::StructValue(object)) => Value::Object(
            object
                .fields
                .into_iter()
                .map(|(k, v)| (k, to_json(v)))
                .collect(),
        ),
    }
}

fn scored_to_hit(point: ScoredPoint, request: &SearchRequest) -> Hit {
    let mut payload: Map<String, Value> = point
        .payload
        .into_iter()
        .map(|(k, v)| (k, to_json(v)))
        .collect();

    let id = match payload.get(&request.primary_field) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => point_id_string(point.id).unwrap_or_default(),
    };

    let fields = request
        .output_fields
        .iter()
        .filter_map(|f| payload.remove(f).map(|v| (f.clone(), v)))
        .collect();

    Hit {
        id,
        distance: point.score,
        fields,
    }
}

#[async_trait]
impl super::VectorStore for QdrantStore {
    async fn connect(&self) -> Result<()> {
        self.client.health_check().await.map_err(|e| {
            SemvecError::ConnectionError(format!("Qdrant ({}) unreachable: {e}", self.alias))
        })?;
        tracing::info!(alias = %self.alias, url = %self.url, "Connected to Qdrant");
        Ok(())
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        let collections =
            self.client.list_collections().await.map_err(|e| {
                SemvecError::DatabaseError(format!("Failed to list collections: {e}"))
            })?;

        Ok(collections.collections.iter().any(|c| c.name == name))
    }

    async fn create_collection(
        &self,
        name: &str,
        schema: &CollectionSchema,
        consistency: ConsistencyLevel,
    ) -> Result<()> {
        // Upserts wait for the write to be applied, which gives read-your-writes
        tracing::debug!(
            collection = name,
            %consistency,
            metric = %self.metric,
            "Creating Qdrant collection"
        );

        self.client
            .create_collection(CreateCollectionBuilder::new(name).vectors_config(
                VectorParamsBuilder::new(schema.dimension() as u64, distance_for(self.metric)),
            ))
            .await
            .map_err(|e| SemvecError::DatabaseError(format!("Failed to create collection: {e}")))?;

        Ok(())
    }

    async fn create_index(&self, name: &str, field: &str, spec: &IndexSpec) -> Result<()> {
        check_index_metric(name, self.metric, spec)?;

        tracing::info!(
            collection = name,
            field,
            requested = %spec.index_type,
            "Qdrant maintains an HNSW index on vectors; requested index parameters are not applied"
        );
        Ok(())
    }

    async fn insert(&self, name: &str, columns: &InsertColumns) -> Result<MutationResult> {
        columns.validate()?;

        let keys = columns.primary_keys();
        let vectors = columns.vectors();
        let rows = columns.to_rows();

        let mut points = Vec::with_capacity(rows.len());
        for ((key, vector), mut row) in keys.iter().zip(vectors).zip(rows) {
            row.remove(&columns.vector_field);

            let payload: HashMap<String, QdrantValue> =
                row.into_iter().map(|(k, v)| (k, v.into())).collect();

            points.push(PointStruct::new(point_id(key)?, vector.clone(), payload));
        }

        self.client
            .upsert_points(UpsertPointsBuilder::new(name, points).wait(true))
            .await
            .map_err(|e| SemvecError::DatabaseError(format!("Failed to upsert vectors: {e}")))?;

        Ok(MutationResult {
            insert_count: keys.len() as u64,
            ids: keys,
        })
    }

    async fn flush(&self, _name: &str) -> Result<()> {
        // Upserts are issued with wait=true
        Ok(())
    }

    async fn load(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn search(&self, name: &str, request: &SearchRequest) -> Result<Vec<Vec<Hit>>> {
        let mut groups = Vec::with_capacity(request.vectors.len());

        for vector in &request.vectors {
            let results = self
                .client
                .search_points(
                    SearchPointsBuilder::new(name, vector.clone(), request.limit as u64)
                        .with_payload(true),
                )
                .await
                .map_err(|e| SemvecError::SearchError(format!("Vector search failed: {e}")))?;

            groups.push(
                results
                    .result
                    .into_iter()
                    .map(|point| scored_to_hit(point, request))
                    .collect(),
            );
        }

        Ok(groups)
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        self.client
            .delete_collection(DeleteCollectionBuilder::new(name))
            .await
            .map_err(|e| SemvecError::DatabaseError(format!("Failed to drop collection: {e}")))?;
        Ok(())
    }

    async fn entity_count(&self, name: &str) -> Result<u64> {
        let response = self
            .client
            .count(CountPointsBuilder::new(name).exact(true))
            .await
            .map_err(|e| SemvecError::DatabaseError(format!("Failed to count points: {e}")))?;

        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }

    fn name(&self) -> &str {
        "qdrant"
    }
}
