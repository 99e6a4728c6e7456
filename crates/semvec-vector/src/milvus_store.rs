//! Milvus implementation for vector storage
//!
//! Talks to the Milvus RESTful API (v2). Every call is a `POST` to
//! `/v2/vectordb/<resource>/<action>`; responses share the envelope
//! `{"code": 0, "data": ...}` where a non-zero code carries a `message`.
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use reqwest::Client;
use semvec_core::{
    CollectionSchema, ConsistencyLevel, FieldSchema, Hit, IndexSpec, IndexType,
    InsertColumns, MutationResult, Result, SearchRequest, SemvecError, StoreConfig,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

/// Milvus vector store implementation
pub struct MilvusStore {
    client: Client,
    base_url: String,
    alias: String,
    token: Option<String>,
}

/// Response envelope shared by every endpoint
#[derive(Debug, Deserialize)]
struct MilvusResponse {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct HasCollectionData {
    has: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertData {
    insert_count: u64,
    #[serde(default)]
    insert_ids: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollectionStats {
    row_count: u64,
}

impl MilvusStore {
    /// Create a new Milvus client. No request is made until [`connect`].
    ///
    /// [`connect`]: crate::VectorStore::connect
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                SemvecError::ConnectionError(format!("Failed to build Milvus client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: config.url(),
            alias: config.alias.clone(),
            token: config.token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST `body` to `/v2/vectordb/{path}` and decode the `data` member
    async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T> {
        let url = format!("{}/v2/vectordb/{path}", self.base_url);

        let mut request = self.client.post(&url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                SemvecError::ConnectionError(format!("Milvus ({}) unreachable: {e}", self.alias))
            } else {
                SemvecError::DatabaseError(format!("Milvus request to {path} failed: {e}"))
            }
        })?;

        let status = response.status();
        if status.is_server_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(SemvecError::ConnectionError(format!(
                "Milvus returned {status} for {path}: {text}"
            )));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SemvecError::DatabaseError(format!(
                "Milvus returned {status} for {path}: {text}"
            )));
        }

        let envelope: MilvusResponse = response.json().await.map_err(|e| {
            SemvecError::DatabaseError(format!("Failed to parse Milvus response: {e}"))
        })?;

        if envelope.code != 0 {
            return Err(SemvecError::DatabaseError(format!(
                "Milvus error {} on {path}: {}",
                envelope.code,
                envelope.message.unwrap_or_default()
            )));
        }

        serde_json::from_value(envelope.data).map_err(|e| {
            SemvecError::DatabaseError(format!("Unexpected Milvus payload for {path}: {e}"))
        })
    }
}

/// Field definition in the create-collection request
fn field_json(field: &FieldSchema) -> Value {
    let mut params = Map::new();
    if let Some(max_length) = field.max_length {
        params.insert("max_length".to_string(), json!(max_length.to_string()));
    }
    if let Some(dim) = field.dim {
        params.insert("dim".to_string(), json!(dim.to_string()));
    }

    let mut value = json!({
        "fieldName": field.name,
        "dataType": field.dtype.milvus_name(),
        "isPrimary": field.is_primary,
    });
    if !params.is_empty() {
        value["elementTypeParams"] = Value::Object(params);
    }
    value
}

fn schema_json(schema: &CollectionSchema) -> Value {
    json!({
        "autoId": schema.primary_field().auto_id,
        "enableDynamicField": false,
        "fields": schema.fields().iter().map(field_json).collect::<Vec<_>>(),
    })
}

fn index_json(field: &str, spec: &IndexSpec) -> Value {
    let mut params = Map::new();
    params.insert("index_type".to_string(), json!(spec.index_type.to_string()));
    if spec.index_type == IndexType::IvfFlat {
        params.insert("nlist".to_string(), json!(spec.nlist));
    }

    json!({
        "fieldName": field,
        "indexName": field,
        "metricType": spec.metric_type.to_string(),
        "indexType": spec.index_type.to_string(),
        "params": params,
    })
}

/// Render a primary key value from a search row
fn key_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Convert one search result row into a [`Hit`]
fn parse_hit(mut row: Map<String, Value>, request: &SearchRequest) -> Hit {
    let distance = row
        .remove("distance")
        .and_then(|d| d.as_f64())
        .unwrap_or_default() as f32;

    let id = row
        .get(&request.primary_field)
        .or_else(|| row.get("id"))
        .map(key_string)
        .unwrap_or_default();

    let fields = request
        .output_fields
        .iter()
        .filter_map(|f| row.get(f).map(|v| (f.clone(), v.clone())))
        .collect();

    Hit {
        id,
        distance,
        fields,
    }
}

#[async_trait]
impl super::VectorStore for MilvusStore {
    async fn connect(&self) -> Result<()> {
        let collections: Option<Vec<String>> = self.post("collections/list", json!({})).await?;
        tracing::info!(
            alias = %self.alias,
            url = %self.base_url,
            collections = collections.map(|c| c.len()).unwrap_or(0),
            "Connected to Milvus"
        );
        Ok(())
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        let data: HasCollectionData = self
            .post("collections/has", json!({ "collectionName": name }))
            .await?;
        Ok(data.has)
    }

    async fn create_collection(
        &self,
        name: &str,
        schema: &CollectionSchema,
        consistency: ConsistencyLevel,
    ) -> Result<()> {
        let body = json!({
            "collectionName": name,
            "description": schema.description(),
            "schema": schema_json(schema),
            "params": { "consistencyLevel": consistency.to_string() },
        });

        let _: Value = self.post("collections/create", body).await?;
        Ok(())
    }

    async fn create_index(&self, name: &str, field: &str, spec: &IndexSpec) -> Result<()> {
        let body = json!({
            "collectionName": name,
            "indexParams": [index_json(field, spec)],
        });

        let _: Value = self.post("indexes/create", body).await?;
        Ok(())
    }

    async fn insert(&self, name: &str, columns: &InsertColumns) -> Result<MutationResult> {
        columns.validate()?;

        let body = json!({
            "collectionName": name,
            "data": columns.to_rows(),
        });

        let data: InsertData = self.post("entities/insert", body).await?;
        let ids = if data.insert_ids.is_empty() {
            columns.primary_keys()
        } else {
            data.insert_ids.iter().map(key_string).collect()
        };

        Ok(MutationResult {
            insert_count: data.insert_count,
            ids,
        })
    }

    async fn flush(&self, name: &str) -> Result<()> {
        let _: Value = self
            .post("collections/flush", json!({ "collectionName": name }))
            .await?;
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<()> {
        let _: Value = self
            .post("collections/load", json!({ "collectionName": name }))
            .await?;
        Ok(())
    }

    async fn search(&self, name: &str, request: &SearchRequest) -> Result<Vec<Vec<Hit>>> {
        let mut groups = Vec::with_capacity(request.vectors.len());

        // One call per query vector keeps result grouping unambiguous
        for vector in &request.vectors {
            let body = json!({
                "collectionName": name,
                "data": [vector],
                "annsField": request.anns_field,
                "limit": request.limit,
                "outputFields": request.output_fields,
                "searchParams": {
                    "metricType": request.params.metric_type.to_string(),
                    "params": { "nprobe": request.params.nprobe },
                },
            });

            let rows: Option<Vec<Map<String, Value>>> = self
                .post("entities/search", body)
                .await
                .map_err(|e| match e {
                    SemvecError::DatabaseError(msg) => SemvecError::SearchError(msg),
                    other => other,
                })?;

            groups.push(
                rows.unwrap_or_default()
                    .into_iter()
                    .map(|row| parse_hit(row, request))
                    .collect(),
            );
        }

        Ok(groups)
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        let _: Value = self
            .post("collections/drop", json!({ "collectionName": name }))
            .await?;
        Ok(())
    }

    async fn entity_count(&self, name: &str) -> Result<u64> {
        // Row count of flushed segments; the collection does not need to be loaded
        let stats: Option<CollectionStats> = self
            .post("collections/get_stats", json!({ "collectionName": name }))
            .await?;
        Ok(stats.map(|s| s.row_count).unwrap_or(0))
    }

    async fn close(&self) -> Result<()> {
        tracing::debug!(alias = %self.alias, "Closing Milvus session");
        Ok(())
    }

    fn name(&self) -> &str {
        "milvus"
    }
}
