//! Collection manager
//!
//! Coordinates one collection on a [`VectorStore`] with an [`Embedder`]:
//! derives the schema from configuration, creates the collection or attaches
//! to an existing one, assigns primary keys on insert and embeds text before
//! storing or searching it.
//!
//! Primary keys are a contiguous range per insert. All writes go through a
//! single async lock that also guards the manager's key counter, so two
//! inserts can never compute the same range concurrently.
//!
//! Author: hephaex@gmail.com

use crate::{Embedder, VectorStore};
use semvec_core::{
    CollectionSchema, Column, ColumnData, ConsistencyLevel, DataType, DropOutcome, Hit,
    IndexSpec, InsertColumns, MutationResult, Result, RetryPolicy, SearchParams, SearchRequest,
    SemvecError, StoreConfig,
};
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

/// An attached or freshly created collection
#[derive(Debug, Clone)]
pub struct CollectionHandle {
    name: String,
    layout: CollectionSchema,
    created: bool,
}

impl CollectionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field layout used to build inserts
    pub fn layout(&self) -> &CollectionSchema {
        &self.layout
    }

    /// Whether this manager created the collection (as opposed to attaching)
    pub fn created(&self) -> bool {
        self.created
    }
}

/// Manages a single collection on a vector store
pub struct CollectionManager {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    config: StoreConfig,
    retry: RetryPolicy,
    collection: Option<CollectionHandle>,
    /// Next primary key; the lock also serialises every write
    next_key: Mutex<u64>,
}

impl CollectionManager {
    /// Create a manager. No store call is made until [`connect`](Self::connect).
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        config: StoreConfig,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config.retry);
        Self {
            store,
            embedder,
            config,
            retry,
            collection: None,
            next_key: Mutex::new(0),
        }
    }

    /// Replace the retry policy for store calls
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn collection_name(&self) -> &str {
        &self.config.collection_name
    }

    /// The attached collection, if any
    pub fn collection(&self) -> Option<&CollectionHandle> {
        self.collection.as_ref()
    }

    fn active(&self) -> Result<&CollectionHandle> {
        self.collection
            .as_ref()
            .ok_or(SemvecError::NoActiveCollection)
    }

    /// Establish the session with the store
    pub async fn connect(&self) -> Result<()> {
        let store = &self.store;
        self.retry.execute("connect", || store.connect()).await?;

        tracing::info!(
            backend = self.store.name(),
            alias = %self.config.alias,
            host = %self.config.host,
            port = self.config.port,
            "Successfully connected to vector store"
        );
        Ok(())
    }

    /// Whether a collection named `name` exists in the store
    pub async fn check_existence(&self, name: &str) -> Result<bool> {
        let store = &self.store;
        self.retry
            .execute("has_collection", || store.has_collection(name))
            .await
    }

    /// Build the collection schema from the configured fields.
    ///
    /// The vector field's dimension is the embedder's output dimension.
    pub fn derive_schema(&self) -> Result<CollectionSchema> {
        let dimension = self.embedder.dimension();
        let schema = CollectionSchema::from_config(
            &self.config.fields,
            self.config.description.clone(),
            dimension,
        )?;

        tracing::debug!(
            fields = ?schema.field_names(),
            dimension,
            model = self.embedder.model(),
            "Derived collection schema"
        );
        Ok(schema)
    }

    /// Attach to `name` if it exists, otherwise create it and index its
    /// vector field.
    ///
    /// When attaching, `schema` is not sent to the store; it is only used as
    /// the local layout for inserts. The key counter starts at the
    /// collection's current entity count.
    pub async fn attach_or_create(
        &mut self,
        name: &str,
        schema: CollectionSchema,
        exists: bool,
    ) -> Result<&CollectionHandle> {
        if exists {
            tracing::info!(collection = name, "Collection already exists, attaching");
        } else {
            tracing::info!(collection = name, "Creating collection");
            self.store
                .create_collection(name, &schema, ConsistencyLevel::Strong)
                .await?;

            let spec = IndexSpec::from(&self.config.index);
            let field = schema.vector_field().name.clone();
            tracing::info!(
                collection = name,
                field = %field,
                index_type = %spec.index_type,
                metric = %spec.metric_type,
                nlist = spec.nlist,
                "Creating index"
            );
            self.store.create_index(name, &field, &spec).await?;
        }

        let count = if exists {
            let store = &self.store;
            self.retry
                .execute("entity_count", || store.entity_count(name))
                .await?
        } else {
            0
        };
        *self.next_key.get_mut() = count;

        let handle = self.collection.insert(CollectionHandle {
            name: name.to_string(),
            layout: schema,
            created: !exists,
        });
        Ok(&*handle)
    }

    /// Persisted entity count of the active collection
    pub async fn entity_count(&self) -> Result<u64> {
        let name = self.active()?.name.as_str();
        let store = &self.store;
        self.retry
            .execute("entity_count", || store.entity_count(name))
            .await
    }

    /// Load the active collection into memory for searching
    pub async fn load(&self) -> Result<()> {
        let name = self.active()?.name.as_str();
        let store = &self.store;
        self.retry.execute("load", || store.load(name)).await?;
        tracing::info!(collection = name, "Collection loaded");
        Ok(())
    }

    /// Embed and insert `rows` with primary keys `starting_index..`.
    ///
    /// The caller chooses the starting index. Writes are serialised, and the
    /// key counter used by [`append`](Self::append) is moved past the range
    /// written here.
    pub async fn insert<S: AsRef<str>>(
        &self,
        rows: &[S],
        starting_index: u64,
    ) -> Result<MutationResult> {
        let handle = self.active()?;
        let mut next_key = self.next_key.lock().await;

        self.insert_rows(handle, rows, starting_index, &mut next_key)
            .await
    }

    /// Embed and insert `rows`, taking primary keys from the manager's counter
    pub async fn append<S: AsRef<str>>(&self, rows: &[S]) -> Result<MutationResult> {
        let handle = self.active()?;
        let mut next_key = self.next_key.lock().await;

        let starting_index = *next_key;
        self.insert_rows(handle, rows, starting_index, &mut next_key)
            .await
    }

    /// Next key [`append`](Self::append) would use
    pub async fn next_key(&self) -> u64 {
        *self.next_key.lock().await
    }

    /// Insert and flush `rows`.
    ///
    /// `next_key` is moved past the key range as soon as the store accepts
    /// the rows, so a failed flush never hands out the same keys again.
    async fn insert_rows<S: AsRef<str>>(
        &self,
        handle: &CollectionHandle,
        rows: &[S],
        starting_index: u64,
        next_key: &mut u64,
    ) -> Result<MutationResult> {
        if rows.is_empty() {
            return Ok(MutationResult::default());
        }

        let end = starting_index
            .checked_add(rows.len() as u64)
            .ok_or_else(|| {
                SemvecError::ValidationError(format!(
                    "{} rows starting at key {starting_index} overflow the key space",
                    rows.len()
                ))
            })?;

        let texts: Vec<String> = rows.iter().map(|r| r.as_ref().trim().to_string()).collect();
        let columns = self
            .build_columns(&handle.layout, texts, starting_index..end)
            .await?;

        let result = self.store.insert(&handle.name, &columns).await?;
        *next_key = (*next_key).max(end);

        let store = &self.store;
        let name = handle.name.as_str();
        self.retry.execute("flush", || store.flush(name)).await?;

        tracing::info!(
            collection = name,
            inserted = result.insert_count,
            first_key = starting_index,
            "Inserted entities"
        );
        Ok(result)
    }

    /// Build insert columns in layout order
    async fn build_columns(
        &self,
        layout: &CollectionSchema,
        texts: Vec<String>,
        key_range: Range<u64>,
    ) -> Result<InsertColumns> {
        let mut scalars = layout.scalar_fields();
        let text_field = scalars
            .next()
            .filter(|f| f.dtype == DataType::Varchar)
            .ok_or_else(|| {
                SemvecError::SchemaError("layout needs a VARCHAR text field".to_string())
            })?
            .name
            .clone();
        if let Some(extra) = scalars.next() {
            return Err(SemvecError::SchemaError(format!(
                "field '{}' has no value source; only one text field is supported",
                extra.name
            )));
        }

        let embeddings = self.embedder.embed_batch(&texts).await?;
        let dimension = layout.dimension();
        if embeddings.len() != texts.len() {
            return Err(SemvecError::EmbeddingError(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }
        if let Some(bad) = embeddings.iter().find(|e| e.len() != dimension) {
            return Err(SemvecError::ValidationError(format!(
                "embedding has dimension {}, collection expects {dimension}",
                bad.len()
            )));
        }

        let primary = layout.primary_field();
        let keys = match primary.dtype {
            DataType::Int64 => ColumnData::Int64(
                key_range
                    .map(|k| {
                        i64::try_from(k).map_err(|_| {
                            SemvecError::ValidationError(format!("key {k} exceeds INT64"))
                        })
                    })
                    .collect::<Result<_>>()?,
            ),
            _ => ColumnData::VarChar(key_range.map(|k| k.to_string()).collect()),
        };

        let mut keys = Some(keys);
        let mut texts = Some(ColumnData::VarChar(texts));
        let mut embeddings = Some(ColumnData::FloatVector(embeddings));

        let columns = layout
            .fields()
            .iter()
            .map(|field| {
                let data = if field.is_primary {
                    keys.take()
                } else if field.is_vector() {
                    embeddings.take()
                } else if field.name == text_field {
                    texts.take()
                } else {
                    None
                };
                Column {
                    name: field.name.clone(),
                    data: data.unwrap_or(ColumnData::VarChar(Vec::new())),
                }
            })
            .collect();

        Ok(InsertColumns {
            primary_field: primary.name.clone(),
            vector_field: layout.vector_field().name.clone(),
            columns,
        })
    }

    /// Search the active collection for texts similar to `text`.
    ///
    /// Returns at most `limit` hits, best match first. An empty collection
    /// yields no hits.
    pub async fn search(
        &self,
        text: &str,
        limit: usize,
        output_fields: &[&str],
    ) -> Result<Vec<Hit>> {
        let handle = self.active()?;
        let layout = &handle.layout;

        let query = self.embedder.embed(text).await?;

        let request = SearchRequest {
            vectors: vec![query],
            anns_field: layout.vector_field().name.clone(),
            primary_field: layout.primary_field().name.clone(),
            params: SearchParams {
                metric_type: self.config.index.metric_type,
                nprobe: self.config.search.nprobe,
            },
            limit,
            output_fields: output_fields.iter().map(|f| f.to_string()).collect(),
        };

        let store = &self.store;
        let name = handle.name.as_str();
        let request = &request;

        let start = Instant::now();
        let groups = self
            .retry
            .execute("search", || store.search(name, request))
            .await?;
        let latency = start.elapsed();

        let hits: Vec<Hit> = groups.into_iter().next().unwrap_or_default();
        for hit in &hits {
            tracing::info!(id = %hit.id, distance = hit.distance, fields = ?hit.fields, "hit");
        }
        tracing::info!(collection = name, hits = hits.len(), ?latency, "Search latency");

        Ok(hits)
    }

    /// Drop collection `name`.
    ///
    /// A missing collection is reported as [`DropOutcome::NotFound`] rather
    /// than an error. Dropping the active collection detaches it.
    pub async fn drop(&mut self, name: &str) -> Result<DropOutcome> {
        if !self.check_existence(name).await? {
            tracing::warn!(collection = name, "Collection does not exist, nothing to drop");
            return Ok(DropOutcome::NotFound);
        }

        self.store.drop_collection(name).await?;
        if self.collection.as_ref().is_some_and(|c| c.name == name) {
            self.collection = None;
            *self.next_key.get_mut() = 0;
        }

        tracing::info!(collection = name, "Collection successfully dropped");
        Ok(DropOutcome::Dropped)
    }

    /// Release the store session
    pub async fn close(&self) -> Result<()> {
        self.store.close().await
    }
}
