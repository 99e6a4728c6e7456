//! semvec Vector - Vector store and embedding abstraction
//!
//! Provides the [`VectorStore`] and [`Embedder`] capability traits, their
//! backends (Milvus, Qdrant, in-memory; Ollama, OpenAI, hashing) and the
//! [`CollectionManager`] that coordinates schema derivation, inserts and
//! searches on top of them.
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use semvec_core::{
    CollectionSchema, ConsistencyLevel, Hit, IndexSpec, InsertColumns, MutationResult, Result,
    SearchRequest, StoreBackend, StoreConfig,
};
use std::sync::Arc;

pub mod embedding;
pub mod manager;
pub mod memory_store;
pub mod milvus_store;
pub mod qdrant_store;

pub use embedding::{create_embedder, Embedder, HashingEmbedding, OllamaEmbedding, OpenAiEmbedding};
pub use manager::{CollectionHandle, CollectionManager};
pub use memory_store::MemoryStore;
pub use milvus_store::MilvusStore;
pub use qdrant_store::QdrantStore;

/// Trait for vector database operations
///
/// Collections are addressed by name; the store keeps no per-collection
/// client state.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Open (or verify) the session with the store
    async fn connect(&self) -> Result<()>;

    /// Whether a collection with this name exists
    async fn has_collection(&self, name: &str) -> Result<bool>;

    /// Create a collection with the given schema
    async fn create_collection(
        &self,
        name: &str,
        schema: &CollectionSchema,
        consistency: ConsistencyLevel,
    ) -> Result<()>;

    /// Build an index on `field`
    async fn create_index(&self, name: &str, field: &str, spec: &IndexSpec) -> Result<()>;

    /// Insert column-oriented rows
    async fn insert(&self, name: &str, columns: &InsertColumns) -> Result<MutationResult>;

    /// Persist buffered writes so they show up in entity counts
    async fn flush(&self, name: &str) -> Result<()>;

    /// Load the collection into memory for searching
    async fn load(&self, name: &str) -> Result<()>;

    /// Nearest-neighbour search; one hit group per query vector
    async fn search(&self, name: &str, request: &SearchRequest) -> Result<Vec<Vec<Hit>>>;

    /// Delete a collection
    async fn drop_collection(&self, name: &str) -> Result<()>;

    /// Number of persisted entities
    async fn entity_count(&self, name: &str) -> Result<u64>;

    /// Release the session
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// Create a vector store from config
pub async fn create_vector_store(config: &StoreConfig) -> Result<Arc<dyn VectorStore>> {
    match config.backend {
        StoreBackend::Milvus => Ok(Arc::new(MilvusStore::new(config)?)),
        StoreBackend::Qdrant => Ok(Arc::new(QdrantStore::new(config).await?)),
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}
