//! semvec Core - Configuration, schema model and shared types
//!
//! This crate defines the abstractions shared by the vector layer and the CLI:
//! - Error types
//! - Collection schema model (fields, data types)
//! - Index / search parameters and insert payloads
//! - Configuration management
//! - Retry policy for store calls
//!
//! Author: hephaex@gmail.com

pub mod config;
pub mod retry;
pub mod schema;

pub use config::{
    AppConfig, ConfigError, EmbeddingProvider, FieldConfig, IndexConfig, LoggingConfig,
    ModelConfig, RetryConfig, SearchConfig, StoreBackend, StoreConfig,
};
pub use retry::RetryPolicy;
pub use schema::{CollectionSchema, DataType, FieldSchema};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for semvec operations
#[derive(Error, Debug)]
pub enum SemvecError {
    #[error("Connection failed: {0}")]
    ConnectionError(String),

    #[error("No active collection: attach or create a collection first")]
    NoActiveCollection,

    #[error("Collection not found: {0}")]
    NotFound(String),

    #[error("Schema error: {0}")]
    SchemaError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Search error: {0}")]
    SearchError(String),

    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SemvecError {
    /// Whether the failure may go away on its own (unreachable store, timeout)
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionError(_))
    }
}

impl From<ConfigError> for SemvecError {
    fn from(err: ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SemvecError>;

// ============================================================================
// Collection / Index Parameters
// ============================================================================

/// Read consistency requested when a collection is created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsistencyLevel {
    /// Reads observe every write previously committed by the session
    #[default]
    Strong,
    Session,
    Bounded,
    Eventually,
}

impl std::fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strong => write!(f, "Strong"),
            Self::Session => write!(f, "Session"),
            Self::Bounded => write!(f, "Bounded"),
            Self::Eventually => write!(f, "Eventually"),
        }
    }
}

/// Distance metric used by indexes and searches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetricType {
    #[default]
    L2,
    Ip,
    Cosine,
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::L2 => write!(f, "L2"),
            Self::Ip => write!(f, "IP"),
            Self::Cosine => write!(f, "COSINE"),
        }
    }
}

/// Approximate nearest neighbour index families
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexType {
    Flat,
    /// Inverted file index: vectors are clustered into `nlist` partitions
    #[default]
    IvfFlat,
    Hnsw,
}

impl std::fmt::Display for IndexType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flat => write!(f, "FLAT"),
            Self::IvfFlat => write!(f, "IVF_FLAT"),
            Self::Hnsw => write!(f, "HNSW"),
        }
    }
}

/// Index definition for the vector field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub index_type: IndexType,
    pub metric_type: MetricType,
    /// Number of partitions for IVF indexes
    pub nlist: u32,
}

impl Default for IndexSpec {
    fn default() -> Self {
        Self {
            index_type: IndexType::IvfFlat,
            metric_type: MetricType::L2,
            nlist: 128,
        }
    }
}

/// Per-query search parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParams {
    pub metric_type: MetricType,
    /// Number of IVF partitions probed per query
    pub nprobe: u32,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            metric_type: MetricType::L2,
            nprobe: 10,
        }
    }
}

/// A nearest-neighbour search against one collection
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Query vectors; one result group is returned per vector
    pub vectors: Vec<Vec<f32>>,

    /// Vector field searched
    pub anns_field: String,

    /// Primary key field, used to label hits
    pub primary_field: String,

    pub params: SearchParams,

    /// Maximum hits per query vector
    pub limit: usize,

    /// Fields copied into each hit
    pub output_fields: Vec<String>,
}

// ============================================================================
// Insert Payloads
// ============================================================================

/// Values of a single column
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    VarChar(Vec<String>),
    Int64(Vec<i64>),
    FloatVector(Vec<Vec<f32>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            Self::VarChar(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::FloatVector(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at `row` as JSON
    pub fn value_at(&self, row: usize) -> Option<serde_json::Value> {
        match self {
            Self::VarChar(v) => v.get(row).map(|s| serde_json::Value::from(s.as_str())),
            Self::Int64(v) => v.get(row).map(|n| serde_json::Value::from(*n)),
            Self::FloatVector(v) => v.get(row).map(|vec| serde_json::Value::from(vec.clone())),
        }
    }

    /// Value at `row` rendered as a key string
    pub fn key_at(&self, row: usize) -> Option<String> {
        match self {
            Self::VarChar(v) => v.get(row).cloned(),
            Self::Int64(v) => v.get(row).map(|n| n.to_string()),
            Self::FloatVector(_) => None,
        }
    }
}

/// A named column
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

/// Column-oriented insert, aligned with the schema's field order
#[derive(Debug, Clone, PartialEq)]
pub struct InsertColumns {
    /// Name of the primary key column
    pub primary_field: String,

    /// Name of the vector column
    pub vector_field: String,

    pub columns: Vec<Column>,
}

impl InsertColumns {
    /// Number of rows (all columns have the same length)
    pub fn num_rows(&self) -> usize {
        self.columns.first().map(|c| c.data.len()).unwrap_or(0)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Primary key values as strings
    pub fn primary_keys(&self) -> Vec<String> {
        self.column(&self.primary_field)
            .map(|c| (0..c.data.len()).filter_map(|i| c.data.key_at(i)).collect())
            .unwrap_or_default()
    }

    /// Vectors of the vector column
    pub fn vectors(&self) -> &[Vec<f32>] {
        match self.column(&self.vector_field).map(|c| &c.data) {
            Some(ColumnData::FloatVector(v)) => v,
            _ => &[],
        }
    }

    /// Row-oriented view: one JSON object per row, keyed by field name
    pub fn to_rows(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        (0..self.num_rows())
            .map(|row| {
                self.columns
                    .iter()
                    .filter_map(|c| c.data.value_at(row).map(|v| (c.name.clone(), v)))
                    .collect()
            })
            .collect()
    }

    /// Check that every column holds the same number of rows
    pub fn validate(&self) -> Result<()> {
        let rows = self.num_rows();
        if let Some(bad) = self.columns.iter().find(|c| c.data.len() != rows) {
            return Err(SemvecError::ValidationError(format!(
                "column '{}' has {} values, expected {rows}",
                bad.name,
                bad.data.len()
            )));
        }
        Ok(())
    }
}

/// Store response to an insert
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationResult {
    /// Number of rows written
    pub insert_count: u64,

    /// Primary keys of the written rows, in insert order
    pub ids: Vec<String>,
}

// ============================================================================
// Search Results
// ============================================================================

/// A single search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    /// Primary key of the matched entity
    pub id: String,

    /// Distance to the query under the search metric (smaller is closer for L2)
    pub distance: f32,

    /// Requested output fields
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Hit {
    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.fields.get(field)
    }
}

/// Result of dropping a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropOutcome {
    Dropped,
    /// Nothing to drop; the collection did not exist
    NotFound,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_columns() -> InsertColumns {
        InsertColumns {
            primary_field: "pk".to_string(),
            vector_field: "embeddings".to_string(),
            columns: vec![
                Column {
                    name: "pk".to_string(),
                    data: ColumnData::VarChar(vec!["0".to_string(), "1".to_string()]),
                },
                Column {
                    name: "sentence".to_string(),
                    data: ColumnData::VarChar(vec!["a".to_string(), "b".to_string()]),
                },
                Column {
                    name: "embeddings".to_string(),
                    data: ColumnData::FloatVector(vec![vec![0.0, 1.0], vec![1.0, 0.0]]),
                },
            ],
        }
    }

    #[test]
    fn test_insert_columns_rows() {
        let columns = sample_columns();
        assert_eq!(columns.num_rows(), 2);
        assert_eq!(columns.primary_keys(), vec!["0", "1"]);
        assert_eq!(columns.vectors().len(), 2);

        let rows = columns.to_rows();
        assert_eq!(rows[1]["sentence"], serde_json::json!("b"));
        assert_eq!(rows[0]["embeddings"], serde_json::json!([0.0, 1.0]));
        assert!(columns.validate().is_ok());
    }

    #[test]
    fn test_insert_columns_length_mismatch() {
        let mut columns = sample_columns();
        columns.columns[1].data = ColumnData::VarChar(vec!["only one".to_string()]);
        assert!(matches!(
            columns.validate(),
            Err(SemvecError::ValidationError(_))
        ));
    }

    #[test]
    fn test_index_defaults() {
        let index = IndexSpec::default();
        assert_eq!(index.index_type.to_string(), "IVF_FLAT");
        assert_eq!(index.metric_type.to_string(), "L2");
        assert_eq!(index.nlist, 128);
        assert_eq!(SearchParams::default().nprobe, 10);
        assert_eq!(ConsistencyLevel::default().to_string(), "Strong");
    }

    #[test]
    fn test_transient_errors() {
        assert!(SemvecError::ConnectionError("refused".into()).is_transient());
        assert!(!SemvecError::NoActiveCollection.is_transient());
        assert!(!SemvecError::DatabaseError("bad request".into()).is_transient());
    }
}
