//! semvec Configuration Management
//!
//! Configuration is read from a TOML file and can be overridden by
//! environment variables. Field definitions are validated when the file is
//! parsed, so a collection layout without exactly one primary key and one
//! vector field never reaches the store.

use crate::schema::DataType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Seed file: one row of text per line
    pub data: Option<PathBuf>,

    /// Vector store connection and collection layout
    pub store: StoreConfig,

    /// Embedding model
    pub model: ModelConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load from a TOML file and validate it
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::ParseError { message, .. } => ConfigError::ParseError { path, message },
            other => other,
        })
    }

    /// Parse and validate TOML content
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate()
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        if let Ok(backend) = std::env::var("SEMVEC_BACKEND") {
            self.store.backend = backend.parse()?;
        }
        if let Ok(host) = std::env::var("SEMVEC_HOST") {
            self.store.host = host;
        }
        if let Ok(port) = std::env::var("SEMVEC_PORT") {
            self.store.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "SEMVEC_PORT".to_string(),
                value: port,
            })?;
        }
        if let Ok(token) = std::env::var("SEMVEC_TOKEN") {
            self.store.token = Some(token);
        }
        if let Ok(name) = std::env::var("SEMVEC_COLLECTION") {
            self.store.collection_name = name;
        }

        // Embedding model
        if let Ok(provider) = std::env::var("EMBEDDING_PROVIDER") {
            self.model.provider = provider.parse()?;
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            self.model.name = model;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.model.openai_api_key = Some(key);
        }
        if let Ok(url) = std::env::var("OLLAMA_URL") {
            self.model.ollama_url = url;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }

        self.validate()?;
        Ok(self)
    }
}

/// Supported vector store backends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Milvus,
    Qdrant,
    /// Process-local store, nothing is persisted
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "milvus" => Ok(Self::Milvus),
            "qdrant" => Ok(Self::Qdrant),
            "memory" => Ok(Self::Memory),
            _ => Err(ConfigError::InvalidValue {
                key: "store.backend".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// A configured collection field.
///
/// The role of a field is part of its configuration rather than implied by
/// its name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldConfig {
    PrimaryKey {
        name: String,
        dtype: DataType,
        #[serde(default)]
        max_length: Option<u32>,
    },
    /// Dimension comes from the embedding model
    Vector {
        name: String,
        #[serde(default = "default_vector_dtype")]
        dtype: DataType,
    },
    Scalar {
        name: String,
        dtype: DataType,
        #[serde(default)]
        max_length: Option<u32>,
    },
}

fn default_vector_dtype() -> DataType {
    DataType::FloatVector
}

impl FieldConfig {
    pub fn name(&self) -> &str {
        match self {
            Self::PrimaryKey { name, .. } | Self::Vector { name, .. } | Self::Scalar { name, .. } => {
                name
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidField {
            field: self.name().to_string(),
            message,
        };

        if self.name().trim().is_empty() {
            return Err(invalid("field name must not be empty".to_string()));
        }

        match self {
            Self::PrimaryKey {
                dtype, max_length, ..
            } => match dtype {
                DataType::Int64 => Ok(()),
                DataType::Varchar if max_length.is_some() => Ok(()),
                DataType::Varchar => Err(invalid("VARCHAR primary key needs max_length".into())),
                other => Err(invalid(format!(
                    "primary key must be INT64 or VARCHAR, not {other}"
                ))),
            },
            Self::Vector { dtype, .. } if !dtype.is_vector() => Err(invalid(format!(
                "vector field must be FLOAT_VECTOR, not {dtype}"
            ))),
            Self::Vector { .. } => Ok(()),
            Self::Scalar { dtype, .. } if dtype.is_vector() => Err(invalid(
                "only one vector field is supported; declare it with kind = \"vector\"".into(),
            )),
            Self::Scalar {
                dtype: DataType::Varchar,
                max_length: None,
                ..
            } => Err(invalid("VARCHAR field needs max_length".into())),
            Self::Scalar { .. } => Ok(()),
        }
    }
}

/// Vector store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend implementation
    pub backend: StoreBackend,

    /// Store host
    pub host: String,

    /// Store port
    pub port: u16,

    /// Session label used in logs
    pub alias: String,

    /// Optional API token
    pub token: Option<String>,

    /// Collection description
    pub description: String,

    /// Collection name
    pub collection_name: String,

    /// Collection fields, in insert order
    pub fields: Vec<FieldConfig>,

    /// Index built on the vector field of new collections
    pub index: IndexConfig,

    /// Search parameters
    pub search: SearchConfig,

    /// Retries for transient store failures
    pub retry: RetryConfig,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Milvus,
            host: "localhost".to_string(),
            port: 19530,
            alias: "default".to_string(),
            token: None,
            description: "Sentences and their embeddings".to_string(),
            collection_name: "sentences".to_string(),
            fields: vec![
                FieldConfig::PrimaryKey {
                    name: "pk".to_string(),
                    dtype: DataType::Varchar,
                    max_length: Some(36),
                },
                FieldConfig::Scalar {
                    name: "sentence".to_string(),
                    dtype: DataType::Varchar,
                    max_length: Some(500),
                },
                FieldConfig::Vector {
                    name: "embeddings".to_string(),
                    dtype: DataType::FloatVector,
                },
            ],
            index: IndexConfig::default(),
            search: SearchConfig::default(),
            retry: RetryConfig::default(),
            timeout_secs: 30,
        }
    }
}

impl StoreConfig {
    /// Validate the field layout: unique names, exactly one primary key
    /// and exactly one vector field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collection_name.trim().is_empty() {
            return Err(ConfigError::MissingRequired(
                "store.collection_name".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            field.validate()?;
            if !seen.insert(field.name()) {
                return Err(ConfigError::InvalidField {
                    field: field.name().to_string(),
                    message: "duplicate field name".to_string(),
                });
            }
        }

        let primaries = self
            .fields
            .iter()
            .filter(|f| matches!(f, FieldConfig::PrimaryKey { .. }))
            .count();
        if primaries != 1 {
            return Err(ConfigError::InvalidSchema(format!(
                "expected exactly one primary_key field, found {primaries}"
            )));
        }

        let vectors = self
            .fields
            .iter()
            .filter(|f| matches!(f, FieldConfig::Vector { .. }))
            .count();
        if vectors != 1 {
            return Err(ConfigError::InvalidSchema(format!(
                "expected exactly one vector field, found {vectors}"
            )));
        }

        Ok(())
    }

    /// Base URL of the store's HTTP endpoint
    pub fn url(&self) -> String {
        if self.host.starts_with("http://") || self.host.starts_with("https://") {
            format!("{}:{}", self.host.trim_end_matches('/'), self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub index_type: crate::IndexType,
    pub metric_type: crate::MetricType,
    /// IVF partition count
    pub nlist: u32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        let spec = crate::IndexSpec::default();
        Self {
            index_type: spec.index_type,
            metric_type: spec.metric_type,
            nlist: spec.nlist,
        }
    }
}

impl From<&IndexConfig> for crate::IndexSpec {
    fn from(config: &IndexConfig) -> Self {
        Self {
            index_type: config.index_type,
            metric_type: config.metric_type,
            nlist: config.nlist,
        }
    }
}

/// Search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// IVF partitions probed per query
    pub nprobe: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            nprobe: crate::SearchParams::default().nprobe,
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry; doubles on each further retry
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 200,
        }
    }
}

/// Supported embedding providers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    #[default]
    Ollama,
    OpenAI,
    /// Local feature-hashing embedder, no model download
    Hashing,
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            "hashing" => Ok(Self::Hashing),
            _ => Err(ConfigError::InvalidValue {
                key: "model.provider".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Embedding model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Provider serving the model
    pub provider: EmbeddingProvider,

    /// Model name
    pub name: String,

    /// Output dimension; looked up from the model name when unset
    pub dimension: Option<usize>,

    /// Ollama server URL
    pub ollama_url: String,

    /// OpenAI API key
    pub openai_api_key: Option<String>,

    /// OpenAI API base URL (for compatible APIs)
    pub openai_base_url: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Ollama,
            name: "all-minilm".to_string(),
            dimension: None,
            ollama_url: "http://localhost:11434".to_string(),
            openai_api_key: None,
            openai_base_url: None,
            timeout_secs: 60,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,

    /// Also append plain-text logs to `semvec.log` in this directory
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
            log_dir: None,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid collection layout: {0}")]
    InvalidSchema(String),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
data = "data/sentences.txt"

[store]
backend = "milvus"
host = "milvus.local"
port = 19530
alias = "default"
description = "demo"
collection_name = "demo_sentences"

[[store.fields]]
kind = "primary_key"
name = "pk"
dtype = "VARCHAR"
max_length = 36

[[store.fields]]
kind = "scalar"
name = "sentence"
dtype = "VARCHAR"
max_length = 500

[[store.fields]]
kind = "vector"
name = "embeddings"

[logging]
log_dir = "logs"

[model]
provider = "hashing"
name = "hashing-384"
dimension = 384
"#;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.store.port, 19530);
        assert_eq!(config.store.fields.len(), 3);
        assert_eq!(config.store.index.nlist, 128);
        assert_eq!(config.store.search.nprobe, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_sample() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.data, Some(PathBuf::from("data/sentences.txt")));
        assert_eq!(config.store.collection_name, "demo_sentences");
        assert_eq!(config.store.url(), "http://milvus.local:19530");
        assert_eq!(config.model.provider, EmbeddingProvider::Hashing);
        assert_eq!(config.model.dimension, Some(384));
        assert_eq!(config.logging.log_dir, Some(PathBuf::from("logs")));
        assert_eq!(config.logging.level, "info");
        assert_eq!(
            config.store.fields[2],
            FieldConfig::Vector {
                name: "embeddings".to_string(),
                dtype: DataType::FloatVector,
            }
        );
    }

    #[test]
    fn test_missing_file() {
        let err = AppConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileReadError { .. }));
    }

    #[test]
    fn test_two_primary_keys_rejected() {
        let content = SAMPLE.replace(
            "kind = \"scalar\"\nname = \"sentence\"",
            "kind = \"primary_key\"\nname = \"sentence\"",
        );
        let err = AppConfig::from_toml_str(&content).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSchema(_)));
    }

    #[test]
    fn test_missing_vector_field_rejected() {
        let mut config = StoreConfig::default();
        config.fields.pop();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSchema(_))
        ));
    }

    #[test]
    fn test_varchar_needs_max_length() {
        let mut config = StoreConfig::default();
        config.fields[1] = FieldConfig::Scalar {
            name: "sentence".to_string(),
            dtype: DataType::Varchar,
            max_length: None,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidField { .. })
        ));
    }

    #[test]
    fn test_duplicate_field_name_rejected() {
        let mut config = StoreConfig::default();
        config.fields[1] = FieldConfig::Scalar {
            name: "pk".to_string(),
            dtype: DataType::Int64,
            max_length: None,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidField { .. })
        ));
    }

    #[test]
    fn test_backend_and_provider_parse() {
        assert_eq!(
            "Qdrant".parse::<StoreBackend>().unwrap(),
            StoreBackend::Qdrant
        );
        assert!("redis".parse::<StoreBackend>().is_err());
        assert_eq!(
            "openai".parse::<EmbeddingProvider>().unwrap(),
            EmbeddingProvider::OpenAI
        );
    }

    #[test]
    fn test_env_override_backend_and_provider() {
        std::env::set_var("SEMVEC_BACKEND", "memory");
        std::env::set_var("EMBEDDING_PROVIDER", "hashing");
        let config = AppConfig::default().with_env_override();

        std::env::set_var("SEMVEC_BACKEND", "redis");
        let invalid = AppConfig::default().with_env_override();

        std::env::remove_var("SEMVEC_BACKEND");
        std::env::remove_var("EMBEDDING_PROVIDER");

        let config = config.unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.model.provider, EmbeddingProvider::Hashing);
        assert!(matches!(invalid, Err(ConfigError::InvalidValue { .. })));
    }
}
