//! Collection schema model
//!
//! A [`CollectionSchema`] is an ordered list of [`FieldSchema`]s. Stores bind
//! inserted values to fields by this order, so it is preserved exactly as
//! configured.

use crate::config::FieldConfig;
use crate::{Result, SemvecError};
use serde::{Deserialize, Serialize};

/// Field data types understood by the vector stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    #[serde(alias = "STRING")]
    Varchar,
    FloatVector,
}

impl DataType {
    pub fn is_vector(&self) -> bool {
        matches!(self, Self::FloatVector)
    }

    /// Type name used by the Milvus REST API
    pub fn milvus_name(&self) -> &'static str {
        match self {
            Self::Bool => "Bool",
            Self::Int8 => "Int8",
            Self::Int16 => "Int16",
            Self::Int32 => "Int32",
            Self::Int64 => "Int64",
            Self::Float => "Float",
            Self::Double => "Double",
            Self::Varchar => "VarChar",
            Self::FloatVector => "FloatVector",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Bool => "BOOL",
            Self::Int8 => "INT8",
            Self::Int16 => "INT16",
            Self::Int32 => "INT32",
            Self::Int64 => "INT64",
            Self::Float => "FLOAT",
            Self::Double => "DOUBLE",
            Self::Varchar => "VARCHAR",
            Self::FloatVector => "FLOAT_VECTOR",
        };
        write!(f, "{name}")
    }
}

/// A single field of a collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub dtype: DataType,

    /// Maximum length for VARCHAR fields
    pub max_length: Option<u32>,

    /// Dimension for vector fields
    pub dim: Option<usize>,

    pub is_primary: bool,

    /// Whether the store assigns primary key values
    pub auto_id: bool,
}

impl FieldSchema {
    /// Primary key field; key values are always supplied by the caller
    pub fn primary(name: impl Into<String>, dtype: DataType, max_length: Option<u32>) -> Self {
        Self {
            name: name.into(),
            dtype,
            max_length,
            dim: None,
            is_primary: true,
            auto_id: false,
        }
    }

    pub fn vector(name: impl Into<String>, dim: usize) -> Self {
        Self {
            name: name.into(),
            dtype: DataType::FloatVector,
            max_length: None,
            dim: Some(dim),
            is_primary: false,
            auto_id: false,
        }
    }

    pub fn scalar(name: impl Into<String>, dtype: DataType, max_length: Option<u32>) -> Self {
        Self {
            name: name.into(),
            dtype,
            max_length,
            dim: None,
            is_primary: false,
            auto_id: false,
        }
    }

    pub fn is_vector(&self) -> bool {
        self.dtype.is_vector()
    }
}

/// Ordered field list plus a description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    fields: Vec<FieldSchema>,
    description: String,
}

impl CollectionSchema {
    /// Build a schema, requiring exactly one primary key and one vector field
    pub fn new(fields: Vec<FieldSchema>, description: impl Into<String>) -> Result<Self> {
        let primaries = fields.iter().filter(|f| f.is_primary).count();
        if primaries != 1 {
            return Err(SemvecError::SchemaError(format!(
                "expected exactly one primary key field, found {primaries}"
            )));
        }

        let vectors = fields.iter().filter(|f| f.is_vector()).count();
        if vectors != 1 {
            return Err(SemvecError::SchemaError(format!(
                "expected exactly one vector field, found {vectors}"
            )));
        }

        if let Some(field) = fields.iter().find(|f| f.is_vector() && f.dim.unwrap_or(0) == 0) {
            return Err(SemvecError::SchemaError(format!(
                "vector field '{}' needs a non-zero dimension",
                field.name
            )));
        }

        Ok(Self {
            fields,
            description: description.into(),
        })
    }

    /// Derive a schema from configured fields.
    ///
    /// The vector field's dimension is not configured; it is taken from
    /// `vector_dim`, the embedding model's output dimensionality.
    pub fn from_config(
        fields: &[FieldConfig],
        description: impl Into<String>,
        vector_dim: usize,
    ) -> Result<Self> {
        let fields = fields
            .iter()
            .map(|field| match field {
                FieldConfig::PrimaryKey {
                    name,
                    dtype,
                    max_length,
                } => FieldSchema::primary(name, *dtype, *max_length),
                FieldConfig::Vector { name, .. } => FieldSchema::vector(name, vector_dim),
                FieldConfig::Scalar {
                    name,
                    dtype,
                    max_length,
                } => FieldSchema::scalar(name, *dtype, *max_length),
            })
            .collect();

        Self::new(fields, description)
    }

    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn primary_field(&self) -> &FieldSchema {
        // `new` guarantees exactly one
        self.fields
            .iter()
            .find(|f| f.is_primary)
            .unwrap_or(&self.fields[0])
    }

    pub fn vector_field(&self) -> &FieldSchema {
        self.fields
            .iter()
            .find(|f| f.is_vector())
            .unwrap_or(&self.fields[0])
    }

    /// Dimension of the vector field
    pub fn dimension(&self) -> usize {
        self.vector_field().dim.unwrap_or(0)
    }

    /// Non-key, non-vector fields
    pub fn scalar_fields(&self) -> impl Iterator<Item = &FieldSchema> {
        self.fields.iter().filter(|f| !f.is_primary && !f.is_vector())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sentence_fields() -> Vec<FieldConfig> {
        vec![
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
        ]
    }

    #[test]
    fn test_schema_from_config_takes_model_dimension() {
        let schema = CollectionSchema::from_config(&sentence_fields(), "sentences", 384).unwrap();

        assert_eq!(schema.field_names(), vec!["pk", "sentence", "embeddings"]);
        assert_eq!(schema.dimension(), 384);
        assert_eq!(schema.description(), "sentences");

        let pk = schema.primary_field();
        assert_eq!(pk.name, "pk");
        assert_eq!(pk.max_length, Some(36));
        assert!(!pk.auto_id);

        let sentence = schema.field("sentence").unwrap();
        assert!(!sentence.is_primary);
        assert_eq!(sentence.max_length, Some(500));
    }

    #[test]
    fn test_schema_preserves_config_order() {
        let mut fields = sentence_fields();
        fields.rotate_left(1);
        let schema = CollectionSchema::from_config(&fields, "", 8).unwrap();
        assert_eq!(schema.field_names(), vec!["sentence", "embeddings", "pk"]);
    }

    #[test]
    fn test_schema_rejects_missing_or_duplicate_primary() {
        let no_pk = vec![
            FieldSchema::scalar("sentence", DataType::Varchar, Some(10)),
            FieldSchema::vector("embeddings", 4),
        ];
        assert!(CollectionSchema::new(no_pk, "").is_err());

        let two_pks = vec![
            FieldSchema::primary("a", DataType::Int64, None),
            FieldSchema::primary("b", DataType::Int64, None),
            FieldSchema::vector("embeddings", 4),
        ];
        assert!(CollectionSchema::new(two_pks, "").is_err());
    }

    #[test]
    fn test_schema_rejects_zero_dimension() {
        let fields = vec![
            FieldSchema::primary("pk", DataType::Int64, None),
            FieldSchema::vector("embeddings", 0),
        ];
        assert!(matches!(
            CollectionSchema::new(fields, ""),
            Err(SemvecError::SchemaError(_))
        ));
    }

    #[test]
    fn test_data_type_names() {
        assert_eq!(DataType::Varchar.milvus_name(), "VarChar");
        assert_eq!(DataType::FloatVector.to_string(), "FLOAT_VECTOR");
    }
}
