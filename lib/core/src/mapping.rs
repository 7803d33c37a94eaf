//! Storage schema derived from a field × encoder configuration.
//!
//! A [`Schema`] is built once per index from an ordered list of
//! [`FieldEncoding`]s and never changes afterwards. Its JSON rendering
//! ([`Schema::mapping`]) is the persisted mapping artifact:
//!
//! ```text
//! {"properties": {
//!     "id":        {"type": "keyword"},
//!     "bm25_text": {"type": "text", "analyzer": "standard"},
//!     "title-clip": {"properties": {"embedding": {
//!         "type": "dense_vector", "dims": "8", "similarity": "cosine", "index": "true"}}}
//! }}
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Keyword identity field present in every mapping
pub const ID_FIELD: &str = "id";
/// Shared analyzed text field used for lexical matching
pub const TEXT_FIELD: &str = "bm25_text";

const EMBEDDING_KEY: &str = "embedding";

/// Similarity metric of the dense vector fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    Cosine,
    DotProduct,
    L2Norm,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::DotProduct => "dot_product",
            Metric::L2Norm => "l2_norm",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(Metric::Cosine),
            "dot_product" | "dot" => Ok(Metric::DotProduct),
            "l2_norm" | "l2" | "euclidean" => Ok(Metric::L2Norm),
            other => Err(Error::Configuration(format!("unsupported metric '{}'", other))),
        }
    }
}

/// One `(field, encoder, dimension)` entry of the schema configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldEncoding {
    pub field: String,
    pub encoder: String,
    pub dim: usize,
}

impl FieldEncoding {
    pub fn new(field: impl Into<String>, encoder: impl Into<String>, dim: usize) -> Self {
        Self {
            field: field.into(),
            encoder: encoder.into(),
            dim,
        }
    }

    /// Name of the vector field in the mapping, `<field>-<encoder>`
    #[inline]
    pub fn name(&self) -> String {
        vector_field_name(&self.field, &self.encoder)
    }
}

/// Grouped configuration form: one encoder applied to several fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderFields {
    pub encoder: String,
    pub embedding_size: usize,
    pub fields: Vec<String>,
}

impl EncoderFields {
    pub fn new(encoder: impl Into<String>, embedding_size: usize, fields: &[&str]) -> Self {
        Self {
            encoder: encoder.into(),
            embedding_size,
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// Expand groups into field encodings, preserving group then field order.
    pub fn expand(groups: &[EncoderFields]) -> Vec<FieldEncoding> {
        groups
            .iter()
            .flat_map(|g| {
                g.fields
                    .iter()
                    .map(move |f| FieldEncoding::new(f.clone(), g.encoder.clone(), g.embedding_size))
            })
            .collect()
    }
}

#[inline]
pub fn vector_field_name(field: &str, encoder: &str) -> String {
    format!("{}-{}", field, encoder)
}

/// A dense vector field of the schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorField {
    pub name: String,
    pub field: String,
    pub encoder: String,
    pub dims: usize,
}

/// Immutable storage schema of one index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    metric: Metric,
    fields: Vec<VectorField>,
}

/// Build the schema for `encodings` with the named similarity `metric`.
pub fn generate_mapping(encodings: &[FieldEncoding], metric: &str) -> Result<Schema> {
    Schema::new(encodings, metric.parse()?)
}

impl Schema {
    pub fn new(encodings: &[FieldEncoding], metric: Metric) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(encodings.len());

        for enc in encodings {
            if enc.field.is_empty() || enc.encoder.is_empty() {
                return Err(Error::Configuration(
                    "field and encoder names must not be empty".to_string(),
                ));
            }
            if enc.dim == 0 {
                return Err(Error::Configuration(format!(
                    "dimension of '{}' must be positive",
                    enc.name()
                )));
            }
            let name = enc.name();
            if name == ID_FIELD || name == TEXT_FIELD {
                return Err(Error::Configuration(format!(
                    "'{}' collides with a reserved field",
                    name
                )));
            }
            if !seen.insert(name.clone()) {
                return Err(Error::Configuration(format!(
                    "duplicate field encoding '{}'",
                    name
                )));
            }
            fields.push(VectorField {
                name,
                field: enc.field.clone(),
                encoder: enc.encoder.clone(),
                dims: enc.dim,
            });
        }

        Ok(Self { metric, fields })
    }

    #[inline]
    pub fn metric(&self) -> Metric {
        self.metric
    }

    #[inline]
    pub fn fields(&self) -> &[VectorField] {
        &self.fields
    }

    pub fn vector_field(&self, field: &str, encoder: &str) -> Option<&VectorField> {
        self.fields
            .iter()
            .find(|f| f.field == field && f.encoder == encoder)
    }

    pub fn encoders(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for f in &self.fields {
            if !out.contains(&f.encoder.as_str()) {
                out.push(&f.encoder);
            }
        }
        out
    }

    pub fn field_encodings(&self) -> Vec<FieldEncoding> {
        self.fields
            .iter()
            .map(|f| FieldEncoding::new(f.field.clone(), f.encoder.clone(), f.dims))
            .collect()
    }

    /// Render the mapping artifact. Dimensions and the `index` flag are
    /// encoded as strings.
    pub fn mapping(&self) -> Value {
        let mut properties = Map::new();
        properties.insert(ID_FIELD.to_string(), json!({"type": "keyword"}));
        properties.insert(
            TEXT_FIELD.to_string(),
            json!({"type": "text", "analyzer": "standard"}),
        );
        for f in &self.fields {
            properties.insert(
                f.name.clone(),
                json!({
                    "properties": {
                        EMBEDDING_KEY: {
                            "type": "dense_vector",
                            "dims": f.dims.to_string(),
                            "similarity": self.metric.as_str(),
                            "index": "true",
                        }
                    }
                }),
            );
        }
        json!({ "properties": Value::Object(properties) })
    }

    /// Parse a mapping artifact back into a schema.
    ///
    /// Vector field names are split at their last `-` into field and encoder.
    /// All vector fields must share one similarity metric.
    pub fn from_mapping(mapping: &Value) -> Result<Self> {
        let properties = mapping
            .get("properties")
            .and_then(Value::as_object)
            .ok_or_else(|| Error::Configuration("mapping has no 'properties' object".to_string()))?;

        let mut encodings = Vec::new();
        let mut metric: Option<Metric> = None;

        for (name, property) in properties {
            if name == ID_FIELD || name == TEXT_FIELD {
                continue;
            }
            let embedding = property
                .get("properties")
                .and_then(|p| p.get(EMBEDDING_KEY))
                .ok_or_else(|| {
                    Error::Configuration(format!("field '{}' has no embedding sub-field", name))
                })?;

            if embedding.get("type").and_then(Value::as_str) != Some("dense_vector") {
                return Err(Error::Configuration(format!(
                    "field '{}' is not a dense_vector",
                    name
                )));
            }

            let dims = match embedding.get("dims") {
                Some(Value::String(s)) => s.parse::<usize>().ok(),
                Some(Value::Number(n)) => n.as_u64().map(|d| d as usize),
                _ => None,
            }
            .ok_or_else(|| Error::Configuration(format!("field '{}' has invalid dims", name)))?;

            let field_metric = match embedding.get("similarity").and_then(Value::as_str) {
                Some(s) => s.parse()?,
                None => Metric::default(),
            };
            match metric {
                Some(m) if m != field_metric => {
                    return Err(Error::Configuration(format!(
                        "field '{}' uses metric '{}' but mapping uses '{}'",
                        name, field_metric, m
                    )));
                }
                _ => metric = Some(field_metric),
            }

            let (field, encoder) = name.rsplit_once('-').ok_or_else(|| {
                Error::Configuration(format!(
                    "vector field '{}' is not named '<field>-<encoder>'",
                    name
                ))
            })?;
            encodings.push(FieldEncoding::new(field, encoder, dims));
        }

        Schema::new(&encodings, metric.unwrap_or_default())
    }
}
