use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use crate::vector::Vector;

/// Arbitrary scalar metadata attached to a document, used for filtering
pub type Tags = serde_json::Map<String, Value>;

/// A document as produced by the caller for one encoder.
///
/// The same document id is usually submitted once per encoder, each copy
/// carrying that encoder's embeddings. Root-level embeddings are keyed by
/// field name; chunked fields carry their embedding on the [`Chunk`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub embeddings: BTreeMap<String, Vector>,
    #[serde(default)]
    pub chunks: Vec<Chunk>,
}

impl Document {
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_embedding(mut self, field: impl Into<String>, vector: impl Into<Vector>) -> Self {
        self.embeddings.insert(field.into(), vector.into());
        self
    }

    #[must_use]
    pub fn with_chunk(mut self, chunk: Chunk) -> Self {
        self.chunks.push(chunk);
        self
    }
}

/// One field's content of a document, with the embedding of one encoder
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Empty ids are derived from the parent id, field and position
    #[serde(default)]
    pub id: String,
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vector>,
}

impl Chunk {
    #[inline]
    #[must_use]
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    #[must_use]
    pub fn with_embedding(mut self, vector: impl Into<Vector>) -> Self {
        self.embedding = Some(vector.into());
        self
    }
}

/// Canonical stored form of a root document.
///
/// `vectors` is keyed by mapping field name (`<field>-<encoder>`). Chunks are
/// owned by the store; the document only keeps their ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    /// Insertion sequence, assigned by the backend on first write
    #[serde(default)]
    pub seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub bm25_text: String,
    #[serde(default)]
    pub vectors: BTreeMap<String, Vector>,
    #[serde(default)]
    pub chunk_ids: Vec<String>,
}

/// Canonical stored form of a chunk. `parent_id` is a lookup key only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChunk {
    pub id: String,
    pub parent_id: String,
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Embeddings keyed by encoder name
    #[serde(default)]
    pub vectors: BTreeMap<String, Vector>,
}

impl StoredChunk {
    /// Store key of this chunk, scoped to its parent
    #[inline]
    pub fn key(&self) -> String {
        chunk_key(&self.parent_id, &self.id)
    }
}

/// Store key for chunk `chunk_id` of document `parent_id`.
///
/// Chunk ids are only unique within their parent. The parent id is length
/// prefixed so no two (parent, chunk) pairs share a key.
pub fn chunk_key(parent_id: &str, chunk_id: &str) -> String {
    format!("{}:{}{}", parent_id.len(), parent_id, chunk_id)
}

/// A document together with the chunks it owns, ready to be written
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedDocument {
    pub document: StoredDocument,
    pub chunks: Vec<StoredChunk>,
}

/// Lightweight projection returned by list/filter/get: no vectors, no chunks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default)]
    pub tags: Tags,
}

impl From<&StoredDocument> for DocumentSummary {
    fn from(doc: &StoredDocument) -> Self {
        Self {
            id: doc.id.clone(),
            uri: doc.uri.clone(),
            tags: doc.tags.clone(),
        }
    }
}

/// Query input for one search: query field name → content and embeddings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryDocument {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub fields: BTreeMap<String, QueryField>,
}

/// A query field's text and its embedding per encoder
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryField {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub embeddings: BTreeMap<String, Vector>,
}

impl QueryDocument {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_text(mut self, field: impl Into<String>, text: impl Into<String>) -> Self {
        self.fields.entry(field.into()).or_default().text = Some(text.into());
        self
    }

    #[must_use]
    pub fn with_embedding(
        mut self,
        field: impl Into<String>,
        encoder: impl Into<String>,
        vector: impl Into<Vector>,
    ) -> Self {
        self.fields
            .entry(field.into())
            .or_default()
            .embeddings
            .insert(encoder.into(), vector.into());
        self
    }

    pub fn embedding(&self, field: &str, encoder: &str) -> Option<&Vector> {
        self.fields.get(field).and_then(|f| f.embeddings.get(encoder))
    }

    /// All query text joined by spaces; the default lexical query
    pub fn text(&self) -> String {
        self.fields
            .values()
            .filter_map(|f| f.text.as_deref())
            .filter(|t| !t.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
