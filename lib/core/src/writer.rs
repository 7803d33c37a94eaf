//! Index writer: turns per-encoder document batches into stored documents.
//!
//! The caller submits `encoder -> [Document]`; copies of the same document id
//! under different encoders are merged into one [`StoredDocument`] whose
//! vectors are keyed by mapping field name. An id may appear at most once per
//! encoder, and a chunk id at most once per document copy. The whole batch is
//! validated before anything is handed to the backend, so an invalid document
//! rejects the batch and nothing is written.

use crate::document::{Document, PreparedDocument, StoredChunk, StoredDocument, Tags};
use crate::mapping::{vector_field_name, Schema};
use crate::vector::Vector;
use crate::{Error, Result};
use ahash::{AHashMap, AHashSet};
use std::collections::BTreeMap;

/// Documents to index, keyed by the encoder that produced their embeddings
pub type IndexBatch = BTreeMap<String, Vec<Document>>;

#[derive(Default)]
struct Pending {
    id: String,
    uri: Option<String>,
    text: Option<String>,
    tags: Tags,
    vectors: BTreeMap<String, Vector>,
    chunk_vectors: BTreeMap<String, Vec<Vector>>,
    chunk_order: Vec<String>,
    chunks: AHashMap<String, StoredChunk>,
}

pub struct IndexWriter<'a> {
    schema: &'a Schema,
}

impl<'a> IndexWriter<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    /// Validate and merge a batch. Documents come out in first-seen order.
    pub fn prepare(&self, batch: &IndexBatch) -> Result<Vec<PreparedDocument>> {
        let mut order: Vec<String> = Vec::new();
        let mut pending: AHashMap<String, Pending> = AHashMap::new();

        for (encoder, docs) in batch {
            let mut seen: AHashSet<&str> = AHashSet::with_capacity(docs.len());
            for doc in docs {
                if doc.id.is_empty() {
                    return Err(Error::Configuration(format!(
                        "document without id in '{}' batch",
                        encoder
                    )));
                }
                if !seen.insert(doc.id.as_str()) {
                    return Err(Error::Configuration(format!(
                        "document '{}' appears more than once in '{}' batch",
                        doc.id, encoder
                    )));
                }
                let entry = pending.entry(doc.id.clone()).or_insert_with(|| {
                    order.push(doc.id.clone());
                    Pending {
                        id: doc.id.clone(),
                        ..Default::default()
                    }
                });
                self.merge(entry, encoder, doc)?;
            }
        }

        Ok(order
            .into_iter()
            .filter_map(|id| pending.remove(&id))
            .map(Self::finish)
            .collect())
    }

    fn check(&self, doc_id: &str, field: &str, encoder: &str, vector: &Vector) -> Result<String> {
        let vf = self.schema.vector_field(field, encoder).ok_or_else(|| {
            Error::Configuration(format!(
                "document '{}': no mapping for '{}'",
                doc_id,
                vector_field_name(field, encoder)
            ))
        })?;
        if vector.dim() != vf.dims {
            return Err(Error::Configuration(format!(
                "document '{}': '{}' expects {} dimensions, got {}",
                doc_id,
                vf.name,
                vf.dims,
                vector.dim()
            )));
        }
        Ok(vf.name.clone())
    }

    fn merge(&self, entry: &mut Pending, encoder: &str, doc: &Document) -> Result<()> {
        if entry.uri.is_none() {
            entry.uri = doc.uri.clone();
        }
        if entry.text.is_none() {
            entry.text = doc.text.clone().filter(|t| !t.trim().is_empty());
        }
        for (k, v) in &doc.tags {
            entry.tags.insert(k.clone(), v.clone());
        }

        for (field, vector) in &doc.embeddings {
            let name = self.check(&doc.id, field, encoder, vector)?;
            entry.vectors.insert(name, vector.clone());
        }

        let mut per_field: AHashMap<&str, usize> = AHashMap::new();
        let mut chunk_ids: AHashSet<String> = AHashSet::with_capacity(doc.chunks.len());
        for chunk in &doc.chunks {
            if chunk.field.is_empty() {
                return Err(Error::Configuration(format!(
                    "document '{}': chunk without field name",
                    doc.id
                )));
            }
            let position = per_field.entry(chunk.field.as_str()).or_insert(0);
            let chunk_id = if chunk.id.is_empty() {
                format!("{}:{}:{}", doc.id, chunk.field, position)
            } else {
                chunk.id.clone()
            };
            *position += 1;
            if !chunk_ids.insert(chunk_id.clone()) {
                return Err(Error::Configuration(format!(
                    "document '{}': chunk '{}' appears more than once",
                    doc.id, chunk_id
                )));
            }

            if !entry.chunks.contains_key(&chunk_id) {
                entry.chunk_order.push(chunk_id.clone());
            }
            let stored = entry
                .chunks
                .entry(chunk_id.clone())
                .or_insert_with(|| StoredChunk {
                    id: chunk_id,
                    parent_id: doc.id.clone(),
                    field: chunk.field.clone(),
                    uri: None,
                    text: None,
                    vectors: BTreeMap::new(),
                });
            if stored.uri.is_none() {
                stored.uri = chunk.uri.clone();
            }
            if stored.text.is_none() {
                stored.text = chunk.text.clone().filter(|t| !t.trim().is_empty());
            }
            if let Some(vector) = &chunk.embedding {
                let name = self.check(&doc.id, &chunk.field, encoder, vector)?;
                stored.vectors.insert(encoder.to_string(), vector.clone());
                entry.chunk_vectors.entry(name).or_default().push(vector.clone());
            }
        }
        Ok(())
    }

    fn finish(mut p: Pending) -> PreparedDocument {
        // Chunked fields get the mean of their chunk vectors at root level
        for (name, vectors) in &p.chunk_vectors {
            if !p.vectors.contains_key(name) {
                if let Some(mean) = Vector::mean(vectors.iter()) {
                    p.vectors.insert(name.clone(), mean);
                }
            }
        }

        let chunks: Vec<StoredChunk> = p
            .chunk_order
            .iter()
            .filter_map(|id| p.chunks.remove(id))
            .collect();

        let bm25_text = p
            .text
            .iter()
            .map(String::as_str)
            .chain(chunks.iter().filter_map(|c| c.text.as_deref()))
            .collect::<Vec<_>>()
            .join(" ");

        PreparedDocument {
            document: StoredDocument {
                id: p.id,
                seq: 0,
                uri: p.uri,
                tags: p.tags,
                bm25_text,
                vectors: p.vectors,
                chunk_ids: p.chunk_order,
            },
            chunks,
        }
    }
}
