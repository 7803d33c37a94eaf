use crate::corpus::Corpus;
use crate::document::PreparedDocument;
use crate::mapping::Schema;
use crate::Result;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Storage contract shared by the in-memory and persistent backends.
///
/// Writes are upserts keyed by document id; a batch is applied atomically.
/// `snapshot` returns a consistent read view that later writes never touch.
pub trait Backend: Send + Sync {
    fn kind(&self) -> &'static str;

    fn schema(&self) -> &Schema;

    fn upsert(&self, batch: Vec<PreparedDocument>) -> Result<()>;

    /// Remove documents and their chunks, ignoring unknown ids.
    /// Returns how many documents were removed.
    fn remove(&self, ids: &[String]) -> Result<usize>;

    fn snapshot(&self) -> Result<Arc<Corpus>>;
}

/// Backend holding the corpus in memory.
///
/// Readers clone the current `Arc<Corpus>`; writers copy it on write when a
/// snapshot is still held, so a search never sees a half-applied batch.
pub struct MemoryBackend {
    schema: Schema,
    corpus: RwLock<Arc<Corpus>>,
}

impl MemoryBackend {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            corpus: RwLock::new(Arc::new(Corpus::new())),
        }
    }
}

impl Backend for MemoryBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn upsert(&self, batch: Vec<PreparedDocument>) -> Result<()> {
        let mut guard = self.corpus.write();
        let corpus = Arc::make_mut(&mut guard);
        let count = batch.len();
        for prepared in batch {
            corpus.upsert(prepared);
        }
        debug!(count, total = corpus.len(), "memory backend upsert");
        Ok(())
    }

    fn remove(&self, ids: &[String]) -> Result<usize> {
        let mut guard = self.corpus.write();
        let corpus = Arc::make_mut(&mut guard);
        Ok(ids.iter().filter(|id| corpus.remove(id)).count())
    }

    fn snapshot(&self) -> Result<Arc<Corpus>> {
        Ok(self.corpus.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Chunk, Document};
    use crate::mapping::{EncoderFields, Metric};
    use crate::writer::{IndexBatch, IndexWriter};
    use serde_json::json;

    fn backend() -> MemoryBackend {
        let fields = EncoderFields::expand(&[EncoderFields::new("clip", 2, &["image"])]);
        MemoryBackend::new(Schema::new(&fields, Metric::Cosine).unwrap())
    }

    fn prepare(backend: &MemoryBackend, docs: Vec<Document>) -> Vec<PreparedDocument> {
        IndexWriter::new(backend.schema())
            .prepare(&IndexBatch::from([("clip".to_string(), docs)]))
            .unwrap()
    }

    fn chunked(id: &str, color: &str, chunks: usize) -> Document {
        let mut doc = Document::new(id).with_tag("color", color);
        for i in 0..chunks {
            doc = doc.with_chunk(Chunk::new("image").with_text(color).with_embedding(vec![1.0, i as f32]));
        }
        doc
    }

    #[test]
    fn test_snapshot_isolated_from_later_writes() {
        let backend = backend();
        backend.upsert(prepare(&backend, vec![chunked("p", "red", 3)])).unwrap();
        let before = backend.snapshot().unwrap();

        backend.upsert(prepare(&backend, vec![chunked("p", "blue", 1)])).unwrap();
        let after = backend.snapshot().unwrap();

        let old = before.get("p").unwrap();
        assert_eq!(old.tags["color"], json!("red"));
        assert_eq!(before.chunks_of(old).count(), 3);
        assert_eq!(before.chunk_count(), 3);
        assert_eq!(before.chunk_text().scores("red").len(), 3);

        let new = after.get("p").unwrap();
        assert_eq!(new.tags["color"], json!("blue"));
        assert_eq!(after.chunks_of(new).count(), 1);
        assert!(after.chunk_text().scores("red").is_empty());

        assert_eq!(backend.remove(&["p".to_string()]).unwrap(), 1);
        assert!(backend.snapshot().unwrap().is_empty());
        assert_eq!(after.len(), 1);
    }

    #[test]
    fn test_concurrent_upserts_never_expose_partial_documents() {
        let backend = backend();
        let writers = 4;
        let per_writer = 20;

        std::thread::scope(|scope| {
            for w in 0..writers {
                let backend = &backend;
                scope.spawn(move || {
                    for i in 0..per_writer {
                        let doc = chunked(&format!("w{}-{}", w, i), "green", 2);
                        backend.upsert(prepare(backend, vec![doc])).unwrap();
                    }
                });
            }
            let backend = &backend;
            scope.spawn(move || {
                for _ in 0..100 {
                    let corpus = backend.snapshot().unwrap();
                    for doc in corpus.documents() {
                        assert_eq!(corpus.chunks_of(doc).count(), 2, "{} partially written", doc.id);
                        assert!(doc.tags.contains_key("color"));
                    }
                }
            });
        });

        let corpus = backend.snapshot().unwrap();
        assert_eq!(corpus.len(), writers * per_writer);
        assert_eq!(corpus.chunk_count(), writers * per_writer * 2);
    }
}
