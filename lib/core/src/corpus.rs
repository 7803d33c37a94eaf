use ahash::AHashMap;
use crate::bm25::BM25Index;
use crate::document::{chunk_key, PreparedDocument, StoredChunk, StoredDocument};

/// The full indexed state of one index: documents, the chunks they own and
/// the lexical indexes over both.
///
/// Backends hand out a `Corpus` behind an `Arc` as a read snapshot; it is
/// never mutated while shared.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    documents: AHashMap<String, StoredDocument>,
    // keyed by `chunk_key(parent, chunk)`, as is `chunk_text`
    chunks: AHashMap<String, StoredChunk>,
    // document ids by ascending insertion sequence
    order: Vec<String>,
    next_seq: u64,
    root_text: BM25Index,
    chunk_text: BM25Index,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Sequence number the next new document receives
    #[inline]
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Insert or replace a document. A replaced document keeps its insertion
    /// position; its previous chunks are dropped. Returns the sequence number.
    pub fn upsert(&mut self, prepared: PreparedDocument) -> u64 {
        let seq = match self.documents.get(&prepared.document.id) {
            Some(existing) => existing.seq,
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                seq
            }
        };
        self.put(prepared, seq);
        seq
    }

    /// Insert a document with a sequence number assigned elsewhere, keeping
    /// the insertion order sorted.
    pub fn restore(&mut self, prepared: PreparedDocument) {
        let seq = prepared.document.seq;
        self.next_seq = self.next_seq.max(seq + 1);
        self.put(prepared, seq);
    }

    fn put(&mut self, prepared: PreparedDocument, seq: u64) {
        let PreparedDocument { mut document, chunks } = prepared;
        document.seq = seq;
        let id = document.id.clone();

        let existed = self.detach(&id);
        if !existed {
            let pos = self
                .order
                .partition_point(|other| self.documents.get(other).map(|d| d.seq).unwrap_or(0) < seq);
            self.order.insert(pos, id.clone());
        }

        self.root_text.insert_doc(&id, &document.bm25_text);
        for chunk in chunks {
            let key = chunk.key();
            if let Some(text) = chunk.text.as_deref() {
                self.chunk_text.insert_doc(&key, text);
            }
            self.chunks.insert(key, chunk);
        }
        self.documents.insert(id, document);
    }

    // Drop a document's chunks and lexical entries, leaving its slot in
    // `order` untouched. Returns whether the document existed.
    fn detach(&mut self, id: &str) -> bool {
        match self.documents.remove(id) {
            Some(old) => {
                for chunk_id in &old.chunk_ids {
                    let key = chunk_key(id, chunk_id);
                    self.chunks.remove(&key);
                    self.chunk_text.delete_doc(&key);
                }
                self.root_text.delete_doc(id);
                true
            }
            None => false,
        }
    }

    /// Remove a document and all of its chunks. Unknown ids are a no-op.
    pub fn remove(&mut self, id: &str) -> bool {
        if self.detach(id) {
            self.order.retain(|other| other != id);
            true
        } else {
            false
        }
    }

    #[inline]
    pub fn get(&self, id: &str) -> Option<&StoredDocument> {
        self.documents.get(id)
    }

    #[inline]
    pub fn chunk(&self, parent_id: &str, chunk_id: &str) -> Option<&StoredChunk> {
        self.chunks.get(&chunk_key(parent_id, chunk_id))
    }

    /// Documents in insertion order
    pub fn documents(&self) -> impl Iterator<Item = &StoredDocument> + '_ {
        self.order.iter().filter_map(move |id| self.documents.get(id))
    }

    pub fn chunks_of<'a>(&'a self, doc: &'a StoredDocument) -> impl Iterator<Item = &'a StoredChunk> + 'a {
        doc.chunk_ids
            .iter()
            .filter_map(move |id| self.chunks.get(&chunk_key(&doc.id, id)))
    }

    #[inline]
    pub fn root_text(&self) -> &BM25Index {
        &self.root_text
    }

    #[inline]
    pub fn chunk_text(&self) -> &BM25Index {
        &self.chunk_text
    }
}
