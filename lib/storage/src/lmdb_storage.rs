// LMDB-backed index storage
use heed::byteorder::BE;
use heed::types::{Bytes, Str, U64};
use heed::{Database, Env, EnvOpenOptions, RwTxn};
use parking_lot::{Mutex, RwLock};
use polydex_core::{
    chunk_key, Backend, Corpus, Error, IndexerConfig, PreparedDocument, Result, Schema, StoredChunk,
    StoredDocument,
};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const DB_DOCUMENTS: &str = "documents";
const DB_CHUNKS: &str = "chunks";
const DB_ORDER: &str = "order";
const DB_META: &str = "meta";

const META_CONFIG: &str = "config";
const META_MAPPING: &str = "mapping";

const DEFAULT_MAP_SIZE: usize = 10 * 1024 * 1024 * 1024; // 10GB

#[inline]
fn storage_err(e: heed::Error) -> Error {
    Error::Storage(e.to_string())
}

fn decode<T: DeserializeOwned>(bytes: Option<&[u8]>) -> Result<Option<T>> {
    bytes.map(serde_json::from_slice).transpose().map_err(Error::from)
}

/// Persistent backend: one LMDB environment per index.
///
/// Documents are stored as JSON under their ids, chunks under
/// [`chunk_key`] of their parent and own id, and `order` maps
/// insertion sequence to document id. The committed state is mirrored in an
/// in-memory [`Corpus`] that serves snapshots; the mirror is only updated
/// after the LMDB transaction commits, so readers never see a batch that
/// failed to persist.
pub struct LmdbBackend {
    env: Env,
    path: PathBuf,
    schema: Schema,
    config: IndexerConfig,
    documents_db: Database<Str, Bytes>,
    chunks_db: Database<Str, Bytes>,
    order_db: Database<U64<BE>, Str>,
    meta_db: Database<Str, Bytes>,
    // serializes writers; held across the LMDB commit and the mirror update
    write_lock: Mutex<()>,
    mirror: RwLock<Arc<Corpus>>,
}

impl LmdbBackend {
    /// Open or create the index stored at `path`.
    ///
    /// A new index needs `config`. An existing index uses its stored config
    /// unless one is given, in which case both must describe the same schema.
    pub fn open<P: AsRef<Path>>(path: P, config: Option<&IndexerConfig>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(DEFAULT_MAP_SIZE)
                .max_dbs(4)
                .open(&path)
        }
        .map_err(|e| Error::BackendUnavailable(format!("{}: {}", path.display(), e)))?;

        let mut wtxn = env.write_txn().map_err(storage_err)?;
        let documents_db = env
            .create_database(&mut wtxn, Some(DB_DOCUMENTS))
            .map_err(storage_err)?;
        let chunks_db = env
            .create_database(&mut wtxn, Some(DB_CHUNKS))
            .map_err(storage_err)?;
        let order_db = env
            .create_database(&mut wtxn, Some(DB_ORDER))
            .map_err(storage_err)?;
        let meta_db: Database<Str, Bytes> = env
            .create_database(&mut wtxn, Some(DB_META))
            .map_err(storage_err)?;

        let stored: Option<IndexerConfig> =
            decode(meta_db.get(&wtxn, META_CONFIG).map_err(storage_err)?)?;

        let config = match (stored, config) {
            (Some(stored), None) => stored,
            (Some(stored), Some(given)) => {
                if stored.schema()? != given.schema()? {
                    return Err(Error::Configuration(format!(
                        "index at {} was created with a different field encoding set",
                        path.display()
                    )));
                }
                given.clone()
            }
            (None, Some(given)) => given.clone(),
            (None, None) => {
                return Err(Error::Configuration(format!(
                    "no index configuration stored at {}",
                    path.display()
                )))
            }
        };
        let schema = config.schema()?;

        meta_db
            .put(&mut wtxn, META_CONFIG, &serde_json::to_vec(&config)?)
            .map_err(storage_err)?;
        meta_db
            .put(&mut wtxn, META_MAPPING, &serde_json::to_vec(&schema.mapping())?)
            .map_err(storage_err)?;
        wtxn.commit().map_err(storage_err)?;

        let backend = Self {
            env,
            path,
            schema,
            config,
            documents_db,
            chunks_db,
            order_db,
            meta_db,
            write_lock: Mutex::new(()),
            mirror: RwLock::new(Arc::new(Corpus::new())),
        };

        let corpus = backend.load()?;
        info!(
            path = %backend.path.display(),
            documents = corpus.len(),
            chunks = corpus.chunk_count(),
            "opened lmdb index"
        );
        *backend.mirror.write() = Arc::new(corpus);
        Ok(backend)
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// The mapping artifact as persisted in the environment
    pub fn stored_mapping(&self) -> Result<Option<serde_json::Value>> {
        let rtxn = self.env.read_txn().map_err(storage_err)?;
        decode(self.meta_db.get(&rtxn, META_MAPPING).map_err(storage_err)?)
    }

    // Rebuild the corpus from committed state, in insertion order
    fn load(&self) -> Result<Corpus> {
        let rtxn = self.env.read_txn().map_err(storage_err)?;
        let mut corpus = Corpus::new();
        for entry in self.order_db.iter(&rtxn).map_err(storage_err)? {
            let (_, id) = entry.map_err(storage_err)?;
            let stored = self.documents_db.get(&rtxn, id).map_err(storage_err)?;
            let Some(document) = decode::<StoredDocument>(stored)? else {
                continue;
            };
            let mut chunks = Vec::with_capacity(document.chunk_ids.len());
            for chunk_id in &document.chunk_ids {
                let key = chunk_key(&document.id, chunk_id);
                let stored = self.chunks_db.get(&rtxn, &key).map_err(storage_err)?;
                if let Some(chunk) = decode::<StoredChunk>(stored)? {
                    chunks.push(chunk);
                }
            }
            corpus.restore(PreparedDocument { document, chunks });
        }
        Ok(corpus)
    }

    fn delete_stored(&self, wtxn: &mut RwTxn, document: &StoredDocument) -> Result<()> {
        for chunk_id in &document.chunk_ids {
            self.chunks_db
                .delete(wtxn, &chunk_key(&document.id, chunk_id))
                .map_err(storage_err)?;
        }
        self.documents_db.delete(wtxn, &document.id).map_err(storage_err)?;
        self.order_db.delete(wtxn, &document.seq).map_err(storage_err)?;
        Ok(())
    }
}

impl Backend for LmdbBackend {
    fn kind(&self) -> &'static str {
        "lmdb"
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn upsert(&self, mut batch: Vec<PreparedDocument>) -> Result<()> {
        let _guard = self.write_lock.lock();
        let current = self.mirror.read().clone();

        let mut next_seq = current.next_seq();
        let mut wtxn = self.env.write_txn().map_err(storage_err)?;
        for prepared in &mut batch {
            let document = &mut prepared.document;
            match current.get(&document.id) {
                Some(existing) => {
                    document.seq = existing.seq;
                    self.delete_stored(&mut wtxn, existing)?;
                }
                None => {
                    document.seq = next_seq;
                    next_seq += 1;
                }
            }
            for chunk in &prepared.chunks {
                self.chunks_db
                    .put(&mut wtxn, &chunk.key(), &serde_json::to_vec(chunk)?)
                    .map_err(storage_err)?;
            }
            let document = &prepared.document;
            self.documents_db
                .put(&mut wtxn, &document.id, &serde_json::to_vec(document)?)
                .map_err(storage_err)?;
            self.order_db
                .put(&mut wtxn, &document.seq, &document.id)
                .map_err(storage_err)?;
        }
        wtxn.commit().map_err(storage_err)?;
        // unshare the mirror before updating it
        drop(current);

        let count = batch.len();
        let mut mirror = self.mirror.write();
        let corpus = Arc::make_mut(&mut mirror);
        for prepared in batch {
            corpus.restore(prepared);
        }
        debug!(count, total = corpus.len(), path = %self.path.display(), "lmdb upsert committed");
        Ok(())
    }

    fn remove(&self, ids: &[String]) -> Result<usize> {
        let _guard = self.write_lock.lock();
        let current = self.mirror.read().clone();

        let existing: Vec<StoredDocument> = ids
            .iter()
            .filter_map(|id| current.get(id).cloned())
            .collect();
        drop(current);
        if existing.is_empty() {
            return Ok(0);
        }
        let mut wtxn = self.env.write_txn().map_err(storage_err)?;
        for document in &existing {
            self.delete_stored(&mut wtxn, document)?;
        }
        wtxn.commit().map_err(storage_err)?;

        let mut mirror = self.mirror.write();
        let corpus = Arc::make_mut(&mut mirror);
        let removed = existing.iter().filter(|doc| corpus.remove(&doc.id)).count();
        debug!(removed, total = corpus.len(), path = %self.path.display(), "lmdb remove committed");
        Ok(removed)
    }

    fn snapshot(&self) -> Result<Arc<Corpus>> {
        Ok(self.mirror.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polydex_core::{Document, EncoderFields, IndexBatch, IndexWriter, TraversalPath};
    use serde_json::json;
    use tempfile::TempDir;

    fn config() -> IndexerConfig {
        IndexerConfig::new(vec![EncoderFields::new("clip", 2, &["image"])])
    }

    fn prepare(schema: &Schema, docs: Vec<Document>) -> Vec<PreparedDocument> {
        IndexWriter::new(schema)
            .prepare(&IndexBatch::from([("clip".to_string(), docs)]))
            .unwrap()
    }

    #[test]
    fn test_reopen_restores_documents() {
        let dir = TempDir::new().unwrap();
        {
            let backend = LmdbBackend::open(dir.path(), Some(&config())).unwrap();
            let docs = vec![
                Document::new("b").with_tag("n", 1).with_embedding("image", vec![1.0, 0.0]),
                Document::new("a").with_text("hello").with_embedding("image", vec![0.0, 1.0]),
            ];
            backend.upsert(prepare(backend.schema(), docs)).unwrap();
            assert_eq!(backend.remove(&["missing".to_string()]).unwrap(), 0);
        }

        let backend = LmdbBackend::open(dir.path(), None).unwrap();
        assert_eq!(backend.config(), &config());
        let corpus = backend.snapshot().unwrap();
        let ids: Vec<&str> = corpus.documents().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(corpus.get("b").unwrap().tags["n"], json!(1));
        assert_eq!(corpus.root_text().len(), 2);
        assert_eq!(backend.stored_mapping().unwrap(), Some(backend.schema().mapping()));
    }

    #[test]
    fn test_upsert_replaces_chunks() {
        let dir = TempDir::new().unwrap();
        let backend = LmdbBackend::open(dir.path(), Some(&config())).unwrap();
        let chunked = |n: usize| {
            let mut doc = Document::new("p");
            for i in 0..n {
                doc = doc.with_chunk(
                    polydex_core::Chunk::new("image").with_embedding(vec![1.0, i as f32]),
                );
            }
            doc
        };
        backend.upsert(prepare(backend.schema(), vec![chunked(3)])).unwrap();
        backend.upsert(prepare(backend.schema(), vec![chunked(1)])).unwrap();
        assert_eq!(backend.snapshot().unwrap().chunk_count(), 1);
        drop(backend);

        let backend = LmdbBackend::open(dir.path(), None).unwrap();
        let corpus = backend.snapshot().unwrap();
        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus.chunk_count(), 1);
    }

    #[test]
    fn test_snapshot_isolated_from_later_writes() {
        let dir = TempDir::new().unwrap();
        let backend = LmdbBackend::open(dir.path(), Some(&config())).unwrap();
        let tagged = |color: &str, n: usize| {
            let mut doc = Document::new("p").with_tag("color", color);
            for i in 0..n {
                doc = doc.with_chunk(
                    polydex_core::Chunk::new("image").with_embedding(vec![1.0, i as f32]),
                );
            }
            doc
        };
        backend.upsert(prepare(backend.schema(), vec![tagged("red", 2)])).unwrap();
        let before = backend.snapshot().unwrap();
        backend.upsert(prepare(backend.schema(), vec![tagged("blue", 1)])).unwrap();
        let after = backend.snapshot().unwrap();

        let old = before.get("p").unwrap();
        assert_eq!(old.tags["color"], json!("red"));
        assert_eq!(before.chunks_of(old).count(), 2);
        let new = after.get("p").unwrap();
        assert_eq!(new.tags["color"], json!("blue"));
        assert_eq!(after.chunks_of(new).count(), 1);

        assert_eq!(backend.remove(&["p".to_string()]).unwrap(), 1);
        assert_eq!(after.len(), 1);
        assert!(backend.snapshot().unwrap().is_empty());
    }

    #[test]
    fn test_shared_chunk_id_survives_other_parent_delete() {
        let dir = TempDir::new().unwrap();
        {
            let backend = LmdbBackend::open(dir.path(), Some(&config())).unwrap();
            let docs = vec![
                Document::new("A").with_chunk(
                    polydex_core::Chunk::new("image").with_id("c1").with_embedding(vec![1.0, 0.0]),
                ),
                Document::new("B").with_chunk(
                    polydex_core::Chunk::new("image").with_id("c1").with_embedding(vec![0.0, 1.0]),
                ),
            ];
            backend.upsert(prepare(backend.schema(), docs)).unwrap();
            assert_eq!(backend.snapshot().unwrap().chunk_count(), 2);
            assert_eq!(backend.remove(&["A".to_string()]).unwrap(), 1);
        }

        let backend = LmdbBackend::open(dir.path(), None).unwrap();
        let corpus = backend.snapshot().unwrap();
        assert_eq!(corpus.chunk_count(), 1);
        let chunk = corpus.chunk("B", "c1").unwrap();
        assert_eq!(chunk.parent_id, "B");
        assert_eq!(chunk.vectors["clip"].as_slice(), &[0.0, 1.0]);
    }

    #[test]
    fn test_remove_persists() {
        let dir = TempDir::new().unwrap();
        {
            let backend = LmdbBackend::open(dir.path(), Some(&config())).unwrap();
            let docs = vec![
                Document::new("a").with_embedding("image", vec![1.0, 0.0]),
                Document::new("b").with_embedding("image", vec![0.0, 1.0]),
            ];
            backend.upsert(prepare(backend.schema(), docs)).unwrap();
            assert_eq!(backend.remove(&["a".to_string()]).unwrap(), 1);
        }
        let backend = LmdbBackend::open(dir.path(), None).unwrap();
        let corpus = backend.snapshot().unwrap();
        assert!(corpus.get("a").is_none());
        assert_eq!(corpus.len(), 1);
        // new documents go after the survivors
        backend
            .upsert(prepare(backend.schema(), vec![Document::new("c").with_embedding("image", vec![1.0, 1.0])]))
            .unwrap();
        let ids: Vec<String> = backend.snapshot().unwrap().documents().map(|d| d.id.clone()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_reopen_with_other_schema_fails() {
        let dir = TempDir::new().unwrap();
        drop(LmdbBackend::open(dir.path(), Some(&config())).unwrap());

        let other = IndexerConfig::new(vec![EncoderFields::new("clip", 3, &["image"])]);
        assert!(matches!(
            LmdbBackend::open(dir.path(), Some(&other)),
            Err(Error::Configuration(_))
        ));
        let same = config().with_traversal(TraversalPath::Chunks);
        let backend = LmdbBackend::open(dir.path(), Some(&same)).unwrap();
        assert_eq!(backend.config().traversal_paths, TraversalPath::Chunks);
    }

    #[test]
    fn test_new_index_needs_config() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            LmdbBackend::open(dir.path().join("fresh"), None),
            Err(Error::Configuration(_))
        ));
    }
}
