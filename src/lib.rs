//! # polydex
//!
//! A multimodal search indexer.
//!
//! Documents are made of named fields (title, image, audio, ...), each
//! embedded by one or more encoders. polydex stores those embeddings under a
//! schema generated from a `(field, encoder, dimension)` configuration and
//! ranks documents by a weighted sum of per-criterion similarities, optionally
//! blended with normalized BM25 over the documents' text. Matching can run on
//! whole documents or on their chunks, in which case results are collapsed to
//! unique parents.
//!
//! ## Quick Start
//!
//! ### As a Server
//!
//! ```bash
//! polydex --data-dir ./data --config indexer.json --http-port 8080
//! ```
//!
//! ### As a Library
//!
//! ```rust
//! use polydex::prelude::*;
//!
//! let config = IndexerConfig::new(vec![
//!     EncoderFields::new("clip", 2, &["image"]),
//!     EncoderFields::new("sbert", 2, &["title"]),
//! ])
//! .with_default_scores(vec![
//!     ScoreCriterion::new("query_image", "image", "clip", 1.0),
//!     ScoreCriterion::new("query_text", "title", "sbert", 0.5),
//! ]);
//! let indexer = Indexer::in_memory(&config).unwrap();
//!
//! let mut batch = IndexBatch::new();
//! batch.insert("clip".into(), vec![Document::new("0").with_embedding("image", vec![1.0, 0.0])]);
//! batch.insert("sbert".into(), vec![Document::new("0").with_embedding("title", vec![0.0, 1.0])]);
//! indexer.index(&batch).unwrap();
//!
//! let query = QueryDocument::new()
//!     .with_embedding("query_image", "clip", vec![1.0, 0.0])
//!     .with_embedding("query_text", "sbert", vec![0.0, 1.0]);
//! let matches = indexer.search(&query, &SearchParams::default()).unwrap();
//! assert_eq!(matches[0].id, "0");
//! ```
//!
//! ## Crate Structure
//!
//! - `polydex-core` - schema, writer, query engine, result assembly, filters
//! - `polydex-storage` - LMDB backend and the named index manager
//! - `polydex-api` - REST service

pub use polydex_core::{
    generate_mapping, Backend, Chunk, DeleteParams, Document, DocumentSummary, EncoderFields,
    Error, FieldEncoding, FilterParams, IndexBatch, Indexer, IndexerConfig, ListParams, Match,
    MemoryBackend, Metric, QueryDocument, Result, Schema, ScoreCriterion, ScoreEntry,
    SearchParams, TraversalPath, Vector,
};

pub use polydex_storage::{LmdbBackend, StorageManager};

pub use polydex_api::RestApi;

/// Commonly used types
pub mod prelude {
    pub use polydex_core::{
        Chunk, DeleteParams, Document, EncoderFields, Error, FilterParams, IndexBatch, Indexer,
        IndexerConfig, ListParams, Match, Metric, QueryDocument, Result, ScoreCriterion,
        SearchParams, TraversalPath,
    };
    pub use polydex_storage::StorageManager;
}
