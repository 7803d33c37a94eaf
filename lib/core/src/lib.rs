//! # Polydex Core
//!
//! Multimodal search indexing engine.
//!
//! Documents carry several named fields, each embedded by one or more
//! encoders. The engine stores those embeddings under a schema generated from
//! a `(field, encoder, dimension)` configuration and answers queries by a
//! weighted sum of per-criterion vector similarities, optionally blended with
//! BM25 over the documents' aggregated text.
//!
//! - [`Schema`] / [`generate_mapping`] - field × encoder storage layout
//! - [`IndexWriter`] - validates and merges per-encoder batches
//! - [`QueryEngine`] - multi-criterion scoring over one snapshot
//! - [`collapse_to_parents`] - chunk-to-parent deduplication
//! - [`TagFilter`] - filter expressions over document tags
//! - [`Indexer`] - one index's operations over a [`Backend`]
//!
//! ## Example
//!
//! ```rust
//! use polydex_core::{
//!     Document, EncoderFields, IndexBatch, Indexer, IndexerConfig, QueryDocument,
//!     ScoreCriterion, SearchParams,
//! };
//!
//! let config = IndexerConfig::new(vec![EncoderFields::new("clip", 3, &["image"])])
//!     .with_default_scores(vec![ScoreCriterion::new("query_image", "image", "clip", 1.0)]);
//! let indexer = Indexer::in_memory(&config).unwrap();
//!
//! let docs = vec![Document::new("0").with_embedding("image", vec![1.0, 0.0, 0.0])];
//! indexer.index(&IndexBatch::from([("clip".to_string(), docs)])).unwrap();
//!
//! let query = QueryDocument::new().with_embedding("query_image", "clip", vec![1.0, 0.0, 0.0]);
//! let matches = indexer.search(&query, &SearchParams::default()).unwrap();
//! assert_eq!(matches[0].id, "0");
//! ```

pub mod assemble;
pub mod backend;
pub mod bm25;
pub mod config;
pub mod corpus;
pub mod document;
pub mod error;
pub mod filter;
pub mod indexer;
pub mod mapping;
pub mod query;
pub mod score;
pub mod vector;
pub mod writer;

pub use assemble::{collapse_to_parents, Match, RankedChunk};
pub use backend::{Backend, MemoryBackend};
pub use bm25::{BM25Index, LexicalQuery};
pub use config::IndexerConfig;
pub use corpus::Corpus;
pub use document::{
    chunk_key, Chunk, Document, DocumentSummary, PreparedDocument, QueryDocument, QueryField,
    StoredChunk, StoredDocument, Tags,
};
pub use error::{Error, Result};
pub use filter::{Comparison, Predicate, TagFilter};
pub use indexer::{DeleteParams, FilterParams, Indexer, ListParams};
pub use mapping::{
    generate_mapping, EncoderFields, FieldEncoding, Metric, Schema, VectorField, ID_FIELD,
    TEXT_FIELD,
};
pub use query::{QueryEngine, SearchParams, TraversalPath};
pub use score::{ScoreCriterion, ScoreEntry, ScoreOperation, Scores};
pub use vector::Vector;
pub use writer::{IndexBatch, IndexWriter};
