//! The indexer: one index's public operations over a [`Backend`].
//!
//! Writes go through the [`IndexWriter`] and then the backend; every read
//! takes one backend snapshot and works on it alone, so a request never sees
//! a half-applied batch.

use crate::assemble::Match;
use crate::backend::{Backend, MemoryBackend};
use crate::config::IndexerConfig;
use crate::corpus::Corpus;
use crate::document::{DocumentSummary, QueryDocument};
use crate::filter::TagFilter;
use crate::mapping::Schema;
use crate::query::{validate_criteria, QueryEngine, SearchParams, TraversalPath};
use crate::score::ScoreCriterion;
use crate::writer::{IndexBatch, IndexWriter};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
}

impl DeleteParams {
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: Some(ids.into_iter().map(Into::into).collect()),
            filter: None,
        }
    }

    pub fn filter(filter: Value) -> Self {
        Self {
            ids: None,
            filter: Some(filter),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListParams {
    /// Unbounded when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

pub struct Indexer {
    backend: Arc<dyn Backend>,
    default_scores: Vec<ScoreCriterion>,
    traversal: TraversalPath,
}

impl Indexer {
    /// Fails with a configuration error if a default criterion names a
    /// vector field the backend's schema does not have.
    pub fn new(
        backend: Arc<dyn Backend>,
        default_scores: Vec<ScoreCriterion>,
        traversal: TraversalPath,
    ) -> Result<Self> {
        validate_criteria(backend.schema(), &default_scores)?;
        Ok(Self {
            backend,
            default_scores,
            traversal,
        })
    }

    pub fn with_backend(backend: Arc<dyn Backend>, config: &IndexerConfig) -> Result<Self> {
        Self::new(backend, config.default_scores.clone(), config.traversal_paths)
    }

    pub fn in_memory(config: &IndexerConfig) -> Result<Self> {
        let backend = Arc::new(MemoryBackend::new(config.schema()?));
        Self::with_backend(backend, config)
    }

    #[inline]
    pub fn schema(&self) -> &Schema {
        self.backend.schema()
    }

    /// The persisted mapping artifact
    pub fn mapping(&self) -> Value {
        self.schema().mapping()
    }

    pub fn backend_kind(&self) -> &'static str {
        self.backend.kind()
    }

    pub fn default_scores(&self) -> &[ScoreCriterion] {
        &self.default_scores
    }

    pub fn traversal(&self) -> TraversalPath {
        self.traversal
    }

    /// Index a batch. Returns how many distinct documents were written.
    pub fn index(&self, batch: &IndexBatch) -> Result<usize> {
        let prepared = IndexWriter::new(self.schema()).prepare(batch)?;
        let count = prepared.len();
        if count == 0 {
            return Ok(0);
        }
        self.backend.upsert(prepared)?;
        info!(count, backend = self.backend.kind(), "indexed documents");
        Ok(count)
    }

    pub fn search(&self, query: &QueryDocument, params: &SearchParams) -> Result<Vec<Match>> {
        let corpus = self.backend.snapshot()?;
        self.search_in(&corpus, query, params)
    }

    /// Run several queries against the same snapshot.
    pub fn search_batch(
        &self,
        queries: &[QueryDocument],
        params: &SearchParams,
    ) -> Result<Vec<Vec<Match>>> {
        let corpus = self.backend.snapshot()?;
        queries
            .iter()
            .map(|query| self.search_in(&corpus, query, params))
            .collect()
    }

    fn search_in(
        &self,
        corpus: &Corpus,
        query: &QueryDocument,
        params: &SearchParams,
    ) -> Result<Vec<Match>> {
        let criteria = params
            .semantic_scores
            .as_deref()
            .unwrap_or(&self.default_scores);
        let traversal = params.traversal_paths.unwrap_or(self.traversal);
        let matches = QueryEngine::new(self.schema(), corpus).search(query, criteria, params, traversal)?;
        debug!(
            query = %query.id,
            matches = matches.len(),
            limit = params.limit,
            "search finished"
        );
        Ok(matches)
    }

    /// Delete by ids, by filter, or both (ids that also match the filter).
    /// With neither every document is removed. Unknown ids are ignored.
    pub fn delete(&self, params: &DeleteParams) -> Result<usize> {
        let filter = TagFilter::translate(params.filter.as_ref())?;
        let ids: Vec<String> = match (&params.ids, filter.is_empty()) {
            (Some(ids), true) => ids.clone(),
            (ids, _) => {
                let corpus = self.backend.snapshot()?;
                let wanted = |id: &str| ids.as_ref().map_or(true, |ids| ids.iter().any(|i| i == id));
                corpus
                    .documents()
                    .filter(|doc| wanted(&doc.id) && filter.matches(&doc.tags))
                    .map(|doc| doc.id.clone())
                    .collect()
            }
        };
        if ids.is_empty() {
            return Ok(0);
        }
        let removed = self.backend.remove(&ids)?;
        info!(requested = ids.len(), removed, backend = self.backend.kind(), "deleted documents");
        Ok(removed)
    }

    /// Lightweight documents in insertion order
    pub fn list(&self, params: &ListParams) -> Result<Vec<DocumentSummary>> {
        let corpus = self.backend.snapshot()?;
        Ok(corpus
            .documents()
            .skip(params.offset)
            .take(params.limit.unwrap_or(usize::MAX))
            .map(DocumentSummary::from)
            .collect())
    }

    /// Lightweight documents whose tags match the filter, in insertion order
    pub fn filter(&self, params: &FilterParams) -> Result<Vec<DocumentSummary>> {
        let filter = TagFilter::translate(params.filter.as_ref())?;
        let corpus = self.backend.snapshot()?;
        Ok(corpus
            .documents()
            .filter(|doc| filter.matches(&doc.tags))
            .take(params.limit.unwrap_or(usize::MAX))
            .map(DocumentSummary::from)
            .collect())
    }

    pub fn get(&self, id: &str) -> Result<DocumentSummary> {
        let corpus = self.backend.snapshot()?;
        corpus
            .get(id)
            .map(DocumentSummary::from)
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.backend.snapshot()?.len())
    }
}
