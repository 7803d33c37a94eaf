//! Query engine: multi-criterion scoring over one corpus snapshot.
//!
//! For every candidate (a root document, or a chunk for chunk-level search)
//! each vector criterion compares the query's `query_field` embedding with the
//! candidate's `document_field`/`encoder` vector, and the optional lexical
//! criterion scores the text field. Candidates are ranked by
//! `Σ linear_weight_i * score_i`, ties broken by id ascending.

use crate::assemble::{collapse_to_parents, Match, RankedChunk};
use crate::bm25::{BM25Index, LexicalQuery};
use crate::corpus::Corpus;
use crate::document::{QueryDocument, StoredChunk, StoredDocument};
use crate::filter::TagFilter;
use crate::mapping::Schema;
use crate::score::{
    min_max_normalize, ScoreCriterion, ScoreEntry, ScoreOperation, Scores, BM25_NORMALIZED,
    BM25_RAW, TOTAL_SCORE,
};
use crate::vector::Vector;
use crate::{Error, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

pub const DEFAULT_LIMIT: usize = 20;
/// Chunk-level pools are this many times `limit` before deduplication
pub const OVERSAMPLE_FACTOR: usize = 10;

/// Granularity at which candidates are matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TraversalPath {
    #[default]
    Root,
    Chunks,
}

impl FromStr for TraversalPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "@r" | "r" => Ok(TraversalPath::Root),
            "@c" | "c" => Ok(TraversalPath::Chunks),
            other => Err(Error::InvalidQuery(format!(
                "unsupported traversal path '{}'",
                other
            ))),
        }
    }
}

impl TryFrom<String> for TraversalPath {
    type Error = crate::Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<TraversalPath> for String {
    fn from(t: TraversalPath) -> Self {
        t.to_string()
    }
}

impl fmt::Display for TraversalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraversalPath::Root => f.write_str("@r"),
            TraversalPath::Chunks => f.write_str("@c"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    #[serde(default)]
    pub get_score_breakdown: bool,
    #[serde(default)]
    pub apply_default_bm25: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_bm25_query: Option<Value>,
    /// Overrides the index's default traversal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traversal_paths: Option<TraversalPath>,
    /// Overrides the index's default criteria for this request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_scores: Option<Vec<ScoreCriterion>>,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            filter: None,
            get_score_breakdown: false,
            apply_default_bm25: false,
            custom_bm25_query: None,
            traversal_paths: None,
            semantic_scores: None,
        }
    }
}

/// Check every vector criterion against the schema
pub fn validate_criteria(schema: &Schema, criteria: &[ScoreCriterion]) -> Result<()> {
    for c in criteria.iter().filter(|c| !c.is_lexical()) {
        if schema.vector_field(&c.document_field, &c.encoder).is_none() {
            return Err(Error::Configuration(format!(
                "score criterion '{}' has no '{}-{}' field in the mapping",
                c.key(),
                c.document_field,
                c.encoder
            )));
        }
        if !c.linear_weight.is_finite() {
            return Err(Error::Configuration(format!(
                "score criterion '{}' has a non-finite weight",
                c.key()
            )));
        }
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum Candidate<'c> {
    Root(&'c StoredDocument),
    Chunk(&'c StoredChunk),
}

impl<'c> Candidate<'c> {
    fn vector(&self, schema: &Schema, c: &ScoreCriterion) -> Option<&'c Vector> {
        match *self {
            Candidate::Root(doc) => schema
                .vector_field(&c.document_field, &c.encoder)
                .and_then(|vf| doc.vectors.get(&vf.name)),
            Candidate::Chunk(chunk) if chunk.field == c.document_field => chunk.vectors.get(&c.encoder),
            Candidate::Chunk(_) => None,
        }
    }

    // (parent id, own id) ordering key for ties
    fn sort_key(&self) -> (&'c str, &'c str) {
        match *self {
            Candidate::Root(doc) => (doc.id.as_str(), ""),
            Candidate::Chunk(chunk) => (chunk.parent_id.as_str(), chunk.id.as_str()),
        }
    }

    // key of this candidate in its lexical index
    fn text_key(&self) -> Cow<'c, str> {
        match *self {
            Candidate::Root(doc) => Cow::Borrowed(doc.id.as_str()),
            Candidate::Chunk(chunk) => Cow::Owned(chunk.key()),
        }
    }
}

struct Lexical {
    query: LexicalQuery,
    weight: f32,
}

struct Scored<'c> {
    candidate: Candidate<'c>,
    total: f32,
    entries: Vec<(String, ScoreEntry)>,
}

pub struct QueryEngine<'a> {
    schema: &'a Schema,
    corpus: &'a Corpus,
}

impl<'a> QueryEngine<'a> {
    pub fn new(schema: &'a Schema, corpus: &'a Corpus) -> Self {
        Self { schema, corpus }
    }

    pub fn search(
        &self,
        query: &QueryDocument,
        criteria: &[ScoreCriterion],
        params: &SearchParams,
        traversal: TraversalPath,
    ) -> Result<Vec<Match>> {
        let filter = TagFilter::translate(params.filter.as_ref())?;
        validate_criteria(self.schema, criteria)?;
        self.check_query_dims(query, criteria)?;
        let lexical = Self::lexical(query, criteria, params)?;

        let candidates = self.candidates(&filter, traversal);
        let mut scored = self.score(query, criteria, lexical.as_ref(), traversal, candidates);

        scored.sort_by(|a, b| {
            b.total
                .total_cmp(&a.total)
                .then_with(|| a.candidate.sort_key().cmp(&b.candidate.sort_key()))
        });

        let limit = params.limit;
        let pool = match traversal {
            TraversalPath::Root => limit,
            TraversalPath::Chunks => limit.saturating_mul(OVERSAMPLE_FACTOR),
        };
        scored.truncate(pool);

        debug!(
            traversal = %traversal,
            pool = scored.len(),
            criteria = criteria.len(),
            lexical = lexical.is_some(),
            "scored candidates"
        );

        let breakdown = params.get_score_breakdown;
        let matches = match traversal {
            TraversalPath::Root => scored
                .into_iter()
                .filter_map(|s| match s.candidate {
                    Candidate::Root(doc) => Some(Match::from_document(doc, Self::scores(s.total, s.entries, breakdown))),
                    Candidate::Chunk(_) => None,
                })
                .collect(),
            TraversalPath::Chunks => {
                let ranked = scored
                    .into_iter()
                    .filter_map(|s| match s.candidate {
                        Candidate::Chunk(chunk) => Some(RankedChunk {
                            chunk,
                            scores: Self::scores(s.total, s.entries, breakdown),
                        }),
                        Candidate::Root(_) => None,
                    })
                    .collect();
                collapse_to_parents(ranked, self.corpus, limit)
            }
        };
        Ok(matches)
    }

    fn check_query_dims(&self, query: &QueryDocument, criteria: &[ScoreCriterion]) -> Result<()> {
        for c in criteria.iter().filter(|c| !c.is_lexical()) {
            if let (Some(v), Some(vf)) = (
                query.embedding(&c.query_field, &c.encoder),
                self.schema.vector_field(&c.document_field, &c.encoder),
            ) {
                if v.dim() != vf.dims {
                    return Err(Error::Configuration(format!(
                        "query field '{}' for encoder '{}' has {} dimensions, '{}' expects {}",
                        c.query_field,
                        c.encoder,
                        v.dim(),
                        vf.name,
                        vf.dims
                    )));
                }
            }
        }
        Ok(())
    }

    fn lexical(
        query: &QueryDocument,
        criteria: &[ScoreCriterion],
        params: &SearchParams,
    ) -> Result<Option<Lexical>> {
        let criterion = criteria.iter().find(|c| c.is_lexical());
        let active = params.apply_default_bm25
            || params.custom_bm25_query.is_some()
            || criterion.is_some();
        if !active {
            return Ok(None);
        }
        let lexical_query = match &params.custom_bm25_query {
            Some(custom) => LexicalQuery::parse(custom)?,
            None => LexicalQuery::plain(query.text()),
        };
        Ok(Some(Lexical {
            query: lexical_query,
            weight: criterion.map(|c| c.linear_weight).unwrap_or(1.0),
        }))
    }

    fn candidates(&self, filter: &TagFilter, traversal: TraversalPath) -> Vec<Candidate<'a>> {
        let corpus = self.corpus;
        let parents = corpus.documents().filter(|doc| filter.matches(&doc.tags));
        match traversal {
            TraversalPath::Root => parents.map(Candidate::Root).collect(),
            TraversalPath::Chunks => parents
                .flat_map(|doc| corpus.chunks_of(doc).map(Candidate::Chunk))
                .collect(),
        }
    }

    fn text_index(&self, traversal: TraversalPath) -> &'a BM25Index {
        match traversal {
            TraversalPath::Root => self.corpus.root_text(),
            TraversalPath::Chunks => self.corpus.chunk_text(),
        }
    }

    fn score(
        &self,
        query: &QueryDocument,
        criteria: &[ScoreCriterion],
        lexical: Option<&Lexical>,
        traversal: TraversalPath,
        candidates: Vec<Candidate<'a>>,
    ) -> Vec<Scored<'a>> {
        let schema = self.schema;
        let metric = schema.metric();
        let vector_criteria: Vec<(&ScoreCriterion, String, Option<&Vector>)> = criteria
            .iter()
            .filter(|c| !c.is_lexical())
            .map(|c| (c, c.key(), query.embedding(&c.query_field, &c.encoder)))
            .collect();

        let lexical_scores: Option<(Vec<f32>, Vec<f32>)> = lexical.map(|lex| {
            let base = self.text_index(traversal).scores(&lex.query.text);
            let raw: Vec<f32> = candidates
                .iter()
                .map(|c| {
                    base.get(c.text_key().as_ref())
                        .map(|&s| lex.query.combine(s))
                        .unwrap_or(0.0)
                })
                .collect();
            let normalized = min_max_normalize(&raw);
            (raw, normalized)
        });

        candidates
            .into_par_iter()
            .enumerate()
            .map(|(i, candidate)| {
                let mut total = 0.0f32;
                let mut entries = Vec::with_capacity(vector_criteria.len() + 2);

                for (c, key, query_vector) in &vector_criteria {
                    let value = match (query_vector, candidate.vector(schema, c)) {
                        (Some(q), Some(v)) => q.similarity(v, metric),
                        _ => 0.0,
                    };
                    total += c.linear_weight * value;
                    entries.push((key.clone(), ScoreEntry::new(value, metric.into())));
                }

                if let (Some(lex), Some((raw, normalized))) = (lexical, lexical_scores.as_ref()) {
                    total += lex.weight * normalized[i];
                    entries.push((BM25_RAW.to_string(), ScoreEntry::new(raw[i], ScoreOperation::Bm25)));
                    entries.push((
                        BM25_NORMALIZED.to_string(),
                        ScoreEntry::new(normalized[i], ScoreOperation::MinMax),
                    ));
                }

                Scored { candidate, total, entries }
            })
            .collect()
    }

    fn scores(total: f32, entries: Vec<(String, ScoreEntry)>, breakdown: bool) -> Scores {
        let mut scores = Scores::new();
        if breakdown {
            scores.extend(entries);
        }
        scores.insert(
            TOTAL_SCORE.to_string(),
            ScoreEntry::new(total, ScoreOperation::WeightedSum),
        );
        scores
    }
}
