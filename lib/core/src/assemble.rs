//! Result assembly: turning ranked candidates into [`Match`]es.
//!
//! Chunk-level search can rank several chunks of one parent. Parents are
//! emitted once, at the rank of their best chunk, as a fresh lightweight
//! projection (id, uri, tags, scores). The stored parent is only read.

use crate::corpus::Corpus;
use crate::document::{StoredChunk, StoredDocument, Tags};
use crate::score::{Scores, TOTAL_SCORE};
use ahash::AHashSet;
use serde::{Deserialize, Serialize};

/// One search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default)]
    pub tags: Tags,
    /// Always holds `total`; holds every criterion when a breakdown was requested
    pub scores: Scores,
    /// The chunk that produced this match, for chunk-level search
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
}

impl Match {
    pub fn from_document(doc: &StoredDocument, scores: Scores) -> Self {
        Self {
            id: doc.id.clone(),
            uri: doc.uri.clone(),
            tags: doc.tags.clone(),
            scores,
            chunk_id: None,
        }
    }

    /// The combined ranking score
    pub fn score(&self) -> f32 {
        self.scores.get(TOTAL_SCORE).map(|e| e.value).unwrap_or(0.0)
    }
}

/// A chunk with its computed scores, in rank order
#[derive(Debug, Clone)]
pub struct RankedChunk<'c> {
    pub chunk: &'c StoredChunk,
    pub scores: Scores,
}

/// Collapse ranked chunks to at most `limit` distinct parents.
pub fn collapse_to_parents(ranked: Vec<RankedChunk<'_>>, corpus: &Corpus, limit: usize) -> Vec<Match> {
    let mut seen: AHashSet<&str> = AHashSet::new();
    let mut parents = Vec::with_capacity(limit.min(ranked.len()));

    for RankedChunk { chunk, scores } in ranked {
        if parents.len() >= limit {
            break;
        }
        if seen.contains(chunk.parent_id.as_str()) {
            continue;
        }
        let Some(parent) = corpus.get(&chunk.parent_id) else {
            continue;
        };
        seen.insert(chunk.parent_id.as_str());
        let mut m = Match::from_document(parent, scores);
        m.chunk_id = Some(chunk.id.clone());
        parents.push(m);
    }

    parents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::PreparedDocument;
    use crate::score::{ScoreEntry, ScoreOperation};
    use std::collections::BTreeMap;

    fn corpus(parents: &[(&str, usize)]) -> Corpus {
        let mut corpus = Corpus::new();
        for (id, n) in parents {
            let chunks: Vec<StoredChunk> = (0..*n)
                .map(|i| StoredChunk {
                    id: format!("{}:{}", id, i),
                    parent_id: id.to_string(),
                    field: "title".to_string(),
                    uri: None,
                    text: None,
                    vectors: BTreeMap::new(),
                })
                .collect();
            corpus.upsert(PreparedDocument {
                document: StoredDocument {
                    id: id.to_string(),
                    seq: 0,
                    uri: None,
                    tags: Default::default(),
                    bm25_text: String::new(),
                    vectors: BTreeMap::new(),
                    chunk_ids: chunks.iter().map(|c| c.id.clone()).collect(),
                },
                chunks,
            });
        }
        corpus
    }

    fn scores(v: f32) -> Scores {
        let mut s = Scores::new();
        s.insert(TOTAL_SCORE.to_string(), ScoreEntry::new(v, ScoreOperation::WeightedSum));
        s
    }

    #[test]
    fn test_collapse_keeps_best_chunk_per_parent() {
        let corpus = corpus(&[("a", 3), ("b", 2)]);
        let ranked = vec![
            RankedChunk { chunk: corpus.chunk("a", "a:1").unwrap(), scores: scores(0.9) },
            RankedChunk { chunk: corpus.chunk("a", "a:0").unwrap(), scores: scores(0.8) },
            RankedChunk { chunk: corpus.chunk("b", "b:1").unwrap(), scores: scores(0.7) },
            RankedChunk { chunk: corpus.chunk("a", "a:2").unwrap(), scores: scores(0.6) },
            RankedChunk { chunk: corpus.chunk("b", "b:0").unwrap(), scores: scores(0.5) },
        ];
        let matches = collapse_to_parents(ranked, &corpus, 10);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].id, "a");
        assert_eq!(matches[0].chunk_id.as_deref(), Some("a:1"));
        assert!((matches[0].score() - 0.9).abs() < 1e-6);
        assert_eq!(matches[1].id, "b");
        assert_eq!(matches[1].chunk_id.as_deref(), Some("b:1"));
    }

    #[test]
    fn test_collapse_respects_limit() {
        let corpus = corpus(&[("a", 1), ("b", 1), ("c", 1)]);
        let ranked: Vec<RankedChunk> = ["a", "b", "c"]
            .iter()
            .map(|p| RankedChunk { chunk: corpus.chunk(p, &format!("{}:0", p)).unwrap(), scores: scores(1.0) })
            .collect();
        let matches = collapse_to_parents(ranked, &corpus, 2);
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn test_collapse_does_not_touch_stored_parent() {
        let corpus = corpus(&[("a", 2)]);
        let ranked = vec![RankedChunk { chunk: corpus.chunk("a", "a:0").unwrap(), scores: scores(1.0) }];
        let _ = collapse_to_parents(ranked, &corpus, 1);
        assert_eq!(corpus.get("a").unwrap().chunk_ids.len(), 2);
        assert_eq!(corpus.chunk_count(), 2);
    }
}
