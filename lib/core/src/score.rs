//! Score criteria and score entries.
//!
//! Every vector criterion is reported under
//! `<query_field>-<document_field>-<encoder>-<linear_weight>`; lexical
//! matching is reported as `bm25_raw` and `bm25_normalized`. The ranking
//! score is `Σ linear_weight_i * score_i` over the active criteria.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use crate::mapping::Metric;

/// Sentinel encoder name selecting lexical matching
pub const BM25_ENCODER: &str = "bm25";
pub const BM25_RAW: &str = "bm25_raw";
pub const BM25_NORMALIZED: &str = "bm25_normalized";
/// Key of the combined ranking score
pub const TOTAL_SCORE: &str = "total";

/// One scored comparison axis of a query.
///
/// Deserializes from either an object or the 4-tuple
/// `[query_field, document_field, encoder, linear_weight]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "CriterionRepr")]
pub struct ScoreCriterion {
    pub query_field: String,
    pub document_field: String,
    pub encoder: String,
    pub linear_weight: f32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CriterionRepr {
    Tuple(String, String, String, f32),
    Named {
        query_field: String,
        document_field: String,
        encoder: String,
        #[serde(default = "default_weight")]
        linear_weight: f32,
    },
}

fn default_weight() -> f32 {
    1.0
}

impl From<CriterionRepr> for ScoreCriterion {
    fn from(repr: CriterionRepr) -> Self {
        match repr {
            CriterionRepr::Tuple(query_field, document_field, encoder, linear_weight)
            | CriterionRepr::Named {
                query_field,
                document_field,
                encoder,
                linear_weight,
            } => Self {
                query_field,
                document_field,
                encoder,
                linear_weight,
            },
        }
    }
}

impl ScoreCriterion {
    pub fn new(
        query_field: impl Into<String>,
        document_field: impl Into<String>,
        encoder: impl Into<String>,
        linear_weight: f32,
    ) -> Self {
        Self {
            query_field: query_field.into(),
            document_field: document_field.into(),
            encoder: encoder.into(),
            linear_weight,
        }
    }

    #[inline]
    pub fn is_lexical(&self) -> bool {
        self.encoder == BM25_ENCODER
    }

    /// Score key of a vector criterion
    pub fn key(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.query_field,
            self.document_field,
            self.encoder,
            format_weight(self.linear_weight)
        )
    }
}

/// Integral weights keep one decimal (`1.0`), others print as-is (`0.5`).
pub fn format_weight(w: f32) -> String {
    if w.is_finite() && w.fract() == 0.0 {
        format!("{:.1}", w)
    } else {
        format!("{}", w)
    }
}

/// How a score entry was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreOperation {
    Cosine,
    DotProduct,
    L2Norm,
    Bm25,
    MinMax,
    WeightedSum,
}

impl From<Metric> for ScoreOperation {
    fn from(m: Metric) -> Self {
        match m {
            Metric::Cosine => ScoreOperation::Cosine,
            Metric::DotProduct => ScoreOperation::DotProduct,
            Metric::L2Norm => ScoreOperation::L2Norm,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub value: f32,
    pub operation: ScoreOperation,
}

impl ScoreEntry {
    #[inline]
    pub fn new(value: f32, operation: ScoreOperation) -> Self {
        Self { value, operation }
    }
}

pub type Scores = BTreeMap<String, ScoreEntry>;

/// Min-max normalize raw scores into `[0, 1]`.
///
/// When every score is equal, positive scores map to `1.0` and the rest to
/// `0.0`.
pub fn min_max_normalize(raw: &[f32]) -> Vec<f32> {
    let (min, max) = raw.iter().fold((f32::MAX, f32::MIN), |(lo, hi), &s| {
        (lo.min(s), hi.max(s))
    });
    let range = max - min;
    raw.iter()
        .map(|&s| {
            if range < f32::EPSILON {
                if s > 0.0 { 1.0 } else { 0.0 }
            } else {
                (s - min) / range
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        let c = ScoreCriterion::new("query_text", "title", "clip", 1.0);
        assert_eq!(c.key(), "query_text-title-clip-1.0");
        let c = ScoreCriterion::new("query_text", "excerpt", "sbert", 0.5);
        assert_eq!(c.key(), "query_text-excerpt-sbert-0.5");
        assert!(!c.is_lexical());
        assert!(ScoreCriterion::new("query_text", "bm25_text", "bm25", 1.0).is_lexical());
    }

    #[test]
    fn test_deserialize_tuple_and_object() {
        let parsed: Vec<ScoreCriterion> = serde_json::from_str(
            r#"[["query_text", "title", "clip", 1.0],
                {"query_field": "query_text", "document_field": "excerpt", "encoder": "sbert"}]"#,
        )
        .unwrap();
        assert_eq!(parsed[0], ScoreCriterion::new("query_text", "title", "clip", 1.0));
        assert_eq!(parsed[1], ScoreCriterion::new("query_text", "excerpt", "sbert", 1.0));
    }

    #[test]
    fn test_min_max_normalize() {
        assert_eq!(min_max_normalize(&[2.0, 4.0, 3.0]), vec![0.0, 1.0, 0.5]);
        assert_eq!(min_max_normalize(&[3.0, 3.0]), vec![1.0, 1.0]);
        assert_eq!(min_max_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
        assert!(min_max_normalize(&[]).is_empty());
    }
}
