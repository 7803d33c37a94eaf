// BM25 lexical index over the shared `bm25_text` field
use ahash::AHashMap;
use serde_json::Value;
use crate::mapping::TEXT_FIELD;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct BM25Index {
    // term -> (doc_id -> term_frequency)
    inverted_index: AHashMap<String, AHashMap<String, u32>>,
    // doc_id -> document length
    doc_lengths: AHashMap<String, u32>,
    // doc_id -> distinct terms, for cheap removal
    doc_terms: AHashMap<String, Vec<String>>,
    total_len: u64,
    k1: f32, // term frequency saturation parameter
    b: f32,  // length normalization parameter
}

impl BM25Index {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            inverted_index: AHashMap::new(),
            doc_lengths: AHashMap::new(),
            doc_terms: AHashMap::new(),
            total_len: 0,
            k1: 1.2,
            b: 0.75,
        }
    }

    /// Lowercase, split on whitespace and punctuation, drop single characters
    #[inline]
    pub fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
            .map(|s| s.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
            .filter(|s| !s.is_empty() && s.chars().count() > 1)
            .collect()
    }

    pub fn insert_doc(&mut self, doc_id: &str, text: &str) {
        self.delete_doc(doc_id);

        let tokens = Self::tokenize(text);
        let doc_len = tokens.len() as u32;

        let mut term_freqs: AHashMap<String, u32> = AHashMap::new();
        for token in tokens {
            *term_freqs.entry(token).or_insert(0) += 1;
        }

        for (term, tf) in &term_freqs {
            self.inverted_index
                .entry(term.clone())
                .or_default()
                .insert(doc_id.to_string(), *tf);
        }

        self.doc_terms
            .insert(doc_id.to_string(), term_freqs.into_iter().map(|(term, _)| term).collect());
        self.doc_lengths.insert(doc_id.to_string(), doc_len);
        self.total_len += u64::from(doc_len);
    }

    pub fn delete_doc(&mut self, doc_id: &str) {
        if let Some(len) = self.doc_lengths.remove(doc_id) {
            self.total_len = self.total_len.saturating_sub(u64::from(len));
            for term in self.doc_terms.remove(doc_id).unwrap_or_default() {
                if let Some(docs) = self.inverted_index.get_mut(&term) {
                    docs.remove(doc_id);
                    if docs.is_empty() {
                        self.inverted_index.remove(&term);
                    }
                }
            }
        }
    }

    /// Score every document containing at least one query term
    pub fn scores(&self, query: &str) -> AHashMap<String, f32> {
        let mut doc_scores: AHashMap<String, f32> = AHashMap::new();
        let total_docs = self.doc_lengths.len();
        if total_docs == 0 {
            return doc_scores;
        }

        let avgdl = self.total_len as f32 / total_docs as f32;

        for term in Self::tokenize(query) {
            if let Some(docs) = self.inverted_index.get(&term) {
                let df = docs.len() as f32;
                // Lucene-style idf, always positive
                let idf = (1.0 + (total_docs as f32 - df + 0.5) / (df + 0.5)).ln();

                for (doc_id, &tf) in docs {
                    if let Some(&doc_len) = self.doc_lengths.get(doc_id) {
                        let score = self.term_score(tf, doc_len, avgdl, idf);
                        *doc_scores.entry(doc_id.clone()).or_insert(0.0) += score;
                    }
                }
            }
        }

        doc_scores
    }

    #[inline]
    fn term_score(&self, tf: u32, doc_len: u32, avgdl: f32, idf: f32) -> f32 {
        let tf = tf as f32;
        let norm = if avgdl > 0.0 { doc_len as f32 / avgdl } else { 1.0 };
        // idf * (tf * (k1 + 1)) / (tf + k1 * (1 - b + b * (doc_len / avgdl)))
        idf * (tf * (self.k1 + 1.0)) / (tf + self.k1 * (1.0 - self.b + self.b * norm))
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.doc_lengths.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.doc_lengths.is_empty()
    }
}

impl Default for BM25Index {
    fn default() -> Self {
        Self::new()
    }
}

/// A lexical query against the text field, with per-field boosts.
///
/// Accepts the `multi_match` and `match` query shapes:
///
/// ```text
/// {"multi_match": {"query": "this cat is cute", "fields": ["bm25_text^7"], "tie_breaker": 0.3}}
/// {"match": {"bm25_text": "this cat is cute"}}
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalQuery {
    pub text: String,
    pub boosts: Vec<f32>,
    pub tie_breaker: f32,
}

impl LexicalQuery {
    /// The default query: plain match of `text` against the text field
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            boosts: vec![1.0],
            tie_breaker: 0.0,
        }
    }

    pub fn parse(query: &Value) -> Result<Self> {
        if let Some(mm) = query.get("multi_match") {
            let text = mm
                .get("query")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::InvalidQuery("multi_match requires 'query'".to_string()))?;
            let boosts = match mm.get("fields") {
                None => vec![1.0],
                Some(Value::Array(fields)) => fields
                    .iter()
                    .map(|f| {
                        f.as_str()
                            .ok_or_else(|| Error::InvalidQuery(format!("invalid field {}", f)))
                            .and_then(parse_boosted_field)
                    })
                    .collect::<Result<Vec<f32>>>()?,
                Some(other) => {
                    return Err(Error::InvalidQuery(format!(
                        "multi_match 'fields' must be an array, got {}",
                        other
                    )))
                }
            };
            let tie_breaker = mm
                .get("tie_breaker")
                .and_then(Value::as_f64)
                .unwrap_or(0.0) as f32;
            return Ok(Self {
                text: text.to_string(),
                boosts,
                tie_breaker,
            });
        }

        if let Some(m) = query.get("match").and_then(Value::as_object) {
            let text = m
                .get(TEXT_FIELD)
                .and_then(|v| v.as_str().or_else(|| v.get("query").and_then(Value::as_str)))
                .ok_or_else(|| {
                    Error::InvalidQuery(format!("match query must target '{}'", TEXT_FIELD))
                })?;
            return Ok(Self::plain(text));
        }

        Err(Error::InvalidQuery(format!(
            "unsupported lexical query {}",
            query
        )))
    }

    /// Combine the base field score across boosted fields:
    /// `max + tie_breaker * (sum - max)`
    pub fn combine(&self, base: f32) -> f32 {
        if self.boosts.is_empty() {
            return base;
        }
        let scores: Vec<f32> = self.boosts.iter().map(|b| base * b).collect();
        let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let sum: f32 = scores.iter().sum();
        max + self.tie_breaker * (sum - max)
    }
}

fn parse_boosted_field(boosted: &str) -> Result<f32> {
    let (name, boost) = match boosted.split_once('^') {
        Some((name, boost)) => {
            let boost = boost
                .parse::<f32>()
                .map_err(|_| Error::InvalidQuery(format!("invalid boost in '{}'", boosted)))?;
            (name, boost)
        }
        None => (boosted, 1.0),
    };
    if name != TEXT_FIELD {
        return Err(Error::InvalidQuery(format!(
            "unknown lexical field '{}', only '{}' is searchable",
            name, TEXT_FIELD
        )));
    }
    Ok(boost)
}
