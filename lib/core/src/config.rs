//! Index configuration.

use crate::mapping::{EncoderFields, Metric, Schema};
use crate::query::TraversalPath;
use crate::score::ScoreCriterion;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// Configuration of one index, loadable from JSON.
///
/// ```json
/// {
///   "metric": "cosine",
///   "field_encodings": [
///     {"encoder": "clip", "embedding_size": 8, "fields": ["title"]},
///     {"encoder": "sbert", "embedding_size": 5, "fields": ["title", "excerpt"]}
///   ],
///   "default_scores": [["query_text", "title", "clip", 1.0]],
///   "traversal_paths": "@r"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexerConfig {
    #[serde(default)]
    pub metric: Metric,
    pub field_encodings: Vec<EncoderFields>,
    #[serde(default)]
    pub default_scores: Vec<ScoreCriterion>,
    #[serde(default)]
    pub traversal_paths: TraversalPath,
    /// Custom mapping replacing the generated one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<Value>,
}

impl IndexerConfig {
    pub fn new(field_encodings: Vec<EncoderFields>) -> Self {
        Self {
            metric: Metric::default(),
            field_encodings,
            default_scores: Vec::new(),
            traversal_paths: TraversalPath::default(),
            mapping: None,
        }
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_default_scores(mut self, scores: Vec<ScoreCriterion>) -> Self {
        self.default_scores = scores;
        self
    }

    pub fn with_traversal(mut self, traversal: TraversalPath) -> Self {
        self.traversal_paths = traversal;
        self
    }

    pub fn with_mapping(mut self, mapping: Value) -> Self {
        self.mapping = Some(mapping);
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("invalid indexer config: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The schema this configuration describes: the custom mapping when one
    /// is given, otherwise the one generated from `field_encodings`.
    pub fn schema(&self) -> Result<Schema> {
        match &self.mapping {
            Some(mapping) => Schema::from_mapping(mapping),
            None => Schema::new(&EncoderFields::expand(&self.field_encodings), self.metric),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "field_encodings": [
            {"encoder": "clip", "embedding_size": 8, "fields": ["title"]},
            {"encoder": "sbert", "embedding_size": 5, "fields": ["title", "excerpt"]}
        ],
        "default_scores": [
            ["query_text", "title", "clip", 1],
            {"query_field": "query_text", "document_field": "excerpt", "encoder": "sbert", "linear_weight": 0.5}
        ]
    }"#;

    #[test]
    fn test_parse_config_defaults() {
        let config = IndexerConfig::from_json_str(CONFIG).unwrap();
        assert_eq!(config.metric, Metric::Cosine);
        assert_eq!(config.traversal_paths, TraversalPath::Root);
        assert_eq!(config.default_scores.len(), 2);
        assert_eq!(config.default_scores[0].key(), "query_text-title-clip-1.0");
        assert_eq!(config.default_scores[1].key(), "query_text-excerpt-sbert-0.5");

        let schema = config.schema().unwrap();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["title-clip", "title-sbert", "excerpt-sbert"]);
    }

    #[test]
    fn test_custom_mapping_wins() {
        let generated = IndexerConfig::new(vec![EncoderFields::new("clip", 4, &["image"])])
            .schema()
            .unwrap();
        let config = IndexerConfig::new(vec![EncoderFields::new("sbert", 5, &["title"])])
            .with_mapping(generated.mapping());
        assert_eq!(config.schema().unwrap(), generated);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            IndexerConfig::from_json_str("{\"metric\": \"cosine\"}"),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            IndexerConfig::from_json_str(
                r#"{"metric": "hamming", "field_encodings": []}"#
            ),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_roundtrip_json() {
        let config = IndexerConfig::from_json_str(CONFIG).unwrap();
        let again = IndexerConfig::from_json_str(&config.to_json().unwrap()).unwrap();
        assert_eq!(config, again);
    }
}
