//! Filter translation.
//!
//! Callers send a generic expression such as
//! `{"$and": [{"color": {"$eq": "red"}}, {"year": {"$gte": 2020}}]}` (or the
//! implicit-conjunction form `{"color": {"$eq": "red"}, ...}`). Each leaf key
//! is moved into the tag namespace (`tags__color`) so it cannot collide with
//! the reserved schema fields, and the result is evaluated against document
//! tags. Anything outside this shape is rejected as a whole.

use crate::document::Tags;
use crate::{Error, Result};
use serde_json::Value;
use std::cmp::Ordering;
use std::str::FromStr;

/// Prefix of translated tag keys
pub const TAG_PREFIX: &str = "tags__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
}

impl FromStr for Comparison {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "$eq" => Ok(Comparison::Eq),
            "$ne" | "$neq" => Ok(Comparison::Ne),
            "$gt" => Ok(Comparison::Gt),
            "$gte" => Ok(Comparison::Gte),
            "$lt" => Ok(Comparison::Lt),
            "$lte" => Ok(Comparison::Lte),
            "$in" => Ok(Comparison::In),
            "$nin" => Ok(Comparison::Nin),
            other => Err(Error::Filter(format!("unknown operator '{}'", other))),
        }
    }
}

/// A single translated leaf: `tags__<key> <op> <value>`
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub key: String,
    pub op: Comparison,
    pub value: Value,
}

impl Predicate {
    /// The user tag key without the namespace prefix
    #[inline]
    pub fn tag(&self) -> &str {
        self.key.strip_prefix(TAG_PREFIX).unwrap_or(&self.key)
    }

    pub fn matches(&self, tags: &Tags) -> bool {
        let actual = tags.get(self.tag());
        match self.op {
            Comparison::Eq => actual.map(|v| values_equal(v, &self.value)).unwrap_or(false),
            Comparison::Ne => actual.map(|v| !values_equal(v, &self.value)).unwrap_or(true),
            Comparison::Gt => compare(actual, &self.value) == Some(Ordering::Greater),
            Comparison::Gte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Comparison::Lt => compare(actual, &self.value) == Some(Ordering::Less),
            Comparison::Lte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Comparison::In => match (actual, self.value.as_array()) {
                (Some(v), Some(options)) => options.iter().any(|o| values_equal(v, o)),
                _ => false,
            },
            Comparison::Nin => match (actual, self.value.as_array()) {
                (Some(v), Some(options)) => !options.iter().any(|o| values_equal(v, o)),
                _ => true,
            },
        }
    }
}

/// Conjunction of translated predicates. Empty means "match everything".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagFilter {
    predicates: Vec<Predicate>,
}

impl TagFilter {
    #[inline]
    pub fn match_all() -> Self {
        Self::default()
    }

    /// Translate a filter expression. `None`, `null` and `{}` match everything.
    pub fn translate(expr: Option<&Value>) -> Result<Self> {
        let obj = match expr {
            None | Some(Value::Null) => return Ok(Self::match_all()),
            Some(Value::Object(obj)) => obj,
            Some(other) => {
                return Err(Error::Filter(format!(
                    "filter must be an object, got {}",
                    other
                )))
            }
        };

        let mut predicates = Vec::new();

        if let Some(and) = obj.get("$and") {
            if obj.len() != 1 {
                return Err(Error::Filter(
                    "'$and' cannot be combined with other top-level keys".to_string(),
                ));
            }
            let leaves = and
                .as_array()
                .ok_or_else(|| Error::Filter("'$and' expects an array".to_string()))?;
            for leaf in leaves {
                let leaf = leaf
                    .as_object()
                    .ok_or_else(|| Error::Filter(format!("invalid predicate {}", leaf)))?;
                if leaf.len() != 1 {
                    return Err(Error::Filter(
                        "each '$and' entry must hold exactly one tag".to_string(),
                    ));
                }
                for (key, cond) in leaf {
                    predicates.push(Self::translate_leaf(key, cond)?);
                }
            }
        } else {
            for (key, cond) in obj {
                predicates.push(Self::translate_leaf(key, cond)?);
            }
        }

        Ok(Self { predicates })
    }

    fn translate_leaf(key: &str, cond: &Value) -> Result<Predicate> {
        if key.is_empty() || key.starts_with('$') {
            return Err(Error::Filter(format!("unsupported operator '{}'", key)));
        }
        let cond = cond.as_object().ok_or_else(|| {
            Error::Filter(format!("predicate on '{}' must be {{\"$op\": value}}", key))
        })?;
        if cond.len() != 1 {
            return Err(Error::Filter(format!(
                "predicate on '{}' must have exactly one operator",
                key
            )));
        }
        let (op, value) = cond
            .iter()
            .next()
            .ok_or_else(|| Error::Filter(format!("empty predicate on '{}'", key)))?;
        let op: Comparison = op.parse()?;
        if matches!(op, Comparison::In | Comparison::Nin) && !value.is_array() {
            return Err(Error::Filter(format!("'{}' on '{}' expects an array", "$in/$nin", key)));
        }
        let key = if key.starts_with(TAG_PREFIX) {
            key.to_string()
        } else {
            format!("{}{}", TAG_PREFIX, key)
        };
        Ok(Predicate {
            key,
            op,
            value: value.clone(),
        })
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    #[inline]
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn matches(&self, tags: &Tags) -> bool {
        self.predicates.iter().all(|p| p.matches(tags))
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
        _ => a == b,
    }
}

fn compare(actual: Option<&Value>, expected: &Value) -> Option<Ordering> {
    let actual = actual?;
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tags(v: Value) -> Tags {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_translate_and_prefixes_keys() {
        let f = TagFilter::translate(Some(&json!({"$and": [{"color": {"$eq": "red"}}]}))).unwrap();
        assert_eq!(f.predicates().len(), 1);
        assert_eq!(f.predicates()[0].key, "tags__color");
        assert_eq!(f.predicates()[0].tag(), "color");
        assert!(f.matches(&tags(json!({"color": "red"}))));
        assert!(!f.matches(&tags(json!({"color": "blue"}))));
        assert!(!f.matches(&tags(json!({}))));
    }

    #[test]
    fn test_implicit_conjunction() {
        let f = TagFilter::translate(Some(&json!({
            "color": {"$eq": "red"},
            "year": {"$gte": 2020}
        })))
        .unwrap();
        assert!(f.matches(&tags(json!({"color": "red", "year": 2021}))));
        assert!(f.matches(&tags(json!({"color": "red", "year": 2020.0}))));
        assert!(!f.matches(&tags(json!({"color": "red", "year": 2019}))));
    }

    #[test]
    fn test_empty_filter_matches_all() {
        assert!(TagFilter::translate(None).unwrap().is_empty());
        assert!(TagFilter::translate(Some(&json!({}))).unwrap().is_empty());
        assert!(TagFilter::translate(Some(&Value::Null)).unwrap().matches(&Tags::new()));
    }

    #[test]
    fn test_comparisons() {
        let t = tags(json!({"n": 5, "s": "b", "k": "x"}));
        let check = |expr: Value| TagFilter::translate(Some(&expr)).unwrap().matches(&t);
        assert!(check(json!({"n": {"$gt": 4}})));
        assert!(!check(json!({"n": {"$lt": 5}})));
        assert!(check(json!({"n": {"$lte": 5}})));
        assert!(check(json!({"s": {"$gt": "a"}})));
        assert!(check(json!({"k": {"$in": ["x", "y"]}})));
        assert!(check(json!({"k": {"$nin": ["y"]}})));
        assert!(check(json!({"k": {"$ne": "y"}})));
        assert!(check(json!({"missing": {"$ne": "y"}})));
        assert!(!check(json!({"s": {"$gt": 1}})));
    }

    #[test]
    fn test_malformed_filters_fail() {
        let bad = [
            json!({"color": {"$regex": "r.*"}}),
            json!({"$or": [{"color": {"$eq": "red"}}]}),
            json!({"color": "red"}),
            json!({"color": {"$eq": "red", "$ne": "blue"}}),
            json!({"$and": {"color": {"$eq": "red"}}}),
            json!({"$and": [{"color": {"$eq": "red"}, "size": {"$eq": 1}}]}),
            json!({"$and": [], "color": {"$eq": "red"}}),
            json!({"k": {"$in": "x"}}),
            json!(["color"]),
        ];
        for expr in bad.iter() {
            assert!(
                matches!(TagFilter::translate(Some(expr)), Err(Error::Filter(_))),
                "expected filter error for {}",
                expr
            );
        }
    }
}
