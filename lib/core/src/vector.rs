use serde::{Deserialize, Serialize};
use crate::mapping::Metric;

/// A dense embedding produced by one encoder for one field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Vector {
    data: Vec<f32>,
}

impl Vector {
    #[inline]
    #[must_use]
    pub fn new(data: Vec<f32>) -> Self {
        Self { data }
    }

    #[inline]
    #[must_use]
    pub fn dim(&self) -> usize {
        self.data.len()
    }

    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn dot(&self, other: &Vector) -> f32 {
        self.data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a * b)
            .sum()
    }

    #[inline]
    pub fn norm(&self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Compute cosine similarity with another vector
    #[inline]
    pub fn cosine_similarity(&self, other: &Vector) -> f32 {
        if self.dim() != other.dim() {
            return 0.0;
        }

        let norm_a = self.norm();
        let norm_b = other.norm();

        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }

        self.dot(other) / (norm_a * norm_b)
    }

    /// Compute L2 (Euclidean) distance
    #[inline]
    pub fn l2_distance(&self, other: &Vector) -> f32 {
        if self.dim() != other.dim() {
            return f32::INFINITY;
        }

        self.data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }

    /// Similarity under `metric`, higher is always better.
    ///
    /// `L2Norm` is mapped to `1 / (1 + d^2)` so it lands in `(0, 1]`.
    pub fn similarity(&self, other: &Vector, metric: Metric) -> f32 {
        match metric {
            Metric::Cosine => self.cosine_similarity(other),
            Metric::DotProduct => {
                if self.dim() != other.dim() {
                    0.0
                } else {
                    self.dot(other)
                }
            }
            Metric::L2Norm => {
                let d = self.l2_distance(other);
                1.0 / (1.0 + d * d)
            }
        }
    }

    /// Element-wise mean of equally sized vectors. `None` for an empty input
    /// or mismatching dimensions.
    pub fn mean<'a, I>(vectors: I) -> Option<Vector>
    where
        I: IntoIterator<Item = &'a Vector>,
    {
        let mut iter = vectors.into_iter();
        let first = iter.next()?;
        let mut sum = first.data.clone();
        let mut count = 1usize;
        for v in iter {
            if v.dim() != sum.len() {
                return None;
            }
            for (acc, x) in sum.iter_mut().zip(v.data.iter()) {
                *acc += x;
            }
            count += 1;
        }
        let inv = 1.0 / count as f32;
        for x in &mut sum {
            *x *= inv;
        }
        Some(Vector::new(sum))
    }
}

impl From<Vec<f32>> for Vector {
    fn from(data: Vec<f32>) -> Self {
        Vector::new(data)
    }
}
