//! Normalized float vectors and the cosine-similarity scoring used by every
//! `AnnIndex` implementation.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector(pub Vec<f32>);

impl Vector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    /// L2-normalize in place; a zero vector is left unchanged (dot product
    /// against anything will come out 0, which is the correct "no signal"
    /// score rather than a NaN from dividing by zero).
    pub fn normalize(&mut self) {
        let norm = self.norm();
        if norm > 0.0 {
            for v in self.0.iter_mut() {
                *v /= norm;
            }
        }
    }

    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }

    fn norm(&self) -> f32 {
        self.0.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Cosine similarity. Assumes both vectors are already L2-normalized,
    /// in which case this is just the dot product and lands in [-1, 1].
    pub fn cosine_similarity(&self, other: &Vector) -> f32 {
        self.0.iter().zip(other.0.iter()).map(|(a, b)| a * b).sum()
    }

    pub fn squared_euclidean_distance(&self, other: &Vector) -> f32 {
        self.0.iter().zip(other.0.iter()).map(|(a, b)| (a - b) * (a - b)).sum()
    }
}
