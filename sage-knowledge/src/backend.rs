//! Vector similarity backends.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::errors::{KnowledgeError, KnowledgeResult};

/// Storage and nearest-neighbour lookup over chunk vectors.
///
/// Implementations must keep vectors addressable by chunk id and report
/// scores as cosine similarity (higher is closer).
pub trait VectorBackend: Send + Sync {
    /// Vector dimension, once known.
    fn dimension(&self) -> Option<usize>;

    /// Insert or replace the vector for `id`.
    fn upsert(&mut self, id: &str, vector: Vec<f32>) -> KnowledgeResult<()>;

    /// Remove every listed id. Unknown ids are ignored. Returns how many were removed.
    fn delete(&mut self, ids: &[String]) -> KnowledgeResult<usize>;

    /// Up to `k` ids ordered by descending similarity to `query`.
    fn nearest(&self, query: &[f32], k: usize) -> KnowledgeResult<Vec<(String, f32)>>;

    fn get(&self, id: &str) -> Option<Vec<f32>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every stored `(id, vector)` pair.
    fn records(&self) -> Vec<(String, Vec<f32>)>;

    fn clear(&mut self);
}

/// Exact cosine search over normalized vectors.
#[derive(Debug, Default)]
pub struct FlatIndex {
    configured_dim: Option<usize>,
    dim: Option<usize>,
    vectors: HashMap<String, Vec<f32>>,
}

impl FlatIndex {
    /// `dimension` pins the vector size up front; otherwise the first
    /// inserted vector decides it.
    pub fn new(dimension: Option<usize>) -> Self {
        Self {
            configured_dim: dimension,
            dim: dimension,
            vectors: HashMap::new(),
        }
    }

    fn check_dim(&self, actual: usize) -> KnowledgeResult<()> {
        match self.dim {
            Some(expected) if expected != actual => {
                Err(KnowledgeError::EmbeddingDimMismatch { expected, actual })
            }
            _ => Ok(()),
        }
    }
}

impl VectorBackend for FlatIndex {
    fn dimension(&self) -> Option<usize> {
        self.dim
    }

    fn upsert(&mut self, id: &str, vector: Vec<f32>) -> KnowledgeResult<()> {
        if vector.is_empty() {
            return Err(KnowledgeError::Backend(format!("empty vector for {id}")));
        }
        self.check_dim(vector.len())?;
        self.dim = Some(vector.len());
        self.vectors.insert(id.to_string(), normalize(vector));
        Ok(())
    }

    fn delete(&mut self, ids: &[String]) -> KnowledgeResult<usize> {
        Ok(ids
            .iter()
            .filter(|id| self.vectors.remove(id.as_str()).is_some())
            .count())
    }

    fn nearest(&self, query: &[f32], k: usize) -> KnowledgeResult<Vec<(String, f32)>> {
        if k == 0 || self.vectors.is_empty() {
            return Ok(Vec::new());
        }
        self.check_dim(query.len())?;

        let query = normalize(query.to_vec());
        let mut scored: Vec<(String, f32)> = self
            .vectors
            .iter()
            .map(|(id, vector)| (id.clone(), dot(&query, vector)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }

    fn get(&self, id: &str) -> Option<Vec<f32>> {
        self.vectors.get(id).cloned()
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn records(&self) -> Vec<(String, Vec<f32>)> {
        let mut records: Vec<_> = self
            .vectors
            .iter()
            .map(|(id, vector)| (id.clone(), vector.clone()))
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        records
    }

    fn clear(&mut self) {
        self.vectors.clear();
        self.dim = self.configured_dim;
    }
}

fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
