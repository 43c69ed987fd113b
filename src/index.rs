use std::cmp::Ordering;

use rayon::prelude::*;
use tracing::debug;

use crate::config::Number;
use crate::corpus::DocumentId;
use crate::error::{Result, RetrievalError};
use crate::vector_ops::{cosine_similarity, UnitVector};

/// Exact inner-product index over unit vectors.
///
/// Row `i` holds the vector of `DocumentId` `i`; rows are stored contiguously
/// in one row-major buffer. The index is rebuilt wholesale, never appended to.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dimension: usize,
    data: Vec<Number>,
}

impl VectorIndex {
    pub fn empty(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    /// Builds from vectors in `DocumentId` order.
    pub fn build(dimension: usize, vectors: Vec<UnitVector>) -> Result<Self> {
        let mut data = Vec::with_capacity(dimension * vectors.len());
        for vector in vectors {
            if vector.dimension() != dimension {
                return Err(RetrievalError::DimensionMismatch {
                    expected: dimension,
                    actual: vector.dimension(),
                });
            }
            data.extend(vector.into_inner());
        }
        debug!(dimension, rows = data.len() / dimension.max(1), "built vector index");
        Ok(Self { dimension, data })
    }

    /// Rebuilds from a raw row-major buffer, validating that every row is
    /// unit length. Used when restoring from disk.
    pub(crate) fn from_raw(dimension: usize, data: Vec<Number>) -> std::result::Result<Self, String> {
        if dimension == 0 {
            return Err("index dimension is zero".into());
        }
        if data.len() % dimension != 0 {
            return Err(format!(
                "buffer of {} values is not a multiple of dimension {}",
                data.len(),
                dimension
            ));
        }
        for (row, chunk) in data.chunks_exact(dimension).enumerate() {
            if UnitVector::from_normalized(chunk.to_vec()).is_none() {
                return Err(format!("row {} is not unit length", row));
            }
        }
        Ok(Self { dimension, data })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn vector(&self, id: DocumentId) -> Option<&[Number]> {
        let start = id.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    pub fn as_slice(&self) -> &[Number] {
        &self.data
    }

    /// Top `top_k` rows by cosine similarity, highest first, ties broken by
    /// ascending id. Scans every row.
    pub fn search(&self, query: &UnitVector, top_k: usize) -> Result<Vec<(DocumentId, Number)>> {
        if self.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        if query.dimension() != self.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dimension,
                actual: query.dimension(),
            });
        }

        let mut scored: Vec<(DocumentId, Number)> = self
            .data
            .par_chunks_exact(self.dimension)
            .enumerate()
            .map(|(id, row)| (id, cosine_similarity(query, row)))
            .collect();

        scored.sort_unstable_by(rank_order);
        scored.truncate(top_k);
        Ok(scored)
    }
}

fn rank_order(a: &(DocumentId, Number), b: &(DocumentId, Number)) -> Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}
