//! Composite document text and the single normalising embedding path.
//!
//! Documents and queries both go through [`DocumentEncoder::encode`], so a
//! query vector is always produced exactly the way stored vectors were.

use tracing::debug;

use crate::config::FieldWeights;
use crate::corpus::{DocumentRecord, Field};
use crate::error::{Result, RetrievalError};
use crate::provider::EmbeddingProvider;
use crate::vector_ops::UnitVector;

/// Fields in the order they appear in the composite text.
pub const COMPOSITION_ORDER: [Field; 6] = [
    Field::SchemeName,
    Field::Tags,
    Field::Details,
    Field::Benefits,
    Field::Eligibility,
    Field::Category,
];

/// Repeats each field `weight` times so heavier fields dominate the embedding.
pub fn composite_text(record: &DocumentRecord, weights: &FieldWeights) -> String {
    let mut pieces: Vec<&str> = Vec::new();
    for field in COMPOSITION_ORDER {
        let value = record.get(field).trim();
        if value.is_empty() {
            continue;
        }
        for _ in 0..weights.weight(field) {
            pieces.push(value);
        }
    }
    pieces.join(" ")
}

pub struct DocumentEncoder<P> {
    provider: P,
    weights: FieldWeights,
    batch_size: usize,
}

impl<P: EmbeddingProvider> DocumentEncoder<P> {
    pub fn new(provider: P, weights: FieldWeights, batch_size: usize) -> Self {
        Self {
            provider,
            weights,
            batch_size: batch_size.max(1),
        }
    }

    pub fn embedder_id(&self) -> &str {
        self.provider.embedder_id()
    }

    pub fn weights(&self) -> &FieldWeights {
        &self.weights
    }

    /// Embeds `texts` in batches and normalises every vector. All vectors
    /// must share one dimension; zero or non-finite vectors are rejected.
    pub fn encode(&self, texts: &[String]) -> Result<Vec<UnitVector>> {
        let mut out = Vec::with_capacity(texts.len());
        let mut dimension: Option<usize> = None;

        for (batch_no, batch) in texts.chunks(self.batch_size).enumerate() {
            debug!(batch = batch_no, size = batch.len(), "embedding batch");
            let raw = self
                .provider
                .embed(batch)
                .map_err(RetrievalError::EmbeddingProviderUnavailable)?;

            if raw.len() != batch.len() {
                return Err(RetrievalError::InvalidEmbedding(format!(
                    "provider returned {} vectors for {} texts",
                    raw.len(),
                    batch.len()
                )));
            }

            for (offset, vector) in raw.into_iter().enumerate() {
                let position = batch_no * self.batch_size + offset;
                let expected = *dimension.get_or_insert(vector.len());
                if vector.len() != expected {
                    return Err(RetrievalError::DimensionMismatch {
                        expected,
                        actual: vector.len(),
                    });
                }
                let unit = UnitVector::normalize(vector).ok_or_else(|| {
                    RetrievalError::InvalidEmbedding(format!(
                        "text #{} produced a zero or non-finite vector",
                        position
                    ))
                })?;
                out.push(unit);
            }
        }
        Ok(out)
    }

    /// Current output dimension of the provider, found by embedding a
    /// fixed probe text.
    pub fn probe_dimension(&self) -> Result<usize> {
        let probe = self.encode(&["dimension probe".to_string()])?;
        probe
            .first()
            .map(|v| v.dimension())
            .ok_or_else(|| RetrievalError::InvalidEmbedding("provider returned no vector".into()))
    }

    pub fn encode_records(&self, records: &[DocumentRecord]) -> Result<Vec<UnitVector>> {
        let texts: Vec<String> = records
            .iter()
            .map(|r| composite_text(r, &self.weights))
            .collect();
        self.encode(&texts)
    }

    /// Encodes a query through the same path as documents. Blank or
    /// directionless queries fail with `QueryEncodingFailure`.
    pub fn encode_query(&self, query: &str) -> Result<UnitVector> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RetrievalError::QueryEncodingFailure("query is empty".into()));
        }
        let mut vectors = self.encode(&[query.to_string()]).map_err(|e| match e {
            RetrievalError::InvalidEmbedding(reason) => RetrievalError::QueryEncodingFailure(reason),
            other => other,
        })?;
        vectors
            .pop()
            .ok_or_else(|| RetrievalError::QueryEncodingFailure("no vector returned".into()))
    }
}
