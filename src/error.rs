use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the retrieval engine.
///
/// `IndexMissing` and `IndexCorrupt` are recovered locally by rebuilding;
/// everything else reaches the caller.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("corpus unavailable at '{path}': {source}")]
    CorpusUnavailable {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("persisted index missing at '{path}'")]
    IndexMissing { path: PathBuf },

    #[error("persisted index at '{path}' is corrupt: {reason}")]
    IndexCorrupt { path: PathBuf, reason: String },

    #[error("failed to write index artifact '{path}': {source}")]
    IndexWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("embedding provider unavailable: {0:#}")]
    EmbeddingProviderUnavailable(#[source] anyhow::Error),

    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("query could not be encoded: {0}")]
    QueryEncodingFailure(String),

    #[error("retriever is not initialized")]
    NotReady,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RetrievalError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        RetrievalError::IndexCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for persisted-state failures that a rebuild repairs.
    pub fn is_recoverable_index_error(&self) -> bool {
        matches!(
            self,
            RetrievalError::IndexMissing { .. } | RetrievalError::IndexCorrupt { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RetrievalError>;
