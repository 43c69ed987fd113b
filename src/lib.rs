//! Embedding retrieval over a tabular corpus of government schemes.
//!
//! [`Retriever`] is the entry point: it loads the corpus, restores or builds
//! the persisted vector index, and answers top-k similarity queries with
//! ready-to-use passages.

pub mod config;
pub mod corpus;
pub mod encoder;
pub mod error;
pub mod index;
pub mod passage;
pub mod persistence;
pub mod prompt;
pub mod provider;
pub mod retriever;
pub mod vector_ops;

pub use crate::config::Settings;
pub use crate::corpus::{Corpus, CorpusLoader, DocumentId, DocumentRecord, Field};
pub use crate::error::{Result, RetrievalError};
pub use crate::provider::{EmbeddingProvider, HashingEmbedder, HttpEmbeddingProvider};
pub use crate::retriever::{InitOutcome, RebuildReason, Retriever, SearchResult};
