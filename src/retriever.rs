use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{Number, Settings};
use crate::corpus::{Corpus, CorpusLoader, DocumentId, DocumentRecord};
use crate::encoder::DocumentEncoder;
use crate::error::{Result, RetrievalError};
use crate::index::VectorIndex;
use crate::passage::{build_passage, PassageField};
use crate::persistence::{IndexMetadata, IndexStore};
use crate::provider::EmbeddingProvider;

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub doc_id: DocumentId,
    pub score: Number,
    pub passage: String,
    pub record: DocumentRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildReason {
    Forced,
    Missing,
    Corrupt,
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    Restored,
    Rebuilt(RebuildReason),
}

struct ReadyIndex {
    index: VectorIndex,
    metadata: IndexMetadata,
}

/// Owns the index for one corpus and answers queries against it.
///
/// `initialize` holds the write lock for its whole run, so queries issued
/// meanwhile wait for it; before the first successful initialisation they
/// fail with `NotReady`.
pub struct Retriever<P> {
    encoder: DocumentEncoder<P>,
    store: IndexStore,
    passage_fields: Vec<PassageField>,
    state: RwLock<Option<ReadyIndex>>,
}

impl<P: EmbeddingProvider> Retriever<P> {
    pub fn new(provider: P, settings: &Settings) -> Self {
        Self {
            encoder: DocumentEncoder::new(
                provider,
                settings.weights.clone(),
                settings.embedding.batch_size,
            ),
            store: IndexStore::new(settings.index_path(), settings.metadata_path()),
            passage_fields: settings.passage.fields.clone(),
            state: RwLock::new(None),
        }
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    pub fn encoder(&self) -> &DocumentEncoder<P> {
        &self.encoder
    }

    /// Loads the corpus and makes an index for it available, restoring the
    /// persisted pair when it is present, readable and current, rebuilding
    /// (and persisting) otherwise.
    pub fn initialize(&self, corpus_path: &Path, force_rebuild: bool) -> Result<InitOutcome> {
        let corpus = CorpusLoader::load(corpus_path)?;
        self.initialize_with(corpus, force_rebuild)
    }

    /// As [`initialize`](Self::initialize) for a corpus already in memory.
    pub fn initialize_with(&self, corpus: Corpus, force_rebuild: bool) -> Result<InitOutcome> {
        let mut state = self.write_state();
        let start = Instant::now();

        let reason = if force_rebuild {
            RebuildReason::Forced
        } else if !self.store.is_valid() {
            info!(path = %self.store.index_path().display(), "no persisted index, building");
            RebuildReason::Missing
        } else {
            match self.try_restore(&corpus)? {
                Ok(ready) => {
                    info!(
                        documents = ready.metadata.records.len(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "restored persisted index"
                    );
                    *state = Some(ready);
                    return Ok(InitOutcome::Restored);
                }
                Err(reason) => reason,
            }
        };

        let ready = self.rebuild(corpus)?;
        info!(
            documents = ready.metadata.records.len(),
            reason = ?reason,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "rebuilt index"
        );
        *state = Some(ready);
        Ok(InitOutcome::Rebuilt(reason))
    }

    /// `Ok(Err(reason))` when the persisted pair cannot be served and must
    /// be rebuilt. The provider is asked for its current dimension so a
    /// model that changed width under the same id is caught here.
    fn try_restore(
        &self,
        corpus: &Corpus,
    ) -> Result<std::result::Result<ReadyIndex, RebuildReason>> {
        let (index, metadata) = match self.store.load() {
            Ok(pair) => pair,
            Err(RetrievalError::IndexMissing { path }) => {
                info!(path = %path.display(), "persisted index missing");
                return Ok(Err(RebuildReason::Missing));
            }
            Err(err) => {
                warn!(error = %err, "persisted index unreadable, rebuilding");
                return Ok(Err(RebuildReason::Corrupt));
            }
        };

        let dimension = self.encoder.probe_dimension()?;
        match metadata.staleness(&corpus.fingerprint, self.encoder.embedder_id(), dimension) {
            Some(why) => {
                info!(reason = %why, "persisted index is stale");
                Ok(Err(RebuildReason::Stale))
            }
            None => Ok(Ok(ReadyIndex { index, metadata })),
        }
    }

    fn rebuild(&self, corpus: Corpus) -> Result<ReadyIndex> {
        let vectors = self.encoder.encode_records(&corpus.records)?;
        let dimension = match vectors.first() {
            Some(v) => v.dimension(),
            None => self.encoder.probe_dimension()?,
        };
        let index = VectorIndex::build(dimension, vectors)?;
        let metadata = IndexMetadata {
            corpus: corpus.fingerprint,
            embedder_id: self.encoder.embedder_id().to_string(),
            dimension,
            records: corpus.records,
        };
        self.store.save(&index, &metadata)?;
        Ok(ReadyIndex { index, metadata })
    }

    /// Top `top_k` documents for `query` scoring at least `min_score`.
    /// An empty or degenerate query yields no results rather than an error.
    pub fn search(&self, query: &str, top_k: usize, min_score: Number) -> Result<Vec<SearchResult>> {
        let state = self.read_state();
        let ready = state.as_ref().ok_or(RetrievalError::NotReady)?;

        let query_vector = match self.encoder.encode_query(query) {
            Ok(v) => v,
            Err(RetrievalError::QueryEncodingFailure(reason)) => {
                debug!(%reason, "query produced no vector");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let hits = ready.index.search(&query_vector, top_k)?;
        let results: Vec<SearchResult> = hits
            .into_iter()
            .filter(|&(_, score)| score >= min_score)
            .filter_map(|(doc_id, score)| {
                let record = ready.metadata.records.get(doc_id)?;
                Some(SearchResult {
                    doc_id,
                    score,
                    passage: build_passage(record, &self.passage_fields),
                    record: record.clone(),
                })
            })
            .collect();

        debug!(top_k, min_score, returned = results.len(), "search complete");
        Ok(results)
    }

    /// Search with the configured `top_k` and `min_score`.
    pub fn search_default(&self, query: &str, settings: &Settings) -> Result<Vec<SearchResult>> {
        self.search(query, settings.search.top_k, settings.search.min_score)
    }

    pub fn is_ready(&self) -> bool {
        self.read_state().is_some()
    }

    pub fn document_count(&self) -> Option<usize> {
        self.read_state().as_ref().map(|r| r.metadata.records.len())
    }

    fn read_state(&self) -> RwLockReadGuard<'_, Option<ReadyIndex>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, Option<ReadyIndex>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
