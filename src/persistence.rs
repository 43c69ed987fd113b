//! On-disk index pair: a binary vector file and a bincode metadata sidecar.
//!
//! Index file layout (little endian):
//!
//! ```text
//! [ magic: 8 bytes "SRAGIDX\0" ][ version: u32 ][ dimension: u32 ][ count: u64 ]
//! [ count * dimension f32 values, row-major ]
//! ```
//!
//! The sidecar carries the SHA-256 of the index file and is published last,
//! so its presence commits the pair.

use std::fs::{self, File};
use std::io::{self, Write};
use std::mem::size_of;
use std::path::{Path, PathBuf};

use bincode::Options;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::config::Number;
use crate::corpus::{CorpusFingerprint, DocumentRecord};
use crate::error::{Result, RetrievalError};
use crate::index::VectorIndex;

pub const FORMAT_VERSION: u32 = 1;

const MAGIC: &[u8; 8] = b"SRAGIDX\0";
const HEADER_LEN: usize = 8 + 4 + 4 + 8;

/// Everything needed to serve queries without touching the corpus again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub corpus: CorpusFingerprint,
    pub embedder_id: String,
    pub dimension: usize,
    pub records: Vec<DocumentRecord>,
}

impl IndexMetadata {
    /// Why this persisted state no longer represents `corpus` embedded by
    /// `embedder_id` into `dimension`-wide vectors, or `None` if it still
    /// does. The corpus path is not compared, so moving an unchanged file
    /// keeps the index valid.
    pub fn staleness(
        &self,
        corpus: &CorpusFingerprint,
        embedder_id: &str,
        dimension: usize,
    ) -> Option<String> {
        if self.corpus.size != corpus.size || self.corpus.sha256 != corpus.sha256 {
            return Some(format!(
                "corpus changed (indexed {} bytes sha256 {}, now {} bytes sha256 {})",
                self.corpus.size, self.corpus.sha256, corpus.size, corpus.sha256
            ));
        }
        if self.embedder_id != embedder_id {
            return Some(format!(
                "embedder changed from '{}' to '{}'",
                self.embedder_id, embedder_id
            ));
        }
        if self.dimension != dimension {
            return Some(format!(
                "embedding dimension changed from {} to {}",
                self.dimension, dimension
            ));
        }
        None
    }
}

#[derive(Serialize, Deserialize)]
struct MetadataFile {
    format_version: u32,
    index_sha256: String,
    metadata: IndexMetadata,
}

#[derive(Debug, Clone)]
pub struct IndexStore {
    index_path: PathBuf,
    metadata_path: PathBuf,
}

impl IndexStore {
    pub fn new(index_path: impl Into<PathBuf>, metadata_path: impl Into<PathBuf>) -> Self {
        Self {
            index_path: index_path.into(),
            metadata_path: metadata_path.into(),
        }
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn metadata_path(&self) -> &Path {
        &self.metadata_path
    }

    /// Both artifacts exist and are non-empty.
    pub fn is_valid(&self) -> bool {
        non_empty_file(&self.index_path) && non_empty_file(&self.metadata_path)
    }

    /// Writes both artifacts to temporary files beside their targets, syncs
    /// them, then publishes the index followed by the metadata. Any previous
    /// metadata is removed first so a crash mid-publish leaves no valid pair.
    pub fn save(&self, index: &VectorIndex, metadata: &IndexMetadata) -> Result<()> {
        let index_bytes = encode_index(index);
        let envelope = MetadataFile {
            format_version: FORMAT_VERSION,
            index_sha256: format!("{:x}", Sha256::digest(&index_bytes)),
            metadata: metadata.clone(),
        };
        let metadata_bytes = codec()
            .serialize(&envelope)
            .map_err(|e| write_error(&self.metadata_path, io::Error::new(io::ErrorKind::InvalidData, e)))?;

        let index_tmp = stage(&self.index_path, &index_bytes)?;
        let metadata_tmp = stage(&self.metadata_path, &metadata_bytes)?;

        match fs::remove_file(&self.metadata_path) {
            Ok(()) => debug!(path = %self.metadata_path.display(), "revoked previous metadata"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(write_error(&self.metadata_path, e)),
        }
        index_tmp
            .persist(&self.index_path)
            .map_err(|e| write_error(&self.index_path, e.error))?;
        metadata_tmp
            .persist(&self.metadata_path)
            .map_err(|e| write_error(&self.metadata_path, e.error))?;

        info!(
            index = %self.index_path.display(),
            rows = index.len(),
            dimension = index.dimension(),
            bytes = index_bytes.len(),
            "persisted index"
        );
        Ok(())
    }

    pub fn load(&self) -> Result<(VectorIndex, IndexMetadata)> {
        for path in [&self.index_path, &self.metadata_path] {
            if !path.exists() {
                return Err(RetrievalError::IndexMissing { path: path.clone() });
            }
        }

        let metadata_bytes = fs::read(&self.metadata_path)
            .map_err(|e| RetrievalError::corrupt(&self.metadata_path, e.to_string()))?;
        let envelope: MetadataFile = codec()
            .with_limit(metadata_bytes.len() as u64)
            .deserialize(&metadata_bytes)
            .map_err(|e| RetrievalError::corrupt(&self.metadata_path, e.to_string()))?;
        if envelope.format_version != FORMAT_VERSION {
            return Err(RetrievalError::corrupt(
                &self.metadata_path,
                format!(
                    "format version {} (expected {})",
                    envelope.format_version, FORMAT_VERSION
                ),
            ));
        }

        let index = self.read_index(&envelope.index_sha256)?;
        let metadata = envelope.metadata;

        if index.dimension() != metadata.dimension {
            return Err(RetrievalError::corrupt(
                &self.index_path,
                format!(
                    "index dimension {} disagrees with metadata dimension {}",
                    index.dimension(),
                    metadata.dimension
                ),
            ));
        }
        if index.len() != metadata.records.len() {
            return Err(RetrievalError::corrupt(
                &self.index_path,
                format!(
                    "index holds {} vectors for {} records",
                    index.len(),
                    metadata.records.len()
                ),
            ));
        }

        debug!(rows = index.len(), "loaded persisted index");
        Ok((index, metadata))
    }

    fn read_index(&self, expected_sha256: &str) -> Result<VectorIndex> {
        let path = &self.index_path;
        let corrupt = |reason: String| RetrievalError::corrupt(path, reason);

        let file = File::open(path).map_err(|e| corrupt(e.to_string()))?;
        let len = file.metadata().map_err(|e| corrupt(e.to_string()))?.len() as usize;
        if len < HEADER_LEN {
            return Err(corrupt(format!("file is {} bytes, shorter than header", len)));
        }
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| corrupt(e.to_string()))?;

        let actual_sha256 = format!("{:x}", Sha256::digest(&mmap[..]));
        if actual_sha256 != expected_sha256 {
            return Err(corrupt("checksum does not match metadata".into()));
        }
        if &mmap[..8] != MAGIC {
            return Err(corrupt("bad magic".into()));
        }
        let version = u32::from_le_bytes(read_array(&mmap[8..12]));
        if version != FORMAT_VERSION {
            return Err(corrupt(format!("index format version {}", version)));
        }
        let dimension = u32::from_le_bytes(read_array(&mmap[12..16])) as usize;
        let count = u64::from_le_bytes(read_array(&mmap[16..24])) as usize;

        let body = &mmap[HEADER_LEN..];
        let expected_len = count
            .checked_mul(dimension)
            .and_then(|n| n.checked_mul(size_of::<Number>()));
        if expected_len != Some(body.len()) {
            return Err(corrupt(format!(
                "body is {} bytes for {} rows of dimension {}",
                body.len(),
                count,
                dimension
            )));
        }

        let data: Vec<Number> = body
            .chunks_exact(size_of::<Number>())
            .map(|b| Number::from_le_bytes(read_array(b)))
            .collect();
        VectorIndex::from_raw(dimension, data).map_err(corrupt)
    }

    /// Removes both artifacts; absent files are not an error.
    pub fn clear(&self) -> Result<()> {
        for path in [&self.metadata_path, &self.index_path] {
            match fs::remove_file(path) {
                Ok(()) => info!(path = %path.display(), "removed index artifact"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(write_error(path, e)),
            }
        }
        Ok(())
    }
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
}

fn encode_index(index: &VectorIndex) -> Vec<u8> {
    let values = index.as_slice();
    let mut bytes = Vec::with_capacity(HEADER_LEN + values.len() * size_of::<Number>());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&(index.dimension() as u32).to_le_bytes());
    bytes.extend_from_slice(&(index.len() as u64).to_le_bytes());
    bytes.extend(values.iter().flat_map(|v| v.to_le_bytes()));
    bytes
}

/// Writes `bytes` to a synced temporary file in the target's directory.
fn stage(target: &Path, bytes: &[u8]) -> Result<NamedTempFile> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| write_error(dir, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| write_error(target, e))?;
    tmp.write_all(bytes).map_err(|e| write_error(target, e))?;
    tmp.as_file().sync_all().map_err(|e| write_error(target, e))?;
    Ok(tmp)
}

fn write_error(path: &Path, source: io::Error) -> RetrievalError {
    RetrievalError::IndexWrite {
        path: path.to_path_buf(),
        source,
    }
}

fn non_empty_file(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_ops::UnitVector;
    use tempfile::TempDir;

    fn fixture() -> (VectorIndex, IndexMetadata) {
        let vectors = vec![
            UnitVector::normalize(vec![1.0, 2.0, 3.0]).unwrap(),
            UnitVector::normalize(vec![-1.0, 0.5, 0.0]).unwrap(),
        ];
        let index = VectorIndex::build(3, vectors).unwrap();
        let metadata = IndexMetadata {
            corpus: CorpusFingerprint::of_bytes(Path::new("c.csv"), b"rows"),
            embedder_id: "test:d3".into(),
            dimension: 3,
            records: vec![
                DocumentRecord {
                    scheme_name: "A".into(),
                    ..Default::default()
                },
                DocumentRecord {
                    scheme_name: "B".into(),
                    ..Default::default()
                },
            ],
        };
        (index, metadata)
    }

    fn store_in(dir: &TempDir) -> IndexStore {
        IndexStore::new(dir.path().join("vectors.idx"), dir.path().join("index_meta.bin"))
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let (index, metadata) = fixture();

        assert!(!store.is_valid());
        store.save(&index, &metadata).unwrap();
        assert!(store.is_valid());

        let (loaded_index, loaded_meta) = store.load().unwrap();
        assert_eq!(loaded_index, index);
        assert_eq!(loaded_meta, metadata);
    }

    #[test]
    fn absent_pair_is_missing() {
        let dir = TempDir::new().unwrap();
        let err = store_in(&dir).load().unwrap_err();
        assert!(matches!(err, RetrievalError::IndexMissing { .. }));
    }

    #[test]
    fn missing_sidecar_is_missing_and_invalid() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let (index, metadata) = fixture();
        store.save(&index, &metadata).unwrap();
        fs::remove_file(store.metadata_path()).unwrap();

        assert!(!store.is_valid());
        assert!(matches!(store.load(), Err(RetrievalError::IndexMissing { .. })));
    }

    #[test]
    fn garbage_index_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let (index, metadata) = fixture();
        store.save(&index, &metadata).unwrap();
        fs::write(store.index_path(), b"definitely not vectors").unwrap();

        assert!(store.is_valid());
        assert!(matches!(store.load(), Err(RetrievalError::IndexCorrupt { .. })));
    }

    #[test]
    fn garbage_metadata_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let (index, metadata) = fixture();
        store.save(&index, &metadata).unwrap();
        fs::write(store.metadata_path(), [0xffu8; 64]).unwrap();

        assert!(matches!(store.load(), Err(RetrievalError::IndexCorrupt { .. })));
    }

    #[test]
    fn truncated_index_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let (index, metadata) = fixture();
        store.save(&index, &metadata).unwrap();
        let bytes = fs::read(store.index_path()).unwrap();
        fs::write(store.index_path(), &bytes[..bytes.len() - 4]).unwrap();

        assert!(matches!(store.load(), Err(RetrievalError::IndexCorrupt { .. })));
    }

    #[test]
    fn resave_replaces_previous_pair() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let (index, metadata) = fixture();
        store.save(&index, &metadata).unwrap();

        let smaller = VectorIndex::build(3, vec![UnitVector::normalize(vec![0.0, 0.0, 1.0]).unwrap()]).unwrap();
        let mut smaller_meta = metadata.clone();
        smaller_meta.records.truncate(1);
        store.save(&smaller, &smaller_meta).unwrap();

        let (loaded, meta) = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(meta.records.len(), 1);
        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 2, "temporary files are not left behind");
    }

    #[test]
    fn empty_index_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let (_, mut metadata) = fixture();
        metadata.records.clear();
        store.save(&VectorIndex::empty(3), &metadata).unwrap();

        let (loaded, meta) = store.load().unwrap();
        assert!(loaded.is_empty());
        assert!(meta.records.is_empty());
    }

    #[test]
    fn clear_removes_both_files() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let (index, metadata) = fixture();
        store.save(&index, &metadata).unwrap();
        store.clear().unwrap();
        store.clear().unwrap();
        assert!(!store.index_path().exists());
        assert!(!store.metadata_path().exists());
    }

    #[test]
    fn staleness_detects_corpus_embedder_and_dimension_changes() {
        let (_, metadata) = fixture();
        let dim = metadata.dimension;
        let same = CorpusFingerprint::of_bytes(Path::new("moved/c.csv"), b"rows");
        let changed = CorpusFingerprint::of_bytes(Path::new("c.csv"), b"rows!");

        assert!(metadata.staleness(&same, "test:d3", dim).is_none());
        assert!(metadata.staleness(&changed, "test:d3", dim).is_some());
        assert!(metadata.staleness(&same, "other", dim).is_some());
        let why = metadata.staleness(&same, "test:d3", dim + 1).unwrap();
        assert!(why.contains("dimension"), "{why}");
    }
}
