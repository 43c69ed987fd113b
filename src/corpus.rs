//! CSV corpus loading.
//!
//! Row order in the source file defines the `DocumentId` of every record, so
//! the loader never reorders, deduplicates or drops rows.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{Result, RetrievalError};

/// Zero-based position of a record in the loaded corpus.
pub type DocumentId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    SchemeName,
    Details,
    Benefits,
    Eligibility,
    Category,
    Tags,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::SchemeName,
        Field::Details,
        Field::Benefits,
        Field::Eligibility,
        Field::Category,
        Field::Tags,
    ];

    /// Column header used in the source CSV.
    pub fn name(self) -> &'static str {
        match self {
            Field::SchemeName => "scheme_name",
            Field::Details => "details",
            Field::Benefits => "benefits",
            Field::Eligibility => "eligibility",
            Field::Category => "category",
            Field::Tags => "tags",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim();
        Field::ALL
            .into_iter()
            .find(|field| field.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown document field '{}'", s))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub scheme_name: String,
    pub details: String,
    pub benefits: String,
    pub eligibility: String,
    pub category: String,
    pub tags: String,
}

impl DocumentRecord {
    pub fn get(&self, field: Field) -> &str {
        match field {
            Field::SchemeName => &self.scheme_name,
            Field::Details => &self.details,
            Field::Benefits => &self.benefits,
            Field::Eligibility => &self.eligibility,
            Field::Category => &self.category,
            Field::Tags => &self.tags,
        }
    }

    fn set(&mut self, field: Field, value: &str) {
        let slot = match field {
            Field::SchemeName => &mut self.scheme_name,
            Field::Details => &mut self.details,
            Field::Benefits => &mut self.benefits,
            Field::Eligibility => &mut self.eligibility,
            Field::Category => &mut self.category,
            Field::Tags => &mut self.tags,
        };
        *slot = value.trim().to_string();
    }
}

/// Identity of the corpus an index was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusFingerprint {
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
}

impl CorpusFingerprint {
    pub fn of_bytes(path: &Path, bytes: &[u8]) -> Self {
        Self {
            path: path.to_path_buf(),
            size: bytes.len() as u64,
            sha256: format!("{:x}", Sha256::digest(bytes)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Corpus {
    pub records: Vec<DocumentRecord>,
    pub fingerprint: CorpusFingerprint,
}

impl Corpus {
    /// Wraps records that did not come from a file. The fingerprint covers a
    /// canonical JSON rendering so identical record lists compare equal.
    pub fn from_records(label: &str, records: Vec<DocumentRecord>) -> Self {
        let canonical = serde_json::to_vec(&records).unwrap_or_default();
        let fingerprint = CorpusFingerprint::of_bytes(Path::new(label), &canonical);
        Self { records, fingerprint }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub struct CorpusLoader;

impl CorpusLoader {
    pub fn load(path: &Path) -> Result<Corpus> {
        let unavailable = |source: csv::Error| RetrievalError::CorpusUnavailable {
            path: path.to_path_buf(),
            source,
        };

        let bytes = fs::read(path).map_err(|e| unavailable(e.into()))?;
        let records = Self::parse(&bytes).map_err(unavailable)?;
        let fingerprint = CorpusFingerprint::of_bytes(path, &bytes);

        info!(
            path = %path.display(),
            records = records.len(),
            "loaded corpus"
        );
        Ok(Corpus { records, fingerprint })
    }

    /// Parses CSV bytes with a header row. Absent columns and short rows
    /// produce empty strings; invalid UTF-8 is an error.
    pub fn parse(bytes: &[u8]) -> std::result::Result<Vec<DocumentRecord>, csv::Error> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(bytes);

        let headers = reader.headers()?.clone();
        let columns: Vec<(Field, usize)> = Field::ALL
            .into_iter()
            .filter_map(|field| {
                headers
                    .iter()
                    .position(|h| h.trim_start_matches('\u{feff}').trim() == field.name())
                    .map(|idx| (field, idx))
            })
            .collect();

        for field in Field::ALL {
            if !columns.iter().any(|(f, _)| *f == field) {
                debug!(column = field.name(), "column absent from corpus header");
            }
        }

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row?;
            let mut record = DocumentRecord::default();
            for &(field, idx) in &columns {
                record.set(field, row.get(idx).unwrap_or(""));
            }
            records.push(record);
        }
        Ok(records)
    }
}
