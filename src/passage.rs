use serde::{Deserialize, Serialize};

use crate::corpus::{DocumentRecord, Field};

/// One field rendered into a passage, optionally cut to `max_chars` characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassageField {
    pub field: Field,
    #[serde(default)]
    pub max_chars: Option<usize>,
}

impl PassageField {
    pub fn new(field: Field, max_chars: Option<usize>) -> Self {
        Self { field, max_chars }
    }
}

/// First `max_chars` characters of `value`. Counts Unicode scalar values, so
/// multi-byte scripts are never split mid-character.
pub fn truncate_chars(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &value[..byte_idx],
        None => value,
    }
}

pub fn build_passage(record: &DocumentRecord, fields: &[PassageField]) -> String {
    fields
        .iter()
        .map(|pf| {
            let value = record.get(pf.field).trim();
            match pf.max_chars {
                Some(limit) => truncate_chars(value, limit).trim_end(),
                None => value,
            }
        })
        .filter(|piece| !piece.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
