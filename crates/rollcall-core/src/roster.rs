//! Roster loading: enrolled identities and their reference descriptors.
//!
//! The roster is a headerless CSV produced by `rollcall extract`. Each row
//! is a code, a display name, and 128 descriptor values. Rows whose
//! descriptor is the all-zero placeholder (no usable enrollment photos)
//! load fine but are excluded from matching for the life of the session.

use crate::types::{Embedding, EMBEDDING_DIM};
use std::path::Path;
use thiserror::Error;

/// Fields per roster row: code, display name, then one per descriptor dimension.
const ROW_FIELDS: usize = 2 + EMBEDDING_DIM;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("roster file not found: {0} (generate one with `rollcall extract`)")]
    NotFound(String),
    #[error("roster row {row}: expected {ROW_FIELDS} fields, got {got}")]
    FieldCount { row: usize, got: usize },
    #[error("roster row {row}, field {field}: not a number: {value:?}")]
    BadValue {
        row: usize,
        field: usize,
        value: String,
    },
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
}

/// One enrolled identity loaded from the roster.
#[derive(Debug, Clone)]
pub struct EnrolledFace {
    pub code: String,
    pub name: String,
    pub embedding: Embedding,
    /// False when the stored descriptor is the all-zero placeholder.
    /// Unmatchable entries are never candidates for classification.
    pub matchable: bool,
}

/// The full set of enrolled identities, in file order.
#[derive(Debug)]
pub struct Roster {
    entries: Vec<EnrolledFace>,
}

impl Roster {
    /// Load a roster CSV. Any malformed row is a fatal load error carrying
    /// the 1-based row number. Duplicate codes are retained as written.
    pub fn load(path: &Path) -> Result<Self, RosterError> {
        if !path.exists() {
            return Err(RosterError::NotFound(path.display().to_string()));
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)?;

        let mut entries = Vec::new();
        for (idx, record) in reader.records().enumerate() {
            let record = record?;
            let row = idx + 1;

            if record.len() != ROW_FIELDS {
                return Err(RosterError::FieldCount {
                    row,
                    got: record.len(),
                });
            }

            let code = record[0].trim().to_string();
            let name = record[1].trim().to_string();

            let mut values = Vec::with_capacity(EMBEDDING_DIM);
            for field in 2..ROW_FIELDS {
                let raw = record[field].trim();
                let value = raw.parse::<f32>().map_err(|_| RosterError::BadValue {
                    row,
                    field: field + 1,
                    value: raw.to_string(),
                })?;
                values.push(value);
            }

            let embedding = Embedding { values };
            let matchable = !embedding.is_zero();
            if !matchable {
                tracing::warn!(code = %code, name = %name, "roster entry has placeholder descriptor, will never match");
            }

            entries.push(EnrolledFace {
                code,
                name,
                embedding,
                matchable,
            });
        }

        tracing::info!(
            path = %path.display(),
            entries = entries.len(),
            unmatchable = entries.iter().filter(|e| !e.matchable).count(),
            "roster loaded"
        );

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[EnrolledFace] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn matchable_count(&self) -> usize {
        self.entries.iter().filter(|e| e.matchable).count()
    }

    pub fn unmatchable_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.matchable).count()
    }
}
