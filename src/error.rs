// Error taxonomy for batch ingestion.
//
// Only one row-level condition is skippable (a missing external identifier,
// handled in the parser by returning no fact). Everything else that goes
// wrong mid-batch aborts the whole batch: the transaction is rolled back and
// exactly one of these errors is returned. Nothing is retried internally;
// re-submitting the file is the caller's decision.

use thiserror::Error;

/// A failure while processing a single accepted row.
#[derive(Debug, Error)]
pub enum RowError {
    /// Storage failure or integrity violation (e.g. a duplicate snapshot for
    /// the same member within one batch).
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),

    /// The member upsert reported success but the registry has no row for
    /// the external identifier.
    #[error("no registry entry found for external id {0}")]
    MissingMember(String),
}

/// The structured failure returned to the caller when a batch aborts.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The source stream could not be read or produced a malformed record.
    #[error("failed to read source stream: {0}")]
    Source(#[from] csv::Error),

    /// Row `index` (1-based position in the source stream) failed during
    /// identity resolution, diffing, or snapshot insertion.
    #[error("error processing row {index}: {source}")]
    Row {
        index: usize,
        #[source]
        source: RowError,
    },

    /// Opening, beginning, finalizing, or committing the batch transaction
    /// failed. Distinct from `Row` so callers can treat it as retryable.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl IngestError {
    pub(crate) fn at_row(index: usize, source: impl Into<RowError>) -> Self {
        IngestError::Row {
            index,
            source: source.into(),
        }
    }
}
