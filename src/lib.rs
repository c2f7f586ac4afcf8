// Supporter Analytics - Core Library
//
// Ingests periodic membership roster snapshots (CSV exports), reconciles
// member identities across batches, diffs each member against the previous
// batch, and persists per-member facts plus batch-level metrics atomically.

pub mod aggregate;
pub mod db;
pub mod diff;
pub mod error;
pub mod ingest;
pub mod parser;
pub mod registry;

// Re-export the types most callers need.
pub use aggregate::{BatchAggregator, BatchTotals};
pub use db::{
    batch_reports, configure_connection, open_database, setup_database, BatchId, BatchReport,
    Member, MemberId, PriorBatch,
};
pub use diff::Transition;
pub use error::{IngestError, RowError};
pub use ingest::{BatchSummary, SnapshotIngester};
pub use parser::{MemberFact, RawRow, StatusKind};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
