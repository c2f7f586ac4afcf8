// Ingestion pipeline - the transactional writer and the orchestrator that
// drives one batch through parse → resolve → diff → aggregate → persist.
//
// One batch at a time: the connection sits behind a mutex held for the whole
// run, so two concurrent ingest calls serialize instead of racing on the
// "previous batch" lookup. Within a batch, rows are pulled from the source
// one at a time and each row's storage work completes before the next row is
// read, which is the backpressure contract. Every write happens inside the
// single open transaction; dropping it on any failure path rolls everything
// back, so a batch is never visible half-written.

use rusqlite::Connection;
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::aggregate::BatchAggregator;
use crate::db::{self, BatchId};
use crate::diff;
use crate::error::IngestError;
use crate::parser::{MemberFact, RawRow};
use crate::registry;

/// The result of a successful ingestion run, mirrored into the batch row.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub batch_id: BatchId,
    pub filename: String,
    pub row_count: i64,
    pub active_count: i64,
    pub net_change: i64,
    pub lost_count: i64,
}

/// Owns the storage connection and serializes batch ingestion over it.
pub struct SnapshotIngester {
    conn: Mutex<Connection>,
}

impl SnapshotIngester {
    /// Wrap an already-configured connection (see `db::configure_connection`).
    pub fn new(conn: Connection) -> Self {
        SnapshotIngester {
            conn: Mutex::new(conn),
        }
    }

    /// Open (or create) a database file and bootstrap the schema.
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        let conn = db::open_database(path)?;
        db::setup_database(&conn)?;
        Ok(Self::new(conn))
    }

    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ingest one CSV snapshot from a reader. `source_label` is recorded on
    /// the batch row (typically the uploaded file's name).
    pub fn ingest_csv<R: Read>(
        &self,
        source_label: &str,
        reader: R,
    ) -> Result<BatchSummary, IngestError> {
        let mut rdr = csv::Reader::from_reader(reader);
        self.ingest_rows(source_label, rdr.deserialize())
    }

    /// Ingest a CSV snapshot file, using its file name as the source label.
    pub fn ingest_path(&self, path: &Path) -> Result<BatchSummary, IngestError> {
        let label = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        let mut rdr = csv::Reader::from_path(path)?;
        self.ingest_rows(&label, rdr.deserialize())
    }

    /// Ingest from any row source. The iterator is only advanced after the
    /// previous row's storage operations have completed, so a slow backend
    /// applies backpressure to the source instead of queuing unbounded work.
    pub fn ingest_rows<I>(&self, source_label: &str, rows: I) -> Result<BatchSummary, IngestError>
    where
        I: Iterator<Item = csv::Result<RawRow>>,
    {
        let mut conn = self.lock_conn();
        run_batch(&mut conn, source_label, rows)
    }

    /// List batches, most recent first, for external reporting.
    pub fn batch_reports(&self, with_revenue: bool) -> rusqlite::Result<Vec<db::BatchReport>> {
        db::batch_reports(&self.lock_conn(), with_revenue)
    }
}

/// One pass over the source: Created → RowsWritten → Finalized, or the whole
/// transaction rolls back.
fn run_batch<I>(
    conn: &mut Connection,
    source_label: &str,
    rows: I,
) -> Result<BatchSummary, IngestError>
where
    I: Iterator<Item = csv::Result<RawRow>>,
{
    // The previous batch's id and active count are captured exactly once,
    // before any writes for the new batch.
    let prior = db::latest_batch(conn)?;
    let (prior_batch_id, previous_active_count) = match prior {
        Some(p) => {
            debug!(
                prior_batch_id = p.batch_id,
                prior_active_count = p.active_count,
                "found previous batch"
            );
            (Some(p.batch_id), p.active_count)
        }
        None => {
            debug!("no previous batch; this is the first import");
            (None, 0)
        }
    };

    let tx = conn.transaction()?;
    let batch_id = db::insert_batch(&tx, source_label)?;
    info!(batch_id, source_label, "batch created, processing rows");

    let mut agg = BatchAggregator::new();

    for (position, row) in rows.enumerate() {
        let index = position + 1;
        let raw = row?;

        let Some(fact) = MemberFact::from_raw(&raw) else {
            warn!(row = index, "skipping row: external identifier is missing");
            continue;
        };

        let member_id =
            registry::resolve(&tx, &fact).map_err(|e| IngestError::at_row(index, e))?;

        let is_active = fact.is_active();
        let transition = diff::evaluate(&tx, member_id, is_active, prior_batch_id)
            .map_err(|e| IngestError::at_row(index, e))?;

        db::insert_snapshot(&tx, batch_id, member_id, &fact.status_label, fact.pledge_amount)
            .map_err(|e| IngestError::at_row(index, e))?;

        agg.record_row(is_active, transition);

        if agg.row_count() % 100 == 0 {
            debug!(rows = agg.row_count(), "progress");
        }
    }

    let totals = agg.finalize(previous_active_count);
    db::finalize_batch(
        &tx,
        batch_id,
        totals.row_count,
        totals.active_count,
        totals.net_change,
        totals.lost_count,
    )?;
    tx.commit()?;

    info!(
        batch_id,
        rows = totals.row_count,
        active = totals.active_count,
        net_change = totals.net_change,
        lost = totals.lost_count,
        "batch committed"
    );

    Ok(BatchSummary {
        batch_id,
        filename: source_label.to_string(),
        row_count: totals.row_count,
        active_count: totals.active_count,
        net_change: totals.net_change,
        lost_count: totals.lost_count,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_connection, setup_database};
    use crate::error::IngestError;

    const HEADER: &str = "User ID,Email,Name,Patron Status,Pledge Amount\n";

    fn test_ingester() -> SnapshotIngester {
        let conn = Connection::open_in_memory().unwrap();
        configure_connection(&conn).unwrap();
        setup_database(&conn).unwrap();
        SnapshotIngester::new(conn)
    }

    fn ingest(ingester: &SnapshotIngester, label: &str, body: &str) -> BatchSummary {
        let csv = format!("{HEADER}{body}");
        ingester.ingest_csv(label, csv.as_bytes()).unwrap()
    }

    #[test]
    fn test_first_batch_summary() {
        let ingester = test_ingester();
        let summary = ingest(
            &ingester,
            "jan.csv",
            "pat_1,ada@example.com,Ada Lovelace,Active patron,$10.00\n\
             pat_2,bob@example.com,Bob Jones,Former patron,$0.00\n",
        );

        assert_eq!(summary.filename, "jan.csv");
        assert_eq!(summary.row_count, 2);
        assert_eq!(summary.active_count, 1);
        // No previous batch: net change equals the active count.
        assert_eq!(summary.net_change, 1);
        assert_eq!(summary.lost_count, 0);
    }

    #[test]
    fn test_churn_and_regain_across_three_batches() {
        let ingester = test_ingester();

        let b1 = ingest(&ingester, "1.csv", "pat_1,a@e.com,Ada L,Active patron,$10.00\n");
        assert_eq!((b1.active_count, b1.net_change, b1.lost_count), (1, 1, 0));

        let b2 = ingest(&ingester, "2.csv", "pat_1,a@e.com,Ada L,Former patron,$0.00\n");
        assert_eq!((b2.active_count, b2.net_change, b2.lost_count), (0, -1, 1));

        // Regaining an inactive member is not a loss.
        let b3 = ingest(&ingester, "3.csv", "pat_1,a@e.com,Ada L,Active patron,$5\n");
        assert_eq!((b3.active_count, b3.net_change, b3.lost_count), (1, 1, 0));
    }

    #[test]
    fn test_member_absent_from_current_batch_is_not_counted_lost() {
        let ingester = test_ingester();
        ingest(
            &ingester,
            "1.csv",
            "pat_1,a@e.com,Ada L,Active patron,$10.00\n\
             pat_2,b@e.com,Bob J,Active patron,$5.00\n",
        );

        // pat_2 simply disappears; only enumerated transitions count as lost.
        let b2 = ingest(&ingester, "2.csv", "pat_1,a@e.com,Ada L,Active patron,$10.00\n");
        assert_eq!(b2.active_count, 1);
        assert_eq!(b2.net_change, -1);
        assert_eq!(b2.lost_count, 0);
    }

    #[test]
    fn test_rows_without_external_id_are_skipped() {
        let ingester = test_ingester();
        let summary = ingest(
            &ingester,
            "jan.csv",
            ",ghost@example.com,Ghost Row,Active patron,$10.00\n\
             pat_1,a@e.com,Ada L,Active patron,$10.00\n",
        );

        // Only the persisted row counts; the skipped row affects nothing.
        assert_eq!(summary.row_count, 1);
        assert_eq!(summary.active_count, 1);
        assert_eq!(ingester.batch_reports(false).unwrap()[0].row_count, 1);
    }

    #[test]
    fn test_duplicate_member_in_one_batch_rolls_back_everything() {
        let ingester = test_ingester();
        let b1 = ingest(&ingester, "1.csv", "pat_1,old@e.com,Ada L,Active patron,$10.00\n");

        let csv = format!(
            "{HEADER}pat_2,b@e.com,Bob J,Active patron,$5.00\n\
             pat_1,new@e.com,Ada L,Active patron,$10.00\n\
             pat_1,new@e.com,Ada L,Active patron,$10.00\n"
        );
        let err = ingester.ingest_csv("2.csv", csv.as_bytes()).unwrap_err();
        assert!(matches!(err, IngestError::Row { index: 3, .. }), "got {err:?}");

        // Post-rollback, storage reflects batch 1 exactly: no new batch, no
        // new member, no new snapshots, no contact update from the failed run.
        let conn = ingester.lock_conn();
        let latest = db::latest_batch(&conn).unwrap().unwrap();
        assert_eq!(latest.batch_id, b1.batch_id);
        assert_eq!(db::member_count(&conn).unwrap(), 1);
        assert_eq!(db::snapshot_count(&conn).unwrap(), 1);
        let member = db::get_member_by_external_id(&conn, "pat_1").unwrap().unwrap();
        assert_eq!(member.email, "old@e.com");
    }

    #[test]
    fn test_malformed_stream_aborts_batch() {
        let ingester = test_ingester();
        // Unbalanced quote makes the csv reader fail mid-stream.
        let csv = format!("{HEADER}pat_1,a@e.com,Ada L,Active patron,$10.00\n\"pat_2,b@e.com\n");
        let err = ingester.ingest_csv("bad.csv", csv.as_bytes()).unwrap_err();
        assert!(matches!(err, IngestError::Source(_)), "got {err:?}");

        let conn = ingester.lock_conn();
        assert!(db::latest_batch(&conn).unwrap().is_none());
        assert_eq!(db::member_count(&conn).unwrap(), 0);
    }

    #[test]
    fn test_contact_fields_follow_latest_batch() {
        let ingester = test_ingester();
        ingest(&ingester, "1.csv", "pat_1,old@e.com,Ada L,Active patron,$10.00\n");
        ingest(&ingester, "2.csv", "pat_1,new@e.com,Ada Lovelace,Active patron,$10.00\n");

        let conn = ingester.lock_conn();
        assert_eq!(db::member_count(&conn).unwrap(), 1);
        let member = db::get_member_by_external_id(&conn, "pat_1").unwrap().unwrap();
        assert_eq!(member.email, "new@e.com");
        assert_eq!(member.last_name, "Lovelace");
    }

    #[test]
    fn test_empty_file_produces_zeroed_batch() {
        let ingester = test_ingester();
        let summary = ingest(&ingester, "empty.csv", "");
        assert_eq!(summary.row_count, 0);
        assert_eq!(summary.active_count, 0);
        assert_eq!(summary.net_change, 0);
        assert_eq!(summary.lost_count, 0);
    }

    #[test]
    fn test_summary_serializes_with_camel_case_keys() {
        let ingester = test_ingester();
        let summary = ingest(&ingester, "jan.csv", "pat_1,a@e.com,Ada L,Active patron,$10.00\n");

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["batchId"], summary.batch_id);
        assert_eq!(json["filename"], "jan.csv");
        assert_eq!(json["rowCount"], 1);
        assert_eq!(json["activeCount"], 1);
        assert_eq!(json["netChange"], 1);
        assert_eq!(json["lostCount"], 0);
    }

    #[test]
    fn test_revenue_report_after_ingestion() {
        let ingester = test_ingester();
        ingest(
            &ingester,
            "jan.csv",
            "pat_1,a@e.com,Ada L,Active patron,\"$1,234.56\"\n\
             pat_2,b@e.com,Bob J,Active patron,N/A\n\
             pat_3,c@e.com,Cy X,Former patron,$50.00\n",
        );

        let reports = ingester.batch_reports(true).unwrap();
        assert_eq!(reports.len(), 1);
        // Only pat_1 satisfies the active predicate ("N/A" parses to 0).
        assert_eq!(reports[0].active_count, 1);
        assert_eq!(reports[0].revenue, Some(1234.56));
    }
}
