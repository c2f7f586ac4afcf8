// Storage layer - SQLite schema bootstrap, typed row structs, and the read
// queries consumed by reporting. All writes for a batch go through one open
// transaction owned by the ingester; everything here takes a plain
// `&Connection` so it works both inside and outside that transaction
// (rusqlite's `Transaction` derefs to `Connection`).

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Result};
use serde::Serialize;
use std::path::Path;

/// Durable member identifier (`members.member_id`).
pub type MemberId = i64;

/// Batch identifier (`batches.batch_id`), monotonically increasing.
pub type BatchId = i64;

// ============================================================================
// SCHEMA
// ============================================================================

/// Open a database file with WAL mode and foreign-key enforcement.
pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure_connection(&conn)?;
    Ok(conn)
}

/// Per-connection pragmas. Foreign keys are off by default in SQLite and the
/// snapshot cascade rules depend on them.
pub fn configure_connection(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS batches (
            batch_id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_label TEXT,
            created_at TEXT NOT NULL,
            row_count INTEGER NOT NULL DEFAULT 0,
            active_count INTEGER NOT NULL DEFAULT 0,
            net_change INTEGER NOT NULL DEFAULT 0,
            lost_count INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS members (
            member_id INTEGER PRIMARY KEY AUTOINCREMENT,
            external_id TEXT UNIQUE NOT NULL,
            email TEXT,
            first_name TEXT,
            last_name TEXT
        )",
        [],
    )?;

    // UNIQUE(batch_id, member_id) is the storage-level guarantee that a
    // member appears at most once per batch.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS snapshots (
            snapshot_id INTEGER PRIMARY KEY AUTOINCREMENT,
            batch_id INTEGER NOT NULL,
            member_id INTEGER NOT NULL,
            status TEXT,
            pledge_amount REAL NOT NULL DEFAULT 0,
            UNIQUE(batch_id, member_id),
            FOREIGN KEY (batch_id) REFERENCES batches(batch_id) ON DELETE CASCADE,
            FOREIGN KEY (member_id) REFERENCES members(member_id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_snapshots_member ON snapshots(member_id, batch_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// ROW TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub member_id: MemberId,
    pub external_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

/// The previous batch as seen at the start of an ingestion run: its id (for
/// prior-snapshot lookups) and its finalized active count (for net change).
#[derive(Debug, Clone, Copy)]
pub struct PriorBatch {
    pub batch_id: BatchId,
    pub active_count: i64,
}

/// One batch as returned by the reporting query, most recent first.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub batch_id: BatchId,
    pub source_label: String,
    pub created_at: String,
    pub row_count: i64,
    pub active_count: i64,
    pub net_change: i64,
    pub lost_count: i64,
    /// Sum of pledge amounts over the batch's active snapshots.
    /// Only populated when the caller asks for revenue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revenue: Option<f64>,
}

// ============================================================================
// BATCH WRITES (called inside the ingestion transaction)
// ============================================================================

/// The most recently created batch with its finalized active count, read once
/// before any writes for the new batch begin.
pub fn latest_batch(conn: &Connection) -> Result<Option<PriorBatch>> {
    conn.query_row(
        "SELECT batch_id, active_count FROM batches ORDER BY batch_id DESC LIMIT 1",
        [],
        |row| {
            Ok(PriorBatch {
                batch_id: row.get(0)?,
                active_count: row.get(1)?,
            })
        },
    )
    .optional()
}

/// Insert the batch row with zero counters; returns the fresh batch id.
pub fn insert_batch(conn: &Connection, source_label: &str) -> Result<BatchId> {
    conn.execute(
        "INSERT INTO batches (source_label, created_at, row_count, active_count, net_change, lost_count)
         VALUES (?1, ?2, 0, 0, 0, 0)",
        params![source_label, Utc::now().to_rfc3339()],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Write the final counters onto the batch row. Counters are write-once:
/// this runs exactly once per batch, just before commit.
pub fn finalize_batch(
    conn: &Connection,
    batch_id: BatchId,
    row_count: i64,
    active_count: i64,
    net_change: i64,
    lost_count: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE batches
         SET row_count = ?1, active_count = ?2, net_change = ?3, lost_count = ?4
         WHERE batch_id = ?5",
        params![row_count, active_count, net_change, lost_count, batch_id],
    )?;
    Ok(())
}

/// Insert one member's snapshot for this batch. A duplicate (batch, member)
/// pair fails the UNIQUE constraint and aborts the batch.
pub fn insert_snapshot(
    conn: &Connection,
    batch_id: BatchId,
    member_id: MemberId,
    status_label: &str,
    pledge_amount: f64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO snapshots (batch_id, member_id, status, pledge_amount)
         VALUES (?1, ?2, ?3, ?4)",
        params![batch_id, member_id, status_label, pledge_amount],
    )?;
    Ok(())
}

// ============================================================================
// READ API (reporting)
// ============================================================================

/// List batches, most recent first.
///
/// With `with_revenue`, each batch also carries the sum of pledge amounts
/// across its snapshots that satisfy the active predicate. The status set in
/// the SQL must stay in sync with `parser::ACTIVE_LABELS`.
pub fn batch_reports(conn: &Connection, with_revenue: bool) -> Result<Vec<BatchReport>> {
    let mut stmt = conn.prepare(
        "SELECT batch_id, source_label, created_at,
                row_count, active_count, net_change, lost_count
         FROM batches
         ORDER BY batch_id DESC",
    )?;

    let mut reports = stmt
        .query_map([], |row| {
            Ok(BatchReport {
                batch_id: row.get(0)?,
                source_label: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                created_at: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                row_count: row.get(3)?,
                active_count: row.get(4)?,
                net_change: row.get(5)?,
                lost_count: row.get(6)?,
                revenue: None,
            })
        })?
        .collect::<Result<Vec<_>>>()?;

    if with_revenue {
        let mut revenue_stmt = conn.prepare(
            "SELECT COALESCE(SUM(pledge_amount), 0)
             FROM snapshots
             WHERE batch_id = ?1
               AND LOWER(TRIM(status)) IN ('active', 'active patron', 'active_patron')
               AND pledge_amount > 0",
        )?;
        for report in &mut reports {
            let revenue: f64 = revenue_stmt.query_row(params![report.batch_id], |row| row.get(0))?;
            report.revenue = Some(revenue);
        }
    }

    Ok(reports)
}

/// Look up a member by external identifier.
pub fn get_member_by_external_id(conn: &Connection, external_id: &str) -> Result<Option<Member>> {
    conn.query_row(
        "SELECT member_id, external_id, email, first_name, last_name
         FROM members WHERE external_id = ?1",
        params![external_id],
        |row| {
            Ok(Member {
                member_id: row.get(0)?,
                external_id: row.get(1)?,
                email: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                first_name: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                last_name: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            })
        },
    )
    .optional()
}

pub fn snapshot_count(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))
}

pub fn member_count(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM members", [], |row| row.get(0))
}

// ============================================================================
// TESTS
// ============================================================================
