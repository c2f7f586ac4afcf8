// Identity Registry Resolver - find-or-create the durable Member keyed by
// the external stable identifier.
//
// The uniqueness guarantee lives in the `external_id UNIQUE` constraint, not
// in application-level locking; ingestion is single-threaded per batch, so
// the upsert below is all that is needed for idempotency.

use rusqlite::{params, Connection, OptionalExtension};

use crate::db::MemberId;
use crate::error::RowError;
use crate::parser::MemberFact;

/// Upsert a Member by external identifier and return its durable id.
///
/// A new external id inserts a fresh Member; a known one updates the mutable
/// contact fields (email, first name, last name) to the latest values.
/// Resolving the same external id twice always yields the same `MemberId`.
///
/// Runs inside the caller's open transaction: a later batch failure rolls
/// the upsert back along with everything else.
pub fn resolve(conn: &Connection, fact: &MemberFact) -> Result<MemberId, RowError> {
    conn.execute(
        "INSERT INTO members (external_id, email, first_name, last_name)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(external_id) DO UPDATE SET
             email = excluded.email,
             first_name = excluded.first_name,
             last_name = excluded.last_name",
        params![fact.external_id, fact.email, fact.first_name, fact.last_name],
    )?;

    let member_id: Option<MemberId> = conn
        .query_row(
            "SELECT member_id FROM members WHERE external_id = ?1",
            params![fact.external_id],
            |row| row.get(0),
        )
        .optional()?;

    member_id.ok_or_else(|| RowError::MissingMember(fact.external_id.clone()))
}
