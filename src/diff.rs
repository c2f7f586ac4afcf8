// Snapshot Diff Evaluator - classify a member's state transition between the
// immediately preceding batch and the one being ingested.
//
// Only member loss is enumerated per member. Gains surface through the
// batch-level net-change counter, so "newly active" never appears here.

use rusqlite::{params, Connection, OptionalExtension, Result};

use crate::db::{BatchId, MemberId};
use crate::parser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Active in the immediately preceding batch, not active now.
    Lost,
    /// No transition recorded: still active, still inactive, first-ever
    /// batch, or no prior snapshot for this member.
    None,
}

/// Classify the transition for one member.
///
/// `prior_batch_id` is the id of the most recent batch strictly before the
/// one being ingested, captured once before row processing began. `None`
/// means this is the first-ever batch and no transition is computed.
///
/// A member absent from the prior batch has no prior state and can never be
/// Lost, only newly observed.
pub fn evaluate(
    conn: &Connection,
    member_id: MemberId,
    currently_active: bool,
    prior_batch_id: Option<BatchId>,
) -> Result<Transition> {
    let Some(prior_batch_id) = prior_batch_id else {
        return Ok(Transition::None);
    };

    let prior: Option<(String, f64)> = conn
        .query_row(
            "SELECT status, pledge_amount FROM snapshots
             WHERE member_id = ?1 AND batch_id = ?2",
            params![member_id, prior_batch_id],
            |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    row.get(1)?,
                ))
            },
        )
        .optional()?;

    let was_active = match prior {
        Some((status, pledge)) => parser::is_active(&status, pledge),
        None => return Ok(Transition::None),
    };

    if was_active && !currently_active {
        Ok(Transition::Lost)
    } else {
        Ok(Transition::None)
    }
}
