//! Delivery repository: claims, leases, sweeping, inbox reads
//!
//! Every state transition is a single UPDATE whose predicate carries the
//! expected prior state (status, claim token, lease expiry). Concurrent
//! claimers racing for the same rows get disjoint winners because only one
//! UPDATE can match the `pending` predicate; there are no cross-row locks
//! and no read-modify-write spans.

use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::now_ms;
use crate::data::error::StoreError;
use crate::data::types::{
    Cursor, DeliveryRow, InboxEntry, Priority, delivery_from_row, inbox_entry_from_row,
};

/// Inbox/claim filter parameters
#[derive(Debug, Default, Clone)]
pub struct InboxFilter {
    pub priority: Option<Priority>,
    pub from_agent_id: Option<String>,
    pub topic_id: Option<String>,
    /// Only dead-lettered rows
    pub dead_only: bool,
    /// Every status, including terminal ones
    pub include_all: bool,
}

/// Delivery columns aliased `d_*`, message columns `m_*`, for the inbox join
const JOINED_COLS: &str = "d.id AS d_id, d.message_id AS d_message_id, \
     d.recipient_agent_id AS d_recipient_agent_id, d.group_id AS d_group_id, \
     d.topic_id AS d_topic_id, d.status AS d_status, d.attempts AS d_attempts, \
     d.claim_token AS d_claim_token, d.lease_expires_at AS d_lease_expires_at, \
     d.nack_reason AS d_nack_reason, d.dead_reason AS d_dead_reason, \
     d.last_transition_at AS d_last_transition_at, \
     m.id AS m_id, m.from_agent_id AS m_from_agent_id, m.to_agent_id AS m_to_agent_id, \
     m.topic_id AS m_topic_id, m.group_id AS m_group_id, m.broadcast AS m_broadcast, \
     m.content_type AS m_content_type, m.content AS m_content, m.priority AS m_priority, \
     m.reply_to_id AS m_reply_to_id, m.metadata AS m_metadata, m.tags AS m_tags, \
     m.created_at AS m_created_at, m.expires_at AS m_expires_at";

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &InboxFilter) {
    if let Some(priority) = filter.priority {
        qb.push(" AND m.priority = ").push_bind(priority.as_str());
    }
    if let Some(ref from) = filter.from_agent_id {
        qb.push(" AND m.from_agent_id = ").push_bind(from.clone());
    }
    if let Some(ref topic) = filter.topic_id {
        qb.push(" AND d.topic_id = ").push_bind(topic.clone());
    }
}

fn push_status_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &InboxFilter) {
    if filter.dead_only {
        qb.push(" AND d.status = 'dead'");
    } else if !filter.include_all {
        qb.push(" AND d.status IN ('pending', 'leased', 'delivered')");
    }
}

// =============================================================================
// Inbox reads
// =============================================================================

/// Cursor-paged inbox read
///
/// Returns rows strictly after `cursor` in delivery order, the cursor to
/// resume from, and whether more rows were available.
pub async fn list_inbox(
    pool: &SqlitePool,
    recipient: &str,
    filter: &InboxFilter,
    cursor: Cursor,
    limit: u32,
) -> Result<(Vec<InboxEntry>, Option<Cursor>, bool), StoreError> {
    let mut qb = QueryBuilder::new(format!(
        "SELECT {JOINED_COLS} FROM deliveries d JOIN messages m ON m.id = d.message_id \
         WHERE d.recipient_agent_id = "
    ));
    qb.push_bind(recipient);
    qb.push(" AND d.id > ").push_bind(cursor);
    push_status_filter(&mut qb, filter);
    push_filter(&mut qb, filter);
    qb.push(" ORDER BY d.id ASC LIMIT ").push_bind(limit as i64 + 1);

    let rows = qb.build().fetch_all(pool).await?;
    let has_more = rows.len() > limit as usize;
    let entries: Vec<InboxEntry> = rows
        .iter()
        .take(limit as usize)
        .map(inbox_entry_from_row)
        .collect::<Result<_, _>>()?;
    let next_cursor = entries.last().map(|e| e.delivery.id);

    Ok((entries, next_cursor, has_more))
}

pub async fn get_delivery(pool: &SqlitePool, id: i64) -> Result<Option<DeliveryRow>, StoreError> {
    let row = sqlx::query("SELECT * FROM deliveries WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.map(|r| delivery_from_row(&r)).transpose().map_err(Into::into)
}

/// Fetch one delivery joined with its message
pub async fn get_entry(pool: &SqlitePool, id: i64) -> Result<Option<InboxEntry>, StoreError> {
    let mut qb = QueryBuilder::new(format!(
        "SELECT {JOINED_COLS} FROM deliveries d JOIN messages m ON m.id = d.message_id \
         WHERE d.id = "
    ));
    qb.push_bind(id);
    let row = qb.build().fetch_optional(pool).await?;
    row.map(|r| inbox_entry_from_row(&r)).transpose().map_err(Into::into)
}

// =============================================================================
// Claims and leases
// =============================================================================

/// Atomically lease up to `limit` pending deliveries for `agent_id`
///
/// Eligible rows are the agent's own pending rows plus unassigned pool rows
/// of the queue groups it belongs to; rows that already burned
/// `max_attempts` leases are never handed out again. Each winner gets a
/// fresh claim token, `attempts + 1`, and `lease_expires_at = now +
/// lease_ms`. Rows lost to a concurrent claimer between candidate
/// selection and the conditional UPDATE are simply skipped.
pub async fn claim_pending(
    pool: &SqlitePool,
    agent_id: &str,
    queue_group_ids: &[String],
    filter: &InboxFilter,
    limit: u32,
    lease_ms: i64,
    max_attempts: u32,
) -> Result<Vec<InboxEntry>, StoreError> {
    let now = now_ms();

    let mut qb = QueryBuilder::new(
        "SELECT d.id FROM deliveries d JOIN messages m ON m.id = d.message_id \
         WHERE d.status = 'pending' AND d.attempts < ",
    );
    qb.push_bind(max_attempts as i64);
    qb.push(" AND (d.recipient_agent_id = ");
    qb.push_bind(agent_id);
    if !queue_group_ids.is_empty() {
        qb.push(" OR (d.recipient_agent_id IS NULL AND d.group_id IN (");
        let mut sep = qb.separated(", ");
        for group_id in queue_group_ids {
            sep.push_bind(group_id.clone());
        }
        qb.push("))");
    }
    qb.push(")");
    push_filter(&mut qb, filter);
    qb.push(" ORDER BY d.id ASC LIMIT ").push_bind(limit as i64);

    let candidates: Vec<i64> = qb
        .build_query_scalar()
        .fetch_all(pool)
        .await?;

    let mut won = Vec::with_capacity(candidates.len());
    for id in candidates {
        let token = uuid::Uuid::new_v4().to_string();
        let result = sqlx::query(
            "UPDATE deliveries SET status = 'leased', attempts = attempts + 1, \
             claim_token = ?, lease_expires_at = ?, recipient_agent_id = ?, \
             last_transition_at = ? \
             WHERE id = ? AND status = 'pending' AND attempts < ? \
               AND (recipient_agent_id = ? \
                    OR (recipient_agent_id IS NULL AND group_id IS NOT NULL))",
        )
        .bind(&token)
        .bind(now + lease_ms)
        .bind(agent_id)
        .bind(now)
        .bind(id)
        .bind(max_attempts as i64)
        .bind(agent_id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 1 {
            won.push(id);
        }
    }

    if won.is_empty() {
        return Ok(Vec::new());
    }

    let mut qb = QueryBuilder::new(format!(
        "SELECT {JOINED_COLS} FROM deliveries d JOIN messages m ON m.id = d.message_id \
         WHERE d.id IN ("
    ));
    let mut sep = qb.separated(", ");
    for id in &won {
        sep.push_bind(*id);
    }
    qb.push(") ORDER BY d.id ASC");

    let rows = qb.build().fetch_all(pool).await?;
    rows.iter()
        .map(|r| inbox_entry_from_row(r).map_err(Into::into))
        .collect()
}

/// Acknowledge a leased delivery
///
/// Succeeds only with the exact current token and an unexpired lease;
/// anything else is a Conflict.
pub async fn ack(pool: &SqlitePool, delivery_id: i64, claim_token: &str) -> Result<(), StoreError> {
    let now = now_ms();
    let result = sqlx::query(
        "UPDATE deliveries SET status = 'acked', claim_token = NULL, lease_expires_at = NULL, \
         last_transition_at = ? \
         WHERE id = ? AND status = 'leased' AND claim_token = ? AND lease_expires_at > ?",
    )
    .bind(now)
    .bind(delivery_id)
    .bind(claim_token)
    .bind(now)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::conflict("lease expired or token mismatch"));
    }
    Ok(())
}

/// Return a leased delivery to pending, recording the reason
///
/// A queue-group row goes back to the unassigned pool.
pub async fn nack(
    pool: &SqlitePool,
    delivery_id: i64,
    claim_token: &str,
    reason: Option<&str>,
) -> Result<(), StoreError> {
    let now = now_ms();
    let result = sqlx::query(
        "UPDATE deliveries SET status = 'pending', claim_token = NULL, lease_expires_at = NULL, \
         nack_reason = ?, \
         recipient_agent_id = CASE WHEN group_id IS NOT NULL THEN NULL ELSE recipient_agent_id END, \
         last_transition_at = ? \
         WHERE id = ? AND status = 'leased' AND claim_token = ? AND lease_expires_at > ?",
    )
    .bind(reason)
    .bind(now)
    .bind(delivery_id)
    .bind(claim_token)
    .bind(now)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::conflict("lease expired or token mismatch"));
    }
    Ok(())
}

/// Extend a lease; the new expiry never exceeds `now + max_lease_ms`
///
/// Returns the new expiry.
pub async fn renew(
    pool: &SqlitePool,
    delivery_id: i64,
    claim_token: &str,
    extension_ms: i64,
    max_lease_ms: i64,
) -> Result<i64, StoreError> {
    let now = now_ms();
    let result = sqlx::query(
        "UPDATE deliveries SET lease_expires_at = MIN(lease_expires_at + ?, ?), \
         last_transition_at = ? \
         WHERE id = ? AND status = 'leased' AND claim_token = ? AND lease_expires_at > ?",
    )
    .bind(extension_ms)
    .bind(now + max_lease_ms)
    .bind(now)
    .bind(delivery_id)
    .bind(claim_token)
    .bind(now)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::conflict("lease expired or token mismatch"));
    }

    let expiry: i64 = sqlx::query_scalar("SELECT lease_expires_at FROM deliveries WHERE id = ?")
        .bind(delivery_id)
        .fetch_one(pool)
        .await?;
    Ok(expiry)
}

/// Mark a pending delivery as delivered (stream observation without a claim)
pub async fn mark_delivered(pool: &SqlitePool, delivery_id: i64) -> Result<bool, StoreError> {
    let result = sqlx::query(
        "UPDATE deliveries SET status = 'delivered', last_transition_at = ? \
         WHERE id = ? AND status = 'pending'",
    )
    .bind(now_ms())
    .bind(delivery_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Bulk ack
// =============================================================================

/// Ack the recipient's non-terminal rows by explicit id list
pub async fn bulk_ack_ids(
    pool: &SqlitePool,
    recipient: &str,
    ids: &[i64],
) -> Result<u64, StoreError> {
    if ids.is_empty() {
        return Ok(0);
    }
    let mut qb = QueryBuilder::new(
        "UPDATE deliveries SET status = 'acked', claim_token = NULL, lease_expires_at = NULL, \
         last_transition_at = ",
    );
    qb.push_bind(now_ms());
    qb.push(" WHERE recipient_agent_id = ").push_bind(recipient);
    qb.push(" AND status IN ('pending', 'leased', 'delivered') AND id IN (");
    let mut sep = qb.separated(", ");
    for id in ids {
        sep.push_bind(*id);
    }
    qb.push(")");

    let result = qb.build().execute(pool).await?;
    Ok(result.rows_affected())
}

/// Ack all of the recipient's non-terminal rows up to and including a cursor
pub async fn bulk_ack_up_to(
    pool: &SqlitePool,
    recipient: &str,
    up_to: Cursor,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "UPDATE deliveries SET status = 'acked', claim_token = NULL, lease_expires_at = NULL, \
         last_transition_at = ? \
         WHERE recipient_agent_id = ? AND id <= ? \
           AND status IN ('pending', 'leased', 'delivered')",
    )
    .bind(now_ms())
    .bind(recipient)
    .bind(up_to)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

// =============================================================================
// Sweeping
// =============================================================================

/// Expire leases: re-arm rows with attempts remaining, dead-letter the rest
///
/// Returns (redelivered, dead). Dead-lettering runs first so the re-arm
/// UPDATE only sees rows that still have attempts left. Pending rows whose
/// attempts were exhausted through nacks are dead-lettered here too; claims
/// refuse them, so the sweeper is their only way out.
pub async fn sweep_leases(
    pool: &SqlitePool,
    now: i64,
    max_attempts: u32,
) -> Result<(u64, u64), StoreError> {
    let dead = sqlx::query(
        "UPDATE deliveries SET status = 'dead', claim_token = NULL, lease_expires_at = NULL, \
         dead_reason = 'max delivery attempts exceeded', last_transition_at = ? \
         WHERE attempts >= ? \
           AND (status = 'pending' OR (status = 'leased' AND lease_expires_at <= ?))",
    )
    .bind(now)
    .bind(max_attempts as i64)
    .bind(now)
    .execute(pool)
    .await?
    .rows_affected();

    let redelivered = sqlx::query(
        "UPDATE deliveries SET status = 'pending', claim_token = NULL, lease_expires_at = NULL, \
         recipient_agent_id = CASE WHEN group_id IS NOT NULL THEN NULL ELSE recipient_agent_id END, \
         last_transition_at = ? \
         WHERE status = 'leased' AND lease_expires_at <= ?",
    )
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?
    .rows_affected();

    Ok((redelivered, dead))
}

/// Delete messages past their TTL; deliveries cascade
pub async fn purge_expired(pool: &SqlitePool, now: i64) -> Result<u64, StoreError> {
    let result = sqlx::query("DELETE FROM messages WHERE expires_at IS NOT NULL AND expires_at <= ?")
        .bind(now)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Delivery counts by status, for operator statistics
pub async fn status_counts(pool: &SqlitePool) -> Result<Vec<(String, i64)>, StoreError> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM deliveries GROUP BY status ORDER BY status")
            .fetch_all(pool)
            .await?;
    Ok(rows)
}
