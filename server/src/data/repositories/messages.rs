//! Message repository
//!
//! A message and its delivery rows are a single atomic unit: all rows are
//! written in one transaction or none are.

use sqlx::SqlitePool;

use super::now_ms;
use crate::data::error::StoreError;
use crate::data::types::{
    DeliveryRow, DeliveryStatus, MessageRow, NewMessage, PlannedDelivery, message_from_row,
};

/// Persist a message plus its planned deliveries in one transaction
///
/// Assigns the monotonic message id and the delivery ordering keys backing
/// cursors.
pub async fn insert_message_with_deliveries(
    pool: &SqlitePool,
    msg: &NewMessage,
    planned: &[PlannedDelivery],
) -> Result<(MessageRow, Vec<DeliveryRow>), StoreError> {
    let now = now_ms();
    let metadata = serde_json::to_string(&msg.metadata).unwrap_or_else(|_| "{}".to_string());
    let tags = serde_json::to_string(&msg.tags).unwrap_or_else(|_| "[]".to_string());

    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        "INSERT INTO messages (from_agent_id, to_agent_id, topic_id, group_id, broadcast,
                               content_type, content, priority, reply_to_id, metadata, tags,
                               created_at, expires_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&msg.from_agent_id)
    .bind(&msg.to_agent_id)
    .bind(&msg.topic_id)
    .bind(&msg.group_id)
    .bind(msg.broadcast as i64)
    .bind(&msg.content_type)
    .bind(&msg.content)
    .bind(msg.priority.as_str())
    .bind(msg.reply_to_id)
    .bind(&metadata)
    .bind(&tags)
    .bind(now)
    .bind(msg.expires_at)
    .execute(&mut *tx)
    .await?;

    let message_id = result.last_insert_rowid();

    let mut deliveries = Vec::with_capacity(planned.len());
    for plan in planned {
        let result = sqlx::query(
            "INSERT INTO deliveries (message_id, recipient_agent_id, group_id, topic_id,
                                     status, attempts, last_transition_at)
             VALUES (?, ?, ?, ?, 'pending', 0, ?)",
        )
        .bind(message_id)
        .bind(&plan.recipient_agent_id)
        .bind(&plan.group_id)
        .bind(&plan.topic_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        deliveries.push(DeliveryRow {
            id: result.last_insert_rowid(),
            message_id,
            recipient_agent_id: plan.recipient_agent_id.clone(),
            group_id: plan.group_id.clone(),
            topic_id: plan.topic_id.clone(),
            status: DeliveryStatus::Pending,
            attempts: 0,
            claim_token: None,
            lease_expires_at: None,
            nack_reason: None,
            dead_reason: None,
            last_transition_at: now,
        });
    }

    tx.commit().await?;

    let message = MessageRow {
        id: message_id,
        from_agent_id: msg.from_agent_id.clone(),
        to_agent_id: msg.to_agent_id.clone(),
        topic_id: msg.topic_id.clone(),
        group_id: msg.group_id.clone(),
        broadcast: msg.broadcast,
        content_type: msg.content_type.clone(),
        content: msg.content.clone(),
        priority: msg.priority,
        reply_to_id: msg.reply_to_id,
        metadata: msg.metadata.clone(),
        tags: msg.tags.clone(),
        created_at: now,
        expires_at: msg.expires_at,
    };

    Ok((message, deliveries))
}

pub async fn get_message(pool: &SqlitePool, id: i64) -> Result<Option<MessageRow>, StoreError> {
    let row = sqlx::query("SELECT * FROM messages WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.map(|r| message_from_row(&r)).transpose().map_err(Into::into)
}

/// True when the agent sent the message or holds one of its deliveries
pub async fn agent_can_see(
    pool: &SqlitePool,
    message_id: i64,
    agent_id: &str,
) -> Result<bool, StoreError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM messages m
         WHERE m.id = ?1
           AND (m.from_agent_id = ?2
                OR EXISTS (SELECT 1 FROM deliveries d
                           WHERE d.message_id = m.id AND d.recipient_agent_id = ?2))",
    )
    .bind(message_id)
    .bind(agent_id)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}
