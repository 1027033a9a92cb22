//! Topic and subscription repository

use sqlx::SqlitePool;

use super::now_ms;
use crate::core::constants::BROADCAST_TOPIC_NAME;
use crate::data::error::{StoreError, map_insert_err};
use crate::data::types::{Cursor, SubscriptionRow, TopicRow, TopicVisibility, topic_from_row};

pub async fn create_topic(
    pool: &SqlitePool,
    name: &str,
    visibility: TopicVisibility,
    created_by: Option<&str>,
) -> Result<TopicRow, StoreError> {
    let id = cuid2::create_id();
    let now = now_ms();

    sqlx::query(
        "INSERT INTO topics (id, name, visibility, created_by, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(name)
    .bind(visibility.as_str())
    .bind(created_by)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|e| map_insert_err(e, "topic name"))?;

    Ok(TopicRow {
        id,
        name: name.to_string(),
        visibility,
        created_by: created_by.map(String::from),
        created_at: now,
    })
}

pub async fn get_topic(pool: &SqlitePool, id: &str) -> Result<Option<TopicRow>, StoreError> {
    let row = sqlx::query("SELECT * FROM topics WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.map(|r| topic_from_row(&r)).transpose().map_err(Into::into)
}

pub async fn get_by_name(pool: &SqlitePool, name: &str) -> Result<Option<TopicRow>, StoreError> {
    let row = sqlx::query("SELECT * FROM topics WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    row.map(|r| topic_from_row(&r)).transpose().map_err(Into::into)
}

pub async fn list_topics(pool: &SqlitePool) -> Result<Vec<TopicRow>, StoreError> {
    let rows = sqlx::query("SELECT * FROM topics ORDER BY created_at, id")
        .fetch_all(pool)
        .await?;
    rows.iter()
        .map(|r| topic_from_row(r).map_err(Into::into))
        .collect()
}

/// Update name and/or visibility; returns the updated row
pub async fn update_topic(
    pool: &SqlitePool,
    id: &str,
    name: Option<&str>,
    visibility: Option<TopicVisibility>,
) -> Result<Option<TopicRow>, StoreError> {
    let result = sqlx::query(
        "UPDATE topics SET name = COALESCE(?, name), visibility = COALESCE(?, visibility) WHERE id = ?",
    )
    .bind(name)
    .bind(visibility.map(|v| v.as_str()))
    .bind(id)
    .execute(pool)
    .await
    .map_err(|e| map_insert_err(e, "topic name"))?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }
    get_topic(pool, id).await
}

pub async fn delete_topic(pool: &SqlitePool, id: &str) -> Result<bool, StoreError> {
    let result = sqlx::query("DELETE FROM topics WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Subscribe an agent to a topic; idempotent
pub async fn subscribe(
    pool: &SqlitePool,
    agent_id: &str,
    topic_id: &str,
    since_cursor: Cursor,
) -> Result<SubscriptionRow, StoreError> {
    let now = now_ms();
    sqlx::query(
        "INSERT INTO topic_subscriptions (agent_id, topic_id, since_cursor, created_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT (agent_id, topic_id) DO UPDATE SET since_cursor = excluded.since_cursor",
    )
    .bind(agent_id)
    .bind(topic_id)
    .bind(since_cursor)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(SubscriptionRow {
        agent_id: agent_id.to_string(),
        topic_id: topic_id.to_string(),
        since_cursor,
        created_at: now,
    })
}

pub async fn unsubscribe(
    pool: &SqlitePool,
    agent_id: &str,
    topic_id: &str,
) -> Result<bool, StoreError> {
    let result = sqlx::query("DELETE FROM topic_subscriptions WHERE agent_id = ? AND topic_id = ?")
        .bind(agent_id)
        .bind(topic_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn is_subscribed(
    pool: &SqlitePool,
    agent_id: &str,
    topic_id: &str,
) -> Result<bool, StoreError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM topic_subscriptions WHERE agent_id = ? AND topic_id = ?",
    )
    .bind(agent_id)
    .bind(topic_id)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// Ids of active agents subscribed to a topic (publish-time snapshot)
pub async fn subscriber_ids(pool: &SqlitePool, topic_id: &str) -> Result<Vec<String>, StoreError> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT s.agent_id FROM topic_subscriptions s
         JOIN agents a ON a.id = s.agent_id
         WHERE s.topic_id = ? AND a.status = 'active'
         ORDER BY s.agent_id",
    )
    .bind(topic_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Topic ids an agent is subscribed to
pub async fn subscribed_topic_ids(
    pool: &SqlitePool,
    agent_id: &str,
) -> Result<Vec<String>, StoreError> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT topic_id FROM topic_subscriptions WHERE agent_id = ?")
            .bind(agent_id)
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Fetch the reserved broadcast topic, creating it on first use
pub async fn ensure_broadcast_topic(pool: &SqlitePool) -> Result<TopicRow, StoreError> {
    if let Some(topic) = get_by_name(pool, BROADCAST_TOPIC_NAME).await? {
        return Ok(topic);
    }
    match create_topic(pool, BROADCAST_TOPIC_NAME, TopicVisibility::Public, None).await {
        Ok(topic) => Ok(topic),
        // Lost a creation race; the row exists now
        Err(StoreError::Conflict(_)) => get_by_name(pool, BROADCAST_TOPIC_NAME)
            .await?
            .ok_or_else(|| StoreError::conflict("broadcast topic vanished")),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::repositories::agents;
    use crate::data::repositories::testing::test_pool;
    use crate::data::types::AgentKind;

    async fn seed_agent(pool: &SqlitePool, name: &str) -> String {
        agents::create_agent(pool, name, AgentKind::Ai, &[], &format!("h-{name}"), None)
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_create_get_update_delete() {
        let pool = test_pool().await;
        let creator = seed_agent(&pool, "alice").await;

        let topic = create_topic(&pool, "updates", TopicVisibility::Public, Some(&creator))
            .await
            .unwrap();
        assert_eq!(
            get_topic(&pool, &topic.id).await.unwrap().unwrap().name,
            "updates"
        );

        let updated = update_topic(&pool, &topic.id, None, Some(TopicVisibility::Private))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.visibility, TopicVisibility::Private);
        assert_eq!(updated.name, "updates");

        assert!(delete_topic(&pool, &topic.id).await.unwrap());
        assert!(get_topic(&pool, &topic.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_topic_name_is_conflict() {
        let pool = test_pool().await;
        create_topic(&pool, "updates", TopicVisibility::Public, None)
            .await
            .unwrap();
        let err = create_topic(&pool, "updates", TopicVisibility::Private, None)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_subscribe_unsubscribe() {
        let pool = test_pool().await;
        let agent = seed_agent(&pool, "alice").await;
        let topic = create_topic(&pool, "updates", TopicVisibility::Public, None)
            .await
            .unwrap();

        subscribe(&pool, &agent, &topic.id, 0).await.unwrap();
        assert!(is_subscribed(&pool, &agent, &topic.id).await.unwrap());
        assert_eq!(subscriber_ids(&pool, &topic.id).await.unwrap(), vec![agent.clone()]);

        // idempotent re-subscribe updates the cursor
        subscribe(&pool, &agent, &topic.id, 42).await.unwrap();
        assert_eq!(subscriber_ids(&pool, &topic.id).await.unwrap().len(), 1);

        assert!(unsubscribe(&pool, &agent, &topic.id).await.unwrap());
        assert!(!is_subscribed(&pool, &agent, &topic.id).await.unwrap());
        assert!(!unsubscribe(&pool, &agent, &topic.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_subscriber_ids_excludes_inactive() {
        let pool = test_pool().await;
        let agent = seed_agent(&pool, "alice").await;
        let topic = create_topic(&pool, "updates", TopicVisibility::Public, None)
            .await
            .unwrap();
        subscribe(&pool, &agent, &topic.id, 0).await.unwrap();

        sqlx::query("UPDATE agents SET status = 'inactive' WHERE id = ?")
            .bind(&agent)
            .execute(&pool)
            .await
            .unwrap();

        assert!(subscriber_ids(&pool, &topic.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_broadcast_topic_is_idempotent() {
        let pool = test_pool().await;
        let first = ensure_broadcast_topic(&pool).await.unwrap();
        let second = ensure_broadcast_topic(&pool).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.name, BROADCAST_TOPIC_NAME);
    }
}
