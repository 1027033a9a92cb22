//! Group and membership repository

use sqlx::SqlitePool;

use super::now_ms;
use crate::data::error::{StoreError, map_insert_err};
use crate::data::types::{GroupMode, GroupRow, group_from_row};

pub async fn create_group(
    pool: &SqlitePool,
    name: &str,
    mode: GroupMode,
    created_by: Option<&str>,
) -> Result<GroupRow, StoreError> {
    let id = cuid2::create_id();
    let now = now_ms();

    sqlx::query("INSERT INTO groups (id, name, mode, created_by, created_at) VALUES (?, ?, ?, ?, ?)")
        .bind(&id)
        .bind(name)
        .bind(mode.as_str())
        .bind(created_by)
        .bind(now)
        .execute(pool)
        .await
        .map_err(|e| map_insert_err(e, "group name"))?;

    Ok(GroupRow {
        id,
        name: name.to_string(),
        mode,
        created_by: created_by.map(String::from),
        created_at: now,
    })
}

pub async fn get_group(pool: &SqlitePool, id: &str) -> Result<Option<GroupRow>, StoreError> {
    let row = sqlx::query("SELECT * FROM groups WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.map(|r| group_from_row(&r)).transpose().map_err(Into::into)
}

pub async fn get_by_name(pool: &SqlitePool, name: &str) -> Result<Option<GroupRow>, StoreError> {
    let row = sqlx::query("SELECT * FROM groups WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    row.map(|r| group_from_row(&r)).transpose().map_err(Into::into)
}

pub async fn list_groups(pool: &SqlitePool) -> Result<Vec<GroupRow>, StoreError> {
    let rows = sqlx::query("SELECT * FROM groups ORDER BY created_at, id")
        .fetch_all(pool)
        .await?;
    rows.iter()
        .map(|r| group_from_row(r).map_err(Into::into))
        .collect()
}

pub async fn delete_group(pool: &SqlitePool, id: &str) -> Result<bool, StoreError> {
    let result = sqlx::query("DELETE FROM groups WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Add a member; idempotent
pub async fn add_member(
    pool: &SqlitePool,
    group_id: &str,
    agent_id: &str,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO group_members (group_id, agent_id, created_at) VALUES (?, ?, ?)
         ON CONFLICT (group_id, agent_id) DO NOTHING",
    )
    .bind(group_id)
    .bind(agent_id)
    .bind(now_ms())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn remove_member(
    pool: &SqlitePool,
    group_id: &str,
    agent_id: &str,
) -> Result<bool, StoreError> {
    let result = sqlx::query("DELETE FROM group_members WHERE group_id = ? AND agent_id = ?")
        .bind(group_id)
        .bind(agent_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Ids of active members of a group
pub async fn member_ids(pool: &SqlitePool, group_id: &str) -> Result<Vec<String>, StoreError> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT m.agent_id FROM group_members m
         JOIN agents a ON a.id = m.agent_id
         WHERE m.group_id = ? AND a.status = 'active'
         ORDER BY m.agent_id",
    )
    .bind(group_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub async fn is_member(
    pool: &SqlitePool,
    group_id: &str,
    agent_id: &str,
) -> Result<bool, StoreError> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM group_members WHERE group_id = ? AND agent_id = ?")
            .bind(group_id)
            .bind(agent_id)
            .fetch_one(pool)
            .await?;
    Ok(count > 0)
}

/// Queue-mode group ids the agent belongs to (claim pool eligibility)
pub async fn queue_group_ids_for_member(
    pool: &SqlitePool,
    agent_id: &str,
) -> Result<Vec<String>, StoreError> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT g.id FROM groups g
         JOIN group_members m ON m.group_id = g.id
         WHERE m.agent_id = ? AND g.mode = 'queue'",
    )
    .bind(agent_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
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
    async fn test_create_and_membership() {
        let pool = test_pool().await;
        let a = seed_agent(&pool, "a").await;
        let b = seed_agent(&pool, "b").await;

        let group = create_group(&pool, "workers", GroupMode::Queue, None)
            .await
            .unwrap();
        add_member(&pool, &group.id, &a).await.unwrap();
        add_member(&pool, &group.id, &b).await.unwrap();
        // idempotent
        add_member(&pool, &group.id, &a).await.unwrap();

        let members = member_ids(&pool, &group.id).await.unwrap();
        assert_eq!(members.len(), 2);
        assert!(is_member(&pool, &group.id, &a).await.unwrap());

        assert!(remove_member(&pool, &group.id, &a).await.unwrap());
        assert!(!is_member(&pool, &group.id, &a).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_group_name_is_conflict() {
        let pool = test_pool().await;
        create_group(&pool, "workers", GroupMode::Fanout, None)
            .await
            .unwrap();
        let err = create_group(&pool, "workers", GroupMode::Queue, None)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_queue_group_ids_for_member() {
        let pool = test_pool().await;
        let a = seed_agent(&pool, "a").await;

        let queue = create_group(&pool, "q", GroupMode::Queue, None).await.unwrap();
        let fanout = create_group(&pool, "f", GroupMode::Fanout, None)
            .await
            .unwrap();
        add_member(&pool, &queue.id, &a).await.unwrap();
        add_member(&pool, &fanout.id, &a).await.unwrap();

        let ids = queue_group_ids_for_member(&pool, &a).await.unwrap();
        assert_eq!(ids, vec![queue.id]);
    }

    #[tokio::test]
    async fn test_delete_group_cascades_members() {
        let pool = test_pool().await;
        let a = seed_agent(&pool, "a").await;
        let group = create_group(&pool, "workers", GroupMode::Fanout, None)
            .await
            .unwrap();
        add_member(&pool, &group.id, &a).await.unwrap();

        assert!(delete_group(&pool, &group.id).await.unwrap());
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM group_members")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
