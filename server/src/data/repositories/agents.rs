//! Agent repository

use sqlx::SqlitePool;

use super::now_ms;
use crate::data::error::{StoreError, map_insert_err};
use crate::data::types::{AgentKind, AgentRow, AgentStatus, agent_from_row};

/// Create a new agent with a generated CUID2 id
///
/// `credential_hash` is the sha256 of the freshly issued token; the token
/// itself never reaches the store.
pub async fn create_agent(
    pool: &SqlitePool,
    name: &str,
    kind: AgentKind,
    roles: &[String],
    credential_hash: &str,
    fingerprint: Option<&str>,
) -> Result<AgentRow, StoreError> {
    let id = cuid2::create_id();
    let now = now_ms();
    let roles_json = serde_json::to_string(roles).unwrap_or_else(|_| "[]".to_string());

    sqlx::query(
        "INSERT INTO agents (id, name, kind, status, roles, credential_hash, fingerprint, created_at)
         VALUES (?, ?, ?, 'active', ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(name)
    .bind(kind.as_str())
    .bind(&roles_json)
    .bind(credential_hash)
    .bind(fingerprint)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|e| map_insert_err(e, "agent name"))?;

    Ok(AgentRow {
        id,
        name: name.to_string(),
        kind,
        status: AgentStatus::Active,
        roles: roles.to_vec(),
        credential_hash: credential_hash.to_string(),
        fingerprint: fingerprint.map(String::from),
        created_at: now,
        last_seen_at: None,
    })
}

pub async fn get_agent(pool: &SqlitePool, id: &str) -> Result<Option<AgentRow>, StoreError> {
    let row = sqlx::query("SELECT * FROM agents WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.map(|r| agent_from_row(&r)).transpose().map_err(Into::into)
}

pub async fn get_by_name(pool: &SqlitePool, name: &str) -> Result<Option<AgentRow>, StoreError> {
    let row = sqlx::query("SELECT * FROM agents WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    row.map(|r| agent_from_row(&r)).transpose().map_err(Into::into)
}

pub async fn get_by_fingerprint(
    pool: &SqlitePool,
    fingerprint: &str,
) -> Result<Option<AgentRow>, StoreError> {
    let row = sqlx::query("SELECT * FROM agents WHERE fingerprint = ?")
        .bind(fingerprint)
        .fetch_optional(pool)
        .await?;
    row.map(|r| agent_from_row(&r)).transpose().map_err(Into::into)
}

pub async fn get_by_credential_hash(
    pool: &SqlitePool,
    credential_hash: &str,
) -> Result<Option<AgentRow>, StoreError> {
    let row = sqlx::query("SELECT * FROM agents WHERE credential_hash = ?")
        .bind(credential_hash)
        .fetch_optional(pool)
        .await?;
    row.map(|r| agent_from_row(&r)).transpose().map_err(Into::into)
}

pub async fn list_agents(pool: &SqlitePool) -> Result<Vec<AgentRow>, StoreError> {
    let rows = sqlx::query("SELECT * FROM agents ORDER BY created_at, id")
        .fetch_all(pool)
        .await?;
    rows.iter()
        .map(|r| agent_from_row(r).map_err(Into::into))
        .collect()
}

/// Atomically replace the agent's credential
///
/// A single UPDATE: at no instant does the agent have zero or two valid
/// credentials.
pub async fn rotate_credential(
    pool: &SqlitePool,
    id: &str,
    new_credential_hash: &str,
) -> Result<bool, StoreError> {
    let result = sqlx::query("UPDATE agents SET credential_hash = ? WHERE id = ?")
        .bind(new_credential_hash)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn touch_last_seen(pool: &SqlitePool, id: &str) -> Result<(), StoreError> {
    sqlx::query("UPDATE agents SET last_seen_at = ? WHERE id = ?")
        .bind(now_ms())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
