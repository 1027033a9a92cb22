//! Message API endpoints
//!
//! Publish, inbox reads (with long-poll), claims, acks, and the legacy
//! read-with-lease path. Claim tokens travel only in these responses and
//! the matching ack/nack/renew requests.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use validator::Validate;

use crate::api::auth::{Action, Identity, Resource};
use crate::api::types::{
    ApiError, Envelope, Pagination, default_claim_limit, default_inbox_limit, ok, ok_paged,
    parse_cursor,
};
use crate::broker::{BrokerService, PublishSpec};
use crate::core::constants::{MAX_BULK_ACK_IDS, MAX_CLAIM_LIMIT, MAX_INBOX_LIMIT};
use crate::data::repositories::deliveries::InboxFilter;
use crate::data::repositories::{agents, topics};
use crate::data::types::{InboxEntry, MessageRow, Priority};

/// Shared state for message endpoints
#[derive(Clone)]
pub struct MessagesApiState {
    pub broker: Arc<BrokerService>,
    /// Process-wide cancellation; long-polls end promptly on shutdown
    pub cancel: CancellationToken,
}

pub fn routes(broker: Arc<BrokerService>, cancel: CancellationToken) -> Router<()> {
    let state = MessagesApiState { broker, cancel };
    Router::new()
        .route("/messages", post(publish).get(inbox))
        .route("/messages/inbox", get(inbox))
        .route("/messages/broadcast", post(broadcast))
        .route("/messages/claim", post(claim))
        .route("/messages/ack", post(bulk_ack))
        .route("/messages/{id}", get(get_message))
        .route("/messages/{id}/ack", post(ack))
        .route("/messages/{id}/nack", post(nack))
        .route("/messages/{id}/renew", post(renew))
        .with_state(state)
}

fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse::<i64>()
        .map_err(|_| ApiError::validation(format!("invalid id: {}", raw)))
}

fn parse_priority(raw: &Option<String>) -> Result<Option<Priority>, ApiError> {
    match raw {
        None => Ok(None),
        Some(s) => Priority::parse(s)
            .map(Some)
            .ok_or_else(|| ApiError::validation(format!("invalid priority: {}", s))),
    }
}

/// Resolve optional agent / topic filter values (id or name) to ids
async fn resolve_filter(
    state: &MessagesApiState,
    priority: &Option<String>,
    from: &Option<String>,
    topic: &Option<String>,
    dead: bool,
    all: bool,
) -> Result<InboxFilter, ApiError> {
    let pool = state.broker.store().pool();

    let from_agent_id = match from {
        None => None,
        Some(raw) => {
            let agent = match agents::get_agent(pool, raw).await? {
                Some(agent) => Some(agent),
                None => agents::get_by_name(pool, raw).await?,
            };
            Some(
                agent
                    .ok_or_else(|| ApiError::not_found(format!("agent '{}' not found", raw)))?
                    .id,
            )
        }
    };

    let topic_id = match topic {
        None => None,
        Some(raw) => {
            let row = match topics::get_topic(pool, raw).await? {
                Some(row) => Some(row),
                None => topics::get_by_name(pool, raw).await?,
            };
            Some(
                row.ok_or_else(|| ApiError::not_found(format!("topic '{}' not found", raw)))?
                    .id,
            )
        }
    };

    Ok(InboxFilter {
        priority: parse_priority(priority)?,
        from_agent_id,
        topic_id,
        dead_only: dead,
        include_all: all,
    })
}

// =============================================================================
// Publish
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct PublishRequest {
    pub to_agent: Option<String>,
    pub topic: Option<String>,
    pub to_group: Option<String>,
    #[validate(length(min = 1))]
    pub content: String,
    pub content_type: Option<String>,
    pub priority: Option<Priority>,
    pub reply_to_id: Option<i64>,
    pub metadata: Option<serde_json::Value>,
    pub tags: Option<Vec<String>>,
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub message: MessageRow,
    pub deliveries: usize,
}

impl PublishRequest {
    pub(crate) fn into_spec(self, broadcast: bool) -> PublishSpec {
        PublishSpec {
            to_agent: self.to_agent,
            topic: self.topic,
            to_group: self.to_group,
            broadcast,
            content_type: self.content_type,
            content: self.content,
            priority: self.priority.unwrap_or_default(),
            reply_to_id: self.reply_to_id,
            metadata: self.metadata.unwrap_or_else(|| serde_json::json!({})),
            tags: self.tags.unwrap_or_default(),
            ttl_secs: self.ttl_secs,
        }
    }
}

pub async fn publish(
    State(state): State<MessagesApiState>,
    identity: Identity,
    Json(body): Json<PublishRequest>,
) -> Result<Json<Envelope<PublishResponse>>, ApiError> {
    identity.authorize(Resource::Messages, Action::Write)?;
    body.validate()
        .map_err(|e| ApiError::validation(e.to_string()))?;

    let spec = body.into_spec(false);
    let (message, deliveries) = state.broker.publish(&identity.agent_id, &spec).await?;
    Ok(ok(PublishResponse {
        message,
        deliveries,
    }))
}

pub async fn broadcast(
    State(state): State<MessagesApiState>,
    identity: Identity,
    Json(body): Json<PublishRequest>,
) -> Result<Json<Envelope<PublishResponse>>, ApiError> {
    identity.authorize(Resource::Messages, Action::Write)?;
    body.validate()
        .map_err(|e| ApiError::validation(e.to_string()))?;
    if body.to_agent.is_some() || body.topic.is_some() || body.to_group.is_some() {
        return Err(ApiError::validation(
            "broadcast takes no other routing target",
        ));
    }

    let spec = body.into_spec(true);
    let (message, deliveries) = state.broker.publish(&identity.agent_id, &spec).await?;
    Ok(ok(PublishResponse {
        message,
        deliveries,
    }))
}

// =============================================================================
// Inbox
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct InboxQuery {
    pub limit: Option<u32>,
    pub cursor: Option<String>,
    /// Long-poll window in seconds; clamped server-side
    pub wait: Option<u64>,
    pub priority: Option<String>,
    pub from: Option<String>,
    pub topic: Option<String>,
    #[serde(default)]
    pub dead: bool,
    #[serde(default)]
    pub all: bool,
    /// Legacy read-with-lease: when present the read claims instead
    pub lease_seconds: Option<u64>,
}

pub async fn inbox(
    State(state): State<MessagesApiState>,
    identity: Identity,
    Query(query): Query<InboxQuery>,
) -> Result<Json<Envelope<Vec<InboxEntry>>>, ApiError> {
    identity.authorize(Resource::Messages, Action::Read)?;

    let limit = query
        .limit
        .unwrap_or(default_inbox_limit())
        .clamp(1, MAX_INBOX_LIMIT);
    let cursor = parse_cursor(&query.cursor)?;
    let filter = resolve_filter(
        &state,
        &query.priority,
        &query.from,
        &query.topic,
        query.dead,
        query.all,
    )
    .await?;

    // Legacy path: a read carrying lease_seconds claims the rows it returns
    if let Some(lease) = query.lease_seconds {
        // claiming mutates delivery state, so the read capability is not enough
        identity.authorize(Resource::Messages, Action::Write)?;
        let claimed = state
            .broker
            .claim(&identity.agent_id, &filter, limit, Some(lease))
            .await?;
        let next_cursor = claimed.last().map(|e| e.delivery.id);
        let pagination = Pagination::new(cursor, next_cursor, false);
        return Ok(ok_paged(claimed, pagination));
    }

    let wait = std::time::Duration::from_secs(query.wait.unwrap_or(0));
    let page = state
        .broker
        .read_inbox_wait(&identity.agent_id, &filter, cursor, limit, wait, &state.cancel)
        .await?;

    let pagination = Pagination::new(cursor, page.next_cursor, page.has_more);
    Ok(ok_paged(page.entries, pagination))
}

pub async fn get_message(
    State(state): State<MessagesApiState>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<Envelope<MessageRow>>, ApiError> {
    identity.authorize(Resource::Messages, Action::Read)?;
    let id = parse_id(&id)?;
    let message = state
        .broker
        .get_message_for(id, &identity.agent_id, identity.is_admin())
        .await?;
    Ok(ok(message))
}

// =============================================================================
// Claims and leases
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub limit: Option<u32>,
    pub lease_seconds: Option<u64>,
    pub priority: Option<String>,
    pub from: Option<String>,
    pub topic: Option<String>,
}

pub async fn claim(
    State(state): State<MessagesApiState>,
    identity: Identity,
    Json(body): Json<ClaimRequest>,
) -> Result<Json<Envelope<Vec<InboxEntry>>>, ApiError> {
    identity.authorize(Resource::Messages, Action::Write)?;

    let limit = body
        .limit
        .unwrap_or(default_claim_limit())
        .clamp(1, MAX_CLAIM_LIMIT);
    let filter = resolve_filter(&state, &body.priority, &body.from, &body.topic, false, false)
        .await?;

    let claimed = state
        .broker
        .claim(&identity.agent_id, &filter, limit, body.lease_seconds)
        .await?;
    Ok(ok(claimed))
}

#[derive(Debug, Deserialize)]
pub struct AckRequest {
    pub claim_token: String,
}

#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub acked: u64,
}

/// Ack one delivery with its claim token
///
/// The path id is the delivery id handed out by claim; an expired or
/// superseded token is a Conflict, the user-visible signal that the lease
/// is no longer held.
pub async fn ack(
    State(state): State<MessagesApiState>,
    identity: Identity,
    Path(id): Path<String>,
    Json(body): Json<AckRequest>,
) -> Result<Json<Envelope<AckResponse>>, ApiError> {
    identity.authorize(Resource::Messages, Action::Write)?;
    let id = parse_id(&id)?;
    state.broker.ack(id, &body.claim_token).await?;
    Ok(ok(AckResponse { acked: 1 }))
}

#[derive(Debug, Deserialize)]
pub struct NackRequest {
    pub claim_token: String,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NackResponse {
    pub nacked: bool,
}

pub async fn nack(
    State(state): State<MessagesApiState>,
    identity: Identity,
    Path(id): Path<String>,
    Json(body): Json<NackRequest>,
) -> Result<Json<Envelope<NackResponse>>, ApiError> {
    identity.authorize(Resource::Messages, Action::Write)?;
    let id = parse_id(&id)?;
    state
        .broker
        .nack(id, &body.claim_token, body.reason.as_deref())
        .await?;
    Ok(ok(NackResponse { nacked: true }))
}

#[derive(Debug, Deserialize)]
pub struct RenewRequest {
    pub claim_token: String,
    pub extension_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct RenewResponse {
    /// New lease expiry, epoch milliseconds
    pub lease_expires_at: i64,
}

pub async fn renew(
    State(state): State<MessagesApiState>,
    identity: Identity,
    Path(id): Path<String>,
    Json(body): Json<RenewRequest>,
) -> Result<Json<Envelope<RenewResponse>>, ApiError> {
    identity.authorize(Resource::Messages, Action::Write)?;
    let id = parse_id(&id)?;
    let lease_expires_at = state
        .broker
        .renew(id, &body.claim_token, body.extension_seconds)
        .await?;
    Ok(ok(RenewResponse { lease_expires_at }))
}

#[derive(Debug, Deserialize)]
pub struct BulkAckRequest {
    pub ids: Option<Vec<String>>,
    pub up_to: Option<String>,
}

pub async fn bulk_ack(
    State(state): State<MessagesApiState>,
    identity: Identity,
    Json(body): Json<BulkAckRequest>,
) -> Result<Json<Envelope<AckResponse>>, ApiError> {
    identity.authorize(Resource::Messages, Action::Write)?;

    match (body.ids, body.up_to) {
        (Some(ids), None) => {
            if ids.is_empty() || ids.len() > MAX_BULK_ACK_IDS {
                return Err(ApiError::validation(format!(
                    "ids must contain between 1 and {} entries",
                    MAX_BULK_ACK_IDS
                )));
            }
            let parsed: Vec<i64> = ids
                .iter()
                .map(|raw| parse_id(raw))
                .collect::<Result<_, _>>()?;
            let acked = state
                .broker
                .bulk_ack_ids(&identity.agent_id, &parsed)
                .await?;
            Ok(ok(AckResponse { acked }))
        }
        (None, Some(up_to)) => {
            let cursor = parse_cursor(&Some(up_to))?;
            let acked = state
                .broker
                .bulk_ack_up_to(&identity.agent_id, cursor)
                .await?;
            Ok(ok(AckResponse { acked }))
        }
        _ => Err(ApiError::validation(
            "exactly one of ids, up_to must be set",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("17").unwrap(), 17);
        assert!(parse_id("abc").is_err());
    }

    #[test]
    fn test_parse_priority() {
        assert_eq!(parse_priority(&None).unwrap(), None);
        assert_eq!(
            parse_priority(&Some("high".to_string())).unwrap(),
            Some(Priority::High)
        );
        assert!(parse_priority(&Some("urgent".to_string())).is_err());
    }

    #[test]
    fn test_publish_request_into_spec_defaults() {
        let request = PublishRequest {
            to_agent: Some("bob".to_string()),
            topic: None,
            to_group: None,
            content: "hi".to_string(),
            content_type: None,
            priority: None,
            reply_to_id: None,
            metadata: None,
            tags: None,
            ttl_secs: None,
        };
        let spec = request.into_spec(false);
        assert_eq!(spec.priority, Priority::Normal);
        assert!(spec.metadata.is_object());
        assert!(spec.tags.is_empty());
        assert!(!spec.broadcast);
    }
}
