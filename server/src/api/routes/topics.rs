//! Topic API endpoints

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::api::auth::{Action, Identity, Resource};
use crate::api::types::{ApiError, Envelope, ok, parse_cursor};
use crate::broker::BrokerService;
use crate::data::repositories::topics;
use crate::data::types::{TopicRow, TopicVisibility};

/// Shared state for topic endpoints
#[derive(Clone)]
pub struct TopicsApiState {
    pub broker: Arc<BrokerService>,
}

pub fn routes(broker: Arc<BrokerService>) -> Router<()> {
    let state = TopicsApiState { broker };
    Router::new()
        .route("/topics", post(create_topic).get(list_topics))
        .route(
            "/topics/{id}",
            get(get_topic).patch(update_topic).delete(delete_topic),
        )
        .route(
            "/topics/{id}/subscribe",
            post(subscribe).delete(unsubscribe),
        )
        .with_state(state)
}

async fn resolve(state: &TopicsApiState, id_or_name: &str) -> Result<TopicRow, ApiError> {
    let pool = state.broker.store().pool();
    let topic = match topics::get_topic(pool, id_or_name).await? {
        Some(topic) => Some(topic),
        None => topics::get_by_name(pool, id_or_name).await?,
    };
    topic.ok_or_else(|| ApiError::not_found("topic not found"))
}

fn can_manage(identity: &Identity, topic: &TopicRow) -> bool {
    identity.is_admin() || topic.created_by.as_deref() == Some(identity.agent_id.as_str())
}

fn is_broadcast(state: &TopicsApiState, topic: &TopicRow) -> bool {
    topic.id == state.broker.broadcast_topic_id()
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTopicRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub visibility: Option<TopicVisibility>,
}

pub async fn create_topic(
    State(state): State<TopicsApiState>,
    identity: Identity,
    Json(body): Json<CreateTopicRequest>,
) -> Result<Json<Envelope<TopicRow>>, ApiError> {
    identity.authorize(Resource::Topics, Action::Write)?;
    body.validate()
        .map_err(|e| ApiError::validation(e.to_string()))?;

    let topic = topics::create_topic(
        state.broker.store().pool(),
        &body.name,
        body.visibility.unwrap_or(TopicVisibility::Public),
        Some(&identity.agent_id),
    )
    .await?;
    Ok(ok(topic))
}

pub async fn list_topics(
    State(state): State<TopicsApiState>,
    identity: Identity,
) -> Result<Json<Envelope<Vec<TopicRow>>>, ApiError> {
    identity.authorize(Resource::Topics, Action::Read)?;
    let all = topics::list_topics(state.broker.store().pool()).await?;
    // private topics are visible to their creator and admins only
    let visible = all
        .into_iter()
        .filter(|topic| {
            topic.visibility == TopicVisibility::Public || can_manage(&identity, topic)
        })
        .collect();
    Ok(ok(visible))
}

pub async fn get_topic(
    State(state): State<TopicsApiState>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<Envelope<TopicRow>>, ApiError> {
    identity.authorize(Resource::Topics, Action::Read)?;
    let topic = resolve(&state, &id).await?;
    if topic.visibility == TopicVisibility::Private
        && !can_manage(&identity, &topic)
        && !topics::is_subscribed(state.broker.store().pool(), &identity.agent_id, &topic.id)
            .await?
    {
        // hide private topics from outsiders
        return Err(ApiError::not_found("topic not found"));
    }
    Ok(ok(topic))
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateTopicRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    pub visibility: Option<TopicVisibility>,
}

pub async fn update_topic(
    State(state): State<TopicsApiState>,
    identity: Identity,
    Path(id): Path<String>,
    Json(body): Json<UpdateTopicRequest>,
) -> Result<Json<Envelope<TopicRow>>, ApiError> {
    identity.authorize(Resource::Topics, Action::Write)?;
    body.validate()
        .map_err(|e| ApiError::validation(e.to_string()))?;

    let topic = resolve(&state, &id).await?;
    if is_broadcast(&state, &topic) {
        return Err(ApiError::forbidden("the broadcast topic is reserved"));
    }
    if !can_manage(&identity, &topic) {
        return Err(ApiError::forbidden("only the creator or an admin may update a topic"));
    }

    let updated = topics::update_topic(
        state.broker.store().pool(),
        &topic.id,
        body.name.as_deref(),
        body.visibility,
    )
    .await?
    .ok_or_else(|| ApiError::not_found("topic not found"))?;
    Ok(ok(updated))
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: bool,
}

pub async fn delete_topic(
    State(state): State<TopicsApiState>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<Envelope<DeletedResponse>>, ApiError> {
    identity.authorize(Resource::Topics, Action::Write)?;
    let topic = resolve(&state, &id).await?;
    if is_broadcast(&state, &topic) {
        return Err(ApiError::forbidden("the broadcast topic is reserved"));
    }
    if !can_manage(&identity, &topic) {
        return Err(ApiError::forbidden("only the creator or an admin may delete a topic"));
    }

    let deleted = topics::delete_topic(state.broker.store().pool(), &topic.id).await?;
    Ok(ok(DeletedResponse { deleted }))
}

#[derive(Debug, Deserialize, Default)]
pub struct SubscribeRequest {
    /// Resume point for cursored topic reads; defaults to "from now"
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubscribedResponse {
    pub topic_id: String,
    pub subscribed: bool,
}

pub async fn subscribe(
    State(state): State<TopicsApiState>,
    identity: Identity,
    Path(id): Path<String>,
    body: Option<Json<SubscribeRequest>>,
) -> Result<Json<Envelope<SubscribedResponse>>, ApiError> {
    identity.authorize(Resource::Topics, Action::Write)?;
    let topic = resolve(&state, &id).await?;
    if topic.visibility == TopicVisibility::Private && !can_manage(&identity, &topic) {
        return Err(ApiError::forbidden("topic is private"));
    }

    let cursor = parse_cursor(&body.and_then(|Json(b)| b.cursor))?;
    topics::subscribe(
        state.broker.store().pool(),
        &identity.agent_id,
        &topic.id,
        cursor,
    )
    .await?;
    Ok(ok(SubscribedResponse {
        topic_id: topic.id,
        subscribed: true,
    }))
}

pub async fn unsubscribe(
    State(state): State<TopicsApiState>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<Envelope<SubscribedResponse>>, ApiError> {
    identity.authorize(Resource::Topics, Action::Write)?;
    let topic = resolve(&state, &id).await?;
    if is_broadcast(&state, &topic) {
        return Err(ApiError::forbidden(
            "agents cannot leave the broadcast topic",
        ));
    }

    topics::unsubscribe(state.broker.store().pool(), &identity.agent_id, &topic.id).await?;
    Ok(ok(SubscribedResponse {
        topic_id: topic.id,
        subscribed: false,
    }))
}
