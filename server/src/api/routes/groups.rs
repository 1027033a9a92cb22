//! Group API endpoints

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::api::auth::{Action, Identity, Resource};
use crate::api::types::{ApiError, Envelope, ok};
use crate::broker::BrokerService;
use crate::data::repositories::{agents, groups};
use crate::data::types::{AgentStatus, GroupMode, GroupRow};

/// Shared state for group endpoints
#[derive(Clone)]
pub struct GroupsApiState {
    pub broker: Arc<BrokerService>,
}

pub fn routes(broker: Arc<BrokerService>) -> Router<()> {
    let state = GroupsApiState { broker };
    Router::new()
        .route("/groups", post(create_group).get(list_groups))
        .route("/groups/{id}", get(get_group).delete(delete_group))
        .route(
            "/groups/{id}/members",
            post(add_member).get(list_members),
        )
        .route("/groups/{id}/members/{agent_id}", delete(remove_member))
        .with_state(state)
}

async fn resolve(state: &GroupsApiState, id_or_name: &str) -> Result<GroupRow, ApiError> {
    let pool = state.broker.store().pool();
    let group = match groups::get_group(pool, id_or_name).await? {
        Some(group) => Some(group),
        None => groups::get_by_name(pool, id_or_name).await?,
    };
    group.ok_or_else(|| ApiError::not_found("group not found"))
}

fn can_manage(identity: &Identity, group: &GroupRow) -> bool {
    identity.is_admin() || group.created_by.as_deref() == Some(identity.agent_id.as_str())
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateGroupRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub mode: Option<GroupMode>,
}

pub async fn create_group(
    State(state): State<GroupsApiState>,
    identity: Identity,
    Json(body): Json<CreateGroupRequest>,
) -> Result<Json<Envelope<GroupRow>>, ApiError> {
    identity.authorize(Resource::Groups, Action::Write)?;
    body.validate()
        .map_err(|e| ApiError::validation(e.to_string()))?;

    let group = groups::create_group(
        state.broker.store().pool(),
        &body.name,
        body.mode.unwrap_or(GroupMode::Fanout),
        Some(&identity.agent_id),
    )
    .await?;
    Ok(ok(group))
}

pub async fn list_groups(
    State(state): State<GroupsApiState>,
    identity: Identity,
) -> Result<Json<Envelope<Vec<GroupRow>>>, ApiError> {
    identity.authorize(Resource::Groups, Action::Read)?;
    let all = groups::list_groups(state.broker.store().pool()).await?;
    Ok(ok(all))
}

#[derive(Debug, Serialize)]
pub struct GroupDetail {
    #[serde(flatten)]
    pub group: GroupRow,
    pub members: Vec<String>,
}

pub async fn get_group(
    State(state): State<GroupsApiState>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<Envelope<GroupDetail>>, ApiError> {
    identity.authorize(Resource::Groups, Action::Read)?;
    let group = resolve(&state, &id).await?;
    let members = groups::member_ids(state.broker.store().pool(), &group.id).await?;
    Ok(ok(GroupDetail { group, members }))
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: bool,
}

pub async fn delete_group(
    State(state): State<GroupsApiState>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<Envelope<DeletedResponse>>, ApiError> {
    identity.authorize(Resource::Groups, Action::Write)?;
    let group = resolve(&state, &id).await?;
    if !can_manage(&identity, &group) {
        return Err(ApiError::forbidden("only the creator or an admin may delete a group"));
    }

    let deleted = groups::delete_group(state.broker.store().pool(), &group.id).await?;
    Ok(ok(DeletedResponse { deleted }))
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    /// Agent id or name
    pub agent: String,
}

#[derive(Debug, Serialize)]
pub struct MembershipResponse {
    pub group_id: String,
    pub agent_id: String,
    pub member: bool,
}

pub async fn add_member(
    State(state): State<GroupsApiState>,
    identity: Identity,
    Path(id): Path<String>,
    Json(body): Json<AddMemberRequest>,
) -> Result<Json<Envelope<MembershipResponse>>, ApiError> {
    identity.authorize(Resource::Groups, Action::Write)?;
    let group = resolve(&state, &id).await?;
    if !can_manage(&identity, &group) {
        return Err(ApiError::forbidden("only the creator or an admin may manage members"));
    }

    let pool = state.broker.store().pool();
    let agent = match agents::get_agent(pool, &body.agent).await? {
        Some(agent) => Some(agent),
        None => agents::get_by_name(pool, &body.agent).await?,
    }
    .ok_or_else(|| ApiError::not_found(format!("agent '{}' not found", body.agent)))?;
    if agent.status != AgentStatus::Active {
        return Err(ApiError::validation(format!(
            "agent '{}' is inactive",
            body.agent
        )));
    }

    groups::add_member(pool, &group.id, &agent.id).await?;
    Ok(ok(MembershipResponse {
        group_id: group.id,
        agent_id: agent.id,
        member: true,
    }))
}

pub async fn remove_member(
    State(state): State<GroupsApiState>,
    identity: Identity,
    Path((id, agent_id)): Path<(String, String)>,
) -> Result<Json<Envelope<MembershipResponse>>, ApiError> {
    identity.authorize(Resource::Groups, Action::Write)?;
    let group = resolve(&state, &id).await?;
    if !can_manage(&identity, &group) {
        return Err(ApiError::forbidden("only the creator or an admin may manage members"));
    }

    let removed =
        groups::remove_member(state.broker.store().pool(), &group.id, &agent_id).await?;
    if !removed {
        return Err(ApiError::not_found("agent is not a member of this group"));
    }
    Ok(ok(MembershipResponse {
        group_id: group.id,
        agent_id,
        member: false,
    }))
}

pub async fn list_members(
    State(state): State<GroupsApiState>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<Envelope<Vec<String>>>, ApiError> {
    identity.authorize(Resource::Groups, Action::Read)?;
    let group = resolve(&state, &id).await?;
    let members = groups::member_ids(state.broker.store().pool(), &group.id).await?;
    Ok(ok(members))
}
