//! Agent API endpoints
//!
//! Self-registration is loopback-only and is the sole way to obtain a
//! credential without an existing one; everything else is a read-only
//! directory plus the caller identity echo.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::api::auth::{Action, AuthGate, Identity, Resource};
use crate::api::types::{ApiError, ok};
use crate::core::constants::MAX_NAME_LENGTH;
use crate::data::StoreService;
use crate::data::repositories::agents;
use crate::data::types::{AgentKind, AgentRow};

/// Shared state for agent endpoints
#[derive(Clone)]
pub struct AgentsApiState {
    pub store: Arc<StoreService>,
    pub gate: Arc<AuthGate>,
}

/// Routes that require authentication
pub fn routes(store: Arc<StoreService>, gate: Arc<AuthGate>) -> Router<()> {
    let state = AgentsApiState { store, gate };
    Router::new()
        .route("/agents", get(list_agents))
        .route("/agents/{id}", get(get_agent))
        .route("/whoami", get(whoami))
        .with_state(state)
}

/// The loopback-only registration route (mounted without auth)
pub fn register_routes(store: Arc<StoreService>, gate: Arc<AuthGate>) -> Router<()> {
    let state = AgentsApiState { store, gate };
    Router::new()
        .route("/agents/auto-register", post(auto_register))
        .with_state(state)
}

fn valid_name(name: &str) -> bool {
    // compiled once; names are short identifiers, not free text
    static NAME_RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = NAME_RE.get_or_init(|| {
        regex::Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9._-]*$").expect("static pattern")
    });
    !name.is_empty() && name.len() <= MAX_NAME_LENGTH && re.is_match(name)
}

#[derive(Debug, Deserialize, Validate)]
pub struct AutoRegisterRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub kind: Option<AgentKind>,
    /// Fingerprint components: a stable identity for the local caller
    #[validate(length(min = 1, max = 256))]
    pub host: String,
    #[validate(length(min = 1, max = 512))]
    pub executable: String,
    pub profile: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AutoRegisterResponse {
    pub agent: AgentRow,
    /// Shown exactly once; only its hash is stored
    pub token: String,
    pub rotated: bool,
}

/// Loopback-only self-registration
///
/// A known fingerprint rotates the credential; an unknown one creates the
/// agent and subscribes it to the broadcast topic.
pub async fn auto_register(
    State(state): State<AgentsApiState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<AutoRegisterRequest>,
) -> Result<Json<crate::api::types::Envelope<AutoRegisterResponse>>, ApiError> {
    if !addr.ip().is_loopback() {
        tracing::warn!(peer = %addr, "Rejected non-loopback auto-register");
        return Err(ApiError::forbidden(
            "self-registration is only available on the loopback interface",
        ));
    }

    body.validate()
        .map_err(|e| ApiError::validation(e.to_string()))?;
    if !valid_name(&body.name) {
        return Err(ApiError::validation(
            "name must start alphanumeric and contain only [a-zA-Z0-9._-]",
        ));
    }

    let fingerprint = format!(
        "{}:{}:{}",
        body.host,
        body.executable,
        body.profile.as_deref().unwrap_or("default")
    );
    let registration = state
        .gate
        .register(&body.name, body.kind.unwrap_or(AgentKind::Ai), &fingerprint)
        .await?;

    Ok(ok(AutoRegisterResponse {
        agent: registration.agent,
        token: registration.token,
        rotated: registration.rotated,
    }))
}

pub async fn list_agents(
    State(state): State<AgentsApiState>,
    identity: Identity,
) -> Result<Json<crate::api::types::Envelope<Vec<AgentRow>>>, ApiError> {
    identity.authorize(Resource::Agents, Action::Read)?;
    let all = agents::list_agents(state.store.pool()).await?;
    Ok(ok(all))
}

pub async fn get_agent(
    State(state): State<AgentsApiState>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<crate::api::types::Envelope<AgentRow>>, ApiError> {
    identity.authorize(Resource::Agents, Action::Read)?;
    let agent = match agents::get_agent(state.store.pool(), &id).await? {
        Some(agent) => Some(agent),
        None => agents::get_by_name(state.store.pool(), &id).await?,
    };
    agent
        .map(ok)
        .ok_or_else(|| ApiError::not_found("agent not found"))
}

pub async fn whoami(
    identity: Identity,
) -> Json<crate::api::types::Envelope<Identity>> {
    ok(identity)
}
