//! Caller identity and capability checks

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::Serialize;

use crate::api::types::ApiError;
use crate::data::types::AgentKind;

/// Protected resource families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Agents,
    Messages,
    Topics,
    Groups,
    Stats,
}

impl Resource {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Resource::Agents => "agents",
            Resource::Messages => "messages",
            Resource::Topics => "topics",
            Resource::Groups => "groups",
            Resource::Stats => "stats",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
}

impl Action {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Write => "write",
        }
    }
}

/// Authenticated caller: agent id, name, and role set
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub agent_id: String,
    pub name: String,
    pub kind: AgentKind,
    pub roles: Vec<String>,
}

fn role_allows(role: &str, resource: Resource, action: Action) -> bool {
    match role {
        "admin" => true,
        "agent" => match resource {
            Resource::Messages | Resource::Topics | Resource::Groups => true,
            Resource::Agents | Resource::Stats => action == Action::Read,
        },
        "observer" => action == Action::Read,
        _ => false,
    }
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == "admin")
    }

    /// Enforce `(resource, action)`; an authenticated caller without the
    /// capability always gets Forbidden, never NotFound.
    pub fn authorize(&self, resource: Resource, action: Action) -> Result<(), ApiError> {
        if self
            .roles
            .iter()
            .any(|role| role_allows(role, resource, action))
        {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!(
                "missing capability: {}:{}",
                resource.as_str(),
                action.as_str()
            )))
        }
    }
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .ok_or_else(|| ApiError::internal("identity missing from request"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(roles: &[&str]) -> Identity {
        Identity {
            agent_id: "a1".to_string(),
            name: "tester".to_string(),
            kind: AgentKind::Ai,
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn test_admin_can_do_anything() {
        let id = identity(&["admin"]);
        assert!(id.is_admin());
        id.authorize(Resource::Agents, Action::Write).unwrap();
        id.authorize(Resource::Stats, Action::Read).unwrap();
    }

    #[test]
    fn test_agent_capabilities() {
        let id = identity(&["agent"]);
        id.authorize(Resource::Messages, Action::Write).unwrap();
        id.authorize(Resource::Topics, Action::Write).unwrap();
        id.authorize(Resource::Agents, Action::Read).unwrap();
        assert!(id.authorize(Resource::Agents, Action::Write).is_err());
    }

    #[test]
    fn test_observer_is_read_only() {
        let id = identity(&["observer"]);
        id.authorize(Resource::Messages, Action::Read).unwrap();
        assert!(id.authorize(Resource::Messages, Action::Write).is_err());
    }

    #[test]
    fn test_unknown_role_denied_with_forbidden() {
        let id = identity(&["mystery"]);
        let err = id.authorize(Resource::Messages, Action::Read).unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[test]
    fn test_any_granting_role_suffices() {
        let id = identity(&["observer", "agent"]);
        id.authorize(Resource::Messages, Action::Write).unwrap();
    }
}
