//! Credential gate
//!
//! Resolves bearer credentials to identities. Tokens are sha256-hashed and
//! matched against the stored hash in constant time; positive validations
//! are cached with a short TTL and invalidated on rotation. The gate also
//! owns registration: fresh agents get a credential and the broadcast
//! subscription, known fingerprints get an atomic credential rotation.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use thiserror::Error;

use crate::core::constants::{
    AUTH_CACHE_MAX_ENTRIES, AUTH_CACHE_TTL_SECS, ROOT_AGENT_NAME,
};
use crate::data::repositories::{agents, topics};
use crate::data::types::{AgentKind, AgentRow, AgentStatus};
use crate::data::{StoreError, StoreService};
use crate::utils::crypto::{constant_time_eq, generate_token, hash_token, is_valid_token};

use super::identity::Identity;

#[derive(Error, Debug)]
pub enum GateError {
    #[error("invalid credential")]
    Unauthorized,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a (re-)registration: the agent plus its one-time token
pub struct Registration {
    pub agent: AgentRow,
    pub token: String,
    pub rotated: bool,
}

pub struct AuthGate {
    store: Arc<StoreService>,
    broadcast_topic_id: String,
    /// token-hash → identity, short TTL
    cache: Cache<String, Identity>,
    bootstrap_token: Option<String>,
}

impl AuthGate {
    /// Build the gate, creating the root admin agent on first init
    ///
    /// The root credential is held in memory for a single banner print and
    /// never stored in the clear.
    pub async fn init(
        store: Arc<StoreService>,
        broadcast_topic_id: String,
    ) -> Result<Self, StoreError> {
        let cache = Cache::builder()
            .max_capacity(AUTH_CACHE_MAX_ENTRIES)
            .time_to_live(Duration::from_secs(AUTH_CACHE_TTL_SECS))
            .build();

        let bootstrap_token =
            if agents::get_by_name(store.pool(), ROOT_AGENT_NAME).await?.is_none() {
                let token = generate_token();
                let root = agents::create_agent(
                    store.pool(),
                    ROOT_AGENT_NAME,
                    AgentKind::System,
                    &["admin".to_string()],
                    &hash_token(&token),
                    None,
                )
                .await?;
                topics::subscribe(store.pool(), &root.id, &broadcast_topic_id, 0).await?;
                tracing::info!(agent_id = %root.id, "Root agent created");
                Some(token)
            } else {
                None
            };

        Ok(Self {
            store,
            broadcast_topic_id,
            cache,
            bootstrap_token,
        })
    }

    /// The root credential, present only on the run that created it
    pub fn bootstrap_token(&self) -> Option<&str> {
        self.bootstrap_token.as_deref()
    }

    /// Resolve a bearer token to an identity
    pub async fn authenticate(&self, token: &str) -> Result<Identity, GateError> {
        if !is_valid_token(token) {
            return Err(GateError::Unauthorized);
        }
        let hash = hash_token(token);

        if let Some(identity) = self.cache.get(&hash).await {
            return Ok(identity);
        }

        let agent = agents::get_by_credential_hash(self.store.pool(), &hash)
            .await?
            .ok_or(GateError::Unauthorized)?;

        // The index did the lookup; compare again in constant time so the
        // equality itself is not a timing oracle.
        if !constant_time_eq(&agent.credential_hash, &hash) {
            return Err(GateError::Unauthorized);
        }
        if agent.status != AgentStatus::Active {
            return Err(GateError::Unauthorized);
        }

        if let Err(e) = agents::touch_last_seen(self.store.pool(), &agent.id).await {
            tracing::warn!(error = %e, "Failed to update last_seen");
        }

        let identity = Identity {
            agent_id: agent.id,
            name: agent.name,
            kind: agent.kind,
            roles: agent.roles,
        };
        self.cache.insert(hash, identity.clone()).await;
        Ok(identity)
    }

    /// Register a new agent, or rotate the credential of the agent that
    /// presented this fingerprint before
    pub async fn register(
        &self,
        name: &str,
        kind: AgentKind,
        fingerprint: &str,
    ) -> Result<Registration, StoreError> {
        if let Some(existing) =
            agents::get_by_fingerprint(self.store.pool(), fingerprint).await?
        {
            let token = generate_token();
            agents::rotate_credential(self.store.pool(), &existing.id, &hash_token(&token))
                .await?;
            // the replaced credential must stop authenticating immediately
            self.cache.invalidate(&existing.credential_hash).await;
            tracing::info!(agent_id = %existing.id, "Credential rotated via fingerprint");
            return Ok(Registration {
                agent: existing,
                token,
                rotated: true,
            });
        }

        let token = generate_token();
        let agent = agents::create_agent(
            self.store.pool(),
            name,
            kind,
            &["agent".to_string()],
            &hash_token(&token),
            Some(fingerprint),
        )
        .await?;
        // every agent joins the reserved broadcast topic at registration
        topics::subscribe(self.store.pool(), &agent.id, &self.broadcast_topic_id, 0).await?;
        tracing::info!(agent_id = %agent.id, name = %name, "Agent registered");

        Ok(Registration {
            agent,
            token,
            rotated: false,
        })
    }
}
