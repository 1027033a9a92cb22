//! Broker statistics endpoint

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::api::auth::{Action, Identity, Resource};
use crate::api::types::{ApiError, Envelope, ok};
use crate::broker::BrokerService;
use crate::bus::TopicStats;
use crate::data::repositories::deliveries;

/// Shared state for the stats endpoint
#[derive(Clone)]
pub struct StatsApiState {
    pub broker: Arc<BrokerService>,
}

pub fn routes(broker: Arc<BrokerService>) -> Router<()> {
    let state = StatsApiState { broker };
    Router::new().route("/stats", get(stats)).with_state(state)
}

#[derive(Debug, Serialize)]
pub struct DeliveryCount {
    pub status: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub deliveries: Vec<DeliveryCount>,
    pub topics: Vec<TopicStats>,
    pub live_mailboxes: usize,
}

pub async fn stats(
    State(state): State<StatsApiState>,
    identity: Identity,
) -> Result<Json<Envelope<StatsResponse>>, ApiError> {
    identity.authorize(Resource::Stats, Action::Read)?;

    let counts = deliveries::status_counts(state.broker.store().pool()).await?;
    Ok(ok(StatsResponse {
        deliveries: counts
            .into_iter()
            .map(|(status, count)| DeliveryCount { status, count })
            .collect(),
        topics: state.broker.bus().all_topic_stats(),
        live_mailboxes: state.broker.bus().mailbox_count(),
    }))
}
