//! Health probe

use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::api::types::{Envelope, ok};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Build the health route (no auth)
pub fn routes() -> Router<()> {
    Router::new().route("/healthz", get(health))
}

pub async fn health() -> Json<Envelope<HealthResponse>> {
    ok(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_envelope() {
        let response = health().await;
        assert!(response.0.ok);
        assert!(response.0.error.is_none());
        assert_eq!(response.0.data.as_ref().unwrap().status, "ok");
    }
}
