//! Cross-cutting HTTP middleware

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tower_http::cors::{Any, CorsLayer};

use super::types::{ApiError, Envelope};

/// Permissive CORS: callers are programmatic agents, not browsers with
/// ambient credentials.
pub fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Envelope-shaped 404 for unmatched routes
pub async fn handle_404() -> impl IntoResponse {
    let envelope: Envelope<()> = Envelope {
        ok: false,
        data: None,
        error: Some(ApiError::not_found("route not found").body()),
        pagination: None,
    };
    (StatusCode::NOT_FOUND, Json(envelope))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_404_is_enveloped() {
        let response = handle_404().await.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
